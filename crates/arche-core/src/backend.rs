//! Backend interface.
//!
//! A backend plugs into the execution model through four traits:
//!
//! - [`DeviceProvider`] enumerates adapters and opens one of them.
//! - [`DeviceBackend`] creates native buffers, streams and kernels.
//! - [`StreamBackend`] executes submitted [`CommandBatch`]es in order and
//!   reports completion through the stream's [`Timeline`].
//! - [`BufferBackend`] / [`KernelBackend`] / [`CounterBackend`] are the
//!   native objects behind [`Buffer`](crate::buffer::Buffer),
//!   [`Kernel`](crate::kernel::Kernel) and [`Counter`](crate::counter::Counter);
//!   a backend recovers its own type with `as_any().downcast_ref()`.
//!
//! All validation that the caller can observe synchronously happens in the
//! core before a backend sees a command. A backend only rejects what its
//! hardware cannot express.

use std::any::Any;
use std::sync::Arc;

use crate::capture::CaptureHub;
use crate::command::Command;
use crate::config::DeviceConfig;
use crate::error::Result;
use crate::shader::{KernelSignature, ShaderModule};
use crate::stream::Timeline;
use crate::types::{Backend, DeviceInfo};

/// Native memory behind a buffer.
pub trait BufferBackend: Send + Sync {
    /// Size of the native allocation in bytes.
    fn size(&self) -> u64;

    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Native executable behind a kernel.
pub trait KernelBackend: Send + Sync {
    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Native timestamp queries behind a counter.
pub trait CounterBackend: Send + Sync {
    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Everything a backend needs to build a kernel.
pub struct KernelSource<'a> {
    /// Validated module shared with other kernels of the same library.
    pub module: &'a Arc<ShaderModule>,
    /// Reflected entry point signature.
    pub signature: &'a KernelSignature,
}

/// Per-stream wiring handed to a backend when a stream is created.
#[derive(Clone)]
pub struct StreamContext {
    /// Owning device id.
    pub device_id: u64,
    /// Stream id.
    pub stream_id: u64,
    /// Completion marker shared with the core stream.
    pub timeline: Arc<Timeline>,
    /// Capture recorder of the device.
    pub capture: Arc<CaptureHub>,
}

/// An ordered group of commands submitted by one `dispatch` call.
pub struct CommandBatch {
    /// Sequence number; the timeline reaches `seq` once the batch is done.
    pub seq: u64,
    /// Commands in execution order.
    pub commands: Vec<Command>,
}

/// Native execution queue behind a stream.
///
/// Dropping a stream backend must drain all work already submitted.
pub trait StreamBackend: Send + Sync {
    /// Queue a batch; must not block on its execution.
    fn submit(&self, batch: CommandBatch) -> Result<()>;

    /// Drive the backend until every batch up to `target` can complete.
    ///
    /// Backends that complete batches on their own leave this as a no-op;
    /// the core then waits on the timeline.
    fn synchronize(&self, target: u64) -> Result<()> {
        let _ = target;
        Ok(())
    }
}

/// An opened native device.
pub trait DeviceBackend: Send + Sync {
    /// Adapter identity and limits.
    fn info(&self) -> &DeviceInfo;

    /// Allocate `size` bytes of zeroed device memory.
    fn create_buffer(&self, size: u64, label: Option<&str>) -> Result<Arc<dyn BufferBackend>>;

    /// Create an execution queue.
    fn create_stream(&self, ctx: StreamContext) -> Result<Box<dyn StreamBackend>>;

    /// Turn one entry point of a validated module into an executable.
    fn compile_kernel(&self, source: &KernelSource<'_>) -> Result<Arc<dyn KernelBackend>>;

    /// Create `sample_count` timestamp slots.
    ///
    /// Fails with `BackendUnavailable` when the adapter cannot sample time
    /// between commands.
    fn create_counter(&self, sample_count: u32) -> Result<Arc<dyn CounterBackend>>;

    /// Block until the device has no work in flight.
    fn wait_idle(&self) -> Result<()>;
}

/// Enumerates and opens the adapters of one backend.
pub trait DeviceProvider: Send + Sync {
    /// Backend this provider implements.
    fn backend(&self) -> Backend;

    /// All adapters, in the backend's own order.
    fn adapters(&self) -> Vec<DeviceInfo>;

    /// Open the adapter described by `info`.
    fn open(&self, info: &DeviceInfo, config: &DeviceConfig) -> Result<Arc<dyn DeviceBackend>>;
}
