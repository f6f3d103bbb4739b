//! Commands: deferred, one-shot units of work.
//!
//! A [`Command`] is produced by a buffer copy, a kernel launch or a counter
//! sample and is consumed by exactly one `Stream::dispatch`. It holds
//! counted references to every resource it touches, so releasing the
//! caller's handles never invalidates queued work.

use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferView;
use crate::counter::Counter;
use crate::error::{ArcheError, Result};
use crate::host::HostArray;
use crate::kernel::Kernel;
use crate::types::Dim3;

/// A value bound to one kernel argument.
#[derive(Clone)]
pub enum Argument {
    /// A buffer window.
    Buffer(BufferView),
    /// Inline bytes for a read-only argument.
    Bytes(Arc<[u8]>),
}

impl Argument {
    /// Inline bytes.
    pub fn bytes(data: impl AsRef<[u8]>) -> Self {
        Argument::Bytes(Arc::from(data.as_ref()))
    }

    /// Inline plain-old-data value.
    pub fn value<T: bytemuck::Pod>(value: &T) -> Self {
        Self::bytes(bytemuck::bytes_of(value))
    }

    /// Byte length of the bound window.
    pub fn len(&self) -> u64 {
        match self {
            Argument::Buffer(view) => view.len(),
            Argument::Bytes(bytes) => bytes.len() as u64,
        }
    }

    /// Whether the bound window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<BufferView> for Argument {
    fn from(view: BufferView) -> Self {
        Argument::Buffer(view)
    }
}

impl From<&BufferView> for Argument {
    fn from(view: &BufferView) -> Self {
        Argument::Buffer(view.clone())
    }
}

impl From<&crate::buffer::Buffer> for Argument {
    fn from(buffer: &crate::buffer::Buffer) -> Self {
        Argument::Buffer(buffer.view())
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Buffer(view) => f.debug_tuple("Buffer").field(view).finish(),
            Argument::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A kernel launch.
pub struct Launch {
    /// Kernel to run.
    pub kernel: Kernel,
    /// Number of thread groups.
    pub grid: Dim3,
    /// Threads per group.
    pub group: Dim3,
    /// Arguments in signature order.
    pub args: Vec<Argument>,
}

/// What a command does.
pub enum CommandOp {
    /// Copy host bytes into the start of a buffer window.
    CopyIn {
        /// Destination window.
        dst: BufferView,
        /// Source array.
        src: HostArray,
    },
    /// Copy the start of a buffer window into a host array.
    CopyOut {
        /// Source window.
        src: BufferView,
        /// Destination array.
        dst: HostArray,
    },
    /// Copy one buffer window into the start of another.
    CopyBuffer {
        /// Source window.
        src: BufferView,
        /// Destination window.
        dst: BufferView,
    },
    /// Run a kernel.
    Launch(Launch),
    /// Store the device time in one counter slot.
    SampleCounter {
        /// Counter to write.
        counter: Counter,
        /// Slot index.
        index: u32,
    },
}

/// A deferred unit of work for a stream.
pub struct Command {
    device_id: u64,
    op: CommandOp,
}

impl Command {
    pub(crate) fn new(device_id: u64, op: CommandOp) -> Self {
        Self { device_id, op }
    }

    /// Device the command was built against.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// The operation.
    pub fn op(&self) -> &CommandOp {
        &self.op
    }

    /// Short name used in logs and traces.
    pub fn name(&self) -> &str {
        match &self.op {
            CommandOp::CopyIn { .. } => "copy_from",
            CommandOp::CopyOut { .. } => "copy_to",
            CommandOp::CopyBuffer { .. } => "copy_buffer",
            CommandOp::Launch(launch) => launch.kernel.entry(),
            CommandOp::SampleCounter { .. } => "sample_counter",
        }
    }

    /// Bytes moved by a copy, 0 otherwise.
    pub fn transfer_bytes(&self) -> u64 {
        match &self.op {
            CommandOp::CopyIn { src, .. } => src.size_bytes() as u64,
            CommandOp::CopyOut { dst, .. } => dst.size_bytes() as u64,
            CommandOp::CopyBuffer { src, .. } => src.len(),
            CommandOp::Launch(_) | CommandOp::SampleCounter { .. } => 0,
        }
    }

    /// Replace the source of a host-to-device copy with a private copy of
    /// its current bytes; later host writes no longer reach the command.
    pub(crate) fn snapshot_host_source(&mut self) {
        if let CommandOp::CopyIn { src, .. } = &mut self.op {
            *src = src.snapshot();
        }
    }

    /// Fail with `CrossDeviceReference` if anything belongs to another device.
    pub(crate) fn check_device(&self, device_id: u64) -> Result<()> {
        let check = |resource: String, owner: u64| {
            if owner == device_id {
                Ok(())
            } else {
                Err(ArcheError::CrossDeviceReference {
                    resource,
                    owner,
                    target: device_id,
                })
            }
        };

        match &self.op {
            CommandOp::CopyIn { dst: view, .. } | CommandOp::CopyOut { src: view, .. } => {
                check(view.buffer().describe(), view.buffer().device_id())
            }
            CommandOp::CopyBuffer { src, dst } => {
                check(src.buffer().describe(), src.buffer().device_id())?;
                check(dst.buffer().describe(), dst.buffer().device_id())
            }
            CommandOp::Launch(launch) => {
                check(
                    format!("kernel '{}'", launch.kernel.entry()),
                    launch.kernel.device_id(),
                )?;
                for arg in &launch.args {
                    if let Argument::Buffer(view) = arg {
                        check(view.buffer().describe(), view.buffer().device_id())?;
                    }
                }
                Ok(())
            }
            CommandOp::SampleCounter { counter, .. } => {
                check(counter.describe(), counter.device_id())
            }
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("device_id", &self.device_id)
            .finish()
    }
}
