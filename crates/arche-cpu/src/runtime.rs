//! Provider and device for the host interpreter.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, info};

use arche_core::backend::{
    BufferBackend, CounterBackend, DeviceBackend, DeviceProvider, KernelBackend, KernelSource,
    StreamBackend, StreamContext,
};
use arche_core::config::DeviceConfig;
use arche_core::error::{ArcheError, Result};
use arche_core::types::{Backend, DeviceInfo, DeviceLimits, DeviceType};

use crate::interp::LOOP_LIMIT;
use crate::kernel::CpuKernel;
use crate::memory::CpuBuffer;
use crate::stream::CpuStream;

/// Adapter name reported by the host interpreter.
pub const ADAPTER_NAME: &str = "Host Interpreter";

/// Enumerates the single host-interpreter adapter.
#[derive(Debug, Clone, Copy)]
pub struct CpuProvider {
    loop_limit: u64,
}

impl CpuProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self {
            loop_limit: LOOP_LIMIT,
        }
    }

    /// Iterations after which a loop in a kernel counts as hung and the
    /// device is lost.
    pub fn with_loop_limit(mut self, limit: u64) -> Self {
        self.loop_limit = limit.max(1);
        self
    }

    /// Description of the host-interpreter adapter.
    pub fn adapter_info() -> DeviceInfo {
        DeviceInfo {
            name: ADAPTER_NAME.to_string(),
            device_type: DeviceType::Cpu,
            backend: Backend::Cpu,
            vendor: 0,
            driver: format!("arche-cpu {}", env!("CARGO_PKG_VERSION")),
            index: 0,
            limits: DeviceLimits {
                max_buffer_size: 1 << 30,
                max_workgroups_per_dimension: 65_535,
                max_workgroup_size: [1024, 1024, 64],
                max_invocations_per_workgroup: 1024,
                min_storage_buffer_offset_alignment: 4,
            },
        }
    }
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for CpuProvider {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn adapters(&self) -> Vec<DeviceInfo> {
        vec![Self::adapter_info()]
    }

    fn open(&self, info: &DeviceInfo, config: &DeviceConfig) -> Result<Arc<dyn DeviceBackend>> {
        if info.backend != Backend::Cpu || info.index != 0 {
            return Err(ArcheError::NoDeviceFound(format!(
                "host interpreter has no adapter '{}'",
                info
            )));
        }
        info!(
            label = config.label.as_deref().unwrap_or(""),
            loop_limit = self.loop_limit,
            "Opening host interpreter device"
        );
        Ok(Arc::new(CpuDevice::with_loop_limit(self.loop_limit)))
    }
}

/// Counter slots filled from the host clock when a sample executes.
#[derive(Debug, Default)]
pub struct CpuCounter;

impl CounterBackend for CpuCounter {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opened host-interpreter device.
pub struct CpuDevice {
    info: DeviceInfo,
    loop_limit: u64,
}

impl CpuDevice {
    /// Open the device directly, bypassing enumeration.
    pub fn new() -> Self {
        Self::with_loop_limit(LOOP_LIMIT)
    }

    /// Open the device with a custom loop watchdog.
    pub fn with_loop_limit(loop_limit: u64) -> Self {
        Self {
            info: CpuProvider::adapter_info(),
            loop_limit,
        }
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(&self, size: u64, label: Option<&str>) -> Result<Arc<dyn BufferBackend>> {
        Ok(Arc::new(CpuBuffer::new(size, label)?))
    }

    fn create_stream(&self, ctx: StreamContext) -> Result<Box<dyn StreamBackend>> {
        debug!(stream = ctx.stream_id, "Spawning interpreter stream");
        Ok(Box::new(CpuStream::spawn(ctx)?))
    }

    fn compile_kernel(&self, source: &KernelSource<'_>) -> Result<Arc<dyn KernelBackend>> {
        Ok(Arc::new(CpuKernel::compile(source, self.loop_limit)?))
    }

    fn create_counter(&self, sample_count: u32) -> Result<Arc<dyn CounterBackend>> {
        debug!(sample_count, "Creating host clock counter");
        Ok(Arc::new(CpuCounter))
    }

    fn wait_idle(&self) -> Result<()> {
        // Streams drain on drop; nothing runs outside a stream.
        Ok(())
    }
}
