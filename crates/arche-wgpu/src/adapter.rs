//! WebGPU adapter enumeration and device creation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use arche_core::backend::{
    BufferBackend, CounterBackend, DeviceBackend, DeviceProvider, KernelBackend, KernelSource,
    StreamBackend, StreamContext,
};
use arche_core::config::DeviceConfig;
use arche_core::error::{ArcheError, Result};
use arche_core::types::{Backend, DeviceInfo, DeviceLimits, DeviceType};

use crate::counter::{WgpuCounter, TIMESTAMP_FEATURES};
use crate::memory::WgpuBuffer;
use crate::shader::WgpuKernel;
use crate::stream::WgpuStream;

/// The wgpu device and queue shared by every resource of one device.
pub struct WgpuShared {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    fault: Arc<Mutex<Option<String>>>,
    // Error scopes are per device, not per thread.
    scope: Mutex<()>,
}

impl WgpuShared {
    /// First uncaptured error reported by the driver, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Block until all submitted work has finished.
    pub fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Process finished work without blocking.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Poll);
    }

    /// Run `f` inside a validation error scope.
    ///
    /// Errors raised by `f` come back here instead of reaching the
    /// uncaptured-error handler, which would lose the device.
    pub fn validated<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        let _scope = self.scope.lock();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    /// Whether timestamps can be written between commands.
    pub fn has_timestamps(&self) -> bool {
        self.device.features().contains(TIMESTAMP_FEATURES)
    }
}

/// Enumerates wgpu adapters.
pub struct WgpuProvider {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuProvider {
    /// Provider over every native graphics API.
    pub fn new() -> Self {
        Self::with_backends(wgpu::Backends::all())
    }

    /// Provider over a subset of graphics APIs.
    pub fn with_backends(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }

    fn raw_adapters(&self) -> Vec<wgpu::Adapter> {
        self.instance.enumerate_adapters(self.backends)
    }
}

impl Default for WgpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for WgpuProvider {
    fn backend(&self) -> Backend {
        Backend::Wgpu
    }

    fn adapters(&self) -> Vec<DeviceInfo> {
        self.raw_adapters()
            .iter()
            .enumerate()
            .map(|(index, adapter)| describe(index, adapter))
            .collect()
    }

    fn open(&self, info: &DeviceInfo, config: &DeviceConfig) -> Result<Arc<dyn DeviceBackend>> {
        let adapter = self
            .raw_adapters()
            .into_iter()
            .nth(info.index)
            .filter(|a| a.get_info().name == info.name)
            .ok_or_else(|| {
                ArcheError::NoDeviceFound(format!("adapter '{}' is no longer present", info.name))
            })?;

        let label = config.label.as_deref().unwrap_or("Arche Device");
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: adapter.features() & TIMESTAMP_FEATURES,
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|e| ArcheError::BackendUnavailable(format!("Failed to create device: {}", e)))?;

        let fault = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&fault);
        let name = info.name.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            warn!(device = %name, "Uncaptured wgpu error: {}", error);
            sink.lock().get_or_insert_with(|| error.to_string());
        }));

        let opened = describe(info.index, &adapter);
        info!(
            "Created WebGPU device: {} ({})",
            opened.name, opened.driver
        );

        Ok(Arc::new(WgpuDevice {
            info: opened,
            shared: Arc::new(WgpuShared {
                device,
                queue,
                fault,
                scope: Mutex::new(()),
            }),
        }))
    }
}

/// Whether at least one wgpu adapter is present.
pub fn is_wgpu_available() -> bool {
    !WgpuProvider::new().raw_adapters().is_empty()
}

fn describe(index: usize, adapter: &wgpu::Adapter) -> DeviceInfo {
    let info = adapter.get_info();
    let limits = adapter.limits();
    DeviceInfo {
        name: info.name.clone(),
        device_type: match info.device_type {
            wgpu::DeviceType::DiscreteGpu => DeviceType::DiscreteGpu,
            wgpu::DeviceType::IntegratedGpu => DeviceType::IntegratedGpu,
            wgpu::DeviceType::VirtualGpu => DeviceType::VirtualGpu,
            wgpu::DeviceType::Cpu => DeviceType::Cpu,
            wgpu::DeviceType::Other => DeviceType::Other,
        },
        backend: Backend::Wgpu,
        vendor: info.vendor,
        driver: format!("{:?} {}", info.backend, info.driver).trim().to_string(),
        index,
        limits: DeviceLimits {
            max_buffer_size: limits
                .max_buffer_size
                .min(limits.max_storage_buffer_binding_size as u64),
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            min_storage_buffer_offset_alignment: limits
                .min_storage_buffer_offset_alignment
                .max(limits.min_uniform_buffer_offset_alignment),
        },
    }
}

/// An opened wgpu device.
pub struct WgpuDevice {
    info: DeviceInfo,
    shared: Arc<WgpuShared>,
}

impl WgpuDevice {
    /// Shared device and queue.
    pub fn shared(&self) -> &Arc<WgpuShared> {
        &self.shared
    }
}

impl DeviceBackend for WgpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(&self, size: u64, label: Option<&str>) -> Result<Arc<dyn BufferBackend>> {
        Ok(Arc::new(WgpuBuffer::new(&self.shared, size, label)?))
    }

    fn create_stream(&self, ctx: StreamContext) -> Result<Box<dyn StreamBackend>> {
        debug!(stream = ctx.stream_id, device = %self.info.name, "Creating wgpu stream");
        Ok(Box::new(WgpuStream::new(Arc::clone(&self.shared), ctx)))
    }

    fn compile_kernel(&self, source: &KernelSource<'_>) -> Result<Arc<dyn KernelBackend>> {
        Ok(Arc::new(WgpuKernel::compile(&self.shared, source)?))
    }

    fn create_counter(&self, sample_count: u32) -> Result<Arc<dyn CounterBackend>> {
        if !self.shared.has_timestamps() {
            return Err(ArcheError::BackendUnavailable(format!(
                "adapter '{}' cannot write timestamps inside command encoders",
                self.info.name
            )));
        }
        Ok(Arc::new(WgpuCounter::new(&self.shared, sample_count)?))
    }

    fn wait_idle(&self) -> Result<()> {
        self.shared.wait();
        match self.shared.fault() {
            Some(fault) => Err(ArcheError::lost(fault)),
            None => Ok(()),
        }
    }
}
