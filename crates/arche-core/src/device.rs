//! Devices: the factory for every other resource.
//!
//! A [`Device`] is a cheap handle over shared state. Buffers, kernels,
//! streams and capture scopes each hold a counted reference to that state,
//! so the native context outlives every resource created from it. Streams
//! drain their queued work when dropped; the native device is released
//! only after the last of them is gone.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{DeviceBackend, DeviceProvider, KernelSource, StreamContext};
use crate::buffer::Buffer;
use crate::capture::{CaptureHub, DebugCapture};
use crate::config::DeviceConfig;
use crate::counter::Counter;
use crate::dtype::Element;
use crate::error::{ArcheError, Result};
use crate::kernel::{Kernel, KernelBuilder, KernelDesc};
use crate::shader::{ModuleCache, DEFAULT_LIB_NAME};
use crate::stream::{Stream, StreamInner, Timeline};
use crate::types::{Backend, DeviceInfo, DeviceKind, DeviceLimits, DeviceType};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique id for a device or resource.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct DeviceShared {
    pub(crate) id: u64,
    pub(crate) info: DeviceInfo,
    pub(crate) label: Option<String>,
    pub(crate) capture_dir: Option<PathBuf>,
    pub(crate) backend: Arc<dyn DeviceBackend>,
    pub(crate) modules: ModuleCache,
    pub(crate) capture: Arc<CaptureHub>,
    streams: Mutex<Vec<Weak<StreamInner>>>,
    lost: Mutex<Option<String>>,
    shut_down: AtomicBool,
}

impl DeviceShared {
    /// Fail if the device has faulted.
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        match &*self.lost.lock() {
            Some(reason) => Err(ArcheError::lost(reason.clone())),
            None => Ok(()),
        }
    }

    /// Fail if the device has faulted or was shut down.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ArcheError::state(format!(
                "device '{}' has been shut down",
                self.info.name
            )));
        }
        Ok(())
    }

    pub(crate) fn mark_lost(&self, reason: &str) {
        let mut lost = self.lost.lock();
        if lost.is_none() {
            tracing::error!(device = %self.info.name, "Device lost: {}", reason);
            *lost = Some(reason.to_string());
        }
    }

    fn live_streams(&self) -> Vec<Arc<StreamInner>> {
        let mut streams = self.streams.lock();
        streams.retain(|s| s.strong_count() > 0);
        streams.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            warn!(device = %self.info.name, "Error while releasing device: {}", e);
        }
        debug!(device = %self.info.name, id = self.id, "Device released");
    }
}

/// Handle to one compute device.
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
}

impl Device {
    /// Open the adapter `info` through `provider`.
    pub fn open(
        provider: &dyn DeviceProvider,
        info: &DeviceInfo,
        config: &DeviceConfig,
    ) -> Result<Self> {
        let backend = provider.open(info, config)?;
        let id = next_id();
        let info = backend.info().clone();

        info!(
            device = %info.name,
            backend = %info.backend,
            device_type = %info.device_type,
            id,
            "Opened device"
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                id,
                capture: Arc::new(CaptureHub::new(id, info.name.clone())),
                info,
                label: config.label.clone(),
                capture_dir: config.capture_dir.clone(),
                backend,
                modules: ModuleCache::new(),
                streams: Mutex::new(Vec::new()),
                lost: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Open the first adapter matching `config`.
    ///
    /// Backends are probed in `config.backends` order. Fails with
    /// `NoDeviceFound` when no adapter matches.
    pub fn create(providers: &[Box<dyn DeviceProvider>], config: &DeviceConfig) -> Result<Self> {
        let candidates = candidates(providers, config);
        if candidates.is_empty() {
            return Err(ArcheError::NoDeviceFound(format!(
                "no {} adapter among backends [{}]",
                config.kind,
                config
                    .backends
                    .iter()
                    .map(|b| b.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let mut last_err = None;
        for (provider, info) in candidates {
            if config.kind == DeviceKind::Any && !info.device_type.is_gpu() {
                warn!("No GPU adapter available, using {}", info);
            }
            match Device::open(provider, &info, config) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    warn!("Failed to open {}: {}", info, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ArcheError::NoDeviceFound(config.kind.to_string())))
    }

    /// Adapters matching `config`, in selection order.
    pub fn enumerate(providers: &[Box<dyn DeviceProvider>], config: &DeviceConfig) -> Vec<DeviceInfo> {
        candidates(providers, config)
            .into_iter()
            .map(|(_, info)| info)
            .collect()
    }

    /// Process-unique device id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Human-readable adapter name.
    pub fn name(&self) -> &str {
        &self.shared.info.name
    }

    /// Label from the config, if any.
    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Full adapter description.
    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Device type.
    pub fn device_type(&self) -> DeviceType {
        self.shared.info.device_type
    }

    /// Backend executing this device's work.
    pub fn backend(&self) -> Backend {
        self.shared.info.backend
    }

    /// Resource limits.
    pub fn limits(&self) -> &DeviceLimits {
        &self.shared.info.limits
    }

    /// Whether a device fault has been observed.
    pub fn is_lost(&self) -> bool {
        self.shared.lost.lock().is_some()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.shared.live_streams().len()
    }

    /// Number of distinct shader modules compiled on this device.
    pub fn cached_modules(&self) -> usize {
        self.shared.modules.len()
    }

    /// Create a new command stream.
    pub fn create_stream(&self) -> Result<Stream> {
        self.shared.ensure_usable()?;
        let id = next_id();
        let timeline = Arc::new(Timeline::new());
        let backend = self.shared.backend.create_stream(StreamContext {
            device_id: self.shared.id,
            stream_id: id,
            timeline: Arc::clone(&timeline),
            capture: Arc::clone(&self.shared.capture),
        })?;

        let inner = Arc::new(StreamInner::new(
            id,
            Arc::clone(&self.shared),
            backend,
            timeline,
        ));
        {
            let mut streams = self.shared.streams.lock();
            streams.retain(|s| s.strong_count() > 0);
            streams.push(Arc::downgrade(&inner));
        }
        debug!(device = %self.name(), stream = id, "Created stream");
        Ok(Stream { inner })
    }

    /// Create a buffer of `size` bytes with a one-byte element stride.
    pub fn create_buffer(&self, size: u64) -> Result<Buffer> {
        self.allocate(size, 1, None)
    }

    /// Create a buffer of `count` elements of `stride` bytes each.
    pub fn create_buffer_with_stride(&self, stride: u64, count: u64) -> Result<Buffer> {
        if stride == 0 || count == 0 {
            return Err(ArcheError::resource(format!(
                "buffer of {} elements with stride {} is empty",
                count, stride
            )));
        }
        let size = stride.checked_mul(count).ok_or_else(|| {
            ArcheError::resource(format!(
                "buffer of {} elements with stride {} overflows",
                count, stride
            ))
        })?;
        self.allocate(size, stride, None)
    }

    /// Create a buffer sized for `count` elements of `T`.
    pub fn create_buffer_for<T: Element>(&self, count: u64) -> Result<Buffer> {
        self.create_buffer_with_stride(std::mem::size_of::<T>() as u64, count)
    }

    /// Create a labeled buffer of `count` elements of `stride` bytes each.
    pub fn create_buffer_labeled(&self, label: &str, stride: u64, count: u64) -> Result<Buffer> {
        let size = stride
            .checked_mul(count)
            .filter(|s| *s > 0)
            .ok_or_else(|| ArcheError::resource(format!("invalid size for buffer '{}'", label)))?;
        self.allocate(size, stride, Some(label))
    }

    fn allocate(&self, size: u64, stride: u64, label: Option<&str>) -> Result<Buffer> {
        self.shared.ensure_usable()?;
        if size == 0 {
            return Err(ArcheError::resource("buffer size must be non-zero"));
        }
        let max = self.shared.info.limits.max_buffer_size;
        if size > max {
            return Err(ArcheError::resource(format!(
                "buffer of {} bytes exceeds device maximum of {} bytes",
                size, max
            )));
        }
        let native = self.shared.backend.create_buffer(size, label)?;
        let buffer = Buffer::new(next_id(), Arc::clone(&self.shared), size, stride, label, native);
        debug!(device = %self.name(), buffer = buffer.id(), size, stride, "Created buffer");
        Ok(buffer)
    }

    /// Create a counter with `sample_count` timestamp slots.
    ///
    /// Fails with `ResourceCreationFailed` for zero slots and with
    /// `BackendUnavailable` when the adapter has no timestamp queries.
    pub fn create_counter(&self, sample_count: u32) -> Result<Counter> {
        self.shared.ensure_usable()?;
        if sample_count == 0 {
            return Err(ArcheError::resource("counter needs at least one sample slot"));
        }
        let native = self.shared.backend.create_counter(sample_count)?;
        let counter = Counter::new(next_id(), Arc::clone(&self.shared), sample_count, native);
        debug!(device = %self.name(), counter = counter.id(), sample_count, "Created counter");
        Ok(counter)
    }

    /// Compile `source` and bind entry point `entry`.
    pub fn create_kernel(&self, source: &str, entry: &str) -> Result<Kernel> {
        self.kernel_builder().source(source).entry(entry).build()
    }

    /// Start building a kernel.
    pub fn kernel_builder(&self) -> KernelBuilder {
        KernelBuilder::new(self.clone())
    }

    /// Compile a kernel from a complete description.
    pub fn build_kernel(&self, desc: &KernelDesc) -> Result<Kernel> {
        let (entry, source) = match (&desc.entry, &desc.source) {
            (Some(entry), Some(source)) => (entry.as_str(), source.as_str()),
            (None, _) => {
                return Err(ArcheError::InvalidConfig(
                    "kernel description has no entry point".to_string(),
                ))
            }
            (_, None) => {
                return Err(ArcheError::InvalidConfig(
                    "kernel description has no source".to_string(),
                ))
            }
        };
        let lib_name = desc.lib_name.as_deref().unwrap_or(DEFAULT_LIB_NAME);

        self.shared.ensure_usable()?;
        let module = self.shared.modules.get_or_parse(lib_name, source)?;
        let signature = module.reflect(entry)?;
        let native = self.shared.backend.compile_kernel(&KernelSource {
            module: &module,
            signature: &signature,
        })?;

        debug!(
            device = %self.name(),
            kernel = %entry,
            lib = %lib_name,
            arguments = signature.arguments.len(),
            "Compiled kernel"
        );
        Ok(Kernel::new(
            next_id(),
            Arc::clone(&self.shared),
            module,
            signature,
            native,
        ))
    }

    /// Capture session for this device.
    pub fn debug_capture(&self) -> Result<DebugCapture> {
        self.shared.ensure_usable()?;
        Ok(DebugCapture::new(self.clone()))
    }

    /// Wait for all streams of this device to drain.
    pub fn synchronize(&self) -> Result<()> {
        for stream in self.shared.live_streams() {
            stream.synchronize()?;
        }
        Ok(())
    }

    /// Drain all work, then refuse further resource creation and dispatch.
    pub fn shutdown(&self) -> Result<()> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(device = %self.name(), "Shutting down device");
        for stream in self.shared.live_streams() {
            stream.synchronize()?;
        }
        self.shared.backend.wait_idle()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.shared.id)
            .field("name", &self.shared.info.name)
            .field("backend", &self.shared.info.backend)
            .finish()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Device {}

fn candidates<'a>(
    providers: &'a [Box<dyn DeviceProvider>],
    config: &DeviceConfig,
) -> Vec<(&'a dyn DeviceProvider, DeviceInfo)> {
    let mut found = Vec::new();
    for backend in &config.backends {
        let Some(provider) = providers.iter().find(|p| p.backend() == *backend) else {
            debug!("Backend {} is not compiled in", backend);
            continue;
        };
        for info in provider.adapters() {
            if config.kind.matches(info.device_type) && config.accepts_name(&info.name) {
                found.push((&**provider, info));
            }
        }
    }
    order_candidates(&mut found, config, |(_, info)| info.device_type);
    found
}

/// Stable reorder of matching adapters according to the config.
///
/// `Any` prefers GPUs over everything else; a power preference then ranks
/// GPU types. Without either, probe order is kept.
pub(crate) fn order_candidates<T>(
    list: &mut [T],
    config: &DeviceConfig,
    device_type: impl Fn(&T) -> DeviceType,
) {
    if config.kind == DeviceKind::Any {
        list.sort_by_key(|c| !device_type(c).is_gpu());
    }
    if let Some(pref) = config.power_preference {
        list.sort_by_key(|c| pref.rank(device_type(c)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerPreference;

    #[test]
    fn test_order_any_prefers_gpu() {
        let mut list = vec![DeviceType::Cpu, DeviceType::IntegratedGpu, DeviceType::Other];
        order_candidates(&mut list, &DeviceConfig::new(DeviceKind::Any), |t| *t);
        assert_eq!(list[0], DeviceType::IntegratedGpu);
        assert_eq!(list[1], DeviceType::Cpu);
    }

    #[test]
    fn test_order_power_preference() {
        let mut list = vec![DeviceType::IntegratedGpu, DeviceType::DiscreteGpu];
        let config =
            DeviceConfig::new(DeviceKind::Gpu).with_power_preference(PowerPreference::HighPerformance);
        order_candidates(&mut list, &config, |t| *t);
        assert_eq!(list, vec![DeviceType::DiscreteGpu, DeviceType::IntegratedGpu]);
    }

    #[test]
    fn test_order_keeps_backend_order() {
        let mut list = vec![DeviceType::IntegratedGpu, DeviceType::DiscreteGpu];
        order_candidates(&mut list, &DeviceConfig::new(DeviceKind::Gpu), |t| *t);
        assert_eq!(list, vec![DeviceType::IntegratedGpu, DeviceType::DiscreteGpu]);
    }

    #[test]
    fn test_no_providers() {
        let err = Device::create(&[], &DeviceConfig::new(DeviceKind::Gpu)).unwrap_err();
        assert!(matches!(err, ArcheError::NoDeviceFound(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = next_id();
        let b = next_id();
        assert_ne!(a, b);
    }
}
