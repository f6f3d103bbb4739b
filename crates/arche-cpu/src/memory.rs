//! Host memory behind CPU buffers.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use arche_core::backend::BufferBackend;
use arche_core::buffer::BufferView;
use arche_core::error::{ArcheError, Result};

static NEXT_STORE: AtomicU64 = AtomicU64::new(1);

/// A zero-initialized byte vector.
///
/// Streams lock several buffers at once for a launch; they always do so in
/// ascending `store_id` order.
pub struct CpuBuffer {
    store_id: u64,
    label: Option<String>,
    data: Arc<Mutex<Vec<u8>>>,
}

impl CpuBuffer {
    /// Allocate `size` zeroed bytes.
    pub fn new(size: u64, label: Option<&str>) -> Result<Self> {
        let size = usize::try_from(size)
            .map_err(|_| ArcheError::resource(format!("{} bytes exceed host address space", size)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            ArcheError::resource(format!("cannot allocate {} host bytes: {}", size, e))
        })?;
        data.resize(size, 0);

        Ok(Self {
            store_id: NEXT_STORE.fetch_add(1, Ordering::Relaxed),
            label: label.map(str::to_string),
            data: Arc::new(Mutex::new(data)),
        })
    }

    /// Lock-ordering key.
    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Lock the contents.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    /// Copy of the contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Native buffer behind `view`.
    pub fn of(view: &BufferView) -> Result<&CpuBuffer> {
        view.buffer()
            .native()
            .as_any()
            .downcast_ref::<CpuBuffer>()
            .ok_or_else(|| {
                ArcheError::argument(format!(
                    "buffer {} was not created by the host interpreter",
                    view.buffer().id()
                ))
            })
    }
}

impl BufferBackend for CpuBuffer {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buffer = CpuBuffer::new(16, Some("scratch")).unwrap();
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.label(), Some("scratch"));
        assert!(buffer.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_store_ids_increase() {
        let a = CpuBuffer::new(4, None).unwrap();
        let b = CpuBuffer::new(4, None).unwrap();
        assert!(b.store_id() > a.store_id());
    }
}
