//! WebGPU memory management.

use std::any::Any;
use std::sync::Arc;

use arche_core::backend::BufferBackend;
use arche_core::buffer::BufferView;
use arche_core::error::{ArcheError, Result};

use crate::adapter::WgpuShared;

/// Copy offsets and sizes must be multiples of this.
pub const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Round `size` up to the copy alignment.
pub fn align_copy(size: u64) -> u64 {
    size.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

/// A device-local buffer usable as storage, uniform and copy endpoint.
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl WgpuBuffer {
    /// Create a zeroed buffer of `size` bytes.
    ///
    /// The allocation is padded to the copy alignment; `size` is what the
    /// caller sees.
    pub fn new(shared: &WgpuShared, size: u64, label: Option<&str>) -> Result<Self> {
        if size == 0 {
            return Err(ArcheError::resource("buffer size must be non-zero"));
        }
        let buffer = shared.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size: align_copy(size),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(Self { buffer, size })
    }

    /// Get the underlying wgpu buffer.
    pub fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Native buffer behind `view`.
    pub fn of(view: &BufferView) -> Result<&WgpuBuffer> {
        view.buffer()
            .native()
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or_else(|| {
                ArcheError::argument(format!(
                    "buffer {} was not created by the wgpu backend",
                    view.buffer().id()
                ))
            })
    }
}

impl BufferBackend for WgpuBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A buffer mapped for reading once the copy into it has executed.
pub struct Readback {
    buffer: wgpu::Buffer,
    len: u64,
    mapped: Arc<parking_lot::Mutex<Option<std::result::Result<(), wgpu::BufferAsyncError>>>>,
}

impl Readback {
    /// Create a staging buffer for `len` bytes.
    pub fn new(shared: &WgpuShared, len: u64) -> Self {
        let buffer = shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Arche Readback"),
            size: align_copy(len.max(1)),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            len,
            mapped: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// The staging buffer.
    pub fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Request the mapping; call after the copy was submitted.
    pub fn request_map(&self) {
        let slot = Arc::clone(&self.mapped);
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                *slot.lock() = Some(result);
            });
    }

    /// Whether the mapping callback has fired.
    pub fn is_ready(&self) -> bool {
        self.mapped.lock().is_some()
    }

    /// Read the mapped bytes; `None` when the mapping has not finished.
    pub fn read(&self) -> Option<Result<Vec<u8>>> {
        let state = self.mapped.lock().take()?;
        Some(match state {
            Ok(()) => {
                let bytes = {
                    let view = self.buffer.slice(..).get_mapped_range();
                    view[..self.len as usize].to_vec()
                };
                self.buffer.unmap();
                Ok(bytes)
            }
            Err(e) => Err(ArcheError::lost(format!("readback mapping failed: {}", e))),
        })
    }
}
