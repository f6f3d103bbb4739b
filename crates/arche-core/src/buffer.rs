//! Device buffers and buffer views.
//!
//! A [`Buffer`] is a fixed-size device allocation. Its contents change only
//! through commands: [`Buffer::copy_from`] and [`Buffer::copy_to`] build
//! the transfer but touch nothing until the command is dispatched.
//!
//! A [`BufferView`] is a byte window into a buffer. Copies and kernel
//! arguments work on views; a whole buffer converts to its full view.

use std::fmt;
use std::sync::Arc;

use crate::backend::BufferBackend;
use crate::command::{Command, CommandOp};
use crate::device::DeviceShared;
use crate::error::{ArcheError, Result};
use crate::host::HostArray;

struct BufferInner {
    id: u64,
    device: Arc<DeviceShared>,
    size: u64,
    stride: u64,
    label: Option<String>,
    native: Arc<dyn BufferBackend>,
}

/// Handle to a device buffer.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub(crate) fn new(
        id: u64,
        device: Arc<DeviceShared>,
        size: u64,
        stride: u64,
        label: Option<&str>,
        native: Arc<dyn BufferBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id,
                device,
                size,
                stride,
                label: label.map(str::to_string),
                native,
            }),
        }
    }

    /// Process-unique buffer id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Owning device id.
    pub fn device_id(&self) -> u64 {
        self.inner.device.id
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.inner.size
    }

    /// Element stride in bytes (1 for buffers created by byte size).
    pub fn stride(&self) -> u64 {
        self.inner.stride
    }

    /// Number of whole elements.
    pub fn len(&self) -> u64 {
        self.inner.size / self.inner.stride
    }

    /// Whether the buffer has no bytes; never true for a created buffer.
    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
    }

    /// Optional label.
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Native allocation.
    pub fn native(&self) -> &Arc<dyn BufferBackend> {
        &self.inner.native
    }

    /// Whether two handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn describe(&self) -> String {
        match &self.inner.label {
            Some(label) => format!("buffer '{}' (#{})", label, self.inner.id),
            None => format!("buffer #{}", self.inner.id),
        }
    }

    /// View of the whole buffer.
    pub fn view(&self) -> BufferView {
        BufferView {
            buffer: self.clone(),
            offset: 0,
            len: self.inner.size,
        }
    }

    /// View of `count` elements starting at element `first`.
    pub fn view_range(&self, first: u64, count: u64) -> Result<BufferView> {
        let stride = self.inner.stride;
        let offset = first.checked_mul(stride);
        let len = count.checked_mul(stride);
        match (offset, len) {
            (Some(offset), Some(len))
                if offset.checked_add(len).is_some_and(|end| end <= self.inner.size) =>
            {
                Ok(BufferView {
                    buffer: self.clone(),
                    offset,
                    len,
                })
            }
            _ => Err(ArcheError::size_mismatch(
                format!(
                    "view of elements {}..{} in {}",
                    first,
                    first.saturating_add(count),
                    self.describe()
                ),
                first.saturating_add(count).saturating_mul(stride),
                self.inner.size,
            )),
        }
    }

    /// Command copying `src` into the start of this buffer.
    ///
    /// See [`BufferView::copy_from`] for the checks and the wgpu alignment
    /// rule.
    pub fn copy_from(&self, src: &HostArray) -> Result<Command> {
        self.view().copy_from(src)
    }

    /// Command copying the start of this buffer into `dst`.
    ///
    /// Same checks and alignment rule as [`Buffer::copy_from`].
    pub fn copy_to(&self, dst: &HostArray) -> Result<Command> {
        self.view().copy_to(dst)
    }

    /// Command copying `src` into the start of this buffer.
    pub fn copy_from_buffer(&self, src: &BufferView) -> Result<Command> {
        self.view().copy_from_view(src)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id)
            .field("size", &self.inner.size)
            .field("stride", &self.inner.stride)
            .finish()
    }
}

/// A byte window into a buffer.
#[derive(Clone)]
pub struct BufferView {
    buffer: Buffer,
    offset: u64,
    len: u64,
}

impl BufferView {
    /// Underlying buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Byte offset into the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte length.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range within the buffer.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.len
    }

    fn check_host_len(&self, op: &str, bytes: u64) -> Result<()> {
        if bytes > self.len {
            return Err(ArcheError::size_mismatch(
                format!("{} on {}", op, self.buffer.describe()),
                bytes,
                self.len,
            ));
        }
        let stride = self.buffer.stride();
        if bytes % stride != 0 {
            return Err(ArcheError::size_mismatch(
                format!(
                    "{} of {} bytes is not a whole number of {}-byte elements",
                    op, bytes, stride
                ),
                bytes.next_multiple_of(stride),
                bytes,
            ));
        }
        Ok(())
    }

    /// Command copying `src` into the start of this window.
    ///
    /// Fails with `SizeMismatch` if `src` is larger than the window or
    /// covers a partial element. The bytes of `src` are read when the
    /// command is dispatched.
    ///
    /// The wgpu backend copies whole 4-byte words only: a window offset or
    /// a length that is not a multiple of 4 fails `dispatch` with
    /// `InvalidArgument` there, while the host backend accepts it.
    pub fn copy_from(&self, src: &HostArray) -> Result<Command> {
        self.buffer.inner.device.ensure_usable()?;
        self.check_host_len("copy_from", src.size_bytes() as u64)?;
        Ok(Command::new(
            self.buffer.device_id(),
            CommandOp::CopyIn {
                dst: self.clone(),
                src: src.clone(),
            },
        ))
    }

    /// Command copying the start of this window into `dst`.
    ///
    /// `dst` is only read-consistent after the stream that executed the
    /// command has been synchronized.
    pub fn copy_to(&self, dst: &HostArray) -> Result<Command> {
        self.buffer.inner.device.ensure_usable()?;
        self.check_host_len("copy_to", dst.size_bytes() as u64)?;
        Ok(Command::new(
            self.buffer.device_id(),
            CommandOp::CopyOut {
                src: self.clone(),
                dst: dst.clone(),
            },
        ))
    }

    /// Command copying `src` into the start of this window.
    pub fn copy_from_view(&self, src: &BufferView) -> Result<Command> {
        self.buffer.inner.device.ensure_usable()?;
        if src.buffer.device_id() != self.buffer.device_id() {
            return Err(ArcheError::CrossDeviceReference {
                resource: src.buffer.describe(),
                owner: src.buffer.device_id(),
                target: self.buffer.device_id(),
            });
        }
        if src.len > self.len {
            return Err(ArcheError::size_mismatch(
                format!(
                    "copy from {} into {}",
                    src.buffer.describe(),
                    self.buffer.describe()
                ),
                src.len,
                self.len,
            ));
        }
        Ok(Command::new(
            self.buffer.device_id(),
            CommandOp::CopyBuffer {
                src: src.clone(),
                dst: self.clone(),
            },
        ))
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("buffer", &self.buffer.inner.id)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl From<&Buffer> for BufferView {
    fn from(buffer: &Buffer) -> Self {
        buffer.view()
    }
}
