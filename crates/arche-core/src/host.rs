//! Host arrays: the only data exchanged between the caller and a device.
//!
//! A [`HostArray`] is a typed, contiguous, fixed-length array. Clones share
//! storage, so the array handed to `Buffer::copy_to` is the same array the
//! caller reads after `Stream::synchronize`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dtype::{DType, Element};
use crate::error::{ArcheError, Result};

struct HostArrayInner {
    dtype: DType,
    len: usize,
    data: RwLock<Vec<u8>>,
}

/// Shared, typed host-side array.
#[derive(Clone)]
pub struct HostArray {
    inner: Arc<HostArrayInner>,
}

impl HostArray {
    fn from_parts(dtype: DType, len: usize, data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(HostArrayInner {
                dtype,
                len,
                data: RwLock::new(data),
            }),
        }
    }

    /// Create an array holding a copy of `data`.
    pub fn from_slice<T: Element>(data: &[T]) -> Self {
        Self::from_parts(T::DTYPE, data.len(), bytemuck::cast_slice(data).to_vec())
    }

    /// Create a zero-filled array of `len` elements of `T`.
    pub fn zeros<T: Element>(len: usize) -> Self {
        Self::zeros_of(T::DTYPE, len)
    }

    /// Create a zero-filled array of `len` elements of `dtype`.
    pub fn zeros_of(dtype: DType, len: usize) -> Self {
        Self::from_parts(dtype, len, vec![0u8; len * dtype.size_in_bytes()])
    }

    /// Create an array from raw bytes tagged with `dtype`.
    pub fn from_bytes(dtype: DType, bytes: Vec<u8>) -> Result<Self> {
        let elem = dtype.size_in_bytes();
        if bytes.len() % elem != 0 {
            return Err(ArcheError::size_mismatch(
                format!("{} bytes are not whole {} elements", bytes.len(), dtype),
                bytes.len().div_ceil(elem) as u64 * elem as u64,
                bytes.len() as u64,
            ));
        }
        Ok(Self::from_parts(dtype, bytes.len() / elem, bytes))
    }

    /// Element type tag.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.inner.dtype.size_in_bytes()
    }

    /// Total size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.len * self.element_size()
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.inner.dtype {
            return Err(ArcheError::DTypeMismatch {
                expected: T::DTYPE,
                found: self.inner.dtype,
            });
        }
        Ok(())
    }

    /// Copy the contents out as a typed vector.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        let data = self.inner.data.read();
        Ok(bytemuck::pod_collect_to_vec(&data))
    }

    /// Overwrite the contents from a typed slice of the same length.
    pub fn write<T: Element>(&self, values: &[T]) -> Result<()> {
        self.check_dtype::<T>()?;
        if values.len() != self.inner.len {
            return Err(ArcheError::size_mismatch(
                "host array write",
                (values.len() * self.element_size()) as u64,
                self.size_bytes() as u64,
            ));
        }
        self.inner
            .data
            .write()
            .copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }

    /// Run `f` over the raw bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.inner.data.read())
    }

    /// Copy of the raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.data.read().clone()
    }

    /// Overwrite bytes starting at `offset`; bytes past the end are dropped.
    ///
    /// Backends use this to deliver `copy_to` results.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.inner.data.write();
        if offset >= data.len() {
            return;
        }
        let end = (offset + bytes.len()).min(data.len());
        data[offset..end].copy_from_slice(&bytes[..end - offset]);
    }

    /// Array with its own storage holding the current contents.
    pub fn snapshot(&self) -> Self {
        Self::from_parts(self.inner.dtype, self.inner.len, self.to_bytes())
    }

    /// Whether two handles share storage.
    pub fn ptr_eq(&self, other: &HostArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostArray")
            .field("dtype", &self.inner.dtype)
            .field("len", &self.inner.len)
            .finish()
    }
}

impl<T: Element> From<&[T]> for HostArray {
    fn from(data: &[T]) -> Self {
        Self::from_slice(data)
    }
}

impl<T: Element> From<Vec<T>> for HostArray {
    fn from(data: Vec<T>) -> Self {
        Self::from_slice(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_and_back() {
        let arr = HostArray::from_slice(&[1.0f32, 2.0, 3.0]);
        assert_eq!(arr.dtype(), DType::F32);
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.size_bytes(), 12);
        assert_eq!(arr.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_to_vec_reads_written_bytes() {
        let arr = HostArray::zeros::<f32>(3);
        arr.write_bytes(4, bytemuck::bytes_of(&2.5f32));
        assert_eq!(arr.to_vec::<f32>().unwrap(), vec![0.0, 2.5, 0.0]);

        let bytes = HostArray::from_bytes(DType::U32, vec![1, 0, 0, 0, 0, 1, 0, 0]).unwrap();
        assert_eq!(bytes.to_vec::<u32>().unwrap(), vec![1, 256]);
        assert!(HostArray::zeros::<i32>(0).to_vec::<i32>().unwrap().is_empty());
    }

    #[test]
    fn test_dtype_mismatch() {
        let arr = HostArray::zeros::<u32>(4);
        let err = arr.to_vec::<f32>().unwrap_err();
        assert_eq!(
            err,
            ArcheError::DTypeMismatch {
                expected: DType::F32,
                found: DType::U32
            }
        );
    }

    #[test]
    fn test_clones_share_storage() {
        let arr = HostArray::zeros::<i32>(2);
        let alias = arr.clone();
        alias.write(&[7i32, -7]).unwrap();
        assert_eq!(arr.to_vec::<i32>().unwrap(), vec![7, -7]);
        assert!(arr.ptr_eq(&alias));
    }

    #[test]
    fn test_snapshot_detaches_storage() {
        let arr = HostArray::from_slice(&[1u32, 2]);
        let snap = arr.snapshot();
        arr.write(&[3u32, 4]).unwrap();
        assert!(!arr.ptr_eq(&snap));
        assert_eq!(snap.to_vec::<u32>().unwrap(), vec![1, 2]);
        assert_eq!(snap.dtype(), DType::U32);
    }

    #[test]
    fn test_write_bytes_clamps() {
        let arr = HostArray::zeros::<u8>(4);
        arr.write_bytes(2, &[1, 2, 3, 4]);
        assert_eq!(arr.to_vec::<u8>().unwrap(), vec![0, 0, 1, 2]);
        arr.write_bytes(10, &[9]);
        assert_eq!(arr.to_vec::<u8>().unwrap(), vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_from_bytes_rejects_partial_elements() {
        assert!(HostArray::from_bytes(DType::F32, vec![0; 6]).is_err());
        let arr = HostArray::from_bytes(DType::U16, vec![1, 0, 2, 0]).unwrap();
        assert_eq!(arr.to_vec::<u16>().unwrap(), vec![1, 2]);
    }
}
