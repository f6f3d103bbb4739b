//! Typed views of raw bytes.
//!
//! Every variable, whatever its address space, lives in a byte region laid
//! out with the module's own offsets and strides, so storage buffers,
//! locals and private variables share one load/store path.

use naga::{ArraySize, Handle, Module, Scalar, ScalarKind, Type, TypeInner};

use super::value::{Pointee, Value};
use super::{InterpError, InterpResult};

/// Layout queries against one module.
#[derive(Clone, Copy)]
pub struct Layout<'m> {
    module: &'m Module,
}

impl<'m> Layout<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    fn inner(&self, ty: Handle<Type>) -> &'m TypeInner {
        &self.module.types[ty].inner
    }

    /// Byte size of a value of type `p`.
    pub fn size(&self, p: Pointee) -> u64 {
        match p {
            Pointee::Type(ty) => self.inner(ty).size(self.module.to_ctx()) as u64,
            Pointee::Scalar(s) => s.width as u64,
            Pointee::Vector { size, scalar } => size as u64 * scalar.width as u64,
        }
    }

    /// Zero value of type `p`.
    pub fn zero(&self, p: Pointee) -> InterpResult<Value> {
        match p {
            Pointee::Scalar(s) => Ok(Value::zero_scalar(s)),
            Pointee::Vector { size, scalar } => Ok(Value::Composite(vec![
                Value::zero_scalar(scalar);
                size as usize
            ])),
            Pointee::Type(ty) => match self.inner(ty) {
                TypeInner::Scalar(s) => Ok(Value::zero_scalar(*s)),
                TypeInner::Vector { size, scalar } => self.zero(Pointee::Vector {
                    size: *size,
                    scalar: *scalar,
                }),
                TypeInner::Array {
                    base,
                    size: ArraySize::Constant(n),
                    ..
                } => {
                    let element = self.zero(Pointee::Type(*base))?;
                    Ok(Value::Composite(vec![element; n.get() as usize]))
                }
                TypeInner::Struct { members, .. } => Ok(Value::Composite(
                    members
                        .iter()
                        .map(|m| self.zero(Pointee::Type(m.ty)))
                        .collect::<InterpResult<_>>()?,
                )),
                other => Err(InterpError::unsupported(format!(
                    "no value representation for {:?}",
                    other
                ))),
            },
        }
    }

    /// Read a value of type `p` at `offset`; out-of-range reads yield zero.
    pub fn read(&self, bytes: &[u8], offset: Option<u64>, p: Pointee) -> InterpResult<Value> {
        let size = self.size(p);
        match offset {
            Some(o) if o.checked_add(size).is_some_and(|end| end <= bytes.len() as u64) => {
                self.decode(bytes, o as usize, p)
            }
            _ => self.zero(p),
        }
    }

    /// Write `value` of type `p` at `offset`; out-of-range writes are dropped.
    pub fn write(
        &self,
        bytes: &mut [u8],
        offset: Option<u64>,
        p: Pointee,
        value: &Value,
    ) -> InterpResult<()> {
        let size = self.size(p);
        match offset {
            Some(o) if o.checked_add(size).is_some_and(|end| end <= bytes.len() as u64) => {
                self.encode(bytes, o as usize, p, value)
            }
            _ => Ok(()),
        }
    }

    fn decode(&self, bytes: &[u8], at: usize, p: Pointee) -> InterpResult<Value> {
        match p {
            Pointee::Scalar(s) => decode_scalar(bytes, at, s),
            Pointee::Vector { size, scalar } => Ok(Value::Composite(
                (0..size as usize)
                    .map(|i| decode_scalar(bytes, at + i * scalar.width as usize, scalar))
                    .collect::<InterpResult<_>>()?,
            )),
            Pointee::Type(ty) => match self.inner(ty) {
                TypeInner::Scalar(s) => decode_scalar(bytes, at, *s),
                TypeInner::Vector { size, scalar } => self.decode(
                    bytes,
                    at,
                    Pointee::Vector {
                        size: *size,
                        scalar: *scalar,
                    },
                ),
                TypeInner::Array {
                    base,
                    size: ArraySize::Constant(n),
                    stride,
                } => Ok(Value::Composite(
                    (0..n.get() as usize)
                        .map(|i| self.decode(bytes, at + i * *stride as usize, Pointee::Type(*base)))
                        .collect::<InterpResult<_>>()?,
                )),
                TypeInner::Struct { members, .. } => Ok(Value::Composite(
                    members
                        .iter()
                        .map(|m| self.decode(bytes, at + m.offset as usize, Pointee::Type(m.ty)))
                        .collect::<InterpResult<_>>()?,
                )),
                other => Err(InterpError::unsupported(format!("cannot load {:?}", other))),
            },
        }
    }

    fn encode(&self, bytes: &mut [u8], at: usize, p: Pointee, value: &Value) -> InterpResult<()> {
        match p {
            Pointee::Scalar(s) => encode_scalar(bytes, at, s, value),
            Pointee::Vector { scalar, .. } => {
                for (i, c) in value.components()?.iter().enumerate() {
                    encode_scalar(bytes, at + i * scalar.width as usize, scalar, c)?;
                }
                Ok(())
            }
            Pointee::Type(ty) => match self.inner(ty) {
                TypeInner::Scalar(s) => encode_scalar(bytes, at, *s, value),
                TypeInner::Vector { size, scalar } => self.encode(
                    bytes,
                    at,
                    Pointee::Vector {
                        size: *size,
                        scalar: *scalar,
                    },
                    value,
                ),
                TypeInner::Array { base, stride, .. } => {
                    for (i, c) in value.components()?.iter().enumerate() {
                        self.encode(bytes, at + i * *stride as usize, Pointee::Type(*base), c)?;
                    }
                    Ok(())
                }
                TypeInner::Struct { members, .. } => {
                    for (m, c) in members.iter().zip(value.components()?) {
                        self.encode(bytes, at + m.offset as usize, Pointee::Type(m.ty), c)?;
                    }
                    Ok(())
                }
                other => Err(InterpError::unsupported(format!("cannot store {:?}", other))),
            },
        }
    }

    /// Address of component `index` of a vector or array.
    ///
    /// Returns the byte offset, whether the index is in bounds, and the
    /// component type. Runtime-sized arrays are always "in bounds" here; the
    /// region length bounds them on access.
    pub fn element(&self, p: Pointee, index: i64) -> InterpResult<(u64, bool, Pointee)> {
        let vector = |size: naga::VectorSize, scalar: Scalar| -> InterpResult<(u64, bool, Pointee)> {
            let ok = index >= 0 && index < size as i64;
            Ok((
                index.max(0) as u64 * scalar.width as u64,
                ok,
                Pointee::Scalar(scalar),
            ))
        };
        match p {
            Pointee::Vector { size, scalar } => vector(size, scalar),
            Pointee::Type(ty) => match self.inner(ty) {
                TypeInner::Vector { size, scalar } => vector(*size, *scalar),
                TypeInner::Array { base, size, stride } => {
                    let ok = index >= 0
                        && match size {
                            ArraySize::Constant(n) => index < n.get() as i64,
                            _ => true,
                        };
                    Ok((
                        index.max(0) as u64 * *stride as u64,
                        ok,
                        Pointee::Type(*base),
                    ))
                }
                TypeInner::Struct { members, .. } => {
                    let member = usize::try_from(index)
                        .ok()
                        .and_then(|i| members.get(i))
                        .ok_or_else(|| InterpError::fault(format!("no struct member {}", index)))?;
                    Ok((member.offset as u64, true, Pointee::Type(member.ty)))
                }
                other => Err(InterpError::unsupported(format!("cannot index {:?}", other))),
            },
            Pointee::Scalar(_) => Err(InterpError::fault("cannot index a scalar")),
        }
    }

    /// Element stride of a runtime-sized array type.
    pub fn runtime_stride(&self, p: Pointee) -> InterpResult<u64> {
        match p {
            Pointee::Type(ty) => match self.inner(ty) {
                TypeInner::Array {
                    size: ArraySize::Dynamic,
                    stride,
                    ..
                } => Ok(*stride as u64),
                other => Err(InterpError::fault(format!(
                    "arrayLength of a non runtime-sized {:?}",
                    other
                ))),
            },
            other => Err(InterpError::fault(format!(
                "arrayLength of a non runtime-sized {:?}",
                other
            ))),
        }
    }
}

fn word(bytes: &[u8], at: usize) -> [u8; 4] {
    let mut w = [0u8; 4];
    w.copy_from_slice(&bytes[at..at + 4]);
    w
}

fn decode_scalar(bytes: &[u8], at: usize, s: Scalar) -> InterpResult<Value> {
    match (s.kind, s.width) {
        (ScalarKind::Bool, _) => Ok(Value::Bool(bytes[at] != 0)),
        (ScalarKind::Sint, 4) => Ok(Value::I32(i32::from_le_bytes(word(bytes, at)))),
        (ScalarKind::Uint, 4) => Ok(Value::U32(u32::from_le_bytes(word(bytes, at)))),
        (ScalarKind::Float, 4) => Ok(Value::F32(f32::from_le_bytes(word(bytes, at)))),
        _ => Err(InterpError::unsupported(format!("scalar {:?}", s))),
    }
}

fn encode_scalar(bytes: &mut [u8], at: usize, s: Scalar, value: &Value) -> InterpResult<()> {
    match (s.kind, value) {
        (ScalarKind::Bool, Value::Bool(b)) => {
            bytes[at..at + s.width as usize].fill(0);
            bytes[at] = *b as u8;
        }
        (ScalarKind::Sint, Value::I32(v)) => bytes[at..at + 4].copy_from_slice(&v.to_le_bytes()),
        (ScalarKind::Uint, Value::U32(v)) => bytes[at..at + 4].copy_from_slice(&v.to_le_bytes()),
        (ScalarKind::Float, Value::F32(v)) => bytes[at..at + 4].copy_from_slice(&v.to_le_bytes()),
        (kind, value) => {
            return Err(InterpError::fault(format!(
                "cannot store {:?} as {:?}",
                value, kind
            )))
        }
    }
    Ok(())
}
