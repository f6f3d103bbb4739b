//! Runtime values.

use naga::{Handle, Scalar, ScalarKind, Type, VectorSize};

use super::{InterpError, InterpResult};

/// Memory a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Kernel argument, by position in the signature.
    Binding(usize),
    /// `var<private>`, by global slot.
    Private(usize),
    /// `var<workgroup>`, by global slot.
    Workgroup(usize),
    /// Function-local variable, by slot on the invocation's local stack.
    Local(usize),
}

/// Type of the value a pointer refers to.
///
/// Component pointers into vectors have no type handle of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointee {
    /// A type from the module arena.
    Type(Handle<Type>),
    /// A scalar.
    Scalar(Scalar),
    /// A vector.
    Vector {
        /// Component count.
        size: VectorSize,
        /// Component type.
        scalar: Scalar,
    },
}

/// Typed address in one region.
///
/// `offset` is `None` once an index went out of bounds; such pointers load
/// zero and drop stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    /// Target region.
    pub region: Region,
    /// Byte offset within the region.
    pub offset: Option<u64>,
    /// Type at that offset.
    pub pointee: Pointee,
}

impl Pointer {
    /// Pointer to the start of `region`.
    pub fn root(region: Region, ty: Handle<Type>) -> Self {
        Self {
            region,
            offset: Some(0),
            pointee: Pointee::Type(ty),
        }
    }

    /// Move `bytes` further into the region, or invalidate when `in_bounds`
    /// is false.
    pub fn step(self, bytes: u64, in_bounds: bool, pointee: Pointee) -> Self {
        Self {
            region: self.region,
            offset: self
                .offset
                .filter(|_| in_bounds)
                .and_then(|o| o.checked_add(bytes)),
            pointee,
        }
    }
}

/// A value produced by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// `i32`
    I32(i32),
    /// `u32`
    U32(u32),
    /// `f32`
    F32(f32),
    /// Vector, array or struct components.
    Composite(Vec<Value>),
    /// Reference to memory.
    Pointer(Pointer),
}

impl Value {
    /// Zero of a scalar type.
    pub fn zero_scalar(scalar: Scalar) -> Self {
        match scalar.kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::Uint => Value::U32(0),
            ScalarKind::Float => Value::F32(0.0),
            _ => Value::I32(0),
        }
    }

    /// Boolean condition.
    pub fn as_bool(&self) -> InterpResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(InterpError::fault(format!("expected bool, found {:?}", other))),
        }
    }

    /// Integer used as an index or switch selector.
    pub fn as_index(&self) -> InterpResult<i64> {
        match self {
            Value::I32(v) => Ok(*v as i64),
            Value::U32(v) => Ok(*v as i64),
            other => Err(InterpError::fault(format!(
                "expected an integer, found {:?}",
                other
            ))),
        }
    }

    /// Float operand.
    pub fn as_f32(&self) -> InterpResult<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            other => Err(InterpError::fault(format!("expected f32, found {:?}", other))),
        }
    }

    /// Pointer operand.
    pub fn as_pointer(&self) -> InterpResult<Pointer> {
        match self {
            Value::Pointer(p) => Ok(*p),
            other => Err(InterpError::fault(format!(
                "expected a pointer, found {:?}",
                other
            ))),
        }
    }

    /// Components of a composite.
    pub fn components(&self) -> InterpResult<&[Value]> {
        match self {
            Value::Composite(c) => Ok(c),
            other => Err(InterpError::fault(format!(
                "expected a composite, found {:?}",
                other
            ))),
        }
    }

    /// Apply `f` to every scalar component of a vector, or to the scalar.
    pub fn map(&self, f: &mut impl FnMut(&Value) -> InterpResult<Value>) -> InterpResult<Value> {
        match self {
            Value::Composite(c) => Ok(Value::Composite(
                c.iter().map(|v| f(v)).collect::<InterpResult<_>>()?,
            )),
            scalar => f(scalar),
        }
    }

    /// Component-wise combination of two operands; a scalar operand is
    /// broadcast against a vector.
    pub fn zip(
        &self,
        other: &Value,
        f: &mut impl FnMut(&Value, &Value) -> InterpResult<Value>,
    ) -> InterpResult<Value> {
        match (self, other) {
            (Value::Composite(a), Value::Composite(b)) => {
                if a.len() != b.len() {
                    return Err(InterpError::fault(format!(
                        "component count mismatch: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(Value::Composite(
                    a.iter()
                        .zip(b)
                        .map(|(x, y)| f(x, y))
                        .collect::<InterpResult<_>>()?,
                ))
            }
            (Value::Composite(a), s) => Ok(Value::Composite(
                a.iter().map(|x| f(x, s)).collect::<InterpResult<_>>()?,
            )),
            (s, Value::Composite(b)) => Ok(Value::Composite(
                b.iter().map(|y| f(s, y)).collect::<InterpResult<_>>()?,
            )),
            (a, b) => f(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const U32: Scalar = Scalar {
        kind: ScalarKind::Uint,
        width: 4,
    };

    #[test]
    fn test_zip_broadcasts_scalar() {
        let v = Value::Composite(vec![Value::U32(1), Value::U32(2)]);
        let r = v
            .zip(&Value::U32(10), &mut |a, b| match (a, b) {
                (Value::U32(a), Value::U32(b)) => Ok(Value::U32(a + b)),
                _ => unreachable!(),
            })
            .unwrap();
        assert_eq!(r, Value::Composite(vec![Value::U32(11), Value::U32(12)]));
    }

    #[test]
    fn test_zip_rejects_length_mismatch() {
        let a = Value::Composite(vec![Value::U32(1)]);
        let b = Value::Composite(vec![Value::U32(1), Value::U32(2)]);
        assert!(a.zip(&b, &mut |x, _| Ok(x.clone())).is_err());
    }

    #[test]
    fn test_invalid_pointer_stays_invalid() {
        let p = Pointer {
            region: Region::Local(0),
            offset: Some(8),
            pointee: Pointee::Scalar(U32),
        };
        let oob = p.step(4, false, Pointee::Scalar(U32));
        assert_eq!(oob.offset, None);
        assert_eq!(oob.step(4, true, oob.pointee).offset, None);
        assert_eq!(p.step(4, true, p.pointee).offset, Some(12));
    }
}
