//! Operator and built-in function semantics.
//!
//! Integer arithmetic wraps; integer division and remainder by zero yield
//! the left operand. Vector operands are processed component-wise with
//! scalar operands broadcast.

use naga::{BinaryOperator, MathFunction, RelationalFunction, ScalarKind, UnaryOperator};

use super::value::Value;
use super::{InterpError, InterpResult};

/// Number of lanes of a component-wise operation, `None` for all-scalar.
fn lanes(args: &[&Value]) -> Option<usize> {
    args.iter().find_map(|v| match v {
        Value::Composite(c) => Some(c.len()),
        _ => None,
    })
}

fn lane(v: &Value, i: usize) -> &Value {
    match v {
        Value::Composite(c) => c.get(i).unwrap_or(v),
        scalar => scalar,
    }
}

/// Apply `f` lane by lane across `args`, broadcasting scalars.
fn componentwise(
    args: &[&Value],
    mut f: impl FnMut(&[&Value]) -> InterpResult<Value>,
) -> InterpResult<Value> {
    match lanes(args) {
        None => f(args),
        Some(n) => {
            let mut out = Vec::with_capacity(n);
            let mut scratch = Vec::with_capacity(args.len());
            for i in 0..n {
                scratch.clear();
                scratch.extend(args.iter().map(|a| lane(a, i)));
                out.push(f(&scratch)?);
            }
            Ok(Value::Composite(out))
        }
    }
}

fn mismatch(what: &str, args: &[&Value]) -> InterpError {
    InterpError::fault(format!("invalid operands for {}: {:?}", what, args))
}

/// Evaluate a unary operator.
pub fn unary(op: UnaryOperator, v: &Value) -> InterpResult<Value> {
    v.map(&mut |x| match (op, x) {
        (UnaryOperator::Negate, Value::I32(a)) => Ok(Value::I32(a.wrapping_neg())),
        (UnaryOperator::Negate, Value::F32(a)) => Ok(Value::F32(-a)),
        (UnaryOperator::LogicalNot, Value::Bool(a)) => Ok(Value::Bool(!a)),
        (UnaryOperator::BitwiseNot, Value::I32(a)) => Ok(Value::I32(!a)),
        (UnaryOperator::BitwiseNot, Value::U32(a)) => Ok(Value::U32(!a)),
        _ => Err(InterpError::fault(format!("invalid operand for {:?}: {:?}", op, x))),
    })
}

macro_rules! compare {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinaryOperator::Equal => Some(Value::Bool($a == $b)),
            BinaryOperator::NotEqual => Some(Value::Bool($a != $b)),
            BinaryOperator::Less => Some(Value::Bool($a < $b)),
            BinaryOperator::LessEqual => Some(Value::Bool($a <= $b)),
            BinaryOperator::Greater => Some(Value::Bool($a > $b)),
            BinaryOperator::GreaterEqual => Some(Value::Bool($a >= $b)),
            _ => None,
        }
    };
}

macro_rules! integer {
    ($op:expr, $a:expr, $b:expr, $wrap:path) => {{
        let (a, b) = ($a, $b);
        match $op {
            BinaryOperator::Add => Some($wrap(a.wrapping_add(b))),
            BinaryOperator::Subtract => Some($wrap(a.wrapping_sub(b))),
            BinaryOperator::Multiply => Some($wrap(a.wrapping_mul(b))),
            BinaryOperator::Divide if b == 0 => Some($wrap(a)),
            BinaryOperator::Divide => Some($wrap(a.wrapping_div(b))),
            BinaryOperator::Modulo if b == 0 => Some($wrap(a)),
            BinaryOperator::Modulo => Some($wrap(a.wrapping_rem(b))),
            BinaryOperator::And => Some($wrap(a & b)),
            BinaryOperator::InclusiveOr => Some($wrap(a | b)),
            BinaryOperator::ExclusiveOr => Some($wrap(a ^ b)),
            op => compare!(op, a, b),
        }
    }};
}

fn binary_scalar(op: BinaryOperator, a: &Value, b: &Value) -> InterpResult<Value> {
    let result = match (op, a, b) {
        (BinaryOperator::ShiftLeft, Value::I32(x), Value::U32(s)) => {
            Some(Value::I32(x.wrapping_shl(*s)))
        }
        (BinaryOperator::ShiftRight, Value::I32(x), Value::U32(s)) => {
            Some(Value::I32(x.wrapping_shr(*s)))
        }
        (BinaryOperator::ShiftLeft, Value::U32(x), Value::U32(s)) => {
            Some(Value::U32(x.wrapping_shl(*s)))
        }
        (BinaryOperator::ShiftRight, Value::U32(x), Value::U32(s)) => {
            Some(Value::U32(x.wrapping_shr(*s)))
        }
        (_, Value::I32(x), Value::I32(y)) => integer!(op, *x, *y, Value::I32),
        (_, Value::U32(x), Value::U32(y)) => integer!(op, *x, *y, Value::U32),
        (_, Value::F32(x), Value::F32(y)) => match op {
            BinaryOperator::Add => Some(Value::F32(x + y)),
            BinaryOperator::Subtract => Some(Value::F32(x - y)),
            BinaryOperator::Multiply => Some(Value::F32(x * y)),
            BinaryOperator::Divide => Some(Value::F32(x / y)),
            BinaryOperator::Modulo => Some(Value::F32(x % y)),
            op => compare!(op, x, y),
        },
        (_, Value::Bool(x), Value::Bool(y)) => match op {
            BinaryOperator::And | BinaryOperator::LogicalAnd => Some(Value::Bool(*x && *y)),
            BinaryOperator::InclusiveOr | BinaryOperator::LogicalOr => Some(Value::Bool(*x || *y)),
            BinaryOperator::Equal => Some(Value::Bool(x == y)),
            BinaryOperator::NotEqual | BinaryOperator::ExclusiveOr => Some(Value::Bool(x != y)),
            _ => None,
        },
        _ => None,
    };
    result.ok_or_else(|| mismatch(&format!("{:?}", op), &[a, b]))
}

/// Evaluate a binary operator.
pub fn binary(op: BinaryOperator, l: &Value, r: &Value) -> InterpResult<Value> {
    l.zip(r, &mut |a, b| binary_scalar(op, a, b))
}

/// Numeric conversion (`convert` is `Some`) or bitcast to `kind`.
pub fn convert(v: &Value, kind: ScalarKind, convert: Option<u8>) -> InterpResult<Value> {
    if let Some(width) = convert {
        if kind != ScalarKind::Bool && width != 4 {
            return Err(InterpError::unsupported(format!(
                "conversion to {}-byte {:?}",
                width, kind
            )));
        }
    }
    v.map(&mut |x| {
        let out = match (convert.is_some(), kind, x) {
            (true, ScalarKind::Sint, Value::F32(f)) => Value::I32(*f as i32),
            (true, ScalarKind::Sint, Value::U32(u)) => Value::I32(*u as i32),
            (true, ScalarKind::Sint, Value::I32(i)) => Value::I32(*i),
            (true, ScalarKind::Sint, Value::Bool(b)) => Value::I32(*b as i32),
            (true, ScalarKind::Uint, Value::F32(f)) => Value::U32(*f as u32),
            (true, ScalarKind::Uint, Value::I32(i)) => Value::U32(*i as u32),
            (true, ScalarKind::Uint, Value::U32(u)) => Value::U32(*u),
            (true, ScalarKind::Uint, Value::Bool(b)) => Value::U32(*b as u32),
            (true, ScalarKind::Float, Value::I32(i)) => Value::F32(*i as f32),
            (true, ScalarKind::Float, Value::U32(u)) => Value::F32(*u as f32),
            (true, ScalarKind::Float, Value::F32(f)) => Value::F32(*f),
            (true, ScalarKind::Float, Value::Bool(b)) => Value::F32(*b as u32 as f32),
            (true, ScalarKind::Bool, Value::I32(i)) => Value::Bool(*i != 0),
            (true, ScalarKind::Bool, Value::U32(u)) => Value::Bool(*u != 0),
            (true, ScalarKind::Bool, Value::F32(f)) => Value::Bool(*f != 0.0),
            (true, ScalarKind::Bool, Value::Bool(b)) => Value::Bool(*b),
            (false, kind, scalar) => {
                let bits = match scalar {
                    Value::I32(i) => *i as u32,
                    Value::U32(u) => *u,
                    Value::F32(f) => f.to_bits(),
                    other => return Err(InterpError::fault(format!("cannot bitcast {:?}", other))),
                };
                match kind {
                    ScalarKind::Sint => Value::I32(bits as i32),
                    ScalarKind::Uint => Value::U32(bits),
                    ScalarKind::Float => Value::F32(f32::from_bits(bits)),
                    other => {
                        return Err(InterpError::fault(format!("cannot bitcast to {:?}", other)))
                    }
                }
            }
            (_, kind, other) => {
                return Err(InterpError::fault(format!(
                    "cannot convert {:?} to {:?}",
                    other, kind
                )))
            }
        };
        Ok(out)
    })
}

/// `select(reject, accept, condition)`.
pub fn select(condition: &Value, accept: &Value, reject: &Value) -> InterpResult<Value> {
    match condition {
        Value::Bool(true) => Ok(accept.clone()),
        Value::Bool(false) => Ok(reject.clone()),
        Value::Composite(_) => componentwise(&[condition, accept, reject], |a| {
            Ok(if a[0].as_bool()? { a[1].clone() } else { a[2].clone() })
        }),
        other => Err(InterpError::fault(format!("select condition {:?}", other))),
    }
}

/// Relational built-ins.
pub fn relational(fun: RelationalFunction, v: &Value) -> InterpResult<Value> {
    match fun {
        RelationalFunction::All => match v {
            Value::Composite(c) => Ok(Value::Bool(
                c.iter().map(Value::as_bool).collect::<InterpResult<Vec<_>>>()?.iter().all(|b| *b),
            )),
            scalar => Ok(Value::Bool(scalar.as_bool()?)),
        },
        RelationalFunction::Any => match v {
            Value::Composite(c) => Ok(Value::Bool(
                c.iter().map(Value::as_bool).collect::<InterpResult<Vec<_>>>()?.iter().any(|b| *b),
            )),
            scalar => Ok(Value::Bool(scalar.as_bool()?)),
        },
        RelationalFunction::IsNan => v.map(&mut |x| Ok(Value::Bool(x.as_f32()?.is_nan()))),
        RelationalFunction::IsInf => v.map(&mut |x| Ok(Value::Bool(x.as_f32()?.is_infinite()))),
        #[allow(unreachable_patterns)]
        other => Err(InterpError::unsupported(format!("{:?}", other))),
    }
}

/// Math built-ins the interpreter implements.
pub fn math_supported(fun: MathFunction) -> bool {
    use MathFunction as M;
    matches!(
        fun,
        M::Abs
            | M::Min
            | M::Max
            | M::Clamp
            | M::Saturate
            | M::Cos
            | M::Cosh
            | M::Sin
            | M::Sinh
            | M::Tan
            | M::Tanh
            | M::Acos
            | M::Asin
            | M::Atan
            | M::Atan2
            | M::Asinh
            | M::Acosh
            | M::Atanh
            | M::Radians
            | M::Degrees
            | M::Ceil
            | M::Floor
            | M::Round
            | M::Fract
            | M::Trunc
            | M::Exp
            | M::Exp2
            | M::Log
            | M::Log2
            | M::Pow
            | M::Dot
            | M::Cross
            | M::Distance
            | M::Length
            | M::Normalize
            | M::Sign
            | M::Fma
            | M::Mix
            | M::Step
            | M::SmoothStep
            | M::Sqrt
            | M::InverseSqrt
            | M::CountTrailingZeros
            | M::CountLeadingZeros
            | M::CountOneBits
            | M::ReverseBits
            | M::ExtractBits
            | M::InsertBits
    )
}

fn float1(v: &Value, f: impl Fn(f32) -> f32) -> InterpResult<Value> {
    v.map(&mut |x| Ok(Value::F32(f(x.as_f32()?))))
}

fn float2(a: &Value, b: &Value, f: impl Fn(f32, f32) -> f32) -> InterpResult<Value> {
    a.zip(b, &mut |x, y| Ok(Value::F32(f(x.as_f32()?, y.as_f32()?))))
}

fn float3(a: &Value, b: &Value, c: &Value, f: impl Fn(f32, f32, f32) -> f32) -> InterpResult<Value> {
    componentwise(&[a, b, c], |l| {
        Ok(Value::F32(f(l[0].as_f32()?, l[1].as_f32()?, l[2].as_f32()?)))
    })
}

fn int1(v: &Value, fi: impl Fn(i32) -> i32, fu: impl Fn(u32) -> u32) -> InterpResult<Value> {
    v.map(&mut |x| match x {
        Value::I32(i) => Ok(Value::I32(fi(*i))),
        Value::U32(u) => Ok(Value::U32(fu(*u))),
        other => Err(InterpError::fault(format!("expected an integer, found {:?}", other))),
    })
}

fn min_max(a: &Value, b: &Value, max: bool) -> InterpResult<Value> {
    a.zip(b, &mut |x, y| match (x, y) {
        (Value::I32(x), Value::I32(y)) => Ok(Value::I32(if max { *x.max(y) } else { *x.min(y) })),
        (Value::U32(x), Value::U32(y)) => Ok(Value::U32(if max { *x.max(y) } else { *x.min(y) })),
        (Value::F32(x), Value::F32(y)) => Ok(Value::F32(if max { x.max(*y) } else { x.min(*y) })),
        _ => Err(mismatch(if max { "max" } else { "min" }, &[x, y])),
    })
}

fn dot(a: &Value, b: &Value) -> InterpResult<Value> {
    let products = binary(BinaryOperator::Multiply, a, b)?;
    let mut parts = products.components()?.iter();
    let first = parts
        .next()
        .cloned()
        .ok_or_else(|| InterpError::fault("dot of empty vectors"))?;
    parts.try_fold(first, |acc, p| binary(BinaryOperator::Add, &acc, p))
}

fn length(v: &Value) -> InterpResult<f32> {
    match v {
        Value::Composite(_) => Ok(dot(v, v)?.as_f32()?.sqrt()),
        scalar => Ok(scalar.as_f32()?.abs()),
    }
}

fn bit_range(offset: u32, count: u32) -> (u32, u32) {
    let o = offset.min(32);
    (o, count.min(32 - o))
}

fn extract_bits(e: &Value, offset: u32, count: u32) -> InterpResult<Value> {
    let (o, c) = bit_range(offset, count);
    e.map(&mut |x| match x {
        _ if c == 0 => Ok(match x {
            Value::I32(_) => Value::I32(0),
            _ => Value::U32(0),
        }),
        Value::U32(v) => {
            let mask = if c == 32 { u32::MAX } else { (1u32 << c) - 1 };
            Ok(Value::U32((v >> o) & mask))
        }
        Value::I32(v) => {
            let shifted = (*v as u32).wrapping_shr(o);
            let left = 32 - c;
            Ok(Value::I32(((shifted << left) as i32) >> left))
        }
        other => Err(InterpError::fault(format!("extractBits of {:?}", other))),
    })
}

fn insert_bits(e: &Value, new: &Value, offset: u32, count: u32) -> InterpResult<Value> {
    let (o, c) = bit_range(offset, count);
    let mask = if c == 0 {
        0
    } else if c == 32 {
        u32::MAX
    } else {
        ((1u32 << c) - 1) << o
    };
    e.zip(new, &mut |x, n| {
        let (x_bits, n_bits) = match (x, n) {
            (Value::U32(a), Value::U32(b)) => (*a, *b),
            (Value::I32(a), Value::I32(b)) => (*a as u32, *b as u32),
            _ => return Err(mismatch("insertBits", &[x, n])),
        };
        let bits = (x_bits & !mask) | (n_bits.wrapping_shl(o) & mask);
        Ok(match x {
            Value::I32(_) => Value::I32(bits as i32),
            _ => Value::U32(bits),
        })
    })
}

/// Evaluate a math built-in.
pub fn math(fun: MathFunction, args: &[Value]) -> InterpResult<Value> {
    use MathFunction as M;
    let arg = |i: usize| {
        args.get(i)
            .ok_or_else(|| InterpError::fault(format!("{:?} is missing argument {}", fun, i)))
    };
    let a = arg(0)?;

    match fun {
        M::Abs => a.map(&mut |x| match x {
            Value::I32(v) => Ok(Value::I32(v.wrapping_abs())),
            Value::U32(v) => Ok(Value::U32(*v)),
            Value::F32(v) => Ok(Value::F32(v.abs())),
            other => Err(mismatch("abs", &[other])),
        }),
        M::Min => min_max(a, arg(1)?, false),
        M::Max => min_max(a, arg(1)?, true),
        M::Clamp => min_max(&min_max(a, arg(1)?, true)?, arg(2)?, false),
        M::Saturate => float1(a, |x| x.clamp(0.0, 1.0)),
        M::Cos => float1(a, f32::cos),
        M::Cosh => float1(a, f32::cosh),
        M::Sin => float1(a, f32::sin),
        M::Sinh => float1(a, f32::sinh),
        M::Tan => float1(a, f32::tan),
        M::Tanh => float1(a, f32::tanh),
        M::Acos => float1(a, f32::acos),
        M::Asin => float1(a, f32::asin),
        M::Atan => float1(a, f32::atan),
        M::Atan2 => float2(a, arg(1)?, f32::atan2),
        M::Asinh => float1(a, f32::asinh),
        M::Acosh => float1(a, f32::acosh),
        M::Atanh => float1(a, f32::atanh),
        M::Radians => float1(a, f32::to_radians),
        M::Degrees => float1(a, f32::to_degrees),
        M::Ceil => float1(a, f32::ceil),
        M::Floor => float1(a, f32::floor),
        M::Round => float1(a, f32::round_ties_even),
        M::Fract => float1(a, |x| x - x.floor()),
        M::Trunc => float1(a, f32::trunc),
        M::Exp => float1(a, f32::exp),
        M::Exp2 => float1(a, f32::exp2),
        M::Log => float1(a, f32::ln),
        M::Log2 => float1(a, f32::log2),
        M::Pow => float2(a, arg(1)?, f32::powf),
        M::Sqrt => float1(a, f32::sqrt),
        M::InverseSqrt => float1(a, |x| 1.0 / x.sqrt()),
        M::Sign => a.map(&mut |x| match x {
            Value::I32(v) => Ok(Value::I32(v.signum())),
            Value::F32(v) if *v > 0.0 => Ok(Value::F32(1.0)),
            Value::F32(v) if *v < 0.0 => Ok(Value::F32(-1.0)),
            Value::F32(_) => Ok(Value::F32(0.0)),
            other => Err(mismatch("sign", &[other])),
        }),
        M::Fma => float3(a, arg(1)?, arg(2)?, f32::mul_add),
        M::Mix => float3(a, arg(1)?, arg(2)?, |x, y, t| x * (1.0 - t) + y * t),
        M::Step => float2(a, arg(1)?, |edge, x| if edge <= x { 1.0 } else { 0.0 }),
        M::SmoothStep => float3(a, arg(1)?, arg(2)?, |lo, hi, x| {
            let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
            t * t * (3.0 - 2.0 * t)
        }),
        M::Dot => dot(a, arg(1)?),
        M::Cross => {
            let (u, v) = (a.components()?, arg(1)?.components()?);
            if u.len() != 3 || v.len() != 3 {
                return Err(mismatch("cross", &[a, arg(1)?]));
            }
            let f = |i: usize| -> InterpResult<f32> { u[i].as_f32() };
            let g = |i: usize| -> InterpResult<f32> { v[i].as_f32() };
            Ok(Value::Composite(vec![
                Value::F32(f(1)? * g(2)? - f(2)? * g(1)?),
                Value::F32(f(2)? * g(0)? - f(0)? * g(2)?),
                Value::F32(f(0)? * g(1)? - f(1)? * g(0)?),
            ]))
        }
        M::Length => Ok(Value::F32(length(a)?)),
        M::Distance => Ok(Value::F32(length(&binary(
            BinaryOperator::Subtract,
            a,
            arg(1)?,
        )?)?)),
        M::Normalize => {
            let len = length(a)?;
            float1(a, |x| x / len)
        }
        M::CountOneBits => int1(a, |v| v.count_ones() as i32, u32::count_ones),
        M::ReverseBits => int1(a, i32::reverse_bits, u32::reverse_bits),
        M::CountLeadingZeros => int1(a, |v| v.leading_zeros() as i32, u32::leading_zeros),
        M::CountTrailingZeros => int1(a, |v| v.trailing_zeros() as i32, u32::trailing_zeros),
        M::ExtractBits => {
            let offset = arg(1)?.as_index()? as u32;
            let count = arg(2)?.as_index()? as u32;
            extract_bits(a, offset, count)
        }
        M::InsertBits => {
            let offset = arg(2)?.as_index()? as u32;
            let count = arg(3)?.as_index()? as u32;
            insert_bits(a, arg(1)?, offset, count)
        }
        other => Err(InterpError::unsupported(format!("built-in {:?}", other))),
    }
}
