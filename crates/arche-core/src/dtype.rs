//! Element types for host arrays.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArcheError;

/// Element type tag carried by every host array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl DType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Whether this is a floating-point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Short lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = ArcheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s.trim().to_ascii_lowercase().as_str() {
            "u8" => DType::U8,
            "u16" => DType::U16,
            "u32" => DType::U32,
            "u64" => DType::U64,
            "i8" => DType::I8,
            "i16" => DType::I16,
            "i32" => DType::I32,
            "i64" => DType::I64,
            "f32" | "float32" => DType::F32,
            "f64" | "float64" => DType::F64,
            other => {
                return Err(ArcheError::InvalidConfig(format!(
                    "unknown dtype '{}'",
                    other
                )))
            }
        };
        Ok(dtype)
    }
}

/// Rust scalar types that can live in a host array.
pub trait Element: bytemuck::Pod + Send + Sync {
    /// Tag of this element type.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$tag;
            }
        )*
    };
}

impl_element! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_rust_types() {
        assert_eq!(DType::F32.size_in_bytes(), std::mem::size_of::<f32>());
        assert_eq!(DType::I16.size_in_bytes(), std::mem::size_of::<i16>());
        assert_eq!(DType::U64.size_in_bytes(), std::mem::size_of::<u64>());
        assert_eq!(<f64 as Element>::DTYPE, DType::F64);
    }

    #[test]
    fn test_parse() {
        assert_eq!("F32".parse::<DType>().unwrap(), DType::F32);
        assert_eq!("float64".parse::<DType>().unwrap(), DType::F64);
        assert!("bf16".parse::<DType>().is_err());
    }
}
