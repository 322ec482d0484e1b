//! Dynamic argument and return values
//!
//! Internally every argument travels as a 64-bit word: integers are
//! sign- or zero-extended by their declared width, floats carry their bit
//! pattern, pointers their address and struct arguments the base address
//! of the region holding them. Return words are truncated back to the
//! declared width.

use std::fmt;

use crate::layout::{Leaf, ScalarKind};
use crate::memory::{Address, NativeRegion};

/// A scalar or pointer value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Address(Address),
}

impl Value {
    /// Encode as an argument word
    pub fn to_word(self) -> u64 {
        match self {
            Value::I8(v) => v as i64 as u64,
            Value::I16(v) => v as i64 as u64,
            Value::I32(v) => v as i64 as u64,
            Value::I64(v) => v as u64,
            Value::U8(v) => v as u64,
            Value::U16(v) => v as u64,
            Value::U32(v) => v as u64,
            Value::U64(v) => v,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
            Value::Address(a) => a.as_usize() as u64,
        }
    }

    /// Decode a return word for the given leaf, ignoring any bits above
    /// its width
    pub fn from_word(leaf: Leaf, word: u64) -> Value {
        match leaf {
            Leaf::Pointer => Value::Address(Address::new(word as usize)),
            Leaf::Scalar(kind) => match kind {
                ScalarKind::I8 => Value::I8(word as u8 as i8),
                ScalarKind::I16 => Value::I16(word as u16 as i16),
                ScalarKind::I32 => Value::I32(word as u32 as i32),
                ScalarKind::I64 => Value::I64(word as i64),
                ScalarKind::U8 => Value::U8(word as u8),
                ScalarKind::U16 => Value::U16(word as u16),
                ScalarKind::U32 => Value::U32(word as u32),
                ScalarKind::U64 => Value::U64(word),
                ScalarKind::F32 => Value::F32(f32::from_bits(word as u32)),
                ScalarKind::F64 => Value::F64(f64::from_bits(word)),
            },
        }
    }

    /// The leaf this value matches
    pub fn leaf(&self) -> Leaf {
        match self {
            Value::I8(_) => Leaf::Scalar(ScalarKind::I8),
            Value::I16(_) => Leaf::Scalar(ScalarKind::I16),
            Value::I32(_) => Leaf::Scalar(ScalarKind::I32),
            Value::I64(_) => Leaf::Scalar(ScalarKind::I64),
            Value::U8(_) => Leaf::Scalar(ScalarKind::U8),
            Value::U16(_) => Leaf::Scalar(ScalarKind::U16),
            Value::U32(_) => Leaf::Scalar(ScalarKind::U32),
            Value::U64(_) => Leaf::Scalar(ScalarKind::U64),
            Value::F32(_) => Leaf::Scalar(ScalarKind::F32),
            Value::F64(_) => Leaf::Scalar(ScalarKind::F64),
            Value::Address(_) => Leaf::Pointer,
        }
    }

    /// Parse text as a value of the given leaf (decimal, or `0x` hex for
    /// integers and pointers)
    pub fn parse(leaf: Leaf, text: &str) -> Option<Value> {
        let text = text.trim();
        let int = |t: &str| -> Option<i128> {
            let (neg, digits) = match t.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, t),
            };
            let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                Some(hex) => i128::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<i128>().ok()?,
            };
            Some(if neg { -magnitude } else { magnitude })
        };

        Some(match leaf {
            Leaf::Pointer => Value::Address(Address::new(usize::try_from(int(text)?).ok()?)),
            Leaf::Scalar(kind) => match kind {
                ScalarKind::I8 => Value::I8(i8::try_from(int(text)?).ok()?),
                ScalarKind::I16 => Value::I16(i16::try_from(int(text)?).ok()?),
                ScalarKind::I32 => Value::I32(i32::try_from(int(text)?).ok()?),
                ScalarKind::I64 => Value::I64(i64::try_from(int(text)?).ok()?),
                ScalarKind::U8 => Value::U8(u8::try_from(int(text)?).ok()?),
                ScalarKind::U16 => Value::U16(u16::try_from(int(text)?).ok()?),
                ScalarKind::U32 => Value::U32(u32::try_from(int(text)?).ok()?),
                ScalarKind::U64 => Value::U64(u64::try_from(int(text)?).ok()?),
                ScalarKind::F32 => Value::F32(text.parse().ok()?),
                ScalarKind::F64 => Value::F64(text.parse().ok()?),
            },
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Address(a) => write!(f, "{}", a),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl From<$ty> for Arg<'_> {
                fn from(v: $ty) -> Self {
                    Arg::Value(Value::$variant(v))
                }
            }
        )*
    };
}

impl_value_from!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, Address => Address,
);

/// One argument of a dynamic invocation
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Value(Value),
    /// Struct passed by value; the region holds its bytes
    Region(&'a NativeRegion),
}

impl Arg<'_> {
    pub(crate) fn to_word(&self) -> u64 {
        match self {
            Arg::Value(v) => v.to_word(),
            Arg::Region(r) => r.address().as_usize() as u64,
        }
    }
}

impl From<Value> for Arg<'_> {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl<'a> From<&'a NativeRegion> for Arg<'a> {
    fn from(r: &'a NativeRegion) -> Self {
        Arg::Region(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_ints_extend_by_sign() {
        assert_eq!(Value::I8(-1).to_word(), u64::MAX);
        assert_eq!(Value::U8(0xff).to_word(), 0xff);
        assert_eq!(Value::I32(i32::MIN).to_word(), 0xffff_ffff_8000_0000);
        assert_eq!(Value::U32(u32::MAX).to_word(), 0xffff_ffff);
    }

    #[test]
    fn test_from_word_ignores_upper_bits() {
        let garbage = 0xdead_beef_0000_0000u64;
        assert_eq!(
            Value::from_word(Leaf::Scalar(ScalarKind::I32), garbage | 0xffff_ffff),
            Value::I32(-1)
        );
        assert_eq!(
            Value::from_word(Leaf::Scalar(ScalarKind::U16), garbage | 0x1234),
            Value::U16(0x1234)
        );
        let bits = 1.5f32.to_bits() as u64;
        assert_eq!(
            Value::from_word(Leaf::Scalar(ScalarKind::F32), garbage | bits),
            Value::F32(1.5)
        );
    }

    #[test]
    fn test_float_bit_patterns_survive() {
        let nan = f64::from_bits(0x7ff8_0000_0000_1234);
        let word = Value::F64(nan).to_word();
        match Value::from_word(Leaf::Scalar(ScalarKind::F64), word) {
            Value::F64(v) => assert_eq!(v.to_bits(), nan.to_bits()),
            other => panic!("unexpected {other:?}"),
        }
        let neg_zero = Value::F32(-0.0).to_word();
        assert_eq!(neg_zero, 0x8000_0000);
    }

    #[test]
    fn test_parse() {
        let i32_leaf = Leaf::Scalar(ScalarKind::I32);
        assert_eq!(Value::parse(i32_leaf, "-42"), Some(Value::I32(-42)));
        assert_eq!(Value::parse(i32_leaf, "0x10"), Some(Value::I32(16)));
        assert_eq!(Value::parse(i32_leaf, "4294967296"), None);
        assert_eq!(
            Value::parse(Leaf::Scalar(ScalarKind::U8), "-1"),
            None
        );
        assert_eq!(
            Value::parse(Leaf::Scalar(ScalarKind::F64), "2.5"),
            Some(Value::F64(2.5))
        );
        assert_eq!(
            Value::parse(Leaf::Pointer, "0x1000"),
            Some(Value::Address(Address::new(0x1000)))
        );
        assert_eq!(Value::parse(i32_leaf, "twelve"), None);
    }

    #[test]
    fn test_leaf_roundtrip() {
        for v in [Value::I8(1), Value::U64(2), Value::F32(1.0), Value::Address(Address::NULL)] {
            assert_eq!(Value::from_word(v.leaf(), v.to_word()), v);
        }
    }
}
