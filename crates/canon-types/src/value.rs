//! Runtime values

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::flatten::FlatKind;

/// An abstract value as seen on the component side of the boundary.
///
/// Sugared types use the structural forms: tuples are records with
/// positional labels, options are `none`/`some` variants, results are
/// `ok`/`error` variants and enums are payload-less variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    // Primitives
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),

    // Compound
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
    /// `case` may be a refinement label such as `"b|a"`.
    Variant { case: String, payload: Option<Box<Value>> },
    /// Labels of the flags that are set, in declaration order.
    Flags(Vec<String>),

    // Resource handles, by representation
    Own(u32),
    Borrow(u32),
}

impl Value {
    pub fn variant(case: impl Into<String>, payload: Option<Value>) -> Self {
        Value::Variant {
            case: case.into(),
            payload: payload.map(Box::new),
        }
    }

    /// A tuple value: a record labelled `"0"`, `"1"`, ...
    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Record(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("{i}"), v))
                .collect(),
        )
    }

    pub fn record<L: Into<String>>(fields: impl IntoIterator<Item = (L, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(l, v)| (l.into(), v)).collect())
    }

    pub fn flags<L: Into<String>>(labels: impl IntoIterator<Item = L>) -> Self {
        Value::Flags(labels.into_iter().map(Into::into).collect())
    }

    pub fn enum_case(label: impl Into<String>) -> Self {
        Value::variant(label, None)
    }

    pub fn some(v: Value) -> Self {
        Value::variant("some", Some(v))
    }

    pub fn none() -> Self {
        Value::variant("none", None)
    }

    pub fn ok(v: Option<Value>) -> Self {
        Value::variant("ok", v)
    }

    pub fn err(v: Option<Value>) -> Self {
        Value::variant("error", v)
    }

    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::S8(_) => "s8",
            Value::S16(_) => "s16",
            Value::S32(_) => "s32",
            Value::S64(_) => "s64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Variant { .. } => "variant",
            Value::Flags(_) => "flags",
            Value::Own(_) => "own",
            Value::Borrow(_) => "borrow",
        }
    }
}

// ============================================================================
// From implementations for primitives
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self { Value::U8(v) }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self { Value::U16(v) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Value::U32(v) }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self { Value::U64(v) }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self { Value::S8(v) }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self { Value::S16(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::S32(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::S64(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::F32(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::F64(v) }
}

impl From<char> for Value {
    fn from(v: char) -> Self { Value::Char(v) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(String::from(v)) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(x) => Value::some(x.into()),
            None => Value::none(),
        }
    }
}

// ============================================================================
// Flat values
// ============================================================================

/// One core scalar passed by value.
///
/// Integers are carried as unsigned bit patterns; signed component values
/// are stored two's-complement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FlatValue {
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl FlatValue {
    pub fn kind(&self) -> FlatKind {
        match self {
            FlatValue::U32(_) => FlatKind::U32,
            FlatValue::U64(_) => FlatKind::U64,
            FlatValue::F32(_) => FlatKind::Float32,
            FlatValue::F64(_) => FlatKind::Float64,
        }
    }

    /// Zero of the given kind, used to pad unused variant lanes.
    pub fn zero(kind: FlatKind) -> Self {
        match kind {
            FlatKind::U32 => FlatValue::U32(0),
            FlatKind::U64 => FlatValue::U64(0),
            FlatKind::Float32 => FlatValue::F32(0.0),
            FlatKind::Float64 => FlatValue::F64(0.0),
        }
    }
}

impl From<u32> for FlatValue {
    fn from(v: u32) -> Self { FlatValue::U32(v) }
}

impl From<u64> for FlatValue {
    fn from(v: u64) -> Self { FlatValue::U64(v) }
}

impl From<f32> for FlatValue {
    fn from(v: f32) -> Self { FlatValue::F32(v) }
}

impl From<f64> for FlatValue {
    fn from(v: f64) -> Self { FlatValue::F64(v) }
}
