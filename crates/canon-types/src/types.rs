//! Value types
//!
//! The closed set of types a value may have when it crosses a component
//! boundary. Tuple, union, enum, option and result are sugar: `despecialize`
//! rewrites them onto record and variant before any layout or codec rule
//! looks at them.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_RESOURCE_TYPE: AtomicU32 = AtomicU32::new(0);

/// Identity of a resource type.
///
/// Types refer to resources by identity only, so a type tree never contains
/// the resource (or its destructor) itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResourceTypeId(pub u32);

impl ResourceTypeId {
    /// Allocate an identity no other call to `fresh` has returned.
    pub fn fresh() -> Self {
        ResourceTypeId(NEXT_RESOURCE_TYPE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A value type
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    Float32,
    Float64,
    Char,
    String,
    List(Box<ValType>),
    Record(Vec<Field>),
    Variant(Vec<Case>),
    Flags(Vec<String>),
    Own(ResourceTypeId),
    Borrow(ResourceTypeId),

    // Sugar, see `despecialize`
    Tuple(Vec<ValType>),
    Union(Vec<ValType>),
    Enum(Vec<String>),
    Option(Box<ValType>),
    Result {
        ok: Option<Box<ValType>>,
        err: Option<Box<ValType>>,
    },
}

impl ValType {
    pub fn list(elem: ValType) -> Self {
        ValType::List(Box::new(elem))
    }

    pub fn option(inner: ValType) -> Self {
        ValType::Option(Box::new(inner))
    }

    pub fn result(ok: Option<ValType>, err: Option<ValType>) -> Self {
        ValType::Result {
            ok: ok.map(Box::new),
            err: err.map(Box::new),
        }
    }

    pub fn record<L: Into<String>>(fields: impl IntoIterator<Item = (L, ValType)>) -> Self {
        ValType::Record(
            fields
                .into_iter()
                .map(|(label, ty)| Field::new(label, ty))
                .collect(),
        )
    }

    pub fn flags<L: Into<String>>(labels: impl IntoIterator<Item = L>) -> Self {
        ValType::Flags(labels.into_iter().map(Into::into).collect())
    }

    pub fn enumeration<L: Into<String>>(labels: impl IntoIterator<Item = L>) -> Self {
        ValType::Enum(labels.into_iter().map(Into::into).collect())
    }

    /// True for the sugared forms that despecialize to something else.
    pub fn is_sugar(&self) -> bool {
        matches!(
            self,
            ValType::Tuple(_)
                | ValType::Union(_)
                | ValType::Enum(_)
                | ValType::Option(_)
                | ValType::Result { .. }
        )
    }

    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValType::Bool => "bool",
            ValType::U8 => "u8",
            ValType::U16 => "u16",
            ValType::U32 => "u32",
            ValType::U64 => "u64",
            ValType::S8 => "s8",
            ValType::S16 => "s16",
            ValType::S32 => "s32",
            ValType::S64 => "s64",
            ValType::Float32 => "float32",
            ValType::Float64 => "float64",
            ValType::Char => "char",
            ValType::String => "string",
            ValType::List(_) => "list",
            ValType::Record(_) => "record",
            ValType::Variant(_) => "variant",
            ValType::Flags(_) => "flags",
            ValType::Own(_) => "own",
            ValType::Borrow(_) => "borrow",
            ValType::Tuple(_) => "tuple",
            ValType::Union(_) => "union",
            ValType::Enum(_) => "enum",
            ValType::Option(_) => "option",
            ValType::Result { .. } => "result",
        }
    }
}

/// record field
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Field {
    pub label: String,
    pub ty: ValType,
}

impl Field {
    pub fn new(label: impl Into<String>, ty: ValType) -> Self {
        Self {
            label: label.into(),
            ty,
        }
    }
}

/// variant case
///
/// `refines` names an earlier case of the same variant that this case is a
/// subtype of. Lifted labels carry the whole chain, e.g. `"b|a"`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Case {
    pub label: String,
    pub ty: Option<ValType>,
    pub refines: Option<String>,
}

impl Case {
    pub fn new(label: impl Into<String>, ty: Option<ValType>) -> Self {
        Self {
            label: label.into(),
            ty,
            refines: None,
        }
    }

    pub fn refining(label: impl Into<String>, ty: Option<ValType>, parent: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ty,
            refines: Some(parent.into()),
        }
    }
}

/// A component-level function type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        Self { params, results }
    }

    pub fn param_types(&self) -> &[ValType] {
        &self.params
    }

    pub fn result_types(&self) -> &[ValType] {
        &self.results
    }
}

/// Rewrite sugared types onto their structural base.
///
/// Non-sugar types are returned borrowed. The output is never sugar, so
/// applying this twice is the same as applying it once.
pub fn despecialize(t: &ValType) -> Cow<'_, ValType> {
    match t {
        ValType::Tuple(ts) => Cow::Owned(ValType::Record(
            ts.iter()
                .enumerate()
                .map(|(i, t)| Field::new(format!("{i}"), t.clone()))
                .collect(),
        )),
        ValType::Union(ts) => Cow::Owned(ValType::Variant(
            ts.iter()
                .enumerate()
                .map(|(i, t)| Case::new(format!("{i}"), Some(t.clone())))
                .collect(),
        )),
        ValType::Enum(labels) => Cow::Owned(ValType::Variant(
            labels.iter().map(|l| Case::new(l.clone(), None)).collect(),
        )),
        ValType::Option(t) => Cow::Owned(ValType::Variant(Vec::from([
            Case::new("none", None),
            Case::new("some", Some((**t).clone())),
        ]))),
        ValType::Result { ok, err } => Cow::Owned(ValType::Variant(Vec::from([
            Case::new("ok", ok.as_deref().cloned()),
            Case::new("error", err.as_deref().cloned()),
        ]))),
        _ => Cow::Borrowed(t),
    }
}
