//! Memory layout
//!
//! Alignment and size of every value type in linear memory. All functions
//! work on the despecialized type and are pure.

use crate::types::{despecialize, Case, Field, ValType};

/// Round `ptr` up to the next multiple of `alignment`, saturating at
/// `u32::MAX`.
///
/// Sizes that saturate are larger than any 32-bit memory, so every range
/// check against them fails.
pub fn align_to(ptr: u32, alignment: u32) -> u32 {
    ptr.div_ceil(alignment).saturating_mul(alignment)
}

/// Integer type holding a variant's case index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminantType {
    U8,
    U16,
    U32,
}

impl DiscriminantType {
    /// Discriminant for a variant with `case_count` cases, or `None` when the
    /// count cannot be indexed by a 32-bit integer.
    pub fn for_case_count(case_count: usize) -> Option<Self> {
        let n = case_count as u64;
        if n <= 1 << 8 {
            Some(DiscriminantType::U8)
        } else if n <= 1 << 16 {
            Some(DiscriminantType::U16)
        } else if n <= 1 << 32 {
            Some(DiscriminantType::U32)
        } else {
            None
        }
    }

    pub fn size(self) -> u32 {
        match self {
            DiscriminantType::U8 => 1,
            DiscriminantType::U16 => 2,
            DiscriminantType::U32 => 4,
        }
    }

    pub fn as_val_type(self) -> ValType {
        match self {
            DiscriminantType::U8 => ValType::U8,
            DiscriminantType::U16 => ValType::U16,
            DiscriminantType::U32 => ValType::U32,
        }
    }
}

/// Discriminant of a variant's case list.
///
/// Saturates at `U32`; the codec rejects case lists too long to index.
pub fn discriminant_type(cases: &[Case]) -> DiscriminantType {
    DiscriminantType::for_case_count(cases.len()).unwrap_or(DiscriminantType::U32)
}

pub fn alignment(t: &ValType) -> u32 {
    match despecialize(t).as_ref() {
        ValType::Bool | ValType::S8 | ValType::U8 => 1,
        ValType::S16 | ValType::U16 => 2,
        ValType::S32 | ValType::U32 | ValType::Float32 | ValType::Char => 4,
        ValType::S64 | ValType::U64 | ValType::Float64 => 8,
        ValType::String | ValType::List(_) => 4,
        ValType::Record(fields) => alignment_record(fields),
        ValType::Variant(cases) => alignment_variant(cases),
        ValType::Flags(labels) => alignment_flags(labels.len()),
        ValType::Own(_) | ValType::Borrow(_) => 4,
        sugar => unreachable!("despecialize left {}", sugar.kind_name()),
    }
}

fn alignment_record(fields: &[Field]) -> u32 {
    fields.iter().map(|f| alignment(&f.ty)).max().unwrap_or(1)
}

fn alignment_variant(cases: &[Case]) -> u32 {
    discriminant_type(cases)
        .size()
        .max(max_case_alignment(cases))
}

/// Largest payload alignment across cases, at least 1.
pub fn max_case_alignment(cases: &[Case]) -> u32 {
    cases
        .iter()
        .filter_map(|c| c.ty.as_ref())
        .map(alignment)
        .max()
        .unwrap_or(1)
}

fn alignment_flags(n: usize) -> u32 {
    if n <= 8 {
        1
    } else if n <= 16 {
        2
    } else {
        4
    }
}

pub fn size(t: &ValType) -> u32 {
    match despecialize(t).as_ref() {
        ValType::Bool | ValType::S8 | ValType::U8 => 1,
        ValType::S16 | ValType::U16 => 2,
        ValType::S32 | ValType::U32 | ValType::Float32 | ValType::Char => 4,
        ValType::S64 | ValType::U64 | ValType::Float64 => 8,
        ValType::String | ValType::List(_) => 8,
        ValType::Record(fields) => size_record(fields),
        ValType::Variant(cases) => size_variant(cases),
        ValType::Flags(labels) => size_flags(labels.len()),
        ValType::Own(_) | ValType::Borrow(_) => 4,
        sugar => unreachable!("despecialize left {}", sugar.kind_name()),
    }
}

fn size_record(fields: &[Field]) -> u32 {
    let mut s = 0;
    for f in fields {
        s = align_to(s, alignment(&f.ty));
        s = s.saturating_add(size(&f.ty));
    }
    align_to(s, alignment_record(fields))
}

fn size_variant(cases: &[Case]) -> u32 {
    let mut s = discriminant_type(cases).size();
    s = align_to(s, max_case_alignment(cases));
    let cs = cases
        .iter()
        .filter_map(|c| c.ty.as_ref())
        .map(size)
        .max()
        .unwrap_or(0);
    s = s.saturating_add(cs);
    align_to(s, alignment_variant(cases))
}

fn size_flags(n: usize) -> u32 {
    if n == 0 {
        0
    } else if n <= 8 {
        1
    } else if n <= 16 {
        2
    } else {
        u32::try_from(num_i32_flags(n).saturating_mul(4)).unwrap_or(u32::MAX)
    }
}

/// Number of 32-bit words needed to hold `n` flag bits.
pub fn num_i32_flags(n: usize) -> usize {
    n.div_ceil(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(1, 4), 4);
        assert_eq!(align_to(4, 4), 4);
        assert_eq!(align_to(9, 8), 16);
        assert_eq!(align_to(3, 1), 3);
    }

    #[test]
    fn oversized_layouts_saturate() {
        assert_eq!(align_to(u32::MAX - 1, 8), u32::MAX);
        assert_eq!(align_to(u32::MAX, 4), u32::MAX);
        assert_eq!(size_flags(usize::MAX), u32::MAX);
        assert_eq!(size_flags(33), 8);
    }

    #[test]
    fn discriminant_thresholds() {
        assert_eq!(DiscriminantType::for_case_count(1), Some(DiscriminantType::U8));
        assert_eq!(DiscriminantType::for_case_count(256), Some(DiscriminantType::U8));
        assert_eq!(DiscriminantType::for_case_count(257), Some(DiscriminantType::U16));
        assert_eq!(DiscriminantType::for_case_count(65536), Some(DiscriminantType::U16));
        assert_eq!(DiscriminantType::for_case_count(65537), Some(DiscriminantType::U32));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn discriminant_overflow() {
        assert_eq!(DiscriminantType::for_case_count((1usize << 32) + 1), None);
    }
}
