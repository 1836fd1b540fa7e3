//! ABI: Value Lifting and Lowering
//!
//! Moves values across the boundary in both representations:
//!
//! - flat: a short sequence of core scalars (`lift_flat` / `lower_flat`)
//! - memory: the canonical byte layout in linear memory (`load` / `store`)
//!
//! Whole parameter and result lists pick one of the two once, by comparing
//! their flattened lane count with the negotiated limit.

mod flat;
mod load;
mod store;
mod string;

pub use flat::{lift_flat, lower_flat};
pub use load::load;
pub use store::store;
pub use string::{
    load_string_from_range, store_string_into_range, MAX_STRING_BYTE_LENGTH, UTF16_TAG,
};

use canon_types::{
    alignment, flatten_types, size, Case, DiscriminantType, Field, FlatKind, FlatValue, ValType,
    Value,
};
use log::debug;

use crate::error::{Result, Trap, ValidationError};
use crate::memory::{Memory, StringEncoding};
use crate::runtime::{CallContext, ComponentInstance};

pub const CANONICAL_FLOAT32_NAN: u32 = 0x7fc0_0000;
pub const CANONICAL_FLOAT64_NAN: u64 = 0x7ff8_0000_0000_0000;

/// Everything a lift or lower touches: the call in flight and the instance
/// whose handle tables and memory it works on.
pub struct Cx<'a> {
    pub call: &'a mut CallContext,
    pub inst: &'a mut ComponentInstance,
}

impl<'a> Cx<'a> {
    pub fn new(call: &'a mut CallContext, inst: &'a mut ComponentInstance) -> Self {
        Self { call, inst }
    }

    pub fn memory(&self) -> Memory {
        self.call.options().memory.clone()
    }

    pub fn string_encoding(&self) -> StringEncoding {
        self.call.options().string_encoding
    }

    pub fn realloc(&self, old_ptr: u32, old_size: u32, alignment: u32, new_size: u32) -> Result<u32> {
        self.call
            .options()
            .realloc(old_ptr, old_size, alignment, new_size)
    }
}

// ============================================================================
// Flat value sources
// ============================================================================

/// A supply of flat values, consumed left to right.
pub trait FlatSource {
    /// Take the next value, which must be of kind `want`.
    fn next(&mut self, want: FlatKind) -> Result<FlatValue, Trap>;

    fn next_u32(&mut self) -> Result<u32, Trap> {
        match self.next(FlatKind::U32)? {
            FlatValue::U32(v) => Ok(v),
            other => Err(mismatch(FlatKind::U32, other)),
        }
    }

    fn next_u64(&mut self) -> Result<u64, Trap> {
        match self.next(FlatKind::U64)? {
            FlatValue::U64(v) => Ok(v),
            other => Err(mismatch(FlatKind::U64, other)),
        }
    }

    fn next_f32(&mut self) -> Result<f32, Trap> {
        match self.next(FlatKind::Float32)? {
            FlatValue::F32(v) => Ok(v),
            other => Err(mismatch(FlatKind::Float32, other)),
        }
    }

    fn next_f64(&mut self) -> Result<f64, Trap> {
        match self.next(FlatKind::Float64)? {
            FlatValue::F64(v) => Ok(v),
            other => Err(mismatch(FlatKind::Float64, other)),
        }
    }
}

fn mismatch(expected: FlatKind, found: FlatValue) -> Trap {
    Trap::FlatKindMismatch {
        expected,
        found: found.kind(),
    }
}

/// Cursor over a slice of flat values.
pub struct FlatIter<'a> {
    values: &'a [FlatValue],
    pos: usize,
}

impl<'a> FlatIter<'a> {
    pub fn new(values: &'a [FlatValue]) -> Self {
        Self { values, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.pos
    }
}

impl FlatSource for FlatIter<'_> {
    fn next(&mut self, want: FlatKind) -> Result<FlatValue, Trap> {
        let value = *self.values.get(self.pos).ok_or(Trap::FlatExhausted)?;
        if value.kind() != want {
            return Err(mismatch(want, value));
        }
        self.pos += 1;
        Ok(value)
    }
}

// ============================================================================
// Parameter and result lists
// ============================================================================

/// Lift a whole parameter or result list.
pub fn lift_values(
    cx: &mut Cx<'_>,
    max_flat: usize,
    src: &mut dyn FlatSource,
    ts: &[ValType],
) -> Result<Vec<Value>> {
    let flat_count = flatten_types(ts).len();
    if flat_count > max_flat {
        let ptr = src.next_u32()?;
        debug!("lifting {} values from memory at {ptr:#x} ({flat_count} lanes)", ts.len());
        let fields = tuple_fields(ts);
        let tuple = ValType::Record(fields.clone());
        check_aligned(ptr, alignment(&tuple))?;
        cx.memory().check_range(ptr, size(&tuple) as u64)?;
        let values = load::load_record(cx, ptr, &fields)?;
        Ok(values.into_iter().map(|(_, v)| v).collect())
    } else {
        ts.iter().map(|t| lift_flat(cx, src, t)).collect()
    }
}

/// Lower a whole parameter or result list.
///
/// When spilling, the tuple is written to memory obtained from realloc, or to
/// the caller-provided buffer read from `out_param`.
pub fn lower_values(
    cx: &mut Cx<'_>,
    max_flat: usize,
    vs: &[Value],
    ts: &[ValType],
    out_param: Option<&mut dyn FlatSource>,
) -> Result<Vec<FlatValue>> {
    if vs.len() != ts.len() {
        return Err(ValidationError::ArityMismatch {
            expected: ts.len(),
            got: vs.len(),
        }
        .into());
    }
    let flat_count = flatten_types(ts).len();
    if flat_count > max_flat {
        let tuple = ValType::Record(tuple_fields(ts));
        // a caller-provided buffer is not handed back as a result
        let (ptr, flat) = match out_param {
            Some(src) => (src.next_u32()?, Vec::new()),
            None => {
                let ptr = cx.realloc(0, 0, alignment(&tuple), size(&tuple))?;
                (ptr, vec![FlatValue::U32(ptr)])
            }
        };
        debug!("lowering {} values to memory at {ptr:#x} ({flat_count} lanes)", vs.len());
        check_aligned(ptr, alignment(&tuple))?;
        cx.memory().check_range(ptr, size(&tuple) as u64)?;
        store(cx, &Value::tuple(vs.iter().cloned()), &tuple, ptr)?;
        Ok(flat)
    } else {
        let mut flat = Vec::with_capacity(flat_count);
        for (v, t) in vs.iter().zip(ts) {
            flat.extend(lower_flat(cx, v, t)?);
        }
        Ok(flat)
    }
}

fn tuple_fields(ts: &[ValType]) -> Vec<Field> {
    ts.iter()
        .enumerate()
        .map(|(i, t)| Field::new(i.to_string(), t.clone()))
        .collect()
}

// ============================================================================
// Shared scalar rules
// ============================================================================

pub(crate) fn check_aligned(ptr: u32, alignment: u32) -> Result<(), Trap> {
    if ptr % alignment != 0 {
        return Err(Trap::Misaligned { ptr, alignment });
    }
    Ok(())
}

/// Discriminant of `cases`, trapping when the case count cannot be indexed.
pub(crate) fn checked_discriminant(cases: &[Case]) -> Result<DiscriminantType, Trap> {
    DiscriminantType::for_case_count(cases.len()).ok_or(Trap::DiscriminantOverflow(cases.len()))
}

pub fn canonicalize_nan32(f: f32) -> f32 {
    if f.is_nan() {
        f32::from_bits(CANONICAL_FLOAT32_NAN)
    } else {
        f
    }
}

pub fn canonicalize_nan64(f: f64) -> f64 {
    if f.is_nan() {
        f64::from_bits(CANONICAL_FLOAT64_NAN)
    } else {
        f
    }
}

/// Unicode scalar value check: below 0x110000 and not a surrogate.
pub(crate) fn convert_u32_to_char(i: u32) -> Result<char, Trap> {
    char::from_u32(i).ok_or(Trap::InvalidChar(i))
}

/// Bit pattern of an integer value stored as `t`.
///
/// The value's signedness must match the declaration and it must fit the
/// declared width. Signed values come back two's-complement.
pub(crate) fn int_bits(v: &Value, t: &ValType) -> Result<u64, ValidationError> {
    let (value, value_signed) = match *v {
        Value::U8(x) => (x as i128, false),
        Value::U16(x) => (x as i128, false),
        Value::U32(x) => (x as i128, false),
        Value::U64(x) => (x as i128, false),
        Value::S8(x) => (x as i128, true),
        Value::S16(x) => (x as i128, true),
        Value::S32(x) => (x as i128, true),
        Value::S64(x) => (x as i128, true),
        _ => return Err(type_mismatch(t, v)),
    };
    let (min, max, signed) = match t {
        ValType::U8 => (0, u8::MAX as i128, false),
        ValType::U16 => (0, u16::MAX as i128, false),
        ValType::U32 => (0, u32::MAX as i128, false),
        ValType::U64 => (0, u64::MAX as i128, false),
        ValType::S8 => (i8::MIN as i128, i8::MAX as i128, true),
        ValType::S16 => (i16::MIN as i128, i16::MAX as i128, true),
        ValType::S32 => (i32::MIN as i128, i32::MAX as i128, true),
        ValType::S64 => (i64::MIN as i128, i64::MAX as i128, true),
        _ => return Err(type_mismatch(t, v)),
    };
    if signed != value_signed {
        return Err(ValidationError::SignednessMismatch {
            expected: t.kind_name(),
            got: v.kind_name(),
        });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            value,
            ty: t.kind_name(),
        });
    }
    Ok(value as u64)
}

pub(crate) fn type_mismatch(t: &ValType, v: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        expected: t.kind_name(),
        got: v.kind_name(),
    }
}

/// Label of `case`, extended with `|parent` for each case it refines.
pub(crate) fn case_label_with_refinements(case: &Case, cases: &[Case]) -> String {
    let mut label = case.label.clone();
    let mut current = case;
    // a well-formed chain never revisits a case
    for _ in 0..cases.len() {
        let Some(parent) = current
            .refines
            .as_deref()
            .and_then(|p| cases.iter().find(|c| c.label == p))
        else {
            break;
        };
        label.push('|');
        label.push_str(&parent.label);
        current = parent;
    }
    label
}

/// Resolve a variant value to a case index and payload.
///
/// The first `|`-separated label naming a declared case wins, so a value
/// lifted from a refining type lowers into its ancestor's type.
pub(crate) fn match_case<'v>(
    v: &'v Value,
    cases: &[Case],
) -> Result<(usize, Option<&'v Value>), ValidationError> {
    let Value::Variant { case, payload } = v else {
        return Err(ValidationError::TypeMismatch {
            expected: "variant",
            got: v.kind_name(),
        });
    };
    let index = case
        .split('|')
        .find_map(|label| cases.iter().position(|c| c.label == label))
        .ok_or_else(|| ValidationError::UnknownCase(case.clone()))?;
    match (&cases[index].ty, payload) {
        (Some(_), Some(p)) => Ok((index, Some(p.as_ref()))),
        (None, None) => Ok((index, None)),
        _ => Err(ValidationError::PayloadMismatch(case.clone())),
    }
}

/// Flag labels set in 32-bit words, bit i of the whole sequence for label i.
pub(crate) fn unpack_flags(words: &[u32], labels: &[String]) -> Value {
    Value::Flags(
        labels
            .iter()
            .enumerate()
            .filter(|(i, _)| words.get(i / 32).is_some_and(|w| (w >> (i % 32)) & 1 == 1))
            .map(|(_, l)| l.clone())
            .collect(),
    )
}

pub(crate) fn pack_flags(v: &Value, labels: &[String]) -> Result<Vec<u32>, ValidationError> {
    let Value::Flags(set) = v else {
        return Err(ValidationError::TypeMismatch {
            expected: "flags",
            got: v.kind_name(),
        });
    };
    let mut words = vec![0u32; canon_types::num_i32_flags(labels.len())];
    for label in set {
        let i = labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| ValidationError::UnknownFlag(label.clone()))?;
        words[i / 32] |= 1 << (i % 32);
    }
    Ok(words)
}
