//! Flat lifting and lowering

use std::slice;

use canon_types::{despecialize, flatten_variant, num_i32_flags, Case, FlatKind, FlatValue, ValType, Value};

use super::load::load_list_from_range;
use super::store::store_list_into_range;
use super::string::{load_string_from_range, store_string_into_range};
use super::{
    canonicalize_nan32, canonicalize_nan64, checked_discriminant, convert_u32_to_char,
    case_label_with_refinements, int_bits, match_case, pack_flags, type_mismatch, unpack_flags,
    Cx, FlatSource,
};
use crate::error::{Result, Trap};
use crate::runtime::{lift_borrow, lift_own, lower_borrow, lower_own};

/// Lift one value of type `t` from `src`, consuming exactly its lanes.
pub fn lift_flat(cx: &mut Cx<'_>, src: &mut dyn FlatSource, t: &ValType) -> Result<Value> {
    Ok(match despecialize(t).as_ref() {
        ValType::Bool => Value::Bool(src.next_u32()? != 0),
        ValType::U8 => Value::U8(src.next_u32()? as u8),
        ValType::U16 => Value::U16(src.next_u32()? as u16),
        ValType::U32 => Value::U32(src.next_u32()?),
        ValType::U64 => Value::U64(src.next_u64()?),
        ValType::S8 => Value::S8(src.next_u32()? as u8 as i8),
        ValType::S16 => Value::S16(src.next_u32()? as u16 as i16),
        ValType::S32 => Value::S32(src.next_u32()? as i32),
        ValType::S64 => Value::S64(src.next_u64()? as i64),
        ValType::Float32 => Value::F32(canonicalize_nan32(src.next_f32()?)),
        ValType::Float64 => Value::F64(canonicalize_nan64(src.next_f64()?)),
        ValType::Char => Value::Char(convert_u32_to_char(src.next_u32()?)?),
        ValType::String => {
            let ptr = src.next_u32()?;
            let tagged_code_units = src.next_u32()?;
            Value::String(load_string_from_range(cx, ptr, tagged_code_units)?)
        }
        ValType::List(elem) => {
            let ptr = src.next_u32()?;
            let length = src.next_u32()?;
            Value::List(load_list_from_range(cx, ptr, length, elem)?)
        }
        ValType::Record(fields) => {
            let mut record = Vec::with_capacity(fields.len());
            for field in fields {
                record.push((field.label.clone(), lift_flat(cx, src, &field.ty)?));
            }
            Value::Record(record)
        }
        ValType::Variant(cases) => lift_flat_variant(cx, src, cases)?,
        ValType::Flags(labels) => {
            let mut words = Vec::with_capacity(num_i32_flags(labels.len()));
            for _ in 0..num_i32_flags(labels.len()) {
                words.push(src.next_u32()?);
            }
            unpack_flags(&words, labels)
        }
        ValType::Own(rt) => Value::Own(lift_own(cx, src.next_u32()?, *rt)?),
        ValType::Borrow(rt) => Value::Borrow(lift_borrow(cx, src.next_u32()?, *rt)?),
        sugar => unreachable!("despecialize left {}", sugar.kind_name()),
    })
}

/// Reads a case payload out of the variant's joined lanes, converting each
/// lane back to the kind the payload type expects.
struct CoerceFlat<'s, 'k> {
    inner: &'s mut dyn FlatSource,
    lanes: slice::Iter<'k, FlatKind>,
}

impl FlatSource for CoerceFlat<'_, '_> {
    fn next(&mut self, want: FlatKind) -> Result<FlatValue, Trap> {
        let have = *self.lanes.next().ok_or(Trap::FlatExhausted)?;
        let x = self.inner.next(have)?;
        Ok(match (x, want) {
            (FlatValue::U32(i), FlatKind::Float32) => FlatValue::F32(f32::from_bits(i)),
            (FlatValue::U64(i), FlatKind::U32) => FlatValue::U32(i as u32),
            (FlatValue::U64(i), FlatKind::Float32) => FlatValue::F32(f32::from_bits(i as u32)),
            (FlatValue::U64(i), FlatKind::Float64) => FlatValue::F64(f64::from_bits(i)),
            (x, _) => x,
        })
    }
}

fn lift_flat_variant(cx: &mut Cx<'_>, src: &mut dyn FlatSource, cases: &[Case]) -> Result<Value> {
    checked_discriminant(cases)?;
    let flat = flatten_variant(cases);
    let case_index = src.next_u32()?;
    let case = cases.get(case_index as usize).ok_or(Trap::InvalidCaseIndex {
        index: case_index,
        cases: cases.len(),
    })?;

    let mut coerce = CoerceFlat {
        inner: src,
        lanes: flat[1..].iter(),
    };
    let payload = match &case.ty {
        Some(ty) => Some(Box::new(lift_flat(cx, &mut coerce, ty)?)),
        None => None,
    };
    // skip the lanes this case does not use
    let CoerceFlat { inner, lanes } = coerce;
    for &have in lanes {
        inner.next(have)?;
    }

    Ok(Value::Variant {
        case: case_label_with_refinements(case, cases),
        payload,
    })
}

/// Lower `v` as type `t` into its flat lanes.
pub fn lower_flat(cx: &mut Cx<'_>, v: &Value, t: &ValType) -> Result<Vec<FlatValue>> {
    let t = despecialize(t);
    Ok(match (t.as_ref(), v) {
        (ValType::Bool, Value::Bool(b)) => vec![FlatValue::U32(*b as u32)],
        (ValType::U8 | ValType::U16 | ValType::U32 | ValType::S8 | ValType::S16 | ValType::S32, _) => {
            vec![FlatValue::U32(int_bits(v, &t)? as u32)]
        }
        (ValType::U64 | ValType::S64, _) => vec![FlatValue::U64(int_bits(v, &t)?)],
        (ValType::Float32, Value::F32(f)) => vec![FlatValue::F32(canonicalize_nan32(*f))],
        (ValType::Float64, Value::F64(f)) => vec![FlatValue::F64(canonicalize_nan64(*f))],
        (ValType::Char, Value::Char(c)) => vec![FlatValue::U32(*c as u32)],
        (ValType::String, Value::String(s)) => {
            let (ptr, tagged_code_units) = store_string_into_range(cx, s)?;
            vec![FlatValue::U32(ptr), FlatValue::U32(tagged_code_units)]
        }
        (ValType::List(elem), Value::List(items)) => {
            let (ptr, length) = store_list_into_range(cx, items, elem)?;
            vec![FlatValue::U32(ptr), FlatValue::U32(length)]
        }
        (ValType::Record(fields), Value::Record(_)) => {
            let mut flat = Vec::new();
            for field in fields {
                let value = super::store::record_field(v, &field.label)?;
                flat.extend(lower_flat(cx, value, &field.ty)?);
            }
            flat
        }
        (ValType::Variant(cases), _) => lower_flat_variant(cx, v, cases)?,
        (ValType::Flags(labels), _) => pack_flags(v, labels)?
            .into_iter()
            .map(FlatValue::U32)
            .collect(),
        (ValType::Own(rt), Value::Own(rep)) => vec![FlatValue::U32(lower_own(cx, *rep, *rt)?)],
        (ValType::Borrow(rt), Value::Borrow(rep)) => {
            vec![FlatValue::U32(lower_borrow(cx, *rep, *rt)?)]
        }
        (t, v) => return Err(type_mismatch(t, v).into()),
    })
}

fn lower_flat_variant(cx: &mut Cx<'_>, v: &Value, cases: &[Case]) -> Result<Vec<FlatValue>> {
    checked_discriminant(cases)?;
    let (case_index, payload) = match_case(v, cases)?;
    let flat = flatten_variant(cases);
    let lanes = &flat[1..];

    let payload = match (&cases[case_index].ty, payload) {
        (Some(ty), Some(p)) => lower_flat(cx, p, ty)?,
        _ => Vec::new(),
    };

    let mut out = Vec::with_capacity(flat.len());
    out.push(FlatValue::U32(case_index as u32));
    for (have, &want) in payload.iter().zip(lanes) {
        out.push(match (*have, want) {
            (FlatValue::F32(f), FlatKind::U32) => FlatValue::U32(f.to_bits()),
            (FlatValue::U32(i), FlatKind::U64) => FlatValue::U64(i as u64),
            (FlatValue::F32(f), FlatKind::U64) => FlatValue::U64(f.to_bits() as u64),
            (FlatValue::F64(f), FlatKind::U64) => FlatValue::U64(f.to_bits()),
            (have, _) => have,
        });
    }
    for &want in &lanes[payload.len()..] {
        out.push(FlatValue::zero(want));
    }
    Ok(out)
}
