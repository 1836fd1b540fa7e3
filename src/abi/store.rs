//! Storing values into linear memory

use canon_types::{
    align_to, alignment, despecialize, max_case_alignment, size, Case, Field, ValType, Value,
};

use super::string::store_string;
use super::{
    canonicalize_nan32, canonicalize_nan64, check_aligned, checked_discriminant, int_bits,
    match_case, pack_flags, type_mismatch, Cx,
};
use crate::error::{Result, Trap, ValidationError};
use crate::runtime::{lower_borrow, lower_own};

/// Store `v` as type `t` at `ptr`.
pub fn store(cx: &mut Cx<'_>, v: &Value, t: &ValType, ptr: u32) -> Result<()> {
    let memory = cx.memory();
    memory.check_range(ptr, size(t) as u64)?;
    let t = despecialize(t);
    match (t.as_ref(), v) {
        (ValType::Bool, Value::Bool(b)) => memory.write_uint(ptr, *b as u64, 1)?,
        (
            ValType::U8
            | ValType::U16
            | ValType::U32
            | ValType::U64
            | ValType::S8
            | ValType::S16
            | ValType::S32
            | ValType::S64,
            _,
        ) => memory.write_uint(ptr, int_bits(v, &t)?, size(&t))?,
        (ValType::Float32, Value::F32(f)) => {
            memory.write_uint(ptr, canonicalize_nan32(*f).to_bits() as u64, 4)?
        }
        (ValType::Float64, Value::F64(f)) => {
            memory.write_uint(ptr, canonicalize_nan64(*f).to_bits(), 8)?
        }
        (ValType::Char, Value::Char(c)) => memory.write_uint(ptr, *c as u64, 4)?,
        (ValType::String, Value::String(s)) => store_string(cx, s, ptr)?,
        (ValType::List(elem), Value::List(items)) => store_list(cx, items, elem, ptr)?,
        (ValType::Record(fields), Value::Record(_)) => store_record(cx, v, fields, ptr)?,
        (ValType::Variant(cases), _) => store_variant(cx, v, cases, ptr)?,
        (ValType::Flags(labels), _) => {
            let bytes: Vec<u8> = pack_flags(v, labels)?
                .into_iter()
                .flat_map(u32::to_le_bytes)
                .take(size(&t) as usize)
                .collect();
            memory.write(ptr, &bytes)?
        }
        (ValType::Own(rt), Value::Own(rep)) => {
            let index = lower_own(cx, *rep, *rt)?;
            memory.write_uint(ptr, index as u64, 4)?
        }
        (ValType::Borrow(rt), Value::Borrow(rep)) => {
            let index = lower_borrow(cx, *rep, *rt)?;
            memory.write_uint(ptr, index as u64, 4)?
        }
        (t, v) => return Err(type_mismatch(t, v).into()),
    }
    Ok(())
}

/// The value of field `label` in record value `v`.
pub(crate) fn record_field<'v>(v: &'v Value, label: &str) -> Result<&'v Value, ValidationError> {
    let Value::Record(fields) = v else {
        return Err(ValidationError::TypeMismatch {
            expected: "record",
            got: v.kind_name(),
        });
    };
    fields
        .iter()
        .find(|(l, _)| l == label)
        .map(|(_, v)| v)
        .ok_or_else(|| ValidationError::MissingField(label.to_string()))
}

fn store_record(cx: &mut Cx<'_>, v: &Value, fields: &[Field], ptr: u32) -> Result<()> {
    let mut offset = ptr;
    for field in fields {
        offset = align_to(offset, alignment(&field.ty));
        store(cx, record_field(v, &field.label)?, &field.ty, offset)?;
        offset += size(&field.ty);
    }
    Ok(())
}

fn store_list(cx: &mut Cx<'_>, items: &[Value], elem: &ValType, ptr: u32) -> Result<()> {
    let (begin, length) = store_list_into_range(cx, items, elem)?;
    let memory = cx.memory();
    memory.write_uint(ptr, begin as u64, 4)?;
    memory.write_uint(ptr + 4, length as u64, 4)?;
    Ok(())
}

/// Allocate room for `items` through realloc and store them there.
///
/// Returns the `(ptr, length)` pair describing the list.
pub(crate) fn store_list_into_range(
    cx: &mut Cx<'_>,
    items: &[Value],
    elem: &ValType,
) -> Result<(u32, u32)> {
    let elem_size = size(elem);
    let byte_length = items.len() as u64 * elem_size as u64;
    if byte_length > u32::MAX as u64 {
        return Err(Trap::ListTooLong(byte_length).into());
    }
    let elem_alignment = alignment(elem);
    let ptr = cx.realloc(0, 0, elem_alignment, byte_length as u32)?;
    check_aligned(ptr, elem_alignment)?;
    cx.memory().check_range(ptr, byte_length)?;
    for (i, item) in items.iter().enumerate() {
        store(cx, item, elem, ptr + i as u32 * elem_size)?;
    }
    Ok((ptr, items.len() as u32))
}

fn store_variant(cx: &mut Cx<'_>, v: &Value, cases: &[Case], ptr: u32) -> Result<()> {
    let disc_size = checked_discriminant(cases)?.size();
    let (case_index, payload) = match_case(v, cases)?;
    cx.memory().write_uint(ptr, case_index as u64, disc_size)?;
    let payload_ptr = align_to(ptr + disc_size, max_case_alignment(cases));
    if let (Some(ty), Some(p)) = (&cases[case_index].ty, payload) {
        store(cx, p, ty, payload_ptr)?;
    }
    Ok(())
}
