//! Loading values from linear memory

use canon_types::{
    align_to, alignment, despecialize, max_case_alignment, size, Case, Field, ValType, Value,
};

use super::string::load_string;
use super::{
    canonicalize_nan32, canonicalize_nan64, case_label_with_refinements, check_aligned,
    checked_discriminant, convert_u32_to_char, unpack_flags, Cx,
};
use crate::error::{Result, Trap};
use crate::runtime::{lift_borrow, lift_own};

/// Load a value of type `t` stored at `ptr`.
pub fn load(cx: &mut Cx<'_>, ptr: u32, t: &ValType) -> Result<Value> {
    let memory = cx.memory();
    memory.check_range(ptr, size(t) as u64)?;
    Ok(match despecialize(t).as_ref() {
        ValType::Bool => Value::Bool(memory.read_uint(ptr, 1)? != 0),
        ValType::U8 => Value::U8(memory.read_uint(ptr, 1)? as u8),
        ValType::U16 => Value::U16(memory.read_uint(ptr, 2)? as u16),
        ValType::U32 => Value::U32(memory.read_uint(ptr, 4)? as u32),
        ValType::U64 => Value::U64(memory.read_uint(ptr, 8)?),
        ValType::S8 => Value::S8(memory.read_uint(ptr, 1)? as u8 as i8),
        ValType::S16 => Value::S16(memory.read_uint(ptr, 2)? as u16 as i16),
        ValType::S32 => Value::S32(memory.read_uint(ptr, 4)? as u32 as i32),
        ValType::S64 => Value::S64(memory.read_uint(ptr, 8)? as i64),
        ValType::Float32 => {
            let bits = memory.read_uint(ptr, 4)? as u32;
            Value::F32(canonicalize_nan32(f32::from_bits(bits)))
        }
        ValType::Float64 => {
            let bits = memory.read_uint(ptr, 8)?;
            Value::F64(canonicalize_nan64(f64::from_bits(bits)))
        }
        ValType::Char => Value::Char(convert_u32_to_char(memory.read_uint(ptr, 4)? as u32)?),
        ValType::String => Value::String(load_string(cx, ptr)?),
        ValType::List(elem) => Value::List(load_list(cx, ptr, elem)?),
        ValType::Record(fields) => Value::Record(load_record(cx, ptr, fields)?),
        ValType::Variant(cases) => load_variant(cx, ptr, cases)?,
        ValType::Flags(labels) => load_flags(cx, ptr, labels, size(t))?,
        ValType::Own(rt) => {
            let index = memory.read_uint(ptr, 4)? as u32;
            Value::Own(lift_own(cx, index, *rt)?)
        }
        ValType::Borrow(rt) => {
            let index = memory.read_uint(ptr, 4)? as u32;
            Value::Borrow(lift_borrow(cx, index, *rt)?)
        }
        sugar => unreachable!("despecialize left {}", sugar.kind_name()),
    })
}

/// Load the fields of a record at `ptr`, in declaration order.
pub(crate) fn load_record(cx: &mut Cx<'_>, ptr: u32, fields: &[Field]) -> Result<Vec<(String, Value)>> {
    let mut record = Vec::with_capacity(fields.len());
    let mut offset = ptr;
    for field in fields {
        offset = align_to(offset, alignment(&field.ty));
        record.push((field.label.clone(), load(cx, offset, &field.ty)?));
        offset += size(&field.ty);
    }
    Ok(record)
}

fn load_list(cx: &mut Cx<'_>, ptr: u32, elem: &ValType) -> Result<Vec<Value>> {
    let memory = cx.memory();
    let begin = memory.read_uint(ptr, 4)? as u32;
    let length = memory.read_uint(ptr + 4, 4)? as u32;
    load_list_from_range(cx, begin, length, elem)
}

/// Load `length` elements laid out contiguously from `ptr`.
/// Upper bound on the up-front reservation for a lifted list.
const MAX_LIST_RESERVE: usize = 4096;

pub(crate) fn load_list_from_range(
    cx: &mut Cx<'_>,
    ptr: u32,
    length: u32,
    elem: &ValType,
) -> Result<Vec<Value>> {
    let elem_size = size(elem);
    check_aligned(ptr, alignment(elem))?;
    let memory = cx.memory();
    memory.check_range(ptr, length as u64 * elem_size as u64)?;
    if elem_size == 0 && length as usize > memory.len() {
        return Err(Trap::ListLengthExceedsMemory {
            length,
            memory_size: memory.len(),
        }
        .into());
    }
    let mut items = Vec::with_capacity((length as usize).min(MAX_LIST_RESERVE));
    for i in 0..length {
        items.push(load(cx, ptr + i * elem_size, elem)?);
    }
    Ok(items)
}

fn load_variant(cx: &mut Cx<'_>, ptr: u32, cases: &[Case]) -> Result<Value> {
    let disc_size = checked_discriminant(cases)?.size();
    let case_index = cx.memory().read_uint(ptr, disc_size)? as u32;
    let case = cases.get(case_index as usize).ok_or(Trap::InvalidCaseIndex {
        index: case_index,
        cases: cases.len(),
    })?;
    let payload_ptr = align_to(ptr + disc_size, max_case_alignment(cases));
    let payload = match &case.ty {
        Some(ty) => Some(Box::new(load(cx, payload_ptr, ty)?)),
        None => None,
    };
    Ok(Value::Variant {
        case: case_label_with_refinements(case, cases),
        payload,
    })
}

fn load_flags(cx: &mut Cx<'_>, ptr: u32, labels: &[String], byte_size: u32) -> Result<Value> {
    let mut bytes = cx.memory().read(ptr, byte_size)?;
    bytes.resize(bytes.len().div_ceil(4) * 4, 0);
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Ok(unpack_flags(&words, labels))
}
