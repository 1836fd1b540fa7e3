//! String transcoding
//!
//! A string crosses the boundary as `(ptr, tagged_code_units)`. Only the
//! `latin1+utf16` encoding uses the tag: when [`UTF16_TAG`] is set the
//! remaining bits count UTF-16 code units, otherwise Latin-1 bytes.

use super::{check_aligned, Cx};
use crate::error::{Result, Trap, ValidationError};
use crate::memory::StringEncoding;

pub const UTF16_TAG: u32 = 1 << 31;
pub const MAX_STRING_BYTE_LENGTH: u32 = (1 << 31) - 1;

pub(crate) fn load_string(cx: &mut Cx<'_>, ptr: u32) -> Result<String> {
    let memory = cx.memory();
    let begin = memory.read_uint(ptr, 4)? as u32;
    let tagged_code_units = memory.read_uint(ptr + 4, 4)? as u32;
    load_string_from_range(cx, begin, tagged_code_units)
}

/// Decode the string described by `(ptr, tagged_code_units)`.
pub fn load_string_from_range(cx: &mut Cx<'_>, ptr: u32, tagged_code_units: u32) -> Result<String> {
    let (alignment, byte_length, utf16) = match cx.string_encoding() {
        StringEncoding::Utf8 => (1, tagged_code_units as u64, false),
        StringEncoding::Latin1 => (1, tagged_code_units as u64, false),
        StringEncoding::Utf16 => (2, 2 * tagged_code_units as u64, true),
        StringEncoding::Latin1Utf16 if tagged_code_units & UTF16_TAG != 0 => {
            (2, 2 * (tagged_code_units ^ UTF16_TAG) as u64, true)
        }
        StringEncoding::Latin1Utf16 => (2, tagged_code_units as u64, false),
    };
    check_aligned(ptr, alignment)?;
    let memory = cx.memory();
    memory.check_range(ptr, byte_length)?;
    let bytes = memory.read(ptr, byte_length as u32)?;

    match (cx.string_encoding(), utf16) {
        (_, true) => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|u| u16::from_le_bytes([u[0], u[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| Trap::InvalidString("utf16").into())
        }
        (StringEncoding::Utf8, false) => {
            String::from_utf8(bytes).map_err(|_| Trap::InvalidString("utf8").into())
        }
        (_, false) => Ok(bytes.into_iter().map(char::from).collect()),
    }
}

pub(crate) fn store_string(cx: &mut Cx<'_>, s: &str, ptr: u32) -> Result<()> {
    let (begin, tagged_code_units) = store_string_into_range(cx, s)?;
    let memory = cx.memory();
    memory.write_uint(ptr, begin as u64, 4)?;
    memory.write_uint(ptr + 4, tagged_code_units as u64, 4)?;
    Ok(())
}

/// Encode `s` into freshly reallocated memory.
///
/// Returns the pointer and the (possibly tagged) code unit count.
pub fn store_string_into_range(cx: &mut Cx<'_>, s: &str) -> Result<(u32, u32)> {
    match cx.string_encoding() {
        StringEncoding::Utf8 => store_string_copy(cx, s.as_bytes(), 1, s.len() as u64),
        StringEncoding::Utf16 => store_utf8_to_utf16(cx, s),
        StringEncoding::Latin1 => {
            let bytes = encode_latin1(s)?;
            store_string_copy(cx, &bytes, 1, bytes.len() as u64)
        }
        StringEncoding::Latin1Utf16 => store_string_to_latin1_or_utf16(cx, s),
    }
}

fn encode_latin1(s: &str) -> Result<Vec<u8>, ValidationError> {
    s.chars()
        .map(|c| u8::try_from(c).map_err(|_| ValidationError::NotLatin1(c)))
        .collect()
}

fn check_string_length(byte_length: u64) -> Result<u32, Trap> {
    if byte_length > MAX_STRING_BYTE_LENGTH as u64 {
        return Err(Trap::StringTooLong(byte_length));
    }
    Ok(byte_length as u32)
}

/// Allocate exactly `encoded.len()` bytes and copy them in.
fn store_string_copy(
    cx: &mut Cx<'_>,
    encoded: &[u8],
    alignment: u32,
    code_units: u64,
) -> Result<(u32, u32)> {
    let byte_length = check_string_length(encoded.len() as u64)?;
    let ptr = cx.realloc(0, 0, alignment, byte_length)?;
    check_aligned(ptr, alignment)?;
    let memory = cx.memory();
    memory.check_range(ptr, byte_length as u64)?;
    memory.write(ptr, encoded)?;
    Ok((ptr, code_units as u32))
}

/// Allocate the UTF-16 worst case for `s`, write it, then shrink to fit.
fn store_utf8_to_utf16(cx: &mut Cx<'_>, s: &str) -> Result<(u32, u32)> {
    let worst_case_size = check_string_length(2 * s.len() as u64)?;
    let mut ptr = cx.realloc(0, 0, 2, worst_case_size)?;
    check_aligned(ptr, 2)?;
    cx.memory().check_range(ptr, worst_case_size as u64)?;

    let encoded = encode_utf16(s);
    cx.memory().write(ptr, &encoded)?;
    let encoded_len = encoded.len() as u32;
    if encoded_len < worst_case_size {
        ptr = cx.realloc(ptr, worst_case_size, 2, encoded_len)?;
        check_aligned(ptr, 2)?;
        cx.memory().check_range(ptr, encoded_len as u64)?;
    }
    Ok((ptr, encoded_len / 2))
}

fn encode_utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Write Latin-1 until a character outside it shows up, then inflate what
/// was written so far to UTF-16 and finish the string in UTF-16.
fn store_string_to_latin1_or_utf16(cx: &mut Cx<'_>, s: &str) -> Result<(u32, u32)> {
    // UTF-8 never has fewer bytes than the Latin-1 encoding has characters
    let src_code_units = check_string_length(s.len() as u64)?;
    let mut ptr = cx.realloc(0, 0, 2, src_code_units)?;
    check_aligned(ptr, 2)?;
    cx.memory().check_range(ptr, src_code_units as u64)?;

    let mut dst_byte_length: u32 = 0;
    for c in s.chars() {
        if let Ok(byte) = u8::try_from(c) {
            cx.memory().write(ptr + dst_byte_length, &[byte])?;
            dst_byte_length += 1;
            continue;
        }

        let worst_case_size = check_string_length(2 * src_code_units as u64)?;
        ptr = cx.realloc(ptr, src_code_units, 2, worst_case_size)?;
        check_aligned(ptr, 2)?;
        let memory = cx.memory();
        memory.check_range(ptr, worst_case_size as u64)?;

        // inflate back to front so no byte is overwritten before it is read
        for j in (0..dst_byte_length).rev() {
            let byte = memory.read(ptr + j, 1)?[0];
            memory.write(ptr + 2 * j, &[byte, 0])?;
        }
        let encoded = encode_utf16(s);
        let inflated = 2 * dst_byte_length as usize;
        memory.write(ptr + inflated as u32, &encoded[inflated..])?;

        let encoded_len = encoded.len() as u32;
        if worst_case_size > encoded_len {
            ptr = cx.realloc(ptr, worst_case_size, 2, encoded_len)?;
            check_aligned(ptr, 2)?;
            cx.memory().check_range(ptr, encoded_len as u64)?;
        }
        return Ok((ptr, (encoded_len / 2) | UTF16_TAG));
    }

    if dst_byte_length < src_code_units {
        ptr = cx.realloc(ptr, src_code_units, 2, dst_byte_length)?;
        check_aligned(ptr, 2)?;
        cx.memory().check_range(ptr, dst_byte_length as u64)?;
    }
    Ok((ptr, dst_byte_length))
}
