//! Linear memory and canonical options
//!
//! `Memory` is a shared handle over one growable little-endian byte buffer.
//! Every access borrows the buffer afresh: realloc and post-return callbacks
//! may grow it, so no slice is ever held across a callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use canon_types::{align_to, FlatLimits, FlatValue};
use serde::{Deserialize, Serialize};

use crate::error::{CanonError, ConfigError, Result, Trap, ValidationError};

/// Largest memory a 32-bit address space can reach.
pub const MAX_MEMORY_SIZE: usize = u32::MAX as usize;

#[derive(Clone, Default)]
pub struct Memory {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl Memory {
    /// Create a zeroed memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(bytes)),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow by `additional` zero bytes, returning the previous size.
    pub fn grow(&self, additional: usize) -> std::result::Result<usize, Trap> {
        let mut bytes = self.bytes.borrow_mut();
        let old = bytes.len();
        let new = old
            .checked_add(additional)
            .filter(|&n| n <= MAX_MEMORY_SIZE)
            .ok_or(Trap::OutOfBounds {
                ptr: old as u64,
                len: additional as u64,
                memory_size: old,
            })?;
        bytes.resize(new, 0);
        Ok(old)
    }

    /// Fail unless `[ptr, ptr + len)` lies inside the memory.
    pub fn check_range(&self, ptr: u32, len: u64) -> std::result::Result<(), Trap> {
        let memory_size = self.len();
        if ptr as u64 + len > memory_size as u64 {
            return Err(Trap::OutOfBounds {
                ptr: ptr as u64,
                len,
                memory_size,
            });
        }
        Ok(())
    }

    pub fn read(&self, ptr: u32, len: u32) -> std::result::Result<Vec<u8>, Trap> {
        self.check_range(ptr, len as u64)?;
        let start = ptr as usize;
        Ok(self.bytes.borrow()[start..start + len as usize].to_vec())
    }

    pub fn write(&self, ptr: u32, data: &[u8]) -> std::result::Result<(), Trap> {
        self.check_range(ptr, data.len() as u64)?;
        let start = ptr as usize;
        self.bytes.borrow_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read an `nbytes`-wide little-endian unsigned integer.
    pub fn read_uint(&self, ptr: u32, nbytes: u32) -> std::result::Result<u64, Trap> {
        let bytes = self.read(ptr, nbytes)?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `nbytes` of `value`, little-endian.
    pub fn write_uint(&self, ptr: u32, value: u64, nbytes: u32) -> std::result::Result<(), Trap> {
        self.write(ptr, &value.to_le_bytes()[..nbytes as usize])
    }

    /// Copy of the whole buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("len", &self.len()).finish()
    }
}

/// `realloc(old_ptr, old_size, alignment, new_size) -> ptr`
pub type ReallocFn = Rc<dyn Fn(u32, u32, u32, u32) -> anyhow::Result<u32>>;

/// Called with the core results once the caller is done reading them.
pub type PostReturnFn = Rc<dyn Fn(&[FlatValue]) -> anyhow::Result<()>>;

/// A realloc that bump-allocates from `start`, growing `memory` on demand.
///
/// Shrinking returns the old pointer; growing copies the old contents to a
/// fresh block. Nothing is ever freed.
pub fn bump_realloc(memory: &Memory, start: u32) -> ReallocFn {
    let memory = memory.clone();
    let next = Cell::new(start);
    Rc::new(move |old_ptr: u32, old_size: u32, alignment: u32, new_size: u32| -> anyhow::Result<u32> {
        if new_size <= old_size {
            return Ok(old_ptr);
        }
        let ptr = align_to(next.get(), alignment.max(1));
        let end = ptr
            .checked_add(new_size)
            .ok_or_else(|| anyhow::anyhow!("allocation of {new_size} bytes overflows memory"))?;
        if end as usize > memory.len() {
            memory.grow(end as usize - memory.len())?;
        }
        if old_size > 0 {
            let old = memory.read(old_ptr, old_size)?;
            memory.write(ptr, &old)?;
        }
        next.set(end);
        Ok(ptr)
    })
}

// ============================================================================
// Configuration
// ============================================================================

/// Encoding of strings in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StringEncoding {
    #[default]
    #[serde(rename = "utf8")]
    Utf8,
    #[serde(rename = "utf16")]
    Utf16,
    #[serde(rename = "latin1")]
    Latin1,
    /// Latin-1 or UTF-16 chosen per string, tagged in the length's top bit.
    #[serde(rename = "latin1+utf16")]
    Latin1Utf16,
}

impl StringEncoding {
    pub fn name(self) -> &'static str {
        match self {
            StringEncoding::Utf8 => "utf8",
            StringEncoding::Utf16 => "utf16",
            StringEncoding::Latin1 => "latin1",
            StringEncoding::Latin1Utf16 => "latin1+utf16",
        }
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StringEncoding {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "utf8" | "utf-8" => Ok(StringEncoding::Utf8),
            "utf16" | "utf-16" | "utf16le" | "utf-16le" => Ok(StringEncoding::Utf16),
            "latin1" | "latin-1" => Ok(StringEncoding::Latin1),
            "latin1+utf16" => Ok(StringEncoding::Latin1Utf16),
            other => Err(ValidationError::UnknownEncoding(other.to_string())),
        }
    }
}

/// The serializable part of the canonical options.
///
/// ```ignore
/// let config = CanonConfig::from_json(r#"{"string_encoding": "latin1+utf16", "max_flat_results": 2}"#)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub string_encoding: StringEncoding,
    #[serde(flatten)]
    pub limits: FlatLimits,
}

impl CanonConfig {
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> std::result::Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Options shared by every lift and lower within one call.
#[derive(Clone, Default)]
pub struct CanonicalOptions {
    pub memory: Memory,
    pub string_encoding: StringEncoding,
    pub realloc: Option<ReallocFn>,
    pub post_return: Option<PostReturnFn>,
}

impl CanonicalOptions {
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            ..Self::default()
        }
    }

    pub fn from_config(config: &CanonConfig, memory: Memory) -> Self {
        Self {
            memory,
            string_encoding: config.string_encoding,
            ..Self::default()
        }
    }

    pub fn with_string_encoding(mut self, encoding: StringEncoding) -> Self {
        self.string_encoding = encoding;
        self
    }

    pub fn with_realloc(mut self, realloc: ReallocFn) -> Self {
        self.realloc = Some(realloc);
        self
    }

    pub fn with_post_return(mut self, post_return: PostReturnFn) -> Self {
        self.post_return = Some(post_return);
        self
    }

    /// Invoke the configured realloc.
    pub fn realloc(&self, old_ptr: u32, old_size: u32, alignment: u32, new_size: u32) -> Result<u32> {
        let realloc = self.realloc.as_ref().ok_or(Trap::MissingRealloc)?;
        realloc(old_ptr, old_size, alignment, new_size).map_err(CanonError::from)
    }
}

impl fmt::Debug for CanonicalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalOptions")
            .field("memory", &self.memory)
            .field("string_encoding", &self.string_encoding)
            .field("realloc", &self.realloc.is_some())
            .field("post_return", &self.post_return.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_realloc_grows_and_copies() {
        let memory = Memory::new(4);
        let realloc = bump_realloc(&memory, 4);

        let a = realloc(0, 0, 4, 8).expect("alloc");
        assert_eq!(a, 4);
        assert_eq!(memory.len(), 12);
        memory.write(a, b"abcdefgh").expect("write");

        let b = realloc(a, 8, 2, 16).expect("grow");
        assert_eq!(b, 12);
        assert_eq!(memory.read(b, 8).expect("read"), b"abcdefgh");

        assert_eq!(realloc(b, 16, 2, 4).expect("shrink"), b);
    }

    #[test]
    fn read_uint_is_little_endian() {
        let memory = Memory::from_bytes(vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(memory.read_uint(0, 2).expect("read"), 0x0201);
        assert_eq!(memory.read_uint(0, 4).expect("read"), 0x0403_0201);
        assert!(memory.read_uint(2, 4).is_err());
    }
}
