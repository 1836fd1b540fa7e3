//! Error types for lifting, lowering and handle management.
//!
//! Two tiers: a [`Trap`] is an invariant violation that aborts the call in
//! flight and poisons the instance; a [`ValidationError`] is a local shape
//! mismatch the immediate caller may recover from.

use canon_types::{FlatKind, ResourceTypeId};
use thiserror::Error;

/// Unrecoverable invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("pointer {ptr:#x} is not aligned to {alignment}")]
    Misaligned { ptr: u32, alignment: u32 },

    #[error("out of bounds: {ptr:#x}+{len} exceeds memory size {memory_size}")]
    OutOfBounds { ptr: u64, len: u64, memory_size: usize },

    #[error("invalid char scalar {0:#x}")]
    InvalidChar(u32),

    #[error("case index {index} out of range for variant with {cases} cases")]
    InvalidCaseIndex { index: u32, cases: usize },

    #[error("variant with {0} cases cannot be indexed by a 32-bit discriminant")]
    DiscriminantOverflow(usize),

    #[error("instance cannot be entered")]
    CannotEnter,

    #[error("instance cannot be left")]
    CannotLeave,

    #[error("resource {resource:?} can only be destroyed by its owning instance")]
    ForeignDestroy { resource: ResourceTypeId },

    #[error("handle {index} is lent {lend_count} time(s)")]
    HandleLent { index: u32, lend_count: u32 },

    #[error("invalid handle index {index}")]
    InvalidHandle { index: u32 },

    #[error("handle {index} is borrowed, not owned")]
    NotOwned { index: u32 },

    #[error("handle table is full")]
    HandleTableFull,

    #[error("{0} borrowed handle(s) still live at call exit")]
    BorrowsOutstanding(usize),

    #[error("flat values exhausted")]
    FlatExhausted,

    #[error("{0} flat value(s) left over after lifting")]
    SurplusFlatValues(usize),

    #[error("expected flat {expected:?}, found {found:?}")]
    FlatKindMismatch { expected: FlatKind, found: FlatKind },

    #[error("string of {0} bytes exceeds the maximum length")]
    StringTooLong(u64),

    #[error("list of {0} bytes exceeds the 32-bit address range")]
    ListTooLong(u64),

    #[error("list of {length} zero-sized elements exceeds memory size {memory_size}")]
    ListLengthExceedsMemory { length: u32, memory_size: usize },

    #[error("invalid {0} string data")]
    InvalidString(&'static str),

    #[error("no realloc function configured")]
    MissingRealloc,
}

/// Recoverable mismatch between a value and the type it is lowered to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("signedness mismatch: cannot store {got} as {expected}")]
    SignednessMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("value {value} does not fit in {ty}")]
    OutOfRange { value: i128, ty: &'static str },

    #[error("missing record field '{0}'")]
    MissingField(String),

    #[error("no case matches variant label '{0}'")]
    UnknownCase(String),

    #[error("case '{0}' payload does not match its declaration")]
    PayloadMismatch(String),

    #[error("unknown flag label '{0}'")]
    UnknownFlag(String),

    #[error("expected {expected} values, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("character {0:?} is not representable in Latin-1")]
    NotLatin1(char),

    #[error("unknown string encoding '{0}'")]
    UnknownEncoding(String),
}

/// Any failure surfaced by the codec or the call boundary.
#[derive(Debug, Error)]
pub enum CanonError {
    #[error("trap: {0}")]
    Trap(#[from] Trap),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// An embedder callback failed: callee, realloc, post-return or destructor.
    #[error("callee failed: {0}")]
    Callee(anyhow::Error),
}

impl CanonError {
    /// Everything except a validation failure aborts the call.
    pub fn is_trap(&self) -> bool {
        !matches!(self, CanonError::Validation(_))
    }

    pub fn as_trap(&self) -> Option<&Trap> {
        match self {
            CanonError::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CanonError {
    /// Callbacks may themselves call back into the canonical ABI; keep their
    /// traps intact instead of burying them under `Callee`.
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<CanonError>() {
            Ok(inner) => return inner,
            Err(err) => err,
        };
        match err.downcast::<Trap>() {
            Ok(trap) => CanonError::Trap(trap),
            Err(err) => CanonError::Callee(err),
        }
    }
}

/// Errors from loading a [`CanonConfig`](crate::CanonConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = CanonError> = std::result::Result<T, E>;
