//! Canonical ABI type model
//!
//! The pure half of the canonical ABI: value types and their sugared forms,
//! the byte layout of every type in linear memory, and the flat scalar
//! signature used when values are passed by value.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  types    - ValType, despecialization    │
//! │  layout   - alignment / size             │
//! │  flatten  - flat lanes, func signatures  │
//! │  value    - abstract and flat values     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Everything here is side-effect free; the codec that moves bytes lives in
//! the `canon-abi` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod flatten;
pub mod layout;
pub mod types;
pub mod value;

pub use flatten::{
    flatten_functype, flatten_type, flatten_types, flatten_variant, CoreFuncType, Direction,
    FlatKind, FlatLimits, MAX_FLAT_PARAMS, MAX_FLAT_RESULTS,
};
pub use layout::{
    align_to, alignment, discriminant_type, max_case_alignment, num_i32_flags, size,
    DiscriminantType,
};
pub use types::{despecialize, Case, Field, FuncType, ResourceTypeId, ValType};
pub use value::{FlatValue, Value};
