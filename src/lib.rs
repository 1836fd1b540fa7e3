//! Canon ABI: value marshalling for component boundaries
//!
//! Moves typed values between a host and a sandboxed core module, either as
//! a short list of flat scalars or laid out in the module's linear memory,
//! and tracks resource handles with strict ownership across each call.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              canon-abi                  │
//! │                                         │
//! │  runtime  - canon_lift / canon_lower,   │
//! │             handle tables, resources    │
//! │  abi      - lift/lower, load/store,     │
//! │             string transcoding          │
//! │  memory   - linear memory, options      │
//! │                                         │
//! ├─────────────────────────────────────────┤
//! │   canon-types (types, layout, flatten)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let memory = Memory::new(1024);
//! let opts = CanonicalOptions::new(memory.clone()).with_realloc(bump_realloc(&memory, 0));
//! let mut inst = ComponentInstance::new();
//! let ft = FuncType::new(vec![ValType::String], vec![ValType::U32]);
//!
//! let call = canon_lift(&opts, &mut inst, |_, args| Ok(vec![args[1]]), &ft,
//!     &[Value::from("hello")], &FlatLimits::default())?;
//! assert_eq!(call.post_return(&mut inst)?, vec![Value::U32(5)]);
//! ```

pub mod abi;
pub mod error;
pub mod memory;
pub mod runtime;

pub use canon_types;
pub use canon_types::{
    alignment, despecialize, flatten_functype, flatten_type, size, Case, CoreFuncType, Direction,
    Field, FlatKind, FlatLimits, FlatValue, FuncType, ResourceTypeId, ValType, Value,
};

pub use abi::{lift_flat, load, lower_flat, store, Cx, FlatIter, FlatSource};
pub use error::{CanonError, ConfigError, Result, Trap, ValidationError};
pub use memory::{
    bump_realloc, CanonConfig, CanonicalOptions, Memory, PostReturnFn, ReallocFn, StringEncoding,
};
pub use runtime::{
    canon_lift, canon_lower, canon_resource_drop, canon_resource_new, canon_resource_rep,
    CallContext, ComponentInstance, HostResults, LiftedCall, ResourceType,
};
