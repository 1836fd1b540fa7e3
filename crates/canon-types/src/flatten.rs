//! Flattening
//!
//! Computes the sequence of core scalar lanes a value occupies when it is
//! passed by value, and the core signature of a component function.

use alloc::vec;
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::layout::{discriminant_type, num_i32_flags};
use crate::types::{despecialize, Case, Field, FuncType, ValType};

pub const MAX_FLAT_PARAMS: usize = 16;
pub const MAX_FLAT_RESULTS: usize = 1;

/// Kind of one flat lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FlatKind {
    U32,
    U64,
    Float32,
    Float64,
}

impl FlatKind {
    /// Kind of a lane shared by two variant cases.
    pub fn join(self, other: FlatKind) -> FlatKind {
        match (self, other) {
            (a, b) if a == b => a,
            (FlatKind::U32, FlatKind::Float32) | (FlatKind::Float32, FlatKind::U32) => FlatKind::U32,
            _ => FlatKind::U64,
        }
    }
}

/// Thresholds above which parameters or results spill to linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlatLimits {
    pub max_flat_params: usize,
    pub max_flat_results: usize,
}

impl Default for FlatLimits {
    fn default() -> Self {
        Self {
            max_flat_params: MAX_FLAT_PARAMS,
            max_flat_results: MAX_FLAT_RESULTS,
        }
    }
}

/// Which side of the boundary the core function sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Core function exported and lifted into a component function.
    Lift,
    /// Component function lowered into a core import.
    Lower,
}

/// Core function signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreFuncType {
    pub params: Vec<FlatKind>,
    pub results: Vec<FlatKind>,
}

pub fn flatten_type(t: &ValType) -> Vec<FlatKind> {
    match despecialize(t).as_ref() {
        ValType::Bool
        | ValType::U8
        | ValType::U16
        | ValType::U32
        | ValType::S8
        | ValType::S16
        | ValType::S32
        | ValType::Char => vec![FlatKind::U32],
        ValType::U64 | ValType::S64 => vec![FlatKind::U64],
        ValType::Float32 => vec![FlatKind::Float32],
        ValType::Float64 => vec![FlatKind::Float64],
        ValType::String | ValType::List(_) => vec![FlatKind::U32, FlatKind::U32],
        ValType::Record(fields) => flatten_record(fields),
        ValType::Variant(cases) => flatten_variant(cases),
        ValType::Flags(labels) => vec![FlatKind::U32; num_i32_flags(labels.len())],
        ValType::Own(_) | ValType::Borrow(_) => vec![FlatKind::U32],
        sugar => unreachable!("despecialize left {}", sugar.kind_name()),
    }
}

pub fn flatten_types(ts: &[ValType]) -> Vec<FlatKind> {
    ts.iter().flat_map(flatten_type).collect()
}

fn flatten_record(fields: &[Field]) -> Vec<FlatKind> {
    fields.iter().flat_map(|f| flatten_type(&f.ty)).collect()
}

/// Discriminant lane followed by the payload lanes joined across cases.
pub fn flatten_variant(cases: &[Case]) -> Vec<FlatKind> {
    let mut payload: Vec<FlatKind> = Vec::new();
    for ty in cases.iter().filter_map(|c| c.ty.as_ref()) {
        for (i, kind) in flatten_type(ty).into_iter().enumerate() {
            match payload.get_mut(i) {
                Some(lane) => *lane = lane.join(kind),
                None => payload.push(kind),
            }
        }
    }
    let mut flat = flatten_type(&discriminant_type(cases).as_val_type());
    flat.extend(payload);
    flat
}

/// Core signature of `ft` in the given direction.
///
/// Spilled parameters become a single pointer in both directions. Spilled
/// results become a returned pointer when lifting, but an extra out-pointer
/// parameter when lowering, since the caller owns that buffer.
pub fn flatten_functype(ft: &FuncType, direction: Direction, limits: &FlatLimits) -> CoreFuncType {
    let mut params = flatten_types(ft.param_types());
    if params.len() > limits.max_flat_params {
        params = vec![FlatKind::U32];
    }
    let mut results = flatten_types(ft.result_types());
    if results.len() > limits.max_flat_results {
        match direction {
            Direction::Lift => results = vec![FlatKind::U32],
            Direction::Lower => {
                params.push(FlatKind::U32);
                results = Vec::new();
            }
        }
    }
    CoreFuncType { params, results }
}

impl FuncType {
    pub fn flat_signature(&self, direction: Direction, limits: &FlatLimits) -> CoreFuncType {
        flatten_functype(self, direction, limits)
    }
}
