//! Call Boundary Runtime
//!
//! Sequences a call across the component boundary:
//!
//! ```text
//!   canon_lift   host values ──lower──▶ core callee ──lift──▶ host values
//!   canon_lower  core args ──lift──▶ host callee ──lower──▶ core results
//! ```
//!
//! An instance has at most one call in flight. `may_enter` and `may_leave`
//! are cleared around the windows where re-entering or leaving the instance
//! would observe half-built state, and any violation traps.

mod handles;

pub use handles::{
    canon_resource_drop, canon_resource_new, canon_resource_rep, lift_borrow, lift_own,
    lower_borrow, lower_own, Destructor, Handle, HandleTable, HandleTables, Ownership,
    ResourceType, MAX_HANDLES,
};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use canon_types::{flatten_types, FlatLimits, FlatValue, FuncType, ResourceTypeId, Value};
use log::{debug, warn};

use crate::abi::{lift_values, lower_values, Cx, FlatIter, FlatSource};
use crate::error::{CanonError, Result, Trap};
use crate::memory::CanonicalOptions;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);
static NEXT_CALL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

/// A handle slot: resource type plus index into that type's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleRef {
    pub rt: ResourceTypeId,
    pub index: u32,
}

#[derive(Debug)]
pub struct ComponentInstance {
    id: InstanceId,
    pub may_enter: bool,
    pub may_leave: bool,
    pub handles: HandleTables,
}

impl ComponentInstance {
    pub fn new() -> Self {
        Self {
            id: InstanceId(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)),
            may_enter: true,
            may_leave: true,
            handles: HandleTables::default(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }
}

impl Default for ComponentInstance {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one boundary crossing.
pub struct CallContext {
    id: CallId,
    opts: CanonicalOptions,
    /// Owned handles lent out by `lift_borrow`, released at exit.
    lenders: Vec<HandleRef>,
    /// Borrowed handles created by `lower_borrow`, which must be gone by exit.
    borrows: Vec<HandleRef>,
    /// Every handle inserted by `lower_own` or `lower_borrow`, in order.
    lowered: Vec<HandleRef>,
}

impl CallContext {
    pub fn new(opts: CanonicalOptions) -> Self {
        Self {
            id: CallId(NEXT_CALL.fetch_add(1, Ordering::Relaxed)),
            opts,
            lenders: Vec::new(),
            borrows: Vec::new(),
            lowered: Vec::new(),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn options(&self) -> &CanonicalOptions {
        &self.opts
    }

    pub fn lenders(&self) -> &[HandleRef] {
        &self.lenders
    }

    pub(crate) fn track_lend(&mut self, handle: HandleRef) {
        self.lenders.push(handle);
    }

    pub(crate) fn track_borrow(&mut self, handle: HandleRef) {
        self.borrows.push(handle);
    }

    pub(crate) fn track_lowered(&mut self, handle: HandleRef) {
        self.lowered.push(handle);
    }

    /// Position in the lowered-handle log, for [`CallContext::rollback`].
    pub(crate) fn checkpoint(&self) -> usize {
        self.lowered.len()
    }

    /// Finish the call: every handle it lent is returned, and every borrowed
    /// handle it created must have been dropped.
    pub fn exit(mut self, inst: &mut ComponentInstance) -> Result<()> {
        self.try_exit(inst)
    }

    fn try_exit(&mut self, inst: &mut ComponentInstance) -> Result<()> {
        self.release_lends(inst);
        let live = self.live_borrows(inst);
        if !live.is_empty() {
            return Err(trap(Trap::BorrowsOutstanding(live.len())));
        }
        debug!("call {:?} exited", self.id);
        Ok(())
    }

    /// Finish a call that failed: return every lend and discard the borrowed
    /// handles scoped to it.
    pub fn abort(mut self, inst: &mut ComponentInstance) {
        self.release_lends(inst);
        let live = self.live_borrows(inst);
        for r in &live {
            let _ = inst.handles.table(r.rt).remove(r.index);
        }
        debug!("call {:?} aborted, discarded {} borrow(s)", self.id, live.len());
    }

    /// Remove the handles lowered since `checkpoint`, newest first.
    ///
    /// Only valid while nothing on the other side has seen their indices.
    pub(crate) fn rollback(&mut self, inst: &mut ComponentInstance, checkpoint: usize) {
        for r in self.lowered.drain(checkpoint..).rev() {
            let _ = inst.handles.table(r.rt).remove(r.index);
        }
    }

    fn release_lends(&mut self, inst: &mut ComponentInstance) {
        for lender in self.lenders.drain(..) {
            // a lent handle can be neither dropped nor moved out
            if let Ok(handle) = inst.handles.table(lender.rt).get_mut(lender.index) {
                handle.lend_count -= 1;
            }
        }
    }

    fn live_borrows(&self, inst: &ComponentInstance) -> Vec<HandleRef> {
        let mut live: Vec<HandleRef> = self
            .borrows
            .iter()
            .copied()
            .filter(|r| {
                inst.handles
                    .lookup(r.rt, r.index)
                    .is_ok_and(|h| h.ownership == Ownership::Borrowed(self.id))
            })
            .collect();
        live.sort();
        live.dedup();
        live
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.id)
            .field("opts", &self.opts)
            .field("lenders", &self.lenders)
            .field("borrows", &self.borrows)
            .field("lowered", &self.lowered)
            .finish()
    }
}

fn trap(t: Trap) -> CanonError {
    warn!("trap at call boundary: {t}");
    CanonError::Trap(t)
}

// ============================================================================
// canon lift
// ============================================================================

/// Results of a lifted call, pending post-return.
#[must_use = "post_return must run to finish the call"]
#[derive(Debug)]
pub struct LiftedCall {
    results: Vec<Value>,
    flat_results: Vec<FlatValue>,
    call: CallContext,
}

impl LiftedCall {
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Run the post-return hook over the core results, finish the call and
    /// hand back the lifted results.
    pub fn post_return(self, inst: &mut ComponentInstance) -> Result<Vec<Value>> {
        if let Some(post_return) = self.call.options().post_return.clone() {
            if let Err(e) = post_return(&self.flat_results) {
                self.call.abort(inst);
                return Err(e.into());
            }
        }
        self.call.exit(inst)?;
        Ok(self.results)
    }
}

/// Call a core function `callee` of `inst` with component-level `args`.
///
/// `callee` receives the instance back so it can use resource intrinsics and
/// call imports through [`canon_lower`].
pub fn canon_lift<F>(
    opts: &CanonicalOptions,
    inst: &mut ComponentInstance,
    callee: F,
    ft: &FuncType,
    args: &[Value],
    limits: &FlatLimits,
) -> Result<LiftedCall>
where
    F: FnOnce(&mut ComponentInstance, &[FlatValue]) -> anyhow::Result<Vec<FlatValue>>,
{
    if !inst.may_enter {
        return Err(trap(Trap::CannotEnter));
    }
    if !inst.may_leave {
        return Err(trap(Trap::CannotLeave));
    }
    let mut call = CallContext::new(opts.clone());
    debug!("lift {:?} into {:?} with {} arg(s)", call.id, inst.id, args.len());

    inst.may_leave = false;
    let flat_args = lower_values(
        &mut Cx::new(&mut call, inst),
        limits.max_flat_params,
        args,
        ft.param_types(),
        None,
    );
    inst.may_leave = true;
    let flat_args = match flat_args {
        Ok(flat_args) => flat_args,
        Err(e) => {
            call.rollback(inst, 0);
            call.abort(inst);
            return Err(e);
        }
    };

    match call_and_lift(&mut call, inst, callee, ft, &flat_args, limits) {
        Ok((results, flat_results)) => Ok(LiftedCall {
            results,
            flat_results,
            call,
        }),
        Err(e) => {
            call.abort(inst);
            Err(e)
        }
    }
}

fn call_and_lift<F>(
    call: &mut CallContext,
    inst: &mut ComponentInstance,
    callee: F,
    ft: &FuncType,
    flat_args: &[FlatValue],
    limits: &FlatLimits,
) -> Result<(Vec<Value>, Vec<FlatValue>)>
where
    F: FnOnce(&mut ComponentInstance, &[FlatValue]) -> anyhow::Result<Vec<FlatValue>>,
{
    let flat_results = callee(&mut *inst, flat_args).map_err(CanonError::from)?;
    let mut src = FlatIter::new(&flat_results);
    let results = lift_values(
        &mut Cx::new(call, inst),
        limits.max_flat_results,
        &mut src,
        ft.result_types(),
    )?;
    expect_consumed(&src, 0)?;
    Ok((results, flat_results))
}

/// Every flat value must have been consumed, save `reserved` trailing ones.
fn expect_consumed(src: &FlatIter<'_>, reserved: usize) -> Result<()> {
    match src.remaining() {
        n if n < reserved => Err(trap(Trap::FlatExhausted)),
        n if n > reserved => Err(trap(Trap::SurplusFlatValues(n - reserved))),
        _ => Ok(()),
    }
}

// ============================================================================
// canon lower
// ============================================================================

type HostPostReturn = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// What a host function hands back to [`canon_lower`].
pub struct HostResults {
    pub results: Vec<Value>,
    post_return: Option<HostPostReturn>,
}

impl HostResults {
    pub fn new(results: Vec<Value>) -> Self {
        Self {
            results,
            post_return: None,
        }
    }

    /// Run `f` once the results have been lowered.
    pub fn with_post_return(mut self, f: impl FnOnce() -> anyhow::Result<()> + 'static) -> Self {
        self.post_return = Some(Box::new(f));
        self
    }
}

impl From<Vec<Value>> for HostResults {
    fn from(results: Vec<Value>) -> Self {
        Self::new(results)
    }
}

impl fmt::Debug for HostResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResults")
            .field("results", &self.results)
            .field("post_return", &self.post_return.is_some())
            .finish()
    }
}

/// Call host function `callee` from core code running in `inst`.
///
/// `flat_args` follow the lowered signature: when the results spill, the
/// last argument is the caller's out-pointer. When `calling_import` is set
/// the instance may not be re-entered until the call returns.
pub fn canon_lower<F>(
    opts: &CanonicalOptions,
    inst: &mut ComponentInstance,
    callee: F,
    calling_import: bool,
    ft: &FuncType,
    flat_args: &[FlatValue],
    limits: &FlatLimits,
) -> Result<Vec<FlatValue>>
where
    F: FnOnce(Vec<Value>) -> anyhow::Result<HostResults>,
{
    if !inst.may_leave {
        return Err(trap(Trap::CannotLeave));
    }
    if !inst.may_enter {
        return Err(trap(Trap::CannotEnter));
    }
    let call = CallContext::new(opts.clone());
    debug!("lower {:?} out of {:?} with {} flat arg(s)", call.id, inst.id, flat_args.len());

    if calling_import {
        inst.may_enter = false;
    }
    let flat_results = lower_call(call, inst, callee, ft, flat_args, limits);
    if calling_import {
        inst.may_enter = true;
    }
    flat_results
}

fn lower_call<F>(
    mut call: CallContext,
    inst: &mut ComponentInstance,
    callee: F,
    ft: &FuncType,
    flat_args: &[FlatValue],
    limits: &FlatLimits,
) -> Result<Vec<FlatValue>>
where
    F: FnOnce(Vec<Value>) -> anyhow::Result<HostResults>,
{
    let mut src = FlatIter::new(flat_args);
    let host_results = lift_host_args(&mut call, inst, &mut src, ft, limits)
        .and_then(|args| callee(args).map_err(CanonError::from));
    let HostResults {
        results,
        post_return,
    } = match host_results {
        Ok(host_results) => host_results,
        Err(e) => {
            call.abort(inst);
            return Err(e);
        }
    };

    let checkpoint = call.checkpoint();
    inst.may_leave = false;
    let flat_results = lower_values(
        &mut Cx::new(&mut call, inst),
        limits.max_flat_results,
        &results,
        ft.result_types(),
        Some(&mut src as &mut dyn FlatSource),
    );
    inst.may_leave = true;

    let finished = flat_results.and_then(|flat_results| {
        if let Some(post_return) = post_return {
            post_return()?;
        }
        call.try_exit(inst)?;
        Ok(flat_results)
    });
    if finished.is_err() {
        call.rollback(inst, checkpoint);
        call.abort(inst);
    }
    finished
}

fn lift_host_args(
    call: &mut CallContext,
    inst: &mut ComponentInstance,
    src: &mut FlatIter<'_>,
    ft: &FuncType,
    limits: &FlatLimits,
) -> Result<Vec<Value>> {
    let args = lift_values(
        &mut Cx::new(call, inst),
        limits.max_flat_params,
        src,
        ft.param_types(),
    )?;
    let out_params = usize::from(flatten_types(ft.result_types()).len() > limits.max_flat_results);
    expect_consumed(src, out_params)?;
    Ok(args)
}
