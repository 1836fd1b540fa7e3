//! Handle tables and resource intrinsics
//!
//! Each instance keeps one table per resource type. A handle is addressed
//! only by its index; freed indices are reused last-freed-first.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use canon_types::ResourceTypeId;
use log::trace;

use super::{CallId, ComponentInstance, HandleRef, InstanceId};
use crate::abi::Cx;
use crate::error::{CanonError, Result, Trap};

/// Most slots one table may hold.
pub const MAX_HANDLES: usize = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    /// Valid only for the duration of the given call.
    Borrowed(CallId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub rep: u32,
    pub ownership: Ownership,
    /// Outstanding borrows of an owned handle.
    pub lend_count: u32,
}

impl Handle {
    pub fn owned(rep: u32) -> Self {
        Self {
            rep,
            ownership: Ownership::Owned,
            lend_count: 0,
        }
    }

    pub fn borrowed(rep: u32, scope: CallId) -> Self {
        Self {
            rep,
            ownership: Ownership::Borrowed(scope),
            lend_count: 0,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }
}

#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Option<Handle>>,
    free: Vec<u32>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u32) -> Result<&Handle, Trap> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Trap::InvalidHandle { index })
    }

    pub fn get_mut(&mut self, index: u32) -> Result<&mut Handle, Trap> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(Trap::InvalidHandle { index })
    }

    /// Insert `handle`, reusing the most recently freed slot if there is one.
    pub fn add(&mut self, handle: Handle) -> Result<u32, Trap> {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(handle);
            return Ok(index);
        }
        if self.slots.len() >= MAX_HANDLES {
            return Err(Trap::HandleTableFull);
        }
        self.slots.push(Some(handle));
        Ok((self.slots.len() - 1) as u32)
    }

    pub fn remove(&mut self, index: u32) -> Result<Handle, Trap> {
        let handle = self
            .slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or(Trap::InvalidHandle { index })?;
        self.free.push(index);
        Ok(handle)
    }

    /// Number of slots, free ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn is_free(&self, index: u32) -> bool {
        matches!(self.slots.get(index as usize), Some(None))
    }
}

/// One [`HandleTable`] per resource type, created on first use.
#[derive(Debug, Default)]
pub struct HandleTables {
    tables: HashMap<ResourceTypeId, HandleTable>,
}

impl HandleTables {
    pub fn table(&mut self, rt: ResourceTypeId) -> &mut HandleTable {
        self.tables.entry(rt).or_default()
    }

    pub fn get(&self, rt: ResourceTypeId) -> Option<&HandleTable> {
        self.tables.get(&rt)
    }

    pub(crate) fn lookup(&self, rt: ResourceTypeId, index: u32) -> Result<&Handle, Trap> {
        self.get(rt)
            .ok_or(Trap::InvalidHandle { index })?
            .get(index)
    }
}

pub type Destructor = Rc<dyn Fn(u32) -> anyhow::Result<()>>;

/// A resource type as registered by the instance that implements it.
#[derive(Clone)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub owner: InstanceId,
    pub dtor: Option<Destructor>,
}

impl ResourceType {
    /// A fresh resource type implemented by `owner`.
    pub fn new(owner: InstanceId) -> Self {
        Self {
            id: ResourceTypeId::fresh(),
            owner,
            dtor: None,
        }
    }

    pub fn with_dtor(mut self, dtor: impl Fn(u32) -> anyhow::Result<()> + 'static) -> Self {
        self.dtor = Some(Rc::new(dtor));
        self
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("dtor", &self.dtor.is_some())
            .finish()
    }
}

// ============================================================================
// Resource intrinsics
// ============================================================================

/// `resource.new`: wrap `rep` in a new owned handle.
pub fn canon_resource_new(inst: &mut ComponentInstance, rt: &ResourceType, rep: u32) -> Result<u32> {
    let index = inst.handles.table(rt.id).add(Handle::owned(rep))?;
    trace!("resource.new {:?} rep={rep} -> {index}", rt.id);
    Ok(index)
}

/// `resource.rep`: the representation behind handle `index`.
pub fn canon_resource_rep(inst: &ComponentInstance, rt: &ResourceType, index: u32) -> Result<u32> {
    Ok(inst.handles.lookup(rt.id, index)?.rep)
}

/// `resource.drop`: release handle `index`.
///
/// Dropping an owned handle runs the destructor, and is only allowed for the
/// implementing instance while nothing borrows the handle. Dropping a
/// borrowed handle just ends the borrow.
pub fn canon_resource_drop(inst: &mut ComponentInstance, rt: &ResourceType, index: u32) -> Result<()> {
    let instance_id = inst.id();
    let table = inst.handles.table(rt.id);
    let handle = table.get(index)?;
    if handle.is_owned() {
        if handle.lend_count != 0 {
            return Err(Trap::HandleLent {
                index,
                lend_count: handle.lend_count,
            }
            .into());
        }
        if instance_id != rt.owner {
            return Err(Trap::ForeignDestroy { resource: rt.id }.into());
        }
    }
    let handle = table.remove(index)?;
    trace!("resource.drop {:?} index={index} rep={}", rt.id, handle.rep);
    if let (Ownership::Owned, Some(dtor)) = (handle.ownership, &rt.dtor) {
        dtor(handle.rep).map_err(CanonError::from)?;
    }
    Ok(())
}

// ============================================================================
// Lifting and lowering handles
// ============================================================================

/// Move the owned handle at `index` out of the table.
pub fn lift_own(cx: &mut Cx<'_>, index: u32, rt: ResourceTypeId) -> Result<u32> {
    let table = cx.inst.handles.table(rt);
    let handle = table.get(index)?;
    if !handle.is_owned() {
        return Err(Trap::NotOwned { index }.into());
    }
    if handle.lend_count != 0 {
        return Err(Trap::HandleLent {
            index,
            lend_count: handle.lend_count,
        }
        .into());
    }
    let handle = table.remove(index)?;
    trace!("lift own {rt:?} index={index} rep={}", handle.rep);
    Ok(handle.rep)
}

/// Lend the handle at `index` for the duration of the current call.
pub fn lift_borrow(cx: &mut Cx<'_>, index: u32, rt: ResourceTypeId) -> Result<u32> {
    let handle = cx.inst.handles.table(rt).get_mut(index)?;
    if handle.is_owned() {
        handle.lend_count += 1;
        trace!("lift borrow {rt:?} index={index} lend_count={}", handle.lend_count);
        let rep = handle.rep;
        cx.call.track_lend(HandleRef { rt, index });
        return Ok(rep);
    }
    Ok(handle.rep)
}

pub fn lower_own(cx: &mut Cx<'_>, rep: u32, rt: ResourceTypeId) -> Result<u32> {
    let index = cx.inst.handles.table(rt).add(Handle::owned(rep))?;
    cx.call.track_lowered(HandleRef { rt, index });
    trace!("lower own {rt:?} rep={rep} -> {index}");
    Ok(index)
}

/// Insert a borrowed handle that must be dropped before the call exits.
pub fn lower_borrow(cx: &mut Cx<'_>, rep: u32, rt: ResourceTypeId) -> Result<u32> {
    let scope = cx.call.id();
    let index = cx.inst.handles.table(rt).add(Handle::borrowed(rep, scope))?;
    cx.call.track_borrow(HandleRef { rt, index });
    cx.call.track_lowered(HandleRef { rt, index });
    trace!("lower borrow {rt:?} rep={rep} -> {index}");
    Ok(index)
}
