//! Scripted fault injection
//!
//! `FaultyInventory` wraps another backend and fails selected calls with
//! queued errors, or slows them down. It is used to rehearse retry,
//! conflict and timeout handling against a snapshot before touching a
//! live system.

use super::{Inventory, InventoryResult, VmFilter};
use crate::error::InventoryError;
use crate::models::{
    Cardinality, InventoryObject, ObjectKind, PermissionEntry, Role, Tag, TagCategory, TagRef,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

/// Calls that can be scripted to fail or stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    GetPermissions,
    GetRole,
    CreatePermission,
    CreateTagAssignment,
    CreateTag,
    CreateCategory,
    CloneRole,
}

#[derive(Debug, Default)]
struct Script {
    /// Errors returned in order before calls reach the inner backend
    queued: HashMap<FaultPoint, VecDeque<InventoryError>>,
    /// Error returned on every call, after the queue drains
    persistent: HashMap<FaultPoint, InventoryError>,
    /// Delay applied to every call before it is answered
    latency: HashMap<FaultPoint, Duration>,
    calls: HashMap<FaultPoint, u32>,
}

/// Backend wrapper that fails scripted calls
pub struct FaultyInventory<I: Inventory> {
    inner: I,
    script: Mutex<Script>,
}

impl<I: Inventory> FaultyInventory<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Fail the next call at `point` with `error`
    pub fn fail_next(&self, point: FaultPoint, error: InventoryError) {
        self.script
            .lock()
            .queued
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Fail every call at `point` with `error`
    pub fn fail_always(&self, point: FaultPoint, error: InventoryError) {
        self.script.lock().persistent.insert(point, error);
    }

    /// Stall every call at `point` for `delay`
    pub fn slow_down(&self, point: FaultPoint, delay: Duration) {
        self.script.lock().latency.insert(point, delay);
    }

    /// Number of calls made at `point`, including failed ones
    pub fn calls(&self, point: FaultPoint) -> u32 {
        self.script.lock().calls.get(&point).copied().unwrap_or(0)
    }

    fn check(&self, point: FaultPoint) -> InventoryResult<()> {
        let delay = self.script.lock().latency.get(&point).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut script = self.script.lock();
        *script.calls.entry(point).or_default() += 1;
        if let Some(error) = script.queued.get_mut(&point).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        match script.persistent.get(&point) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl<I: Inventory> Inventory for FaultyInventory<I> {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    fn list_vms(&self, filter: &VmFilter) -> InventoryResult<Vec<InventoryObject>> {
        self.inner.list_vms(filter)
    }

    fn list_folders(&self) -> InventoryResult<Vec<InventoryObject>> {
        self.inner.list_folders()
    }

    fn list_resource_pools(&self) -> InventoryResult<Vec<InventoryObject>> {
        self.inner.list_resource_pools()
    }

    fn get_tag_assignments(&self, object: &InventoryObject) -> InventoryResult<Vec<TagRef>> {
        self.inner.get_tag_assignments(object)
    }

    fn create_tag_assignment(&self, object: &InventoryObject, tag: &Tag) -> InventoryResult<()> {
        self.check(FaultPoint::CreateTagAssignment)?;
        self.inner.create_tag_assignment(object, tag)
    }

    fn get_permissions(&self, object: &InventoryObject) -> InventoryResult<Vec<PermissionEntry>> {
        self.check(FaultPoint::GetPermissions)?;
        self.inner.get_permissions(object)
    }

    fn create_permission(
        &self,
        object: &InventoryObject,
        principal: &str,
        role: &str,
        propagate: bool,
    ) -> InventoryResult<PermissionEntry> {
        self.check(FaultPoint::CreatePermission)?;
        self.inner.create_permission(object, principal, role, propagate)
    }

    fn get_category(&self, name: &str) -> InventoryResult<Option<TagCategory>> {
        self.inner.get_category(name)
    }

    fn create_category(
        &self,
        name: &str,
        kinds: &BTreeSet<ObjectKind>,
        cardinality: Cardinality,
    ) -> InventoryResult<TagCategory> {
        self.check(FaultPoint::CreateCategory)?;
        self.inner.create_category(name, kinds, cardinality)
    }

    fn find_tags(&self, name: &str) -> InventoryResult<Vec<Tag>> {
        self.inner.find_tags(name)
    }

    fn create_tag(&self, name: &str, category: &TagCategory) -> InventoryResult<Tag> {
        self.check(FaultPoint::CreateTag)?;
        self.inner.create_tag(name, category)
    }

    fn get_role(&self, name: &str) -> InventoryResult<Option<Role>> {
        self.check(FaultPoint::GetRole)?;
        self.inner.get_role(name)
    }

    fn clone_role(&self, template: &str, new_name: &str) -> InventoryResult<Role> {
        self.check(FaultPoint::CloneRole)?;
        self.inner.clone_role(template, new_name)
    }
}
