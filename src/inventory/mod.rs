//! Inventory access module
//!
//! Handles:
//! - The `Inventory` trait every vSphere-like backend implements
//! - `MemoryInventory`, a thread-safe backend loaded from a JSON snapshot
//! - `InventoryTree`, a pre-fetched container hierarchy for ancestor walks
//! - `FaultyInventory`, a wrapper that fails scripted calls

use crate::error::InventoryError;
use crate::models::{
    Cardinality, InventoryObject, ObjectKind, PermissionEntry, Role, Tag, TagCategory, TagRef,
};
use std::collections::BTreeSet;

pub mod faults;
pub mod memory;
pub mod tree;

pub use faults::{FaultPoint, FaultyInventory};
pub use memory::MemoryInventory;
pub use tree::InventoryTree;

/// Result type for inventory calls
pub type InventoryResult<T> = std::result::Result<T, InventoryError>;

/// Selection of VMs to list
#[derive(Debug, Clone, Default)]
pub struct VmFilter {
    /// Exact names or glob patterns; empty selects every VM
    pub names: Vec<String>,
}

impl VmFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn selects(&self, vm_name: &str) -> bool {
        self.names.is_empty()
            || crate::matcher::pattern::matches_any(vm_name, &self.names)
    }
}

/// Access to the target vSphere-like system
///
/// Implementations are shared read-access across worker threads, so every
/// method takes `&self`. Mutating calls must be individually safe to race:
/// a second `create_*` for the same name fails with `ErrorKind::AlreadyExists`.
pub trait Inventory: Send + Sync {
    /// Identifier of the connected system (e.g. the vCenter host name)
    fn source_id(&self) -> &str;

    fn list_vms(&self, filter: &VmFilter) -> InventoryResult<Vec<InventoryObject>>;
    fn list_folders(&self) -> InventoryResult<Vec<InventoryObject>>;
    fn list_resource_pools(&self) -> InventoryResult<Vec<InventoryObject>>;

    fn get_tag_assignments(&self, object: &InventoryObject) -> InventoryResult<Vec<TagRef>>;
    fn create_tag_assignment(&self, object: &InventoryObject, tag: &Tag) -> InventoryResult<()>;

    fn get_permissions(&self, object: &InventoryObject) -> InventoryResult<Vec<PermissionEntry>>;
    fn create_permission(
        &self,
        object: &InventoryObject,
        principal: &str,
        role: &str,
        propagate: bool,
    ) -> InventoryResult<PermissionEntry>;

    fn get_category(&self, name: &str) -> InventoryResult<Option<TagCategory>>;
    fn create_category(
        &self,
        name: &str,
        kinds: &BTreeSet<ObjectKind>,
        cardinality: Cardinality,
    ) -> InventoryResult<TagCategory>;

    /// Every tag with this name, across all categories
    fn find_tags(&self, name: &str) -> InventoryResult<Vec<Tag>>;
    fn create_tag(&self, name: &str, category: &TagCategory) -> InventoryResult<Tag>;

    fn get_role(&self, name: &str) -> InventoryResult<Option<Role>>;
    /// Copy the template role's privileges into a new role
    fn clone_role(&self, template: &str, new_name: &str) -> InventoryResult<Role>;
}
