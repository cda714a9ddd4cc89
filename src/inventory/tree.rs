//! Pre-fetched container hierarchy
//!
//! Folders and resource pools are listed once per run and walked by
//! reference, so ancestor lookups for thousands of VMs never go back to
//! the inventory.

use super::{Inventory, InventoryResult};
use crate::constants::{ROOT_RESOURCE_POOL, ROOT_VM_FOLDER};
use crate::error::TreeError;
use crate::models::InventoryObject;
use std::collections::{HashMap, HashSet};

/// Which hierarchy an ancestor walk follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    Folder,
    ResourcePool,
}

/// Folders and resource pools indexed by ID
#[derive(Debug, Clone, Default)]
pub struct InventoryTree {
    folders: HashMap<String, InventoryObject>,
    pools: HashMap<String, InventoryObject>,
}

impl InventoryTree {
    /// Fetch every container once from the inventory
    pub fn load(inventory: &dyn Inventory) -> InventoryResult<Self> {
        Ok(Self::from_objects(
            inventory.list_folders()?,
            inventory.list_resource_pools()?,
        ))
    }

    pub fn from_objects(folders: Vec<InventoryObject>, pools: Vec<InventoryObject>) -> Self {
        Self {
            folders: folders.into_iter().map(|f| (f.id.clone(), f)).collect(),
            pools: pools.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Containers of both hierarchies, folders first
    pub fn containers(&self) -> impl Iterator<Item = &InventoryObject> {
        self.folders.values().chain(self.pools.values())
    }

    /// Ancestors of `object` in one hierarchy, nearest first
    ///
    /// The walk stops below the root ("vm" folder or "Resources" pool) and at
    /// any parent reference that is not part of the tree. A parent ID seen
    /// twice means the hierarchy is malformed.
    pub fn ancestors(
        &self,
        object: &InventoryObject,
        hierarchy: Hierarchy,
    ) -> Result<Vec<&InventoryObject>, TreeError> {
        let (index, root, start) = match hierarchy {
            Hierarchy::Folder => (&self.folders, ROOT_VM_FOLDER, object.parent.as_ref()),
            Hierarchy::ResourcePool => {
                // Pools hang off their parent pool; VMs reference their pool directly
                let start = if object.kind == crate::models::ObjectKind::ResourcePool {
                    object.parent.as_ref()
                } else {
                    object.resource_pool.as_ref()
                };
                (&self.pools, ROOT_RESOURCE_POOL, start)
            }
        };

        let mut chain = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(object.id.as_str());

        let mut next = start;
        while let Some(id) = next {
            if !visited.insert(id.as_str()) {
                return Err(TreeError::Cycle(id.clone()));
            }
            let Some(container) = index.get(id) else {
                break;
            };
            if container.name == root {
                break;
            }
            chain.push(container);
            next = container.parent.as_ref();
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PowerState;

    fn tree() -> InventoryTree {
        InventoryTree::from_objects(
            vec![
                InventoryObject::folder("group-v3", ROOT_VM_FOLDER),
                InventoryObject::folder("group-v10", "Production").with_parent("group-v3"),
                InventoryObject::folder("group-v11", "Databases").with_parent("group-v10"),
            ],
            vec![
                InventoryObject::resource_pool("resgroup-8", ROOT_RESOURCE_POOL),
                InventoryObject::resource_pool("resgroup-20", "Gold").with_parent("resgroup-8"),
            ],
        )
    }

    #[test]
    fn test_folder_ancestors_stop_below_root() {
        let tree = tree();
        let vm = InventoryObject::vm("vm-1", "DB01", PowerState::PoweredOn).with_parent("group-v11");

        let names: Vec<_> = tree
            .ancestors(&vm, Hierarchy::Folder)
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["Databases", "Production"]);
    }

    #[test]
    fn test_pool_ancestors_use_vm_resource_pool() {
        let tree = tree();
        let vm = InventoryObject::vm("vm-1", "DB01", PowerState::PoweredOn)
            .with_parent("group-v11")
            .with_resource_pool("resgroup-20");

        let chain = tree.ancestors(&vm, Hierarchy::ResourcePool).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "Gold");
    }

    #[test]
    fn test_cycle_is_reported_not_looped() {
        let tree = InventoryTree::from_objects(
            vec![
                InventoryObject::folder("a", "A").with_parent("b"),
                InventoryObject::folder("b", "B").with_parent("a"),
            ],
            vec![],
        );
        let vm = InventoryObject::vm("vm-1", "X", PowerState::PoweredOff).with_parent("a");

        assert_eq!(
            tree.ancestors(&vm, Hierarchy::Folder),
            Err(TreeError::Cycle("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_parent_ends_walk() {
        let tree = tree();
        let vm = InventoryObject::vm("vm-1", "X", PowerState::PoweredOff).with_parent("group-v99");
        assert!(tree.ancestors(&vm, Hierarchy::Folder).unwrap().is_empty());
    }
}
