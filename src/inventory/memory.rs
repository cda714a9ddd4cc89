//! In-memory inventory backend
//!
//! Holds a full inventory snapshot behind a read/write lock. Snapshots are
//! plain JSON so a run can be rehearsed offline against an export of the
//! real system and the resulting state inspected afterwards.

use super::{Inventory, InventoryResult, VmFilter};
use crate::error::{ErrorKind, InventoryError};
use crate::models::{
    Cardinality, InventoryObject, ObjectKind, PermissionEntry, Role, Tag, TagCategory, TagRef,
};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// Serialized form of an inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Name of the system this snapshot was taken from
    pub source: String,
    #[serde(default)]
    pub objects: Vec<InventoryObject>,
    #[serde(default)]
    pub categories: Vec<TagCategory>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, InventoryObject>,
    /// Insertion order of object IDs, preserved for listing
    order: Vec<String>,
    categories: BTreeMap<String, TagCategory>,
    tags: Vec<Tag>,
    roles: BTreeMap<String, Role>,
}

impl State {
    fn category(&self, name: &str) -> Option<&TagCategory> {
        self.categories
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn object(&self, id: &str) -> InventoryResult<&InventoryObject> {
        self.objects
            .get(id)
            .ok_or_else(|| InventoryError::not_found(format!("Object '{}'", id)))
    }

    fn list(&self, kind: ObjectKind) -> Vec<InventoryObject> {
        self.order
            .iter()
            .filter_map(|id| self.objects.get(id))
            .filter(|o| o.kind == kind)
            .cloned()
            .collect()
    }

    /// Nearest ancestor folder holding a propagating grant of (principal, role)
    fn inherited_grant(&self, object: &InventoryObject, principal: &str, role: &str) -> Option<String> {
        let mut visited = HashSet::new();
        let mut next = object.parent.clone();
        while let Some(id) = next {
            if !visited.insert(id.clone()) {
                return None;
            }
            let parent = self.objects.get(&id)?;
            if parent
                .permissions
                .iter()
                .any(|p| p.propagate && p.grants(principal, role))
            {
                return Some(parent.name.clone());
            }
            next = parent.parent.clone();
        }
        None
    }
}

/// Thread-safe in-memory implementation of `Inventory`
#[derive(Debug)]
pub struct MemoryInventory {
    source: String,
    state: RwLock<State>,
}

impl MemoryInventory {
    /// Create an empty inventory for the named source
    pub fn new(source: impl Into<String>) -> Self {
        Self::from_snapshot(InventorySnapshot {
            source: source.into(),
            ..Default::default()
        })
    }

    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let mut state = State::default();
        for object in snapshot.objects {
            state.order.push(object.id.clone());
            state.objects.insert(object.id.clone(), object);
        }
        for category in snapshot.categories {
            state.categories.insert(category.name.clone(), category);
        }
        state.tags = snapshot.tags;
        for role in snapshot.roles {
            state.roles.insert(role.name.clone(), role);
        }

        Self {
            source: snapshot.source,
            state: RwLock::new(state),
        }
    }

    /// Load a JSON snapshot file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory snapshot: {}", path.display()))?;
        let snapshot: InventorySnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse inventory snapshot: {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the current state back as a JSON snapshot
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write inventory snapshot: {}", path.display()))
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        let state = self.state.read();
        InventorySnapshot {
            source: self.source.clone(),
            objects: state
                .order
                .iter()
                .filter_map(|id| state.objects.get(id))
                .cloned()
                .collect(),
            categories: state.categories.values().cloned().collect(),
            tags: state.tags.clone(),
            roles: state.roles.values().cloned().collect(),
        }
    }

    /// Insert or replace an object
    pub fn insert_object(&self, object: InventoryObject) {
        let mut state = self.state.write();
        if !state.objects.contains_key(&object.id) {
            state.order.push(object.id.clone());
        }
        state.objects.insert(object.id.clone(), object);
    }

    pub fn insert_category(&self, category: TagCategory) {
        self.state
            .write()
            .categories
            .insert(category.name.clone(), category);
    }

    pub fn insert_tag(&self, category: &str, name: &str) {
        self.state.write().tags.push(Tag {
            name: name.to_string(),
            category: category.to_string(),
        });
    }

    pub fn insert_role(&self, name: &str, privileges: &[&str]) {
        self.state.write().roles.insert(
            name.to_string(),
            Role {
                name: name.to_string(),
                privileges: privileges.iter().map(|p| p.to_string()).collect(),
            },
        );
    }

    /// Current copy of an object, if present
    pub fn object(&self, id: &str) -> Option<InventoryObject> {
        self.state.read().objects.get(id).cloned()
    }
}

impl Inventory for MemoryInventory {
    fn source_id(&self) -> &str {
        &self.source
    }

    fn list_vms(&self, filter: &VmFilter) -> InventoryResult<Vec<InventoryObject>> {
        Ok(self
            .state
            .read()
            .list(ObjectKind::Vm)
            .into_iter()
            .filter(|vm| filter.selects(&vm.name))
            .collect())
    }

    fn list_folders(&self) -> InventoryResult<Vec<InventoryObject>> {
        Ok(self.state.read().list(ObjectKind::Folder))
    }

    fn list_resource_pools(&self) -> InventoryResult<Vec<InventoryObject>> {
        Ok(self.state.read().list(ObjectKind::ResourcePool))
    }

    fn get_tag_assignments(&self, object: &InventoryObject) -> InventoryResult<Vec<TagRef>> {
        let state = self.state.read();
        Ok(state.object(&object.id)?.tags.iter().cloned().collect())
    }

    fn create_tag_assignment(&self, object: &InventoryObject, tag: &Tag) -> InventoryResult<()> {
        let mut state = self.state.write();

        let category = state
            .category(&tag.category)
            .cloned()
            .ok_or_else(|| InventoryError::not_found(format!("Category '{}'", tag.category)))?;
        if !state.tags.iter().any(|t| t == tag) {
            return Err(InventoryError::not_found(format!("Tag '{}'", tag.name)));
        }

        let target = state
            .objects
            .get_mut(&object.id)
            .ok_or_else(|| InventoryError::not_found(format!("Object '{}'", object.id)))?;

        if !category.associable_kinds.contains(&target.kind) {
            return Err(InventoryError::new(
                ErrorKind::Other,
                format!(
                    "Category '{}' cannot be attached to {} objects",
                    category.name, target.kind
                ),
            ));
        }
        if target.has_tag(&tag.category, &tag.name) {
            return Ok(());
        }
        if category.cardinality == Cardinality::Single && target.has_category(&category.name) {
            return Err(InventoryError::new(
                ErrorKind::Other,
                format!(
                    "Category '{}' allows a single tag and '{}' already carries one",
                    category.name, target.name
                ),
            ));
        }

        target.tags.insert(tag.tag_ref());
        Ok(())
    }

    fn get_permissions(&self, object: &InventoryObject) -> InventoryResult<Vec<PermissionEntry>> {
        let state = self.state.read();
        Ok(state.object(&object.id)?.permissions.clone())
    }

    fn create_permission(
        &self,
        object: &InventoryObject,
        principal: &str,
        role: &str,
        propagate: bool,
    ) -> InventoryResult<PermissionEntry> {
        let mut state = self.state.write();

        if !state.roles.contains_key(role) {
            return Err(InventoryError::not_found(format!("Role '{}'", role)));
        }
        let current = state.object(&object.id)?.clone();
        if current.permissions.iter().any(|p| p.grants(principal, role)) {
            return Err(InventoryError::already_exists(format!(
                "Permission for '{}' with role '{}' on '{}'",
                principal, role, current.name
            )));
        }
        if let Some(folder) = state.inherited_grant(&current, principal, role) {
            return Err(InventoryError::new(
                ErrorKind::AlreadyExists,
                format!(
                    "Permission for '{}' with role '{}' is inherited from folder '{}'",
                    principal, role, folder
                ),
            ));
        }

        let entry = PermissionEntry {
            principal: principal.to_string(),
            role: role.to_string(),
            propagate,
        };
        if let Some(target) = state.objects.get_mut(&object.id) {
            target.permissions.push(entry.clone());
        }
        Ok(entry)
    }

    fn get_category(&self, name: &str) -> InventoryResult<Option<TagCategory>> {
        Ok(self.state.read().category(name).cloned())
    }

    fn create_category(
        &self,
        name: &str,
        kinds: &BTreeSet<ObjectKind>,
        cardinality: Cardinality,
    ) -> InventoryResult<TagCategory> {
        let mut state = self.state.write();
        if state.category(name).is_some() {
            return Err(InventoryError::already_exists(format!("Category '{}'", name)));
        }
        let category = TagCategory {
            name: name.to_string(),
            associable_kinds: kinds.clone(),
            cardinality,
        };
        state.categories.insert(name.to_string(), category.clone());
        Ok(category)
    }

    fn find_tags(&self, name: &str) -> InventoryResult<Vec<Tag>> {
        Ok(self
            .state
            .read()
            .tags
            .iter()
            .filter(|t| t.name == name)
            .cloned()
            .collect())
    }

    fn create_tag(&self, name: &str, category: &TagCategory) -> InventoryResult<Tag> {
        let mut state = self.state.write();
        if state.category(&category.name).is_none() {
            return Err(InventoryError::not_found(format!("Category '{}'", category.name)));
        }
        if state
            .tags
            .iter()
            .any(|t| t.name == name && t.category.eq_ignore_ascii_case(&category.name))
        {
            return Err(InventoryError::already_exists(format!("Tag '{}'", name)));
        }
        let tag = Tag {
            name: name.to_string(),
            category: category.name.clone(),
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    fn get_role(&self, name: &str) -> InventoryResult<Option<Role>> {
        Ok(self.state.read().roles.get(name).cloned())
    }

    fn clone_role(&self, template: &str, new_name: &str) -> InventoryResult<Role> {
        let mut state = self.state.write();
        if state.roles.contains_key(new_name) {
            return Err(InventoryError::already_exists(format!("Role '{}'", new_name)));
        }
        let source = state
            .roles
            .get(template)
            .ok_or_else(|| InventoryError::not_found(format!("Template role '{}'", template)))?;
        let role = Role {
            name: new_name.to_string(),
            privileges: source.privileges.clone(),
        };
        state.roles.insert(new_name.to_string(), role.clone());
        Ok(role)
    }
}
