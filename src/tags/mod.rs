//! Tag and category resolution
//!
//! Get-or-create for categories and tags, safe to race across workers: a
//! creation that loses to another worker re-fetches the winner's object
//! instead of failing. Resolved objects are memoized for the whole run.

use crate::error::{ErrorKind, InventoryError, TagError};
use crate::inventory::Inventory;
use crate::models::{Cardinality, ObjectKind, Tag, TagCategory};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memoizing get-or-create resolver for categories and tags
pub struct TagResolver {
    inventory: Arc<dyn Inventory>,
    categories: Mutex<HashMap<String, TagCategory>>,
    /// Keyed by (lowercased category, tag name)
    tags: Mutex<HashMap<(String, String), Tag>>,
    created: AtomicUsize,
}

impl TagResolver {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self {
            inventory,
            categories: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Number of tags this resolver actually created
    pub fn tags_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Return the category, creating it with the requested kinds if absent
    ///
    /// An existing category is never altered; a warning is logged when it
    /// does not allow every requested kind.
    pub fn ensure_category(
        &self,
        name: &str,
        kinds: &BTreeSet<ObjectKind>,
        cardinality: Cardinality,
    ) -> Result<TagCategory, TagError> {
        let key = name.to_lowercase();
        if let Some(category) = self.categories.lock().get(&key) {
            return Ok(category.clone());
        }

        let category = match self.inventory.get_category(name)? {
            Some(existing) => {
                if !existing.covers(kinds) {
                    warn!(
                        "Category '{}' allows {:?}, which does not cover requested {:?}; leaving it unchanged",
                        existing.name, existing.associable_kinds, kinds
                    );
                }
                existing
            }
            None => match self.inventory.create_category(name, kinds, cardinality) {
                Ok(created) => {
                    info!("Created tag category '{}'", created.name);
                    created
                }
                Err(e) if is_already_exists(&e) => {
                    debug!("Category '{}' created concurrently, re-fetching", name);
                    self.inventory
                        .get_category(name)?
                        .ok_or_else(|| TagError::MissingCategory(name.to_string()))?
                }
                Err(e) => return Err(e.into()),
            },
        };

        self.categories.lock().insert(key, category.clone());
        Ok(category)
    }

    /// Return the tag in `category`, creating it if absent
    ///
    /// A tag with the same name under a different category is reported as a
    /// collision and never duplicated.
    pub fn ensure_tag(&self, name: &str, category: &TagCategory) -> Result<Tag, TagError> {
        let key = (category.name.to_lowercase(), name.to_string());
        if let Some(tag) = self.tags.lock().get(&key) {
            return Ok(tag.clone());
        }

        let tag = match self.lookup(name, category)? {
            Some(existing) => existing,
            None => match self.inventory.create_tag(name, category) {
                Ok(created) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    info!("Created tag '{}' in category '{}'", name, category.name);
                    created
                }
                Err(e) if is_already_exists(&e) => {
                    debug!("Tag '{}' created concurrently, re-fetching", name);
                    self.lookup(name, category)?
                        .ok_or_else(|| TagError::Inventory(e.clone()))?
                }
                Err(e) => {
                    error!(
                        "Failed to create tag '{}' in category '{}': {}",
                        name, category.name, e
                    );
                    return Err(e.into());
                }
            },
        };

        self.tags.lock().insert(key, tag.clone());
        Ok(tag)
    }

    /// Find the tag in `category`; a same-named tag elsewhere is a collision
    fn lookup(&self, name: &str, category: &TagCategory) -> Result<Option<Tag>, TagError> {
        let found = self.inventory.find_tags(name)?;
        if let Some(tag) = found
            .iter()
            .find(|t| t.category.eq_ignore_ascii_case(&category.name))
        {
            return Ok(Some(tag.clone()));
        }
        if let Some(other) = found.first() {
            error!(
                "Tag '{}' already exists in category '{}', not creating it in '{}'",
                name, other.category, category.name
            );
            return Err(TagError::CategoryCollision {
                tag: name.to_string(),
                requested: category.name.clone(),
                existing: other.category.clone(),
            });
        }
        Ok(None)
    }
}

fn is_already_exists(error: &InventoryError) -> bool {
    error.kind() == ErrorKind::AlreadyExists
}
