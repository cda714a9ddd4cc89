//! Rule matching module
//!
//! Selects which rules apply to an inventory object:
//! - Direct tag matching against app rules
//! - Guest OS matching against OS rules (first match wins)
//! - Container tag inheritance through folder and resource-pool ancestry
//! - Name pattern matching for VM exclusion and targeting

use crate::error::TreeError;
use crate::inventory::tree::{Hierarchy, InventoryTree};
use crate::models::{InventoryObject, OsSource, TagRef};
use crate::rules::{AppRule, OsRule};
use serde::{Deserialize, Serialize};

pub mod pattern;

/// An app rule that applies to an object, with its resolved principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMatch<'a> {
    pub rule: &'a AppRule,
    pub principal: String,
}

/// The OS rule selected for a VM
#[derive(Debug, Clone)]
pub struct OsMatch<'a> {
    pub rule: &'a OsRule,
    pub principal: String,
    /// Which guest OS field matched
    pub source: OsSource,
    /// The OS string that matched
    pub os_name: String,
}

/// Result of OS matching for one VM
#[derive(Debug, Clone)]
pub enum OsMatchOutcome<'a> {
    Matched(OsMatch<'a>),
    /// OS information was available but no rule matched it
    NoMatch,
    /// The VM exposes no guest OS information at all
    NoOsInformation,
}

/// App rules whose (category, tag) the object currently carries, in rule order
pub fn match_app_rules<'a>(object: &InventoryObject, rules: &'a [AppRule]) -> Vec<AppMatch<'a>> {
    rules
        .iter()
        .filter(|rule| object.has_tag(&rule.tag_category, &rule.tag_name))
        .map(|rule| AppMatch {
            rule,
            principal: rule.principal(),
        })
        .collect()
}

/// First (source, rule) pair matching the VM's guest OS
///
/// Sources are tried in priority order (guest tools, configured OS, guest
/// ID); for each source every rule is tried in file order.
pub fn match_os_rules<'a>(vm: &InventoryObject, rules: &'a [OsRule]) -> OsMatchOutcome<'a> {
    let sources = vm.guest.sources();
    if sources.is_empty() {
        return OsMatchOutcome::NoOsInformation;
    }

    for (source, os_name) in sources {
        if let Some(rule) = rules.iter().find(|rule| rule.matches(os_name)) {
            return OsMatchOutcome::Matched(OsMatch {
                rule,
                principal: rule.principal(),
                source,
                os_name: os_name.to_string(),
            });
        }
    }

    OsMatchOutcome::NoMatch
}

/// Order in which container hierarchies are searched for inheritable tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InheritanceOrder {
    /// Folder ancestry first, so folder tags win over resource-pool tags
    #[default]
    FolderFirst,
    ResourcePoolFirst,
}

/// A tag an object should inherit, with the container it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedTag {
    pub tag: TagRef,
    pub container: String,
}

/// Tags found on the object's ancestors in the given categories, nearest first
pub fn container_tags(
    object: &InventoryObject,
    tree: &InventoryTree,
    categories: &[String],
    order: InheritanceOrder,
) -> Result<Vec<InheritedTag>, TreeError> {
    let hierarchies = match order {
        InheritanceOrder::FolderFirst => [Hierarchy::Folder, Hierarchy::ResourcePool],
        InheritanceOrder::ResourcePoolFirst => [Hierarchy::ResourcePool, Hierarchy::Folder],
    };

    let mut found = Vec::new();
    for hierarchy in hierarchies {
        for container in tree.ancestors(object, hierarchy)? {
            for tag in &container.tags {
                if categories.iter().any(|c| c.eq_ignore_ascii_case(&tag.category)) {
                    found.push(InheritedTag {
                        tag: tag.clone(),
                        container: container.name.clone(),
                    });
                }
            }
        }
    }
    Ok(found)
}

/// Tags the object should inherit: one per category it does not carry yet
///
/// The first tag found for a category wins; categories the object already
/// has a tag in are never overwritten.
pub fn inheritable_tags(
    object: &InventoryObject,
    tree: &InventoryTree,
    categories: &[String],
    order: InheritanceOrder,
) -> Result<Vec<InheritedTag>, TreeError> {
    let mut selected: Vec<InheritedTag> = Vec::new();
    for candidate in container_tags(object, tree, categories, order)? {
        let category = &candidate.tag.category;
        let taken = object.has_category(category)
            || selected
                .iter()
                .any(|s| s.tag.category.eq_ignore_ascii_case(category));
        if !taken {
            selected.push(candidate);
        }
    }
    Ok(selected)
}
