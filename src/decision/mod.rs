//! Permission decision engine
//!
//! Decides, for one (object, principal, role) triple, whether a direct
//! permission row is created, skipped or failed:
//! 1. Apply the domain-controller role override
//! 2. Resolve the role, cloning it from the template role when missing
//! 3. Skip when the exact (principal, role) row already exists
//! 4. Create the row non-propagating
//! 5. Map "already present through inheritance" failures to a skip
//!
//! Every inventory call in steps 2-4 runs under the retry policy.
//!
//! The same principal holding a different role on the object is not a
//! conflict; multi-role assignments are created side by side.

use crate::config::PolicySettings;
use crate::error::{ErrorKind, InventoryError};
use crate::executor::retry::RetryPolicy;
use crate::inventory::Inventory;
use crate::models::{principal_group, InventoryObject, PermissionDecision, Role, SkipReason};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Words in a creation error that mean the grant is already effective
const CONFLICT_KEYWORDS: &[&str] = &["already exists", "inherited", "propagate", "duplicate", "folder"];

/// Role substitution and cloning policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    pub template_role: String,
    pub readonly_role: String,
    pub privileged_group: String,
    /// Category holding the domain-controller marker tag
    pub dc_category: String,
    pub dc_tag: String,
}

impl RolePolicy {
    pub fn new(settings: &PolicySettings, function_category: &str) -> Self {
        Self {
            template_role: settings.template_role.clone(),
            readonly_role: settings.readonly_role.clone(),
            privileged_group: settings.privileged_group.clone(),
            dc_category: function_category.to_string(),
            dc_tag: settings.domain_controller_tag.clone(),
        }
    }

    /// Role actually granted once overrides apply
    pub fn effective_role(&self, object: &InventoryObject, principal: &str, role: &str) -> String {
        let privileged = principal_group(principal).eq_ignore_ascii_case(&self.privileged_group);
        if privileged && object.has_tag(&self.dc_category, &self.dc_tag) {
            if role != self.readonly_role {
                debug!(
                    "'{}' is a domain controller: '{}' gets '{}' instead of '{}'",
                    object.name, principal, self.readonly_role, role
                );
            }
            self.readonly_role.clone()
        } else {
            role.to_string()
        }
    }
}

/// Creates, skips or fails permission rows on inventory objects
pub struct DecisionEngine {
    inventory: Arc<dyn Inventory>,
    retry: RetryPolicy,
    policy: RolePolicy,
    cancel: Arc<AtomicBool>,
    roles: Mutex<HashMap<String, Role>>,
}

impl DecisionEngine {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        retry: RetryPolicy,
        policy: RolePolicy,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inventory,
            retry,
            policy,
            cancel,
            roles: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RolePolicy {
        &self.policy
    }

    /// Decide and apply one (object, principal, role) grant
    pub fn decide(&self, object: &InventoryObject, principal: &str, role: &str) -> PermissionDecision {
        let role = self.policy.effective_role(object, principal, role);

        if let Err(error) = self.resolve_role(&role) {
            warn!("Cannot resolve role '{}' for '{}': {}", role, object.name, error);
            return PermissionDecision::Failed {
                error: error.to_string(),
                retries: 0,
            };
        }

        let read = self
            .retry
            .execute(&self.cancel, |_| self.inventory.get_permissions(object));
        let retries = read.retries();
        let current = match read.result {
            Ok(entries) => entries,
            Err(error) => {
                warn!("Cannot read permissions of '{}': {}", object.name, error);
                return PermissionDecision::Failed {
                    error: error.to_string(),
                    retries,
                };
            }
        };
        if current.iter().any(|entry| entry.grants(principal, &role)) {
            info!("'{}' already grants '{}' to '{}'", object.name, role, principal);
            return PermissionDecision::Skipped {
                reason: SkipReason::AlreadyExists,
                role,
            };
        }

        let outcome = self.retry.execute(&self.cancel, |_| {
            self.inventory.create_permission(object, principal, &role, false)
        });
        let (attempts, retries) = (outcome.attempts, outcome.retries());
        match outcome.result {
            Ok(entry) => {
                info!("Granted '{}' to '{}' on '{}'", role, principal, object.name);
                PermissionDecision::Created(entry)
            }
            Err(error) if is_inherited_conflict(&error) => {
                info!(
                    "'{}' on '{}' already effective for '{}': {}",
                    role, object.name, principal, error
                );
                PermissionDecision::Skipped {
                    reason: SkipReason::InheritedConflict,
                    role,
                }
            }
            Err(error) => {
                warn!(
                    "Failed to grant '{}' to '{}' on '{}' after {} attempt(s): {}",
                    role, principal, object.name, attempts, error
                );
                PermissionDecision::Failed {
                    error: error.to_string(),
                    retries,
                }
            }
        }
    }

    /// Make sure `name` exists, cloning it from the template role if needed
    fn resolve_role(&self, name: &str) -> Result<Role, InventoryError> {
        if let Some(role) = self.roles.lock().get(name) {
            return Ok(role.clone());
        }

        let role = match self.fetch_role(name)? {
            Some(role) => role,
            None => {
                let template = &self.policy.template_role;
                if self.fetch_role(template)?.is_none() {
                    return Err(InventoryError::not_found(format!(
                        "Template role '{}'",
                        template
                    )));
                }
                let outcome = self
                    .retry
                    .execute(&self.cancel, |_| self.inventory.clone_role(template, name));
                match outcome.result {
                    Ok(role) => {
                        info!("Created role '{}' from template '{}'", name, template);
                        role
                    }
                    Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                        debug!("Role '{}' created concurrently, re-fetching", name);
                        self.fetch_role(name)?.ok_or(error)?
                    }
                    Err(error) => return Err(error),
                }
            }
        };

        self.roles.lock().insert(name.to_string(), role.clone());
        Ok(role)
    }

    fn fetch_role(&self, name: &str) -> Result<Option<Role>, InventoryError> {
        self.retry
            .execute(&self.cancel, |_| self.inventory.get_role(name))
            .result
    }
}

/// Whether a terminal creation error means the grant is already effective
fn is_inherited_conflict(error: &InventoryError) -> bool {
    match error.kind() {
        ErrorKind::AlreadyExists => true,
        ErrorKind::Other => {
            let message = error.message().to_lowercase();
            CONFLICT_KEYWORDS.iter().any(|k| message.contains(k))
        }
        _ => false,
    }
}
