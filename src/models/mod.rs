//! Data models module
//!
//! Defines core data structures:
//! - InventoryObject: VM, folder or resource pool with its tags and permissions
//! - TagCategory / Tag / TagRef: vSphere tagging primitives
//! - PermissionEntry / Role: direct per-object permission rows
//! - PermissionDecision: outcome of one (object, principal, role) decision
//! - OperationRecord / RunSummary: audit trail and aggregated run statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;


/// Kind of inventory object a tag or permission can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "VM", alias = "VirtualMachine")]
    Vm,
    Folder,
    ResourcePool,
}

impl ObjectKind {
    /// All kinds, in the order categories declare them
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Vm, ObjectKind::Folder, ObjectKind::ResourcePool];
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Vm => "VM",
            ObjectKind::Folder => "Folder",
            ObjectKind::ResourcePool => "ResourcePool",
        };
        f.write_str(name)
    }
}

/// VM power state as reported by the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::PoweredOn => "PoweredOn",
            PowerState::PoweredOff => "PoweredOff",
            PowerState::Suspended => "Suspended",
            PowerState::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Reference to a tag by its category and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagRef {
    pub category: String,
    pub name: String,
}

impl TagRef {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Category names compare case-insensitively, tag names exactly
    pub fn is(&self, category: &str, name: &str) -> bool {
        self.category.eq_ignore_ascii_case(category) && self.name == name
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// Whether an object may carry one or many tags of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cardinality {
    Single,
    #[default]
    Multiple,
}

/// A tag category with the object kinds its tags may be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCategory {
    pub name: String,
    pub associable_kinds: BTreeSet<ObjectKind>,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl TagCategory {
    /// Whether this category already allows every kind in `requested`
    pub fn covers(&self, requested: &BTreeSet<ObjectKind>) -> bool {
        requested.is_subset(&self.associable_kinds)
    }
}

/// A tag owned by exactly one category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub category: String,
}

impl Tag {
    pub fn tag_ref(&self) -> TagRef {
        TagRef::new(self.category.clone(), self.name.clone())
    }
}

/// A role and the privileges it grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub privileges: BTreeSet<String>,
}

/// A direct permission row on an inventory object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// `{Domain}\{Group}` identity
    pub principal: String,
    pub role: String,
    #[serde(default)]
    pub propagate: bool,
}

impl PermissionEntry {
    /// Explicit, non-propagating entry as created by this tool
    pub fn explicit(principal: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            role: role.into(),
            propagate: false,
        }
    }

    /// Principals compare case-insensitively (directory names), roles exactly
    pub fn grants(&self, principal: &str, role: &str) -> bool {
        self.principal.eq_ignore_ascii_case(principal) && self.role == role
    }
}

/// Build the `{Domain}\{Group}` principal string
pub fn principal(domain: &str, group: &str) -> String {
    format!("{}\\{}", domain.trim(), group.trim())
}

/// Group part of a `{Domain}\{Group}` principal
pub fn principal_group(principal: &str) -> &str {
    principal.rsplit_once('\\').map(|(_, group)| group).unwrap_or(principal)
}

/// Guest operating system information for a VM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestOsInfo {
    /// Whether VMware Tools is currently running in the guest
    #[serde(default)]
    pub tools_running: bool,
    /// OS full name reported live by the guest tools
    #[serde(default)]
    pub tools_os_name: Option<String>,
    /// OS name from the VM configuration
    #[serde(default)]
    pub configured_os_name: Option<String>,
    /// Guest OS type identifier (e.g. "windows2019srv_64Guest")
    #[serde(default)]
    pub guest_id: Option<String>,
}

/// Which guest OS field produced an OS string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsSource {
    GuestTools,
    Configured,
    GuestId,
}

impl GuestOsInfo {
    /// OS strings in priority order, skipping unavailable or blank sources
    pub fn sources(&self) -> Vec<(OsSource, &str)> {
        let live = if self.tools_running {
            self.tools_os_name.as_deref()
        } else {
            None
        };

        [
            (OsSource::GuestTools, live),
            (OsSource::Configured, self.configured_os_name.as_deref()),
            (OsSource::GuestId, self.guest_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(source, value)| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (source, v))
        })
        .collect()
    }
}

/// A VM, folder or resource pool read from the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryObject {
    /// Managed object ID (e.g. "vm-42", "group-v7", "resgroup-9")
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub power_state: PowerState,
    /// Parent folder (or parent pool for resource pools); `None` at the root
    #[serde(default)]
    pub parent: Option<String>,
    /// Owning resource pool, VMs only
    #[serde(default)]
    pub resource_pool: Option<String>,
    #[serde(default)]
    pub guest: GuestOsInfo,
    #[serde(default)]
    pub tags: BTreeSet<TagRef>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

impl InventoryObject {
    pub fn vm(id: impl Into<String>, name: impl Into<String>, power_state: PowerState) -> Self {
        Self::new(id, name, ObjectKind::Vm).with_power_state(power_state)
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, ObjectKind::Folder)
    }

    pub fn resource_pool(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, ObjectKind::ResourcePool)
    }

    fn new(id: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            power_state: PowerState::Unknown,
            parent: None,
            resource_pool: None,
            guest: GuestOsInfo::default(),
            tags: BTreeSet::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_power_state(mut self, power_state: PowerState) -> Self {
        self.power_state = power_state;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_resource_pool(mut self, pool: impl Into<String>) -> Self {
        self.resource_pool = Some(pool.into());
        self
    }

    pub fn with_guest(mut self, guest: GuestOsInfo) -> Self {
        self.guest = guest;
        self
    }

    pub fn with_tag(mut self, category: &str, name: &str) -> Self {
        self.tags.insert(TagRef::new(category, name));
        self
    }

    pub fn with_permission(mut self, entry: PermissionEntry) -> Self {
        self.permissions.push(entry);
        self
    }

    pub fn has_tag(&self, category: &str, name: &str) -> bool {
        self.tags.iter().any(|t| t.is(category, name))
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.tags.iter().any(|t| t.category.eq_ignore_ascii_case(category))
    }

    pub fn is_powered_on(&self) -> bool {
        self.power_state == PowerState::PoweredOn
    }

    /// Key used by the processed-marker store
    pub fn marker_key(&self) -> String {
        format!("{}|{}", self.name, self.id)
    }
}

/// Why a permission decision resulted in no change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The exact (principal, role) row is already on the object
    AlreadyExists,
    /// The system reported the grant as present through inheritance
    InheritedConflict,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists => f.write_str("permission already exists"),
            SkipReason::InheritedConflict => f.write_str("permission inherited or already present"),
        }
    }
}

/// Outcome of deciding one (object, principal, role) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Created(PermissionEntry),
    Skipped {
        reason: SkipReason,
        /// Role actually evaluated, after policy overrides
        role: String,
    },
    Failed {
        error: String,
        /// Attempts made beyond the first
        retries: u32,
    },
}

impl PermissionDecision {
    pub fn is_created(&self) -> bool {
        matches!(self, PermissionDecision::Created(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PermissionDecision::Failed { .. })
    }
}

/// Which rule family produced an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    AppRule,
    #[serde(rename = "OSRule")]
    OsRule,
    Container,
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleSource::AppRule => "AppRule",
            RuleSource::OsRule => "OSRule",
            RuleSource::Container => "Container",
        };
        f.write_str(name)
    }
}

/// What happened in one audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    PermissionCreated,
    PermissionSkipped,
    PermissionFailed,
    TagAssigned,
    TagFailed,
    ObjectSkipped,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::PermissionCreated => "PermissionCreated",
            Action::PermissionSkipped => "PermissionSkipped",
            Action::PermissionFailed => "PermissionFailed",
            Action::TagAssigned => "TagAssigned",
            Action::TagFailed => "TagFailed",
            Action::ObjectSkipped => "ObjectSkipped",
        };
        f.write_str(name)
    }
}

/// One row of the per-operation audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationRecord {
    pub object_name: String,
    pub power_state: PowerState,
    pub source: RuleSource,
    pub action: Action,
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(object: &InventoryObject, source: RuleSource, action: Action) -> Self {
        Self {
            object_name: object.name.clone(),
            power_state: object.power_state,
            source,
            action,
            principal: String::new(),
            role: String::new(),
            reason: String::new(),
            error: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn principal(mut self, principal: &str, role: &str) -> Self {
        self.principal = principal.to_string();
        self.role = role.to_string();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

/// Aggregated run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunSummary {
    pub tags_created: usize,
    pub tags_assigned: usize,
    pub permissions_assigned: usize,
    pub permissions_skipped: usize,
    pub permissions_failed: usize,
    #[serde(rename = "VMsProcessed")]
    pub vms_processed: usize,
    /// One per `ObjectSkipped` record: marker claims and VMs without OS
    /// information. The latter are still counted as processed.
    #[serde(rename = "VMsSkipped")]
    pub vms_skipped: usize,
    pub errors_encountered: usize,
}

impl RunSummary {
    /// Add another summary's counters into this one
    pub fn absorb(&mut self, other: &RunSummary) {
        self.tags_created += other.tags_created;
        self.tags_assigned += other.tags_assigned;
        self.permissions_assigned += other.permissions_assigned;
        self.permissions_skipped += other.permissions_skipped;
        self.permissions_failed += other.permissions_failed;
        self.vms_processed += other.vms_processed;
        self.vms_skipped += other.vms_skipped;
        self.errors_encountered += other.errors_encountered;
    }

    /// Overall status derived from the counters
    pub fn status(&self) -> RunStatus {
        let failures = self.permissions_failed + self.errors_encountered;
        let successes = self.permissions_assigned + self.permissions_skipped + self.tags_assigned;
        if failures == 0 {
            RunStatus::Success
        } else if successes > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failed
        }
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "PARTIAL SUCCESS")]
    PartialSuccess,
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::PartialSuccess => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::PartialSuccess => "PARTIAL SUCCESS",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Complete output structure for JSON serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub environment: String,
    pub source: String,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub records: Vec<OperationRecord>,
    pub duration_ms: u64,
    /// Whether the wall-clock timeout or a signal cut the run short
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}
