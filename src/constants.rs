//! Global constants for tagperm
//!
//! Centralized location for application-wide constants

/// Application identifier used as the log target and in report metadata
pub const APP_NAME: &str = "tagperm";

/// Name of the root VM folder; ancestor walks stop below it
pub const ROOT_VM_FOLDER: &str = "vm";

/// Name of the root resource pool; ancestor walks stop below it
pub const ROOT_RESOURCE_POOL: &str = "Resources";

/// Baseline role whose privileges are copied into roles missing from vCenter
pub const DEFAULT_TEMPLATE_ROLE: &str = "Support Admin Template";

/// Role substituted for the privileged group on domain controllers
pub const DEFAULT_READONLY_ROLE: &str = "ReadOnly";

/// Security group that never receives admin roles on domain controllers
pub const DEFAULT_PRIVILEGED_GROUP: &str = "Windows Server Team";

/// Function tag marking a VM as an Active Directory domain controller
pub const DEFAULT_DOMAIN_CONTROLLER_TAG: &str = "Domain Controller";

/// System VM name patterns never touched by reconciliation
pub const DEFAULT_VM_EXCLUSIONS: &[&str] = &["vCLS-*", "vCLS (*", "VLC*", "stCtlVM-*"];

/// Environment keys known out of the box
pub const KNOWN_ENVIRONMENTS: &[&str] = &["DEV", "PROD", "KLEB", "OT"];

/// Worker pool bounds (inclusive)
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;

/// Upper bound on batches per worker before batch size grows instead
pub const MAX_BATCHES_PER_WORKER: usize = 4;

/// Retry defaults: total attempts, first backoff and backoff cap
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Hard wall-clock limit for one run and the grace period after it
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;
pub const DEFAULT_GRACE_SECONDS: u64 = 30;

/// Interval of the periodic progress report
pub const DEFAULT_REPORT_INTERVAL_SECONDS: u64 = 30;

/// Bounded wait used by the progress reporter when snapshotting shared state
pub const SNAPSHOT_WAIT_MS: u64 = 250;
