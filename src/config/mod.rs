//! Run configuration
//!
//! Handles TOML configuration parsing, defaults, validation and environment
//! resolution. Command-line flags are merged over the file by the launcher.

use crate::constants::*;
use crate::error::ConfigError;
use crate::executor::retry::RetryPolicy;
use crate::matcher::pattern::validate_patterns;
use crate::matcher::InheritanceOrder;
use crate::planner::Strategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub run: RunSettings,
    pub retry: RetrySettings,
    pub inheritance: InheritanceSettings,
    pub policy: PolicySettings,
    pub exclusions: ExclusionSettings,
    /// Environment definitions; entries here replace the built-in ones
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

/// Core run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Environment key (DEV, PROD, KLEB, OT or a configured one)
    pub environment: String,
    /// Worker threads (1-10)
    pub max_threads: usize,
    /// VMs per batch; unset picks a size from the inventory size
    pub batch_size: Option<usize>,
    /// Batching strategy; unset picks one from the inventory size
    pub strategy: Option<Strategy>,
    pub timeout_minutes: u64,
    pub grace_seconds: u64,
    pub report_interval_seconds: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            environment: "DEV".to_string(),
            max_threads: 4,
            batch_size: None,
            strategy: None,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            grace_seconds: DEFAULT_GRACE_SECONDS,
            report_interval_seconds: DEFAULT_REPORT_INTERVAL_SECONDS,
        }
    }
}

impl RunSettings {
    /// Budget for the whole run, pre-flight included
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds)
    }
}

/// Retry settings for mutating inventory calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per operation, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Container tag inheritance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InheritanceSettings {
    pub enabled: bool,
    pub order: InheritanceOrder,
    /// Inheritable categories; empty means the environment's app and
    /// function categories
    pub categories: Vec<String>,
}

impl Default for InheritanceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            order: InheritanceOrder::FolderFirst,
            categories: Vec::new(),
        }
    }
}

/// Role policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Role whose privileges are copied into missing roles
    pub template_role: String,
    /// Role substituted for the privileged group on domain controllers
    pub readonly_role: String,
    pub privileged_group: String,
    /// Function tag name marking domain controllers
    pub domain_controller_tag: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            template_role: DEFAULT_TEMPLATE_ROLE.to_string(),
            readonly_role: DEFAULT_READONLY_ROLE.to_string(),
            privileged_group: DEFAULT_PRIVILEGED_GROUP.to_string(),
            domain_controller_tag: DEFAULT_DOMAIN_CONTROLLER_TAG.to_string(),
        }
    }
}

/// VM exclusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionSettings {
    /// Exact names or glob patterns of VMs never reconciled
    pub vm_patterns: Vec<String>,
}

impl Default for ExclusionSettings {
    fn default() -> Self {
        Self {
            vm_patterns: DEFAULT_VM_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Per-environment constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// vCenter host the environment points at
    pub vcenter: String,
    pub app_category: String,
    pub function_category: String,
    pub os_category: String,
}

impl EnvironmentSettings {
    /// Built-in definition for a known environment key
    pub fn builtin(key: &str) -> Option<Self> {
        let key = KNOWN_ENVIRONMENTS
            .iter()
            .find(|k| k.eq_ignore_ascii_case(key))?;
        Some(Self {
            vcenter: format!("vcenter-{}.local", key.to_lowercase()),
            app_category: format!("vCenter-{}-App-team", key),
            function_category: format!("vCenter-{}-Function", key),
            os_category: format!("vCenter-{}-Guest-OS", key),
        })
    }
}

/// An environment key together with its resolved settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub key: String,
    pub settings: EnvironmentSettings,
}

impl Environment {
    /// Categories whose container tags are inherited
    pub fn inheritable_categories(&self, inheritance: &InheritanceSettings) -> Vec<String> {
        if inheritance.categories.is_empty() {
            vec![
                self.settings.app_category.clone(),
                self.settings.function_category.clone(),
            ]
        } else {
            inheritance.categories.clone()
        }
    }
}

impl Configuration {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Configuration = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load the explicit file, else the default file if present, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Check bounds and patterns before any work starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.run.max_threads) {
            return Err(ConfigError::InvalidThreads(self.run.max_threads));
        }
        if self.run.batch_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "run.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.run.timeout_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "run.timeout_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts(self.retry.max_attempts));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: format!(
                    "{} is below base_delay_ms {}",
                    self.retry.max_delay_ms, self.retry.base_delay_ms
                ),
            });
        }
        validate_patterns(&self.exclusions.vm_patterns).map_err(|e| ConfigError::Invalid {
            field: "exclusions.vm_patterns",
            reason: e.to_string(),
        })?;
        self.environment()?;
        Ok(())
    }

    /// Resolve the configured environment key
    pub fn environment(&self) -> Result<Environment, ConfigError> {
        let wanted = self.run.environment.trim();
        let configured = self
            .environments
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .map(|(key, settings)| (key.clone(), settings.clone()));

        let resolved = configured.or_else(|| {
            EnvironmentSettings::builtin(wanted).map(|settings| (wanted.to_uppercase(), settings))
        });

        match resolved {
            Some((key, settings)) => Ok(Environment { key, settings }),
            None => Err(ConfigError::UnknownEnvironment(
                wanted.to_string(),
                self.known_environments().join(", "),
            )),
        }
    }

    /// Built-in and configured environment keys
    pub fn known_environments(&self) -> Vec<String> {
        let mut keys: Vec<String> = KNOWN_ENVIRONMENTS.iter().map(|k| k.to_string()).collect();
        for key in self.environments.keys() {
            if !keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Default config file location: `<config dir>/tagperm/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}
