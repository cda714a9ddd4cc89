//! Processed-VM marker store
//!
//! Records which inventory source handled each VM today, so redundant runs
//! against several connections to the same estate do not process a VM
//! twice. The file carries its date; a marker from another day counts as
//! empty. Best-effort only: concurrent writers are not coordinated.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Map of `"{VMName}|{VMId}"` to the source that processed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub date: NaiveDate,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl ProcessedMarker {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            entries: BTreeMap::new(),
        }
    }

    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    /// Load the marker file for `today`
    ///
    /// A missing file, or one written on another day, yields an empty
    /// marker. An unreadable file is logged and treated as empty.
    pub fn load(path: &Path, today: NaiveDate) -> Self {
        if !path.exists() {
            return Self::new(today);
        }
        match Self::read(path) {
            Ok(marker) if marker.date == today => marker,
            Ok(marker) => {
                debug!("Ignoring processed marker from {}", marker.date);
                Self::new(today)
            }
            Err(e) => {
                warn!("Ignoring unreadable processed marker {}: {:#}", path.display(), e);
                Self::new(today)
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read marker file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse marker file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write marker file: {}", path.display()))
    }

    /// Source that already processed `key` today, if it is not `source`
    pub fn claimed_by_other(&self, key: &str, source: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|owner| !owner.eq_ignore_ascii_case(source))
    }

    pub fn mark(&mut self, key: impl Into<String>, source: &str) {
        self.entries.insert(key.into(), source.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
