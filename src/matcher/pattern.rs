//! Pattern matching for VM name selection
//!
//! Provides consistent name filtering for system-VM exclusion and VM
//! targeting. Supports both exact string matching and glob pattern
//! matching with auto-detection based on pattern characters.

use anyhow::{anyhow, Result};
use glob::Pattern;

/// Check if a filter string contains glob pattern characters
pub fn is_glob_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?') || filter.contains('[')
}

/// Match a VM name against a filter using either exact or glob matching
///
/// If the filter contains glob characters ('*', '?', '['), uses glob pattern matching.
/// Otherwise, uses exact string matching.
pub fn matches_name(name: &str, filter: &str) -> bool {
    if is_glob_pattern(filter) {
        match Pattern::new(filter) {
            Ok(pattern) => pattern.matches(name),
            // Invalid patterns are rejected at config validation; fall back to exact
            Err(_) => name == filter,
        }
    } else {
        name == filter
    }
}

/// Check if a name matches any of the provided filters (logical OR)
pub fn matches_any(name: &str, filters: &[String]) -> bool {
    filters.iter().any(|filter| matches_name(name, filter))
}

/// Split objects into (kept, excluded) by exclusion patterns
pub fn partition_excluded<T, F>(items: Vec<T>, exclusions: &[String], name_of: F) -> (Vec<T>, Vec<T>)
where
    F: Fn(&T) -> &str,
{
    items
        .into_iter()
        .partition(|item| !matches_any(name_of(item), exclusions))
}

/// Validate that all filters are syntactically correct glob patterns
pub fn validate_patterns(filters: &[String]) -> Result<()> {
    for filter in filters {
        if is_glob_pattern(filter) {
            Pattern::new(filter).map_err(|e| anyhow!("Invalid glob pattern '{}': {}", filter, e))?;
        }
    }
    Ok(())
}
