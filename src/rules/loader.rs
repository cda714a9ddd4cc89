//! CSV rule loading
//!
//! Headers are validated before any row is read: a missing required column
//! aborts the run. Header names compare case-insensitively, extra columns
//! are ignored, and rows with blank required values are skipped with a
//! warning.

use super::{AppRule, OsRule};
use crate::error::RuleError;
use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use std::io::Read;
use std::path::Path;

const APP_TABLE: &str = "App-Permission";
const OS_TABLE: &str = "OS-Mapping";

const APP_COLUMNS: [&str; 5] = [
    "TagCategory",
    "TagName",
    "RoleName",
    "SecurityGroupDomain",
    "SecurityGroupName",
];

const OS_COLUMNS: [&str; 5] = [
    "GuestOSPattern",
    "TargetTagName",
    "RoleName",
    "SecurityGroupDomain",
    "SecurityGroupName",
];

/// Column positions of the required headers, in `expected` order
fn locate_columns<const N: usize>(
    table: &'static str,
    headers: &csv::StringRecord,
    expected: &[&str; N],
) -> Result<[usize; N], RuleError> {
    let names: Vec<String> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();

    let mut positions = [0usize; N];
    let mut missing = Vec::new();
    for (slot, column) in expected.iter().enumerate() {
        match names.iter().position(|n| *n == column.to_lowercase()) {
            Some(index) => positions[slot] = index,
            None => missing.push(*column),
        }
    }

    if missing.is_empty() {
        Ok(positions)
    } else {
        Err(RuleError::MissingColumns {
            table,
            missing: missing.join(", "),
        })
    }
}

/// Read every row as trimmed values of the required columns
fn read_rows<R: Read, const N: usize>(
    table: &'static str,
    reader: R,
    expected: &[&str; N],
) -> Result<Vec<(usize, [String; N])>, RuleError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|source| RuleError::Csv { table, source })?
        .clone();
    let positions = locate_columns(table, &headers, expected)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| RuleError::Csv { table, source })?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let values: [String; N] =
            std::array::from_fn(|slot| record.get(positions[slot]).unwrap_or("").to_string());
        if let Some(slot) = values.iter().position(|v| v.is_empty()) {
            warn!(
                "{} CSV line {}: skipping row with empty '{}'",
                table, line, expected[slot]
            );
            continue;
        }
        rows.push((line, values));
    }
    Ok(rows)
}

/// Parse App-Permission rules from CSV text
pub fn read_app_rules<R: Read>(reader: R) -> Result<Vec<AppRule>, RuleError> {
    Ok(read_rows(APP_TABLE, reader, &APP_COLUMNS)?
        .into_iter()
        .map(|(_, [tag_category, tag_name, role, group_domain, group_name])| AppRule {
            tag_category,
            tag_name,
            role,
            group_domain,
            group_name,
        })
        .collect())
}

/// Parse OS-Mapping rules from CSV text, compiling each pattern
pub fn read_os_rules<R: Read>(reader: R) -> Result<Vec<OsRule>, RuleError> {
    read_rows(OS_TABLE, reader, &OS_COLUMNS)?
        .into_iter()
        .map(|(row, [pattern, target_tag, role, group_domain, group_name])| -> Result<OsRule, RuleError> {
            let compiled = Regex::new(&pattern).map_err(|source| RuleError::InvalidPattern {
                row,
                pattern: pattern.clone(),
                source,
            })?;
            Ok(OsRule {
                pattern: compiled,
                target_tag,
                role,
                group_domain,
                group_name,
            })
        })
        .collect()
}

/// Load App-Permission rules from a CSV file
pub fn load_app_rules(path: &Path) -> Result<Vec<AppRule>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open App-Permission CSV: {}", path.display()))?;
    read_app_rules(file).with_context(|| format!("Invalid App-Permission CSV: {}", path.display()))
}

/// Load OS-Mapping rules from a CSV file
pub fn load_os_rules(path: &Path) -> Result<Vec<OsRule>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open OS-Mapping CSV: {}", path.display()))?;
    read_os_rules(file).with_context(|| format!("Invalid OS-Mapping CSV: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_app_rules() {
        let csv = "\
TagCategory,TagName,RoleName,SecurityGroupDomain,SecurityGroupName,Notes
App,Exchange-admins,Enterprise Exchange Team,DLA-Kleber.local,Directory Services Exchange Team,mail
App,SQL-admins,DBA Team,DLA-Kleber.local,Database Team,
";
        let rules = read_app_rules(csv.as_bytes()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].tag_name, "Exchange-admins");
        assert_eq!(rules[0].role, "Enterprise Exchange Team");
        assert_eq!(
            rules[0].principal(),
            "DLA-Kleber.local\\Directory Services Exchange Team"
        );
    }

    #[test]
    fn test_headers_are_case_insensitive_and_reorderable() {
        let csv = "\u{feff}securitygroupname,ROLENAME,tagname,SecurityGroupDomain,tagcategory\n\
Team,Role,Tag,LAB.local,App\n";
        let rules = read_app_rules(csv.as_bytes()).unwrap();
        assert_eq!(rules[0].tag_category, "App");
        assert_eq!(rules[0].group_name, "Team");
    }

    #[test]
    fn test_missing_columns_are_fatal() {
        let csv = "TagCategory,TagName,RoleName\nApp,Web,Web Team\n";
        let err = read_app_rules(csv.as_bytes()).unwrap_err();
        match err {
            RuleError::MissingColumns { missing, .. } => {
                assert_eq!(missing, "SecurityGroupDomain, SecurityGroupName");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_and_incomplete_rows_are_skipped() {
        let csv = "\
TagCategory,TagName,RoleName,SecurityGroupDomain,SecurityGroupName
,,,,
App,,Role,LAB.local,Team
App,Web,Role,LAB.local,Team
";
        let rules = read_app_rules(csv.as_bytes()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].tag_name, "Web");
    }

    #[test]
    fn test_read_os_rules_keeps_file_order() {
        let csv = "\
GuestOSPattern,TargetTagName,RoleName,SecurityGroupDomain,SecurityGroupName
Microsoft Windows Server 2022.*,Windows-server,Windows Server Team,LAB.local,Windows Server Team
Microsoft Windows.*,Windows-client,Desktop Team,LAB.local,Desktop Team
";
        let rules = read_os_rules(csv.as_bytes()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].target_tag, "Windows-server");
        assert!(rules[0].matches("Microsoft Windows Server 2022 Standard"));
    }

    #[test]
    fn test_invalid_os_pattern_is_fatal() {
        let csv = "\
GuestOSPattern,TargetTagName,RoleName,SecurityGroupDomain,SecurityGroupName
Windows (Server,Windows-server,Role,LAB.local,Team
";
        assert!(matches!(
            read_os_rules(csv.as_bytes()),
            Err(RuleError::InvalidPattern { .. })
        ));
    }
}
