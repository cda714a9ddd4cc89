//! Output formatting module
//!
//! Handles:
//! - Human-readable run summary
//! - JSON output of the full run report
//! - CSV export of the per-operation audit trail

use crate::models::{Action, OperationRecord, RunReport};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Failed operations listed in the human summary before eliding the rest
const MAX_LISTED_FAILURES: usize = 20;

/// Print the run summary in human-readable format
pub fn format_human(report: &RunReport) -> Result<()> {
    let stdout = std::io::stdout();
    write_human(&mut stdout.lock(), report)
}

/// Write the run summary in human-readable format
pub fn write_human<W: Write>(out: &mut W, report: &RunReport) -> Result<()> {
    let summary = &report.summary;
    writeln!(
        out,
        "Reconciliation Summary ({} on {}):",
        report.environment, report.source
    )?;
    writeln!(out, "  Tags created: {}", summary.tags_created)?;
    writeln!(out, "  Tags assigned: {}", summary.tags_assigned)?;
    writeln!(out, "  Permissions assigned: {}", summary.permissions_assigned)?;
    writeln!(out, "  Permissions skipped: {}", summary.permissions_skipped)?;
    writeln!(out, "  Permissions failed: {}", summary.permissions_failed)?;
    writeln!(out, "  VMs processed: {}", summary.vms_processed)?;
    if summary.vms_skipped > 0 {
        writeln!(out, "  VMs skipped: {}", summary.vms_skipped)?;
    }
    if summary.errors_encountered > 0 {
        writeln!(out, "  Errors: {}", summary.errors_encountered)?;
    }

    let duration_sec = report.duration_ms as f64 / 1000.0;
    if duration_sec < 1.0 {
        writeln!(out, "  Duration: {}ms", report.duration_ms)?;
    } else {
        writeln!(out, "  Duration: {:.2}s", duration_sec)?;
    }
    writeln!(out, "  Status: {}", report.status)?;
    if let Some(true) = report.interrupted {
        writeln!(out, "  Run was cut short; results are partial")?;
    }

    let failures: Vec<&OperationRecord> = report
        .records
        .iter()
        .filter(|r| matches!(r.action, Action::PermissionFailed | Action::TagFailed))
        .collect();
    if !failures.is_empty() {
        writeln!(out, "\nFailures:")?;
        for record in failures.iter().take(MAX_LISTED_FAILURES) {
            if record.principal.is_empty() {
                writeln!(out, "  {} [{}]: {}", record.object_name, record.source, record.error)?;
            } else {
                writeln!(
                    out,
                    "  {} [{}] {} -> {}: {}",
                    record.object_name, record.source, record.principal, record.role, record.error
                )?;
            }
        }
        if failures.len() > MAX_LISTED_FAILURES {
            writeln!(out, "  ... and {} more", failures.len() - MAX_LISTED_FAILURES)?;
        }
    }
    Ok(())
}

/// Print the full report as pretty JSON
pub fn format_json(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Export the audit trail as CSV, one row per operation
pub fn write_records_csv(path: &Path, records: &[OperationRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create report CSV: {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write report CSV: {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InventoryObject, PowerState, RuleSource, RunStatus, RunSummary};
    use tempfile::tempdir;

    fn report() -> RunReport {
        let vm = InventoryObject::vm("vm-1", "APP01", PowerState::PoweredOn);
        RunReport {
            run_id: "run-1".to_string(),
            environment: "PROD".to_string(),
            source: "vcenter-prod.local".to_string(),
            status: RunStatus::PartialSuccess,
            summary: RunSummary {
                permissions_assigned: 2,
                permissions_failed: 1,
                vms_processed: 1,
                ..Default::default()
            },
            records: vec![
                OperationRecord::new(&vm, RuleSource::AppRule, Action::PermissionCreated)
                    .principal("LAB\\Web Team", "Web Admin"),
                OperationRecord::new(&vm, RuleSource::OsRule, Action::PermissionFailed)
                    .principal("LAB\\Windows Server Team", "Windows Admin")
                    .error("Connection reset"),
            ],
            duration_ms: 1500,
            interrupted: None,
        }
    }

    #[test]
    fn test_human_summary() {
        let mut out = Vec::new();
        write_human(&mut out, &report()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Reconciliation Summary (PROD on vcenter-prod.local):"));
        assert!(text.contains("  Permissions assigned: 2"));
        assert!(text.contains("  Duration: 1.50s"));
        assert!(text.contains("  Status: PARTIAL SUCCESS"));
        assert!(text.contains("APP01 [OSRule] LAB\\Windows Server Team -> Windows Admin: Connection reset"));
        assert!(!text.contains("VMs skipped"));
    }

    #[test]
    fn test_records_csv_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        write_records_csv(&path, &report().records).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ObjectName,PowerState,Source,Action,Principal,Role,Reason,Error,Timestamp"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("APP01,PoweredOn,AppRule,PermissionCreated,LAB\\Web Team,Web Admin,,,"));
        assert_eq!(lines.count(), 1);
    }
}
