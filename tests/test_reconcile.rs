//! End-to-end reconciliation scenarios against an in-memory inventory

mod helpers;

use helpers::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tagperm::config::Configuration;
use tagperm::error::{ErrorKind, InventoryError};
use tagperm::inventory::{FaultPoint, FaultyInventory, Inventory, MemoryInventory, VmFilter};
use tagperm::logging::{LogLevel, RunLogger};
use tagperm::models::{
    Action, InventoryObject, PermissionEntry, PowerState, RuleSource, RunStatus, TagRef,
};
use tagperm::reconcile::{ProcessedMarker, Reconciler, RunOutcome};
use tagperm::rules::{read_app_rules, read_os_rules, RuleSet};

fn rules() -> RuleSet {
    RuleSet::new(
        read_app_rules(APP_CSV.as_bytes()).unwrap(),
        read_os_rules(OS_CSV.as_bytes()).unwrap(),
    )
}

fn reconcile_with(
    inventory: Arc<dyn Inventory>,
    config: Configuration,
    filter: &VmFilter,
    marker: &mut ProcessedMarker,
) -> anyhow::Result<RunOutcome> {
    let reconciler = Reconciler::new(
        inventory,
        rules(),
        config,
        Arc::new(AtomicBool::new(false)),
        RunLogger::new("test-run", "DEV", LogLevel::Error),
    )?;
    reconciler.run(filter, marker)
}

fn reconcile(inventory: &Arc<MemoryInventory>) -> RunOutcome {
    reconcile_with(
        inventory.clone(),
        Configuration::default(),
        &VmFilter::all(),
        &mut ProcessedMarker::today(),
    )
    .unwrap()
}

fn records_for<'a>(outcome: &'a RunOutcome, object: &str) -> Vec<&'a tagperm::models::OperationRecord> {
    outcome
        .report
        .records
        .iter()
        .filter(|r| r.object_name == object)
        .collect()
}

#[test]
fn test_first_run_tags_and_grants() {
    let inventory = Arc::new(lab_inventory());
    let outcome = reconcile(&inventory);
    let summary = &outcome.report.summary;

    assert_eq!(outcome.report.status, RunStatus::Success);
    assert_eq!(outcome.report.environment, "DEV");
    assert_eq!(outcome.report.source, "vcenter-dev.local");
    assert_eq!(outcome.excluded, 1);
    assert_eq!(summary.vms_processed, 3);
    assert_eq!(summary.tags_created, 4);
    assert_eq!(summary.tags_assigned, 3);
    assert_eq!(summary.permissions_assigned, 5);
    assert_eq!(summary.permissions_failed, 0);
    assert_eq!(summary.errors_encountered, 0);

    let app01 = inventory.object("vm-1").unwrap();
    assert!(app01.has_tag(OS_CATEGORY, "Windows"));
    assert!(app01.has_tag(APP_CATEGORY, "Web"));
    assert!(app01
        .permissions
        .contains(&PermissionEntry::explicit("LAB\\Windows Server Team", "Windows Admin")));
    assert!(app01
        .permissions
        .contains(&PermissionEntry::explicit("LAB\\Web Team", "Web Admin")));

    let db01 = inventory.object("vm-2").unwrap();
    assert!(db01.has_tag(OS_CATEGORY, "Linux"));
    assert_eq!(db01.permissions.len(), 2);

    let folder = inventory.object("group-v2").unwrap();
    assert_eq!(
        folder.permissions,
        vec![PermissionEntry::explicit("LAB\\Web Team", "Web Admin")]
    );

    // Missing roles are cloned from the template
    let role = inventory.get_role("Web Admin").unwrap().unwrap();
    assert!(role.privileges.contains("System.View"));
}

#[test]
fn test_inherited_tag_is_audited_as_container() {
    let inventory = Arc::new(lab_inventory());
    let outcome = reconcile(&inventory);

    let records = records_for(&outcome, "APP01");
    let inherited = records
        .iter()
        .find(|r| r.action == Action::TagAssigned && r.source == RuleSource::Container)
        .unwrap();
    assert_eq!(inherited.reason, "inherited from 'Web'");

    let grant = records
        .iter()
        .find(|r| r.action == Action::PermissionCreated && r.role == "Web Admin")
        .unwrap();
    assert_eq!(grant.source, RuleSource::Container);
}

#[test]
fn test_vm_without_os_information_is_recorded() {
    let inventory = Arc::new(lab_inventory());
    let outcome = reconcile(&inventory);

    let records = records_for(&outcome, "NOOS01");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, Action::ObjectSkipped);
    assert_eq!(records[0].reason, "no OS information");
    assert!(inventory.object("vm-3").unwrap().tags.is_empty());

    // Skipped for OS rules, still processed for inheritance and app rules
    let summary = &outcome.report.summary;
    assert_eq!(summary.vms_skipped, 1);
    assert_eq!(summary.vms_processed, 3);
    let skipped = outcome
        .report
        .records
        .iter()
        .filter(|r| r.action == Action::ObjectSkipped)
        .count();
    assert_eq!(skipped, summary.vms_skipped);
}

#[test]
fn test_excluded_vm_is_untouched() {
    let inventory = Arc::new(lab_inventory());
    let outcome = reconcile(&inventory);

    assert!(records_for(&outcome, "vCLS-1").is_empty());
    let vcls = inventory.object("vm-4").unwrap();
    assert!(vcls.tags.is_empty());
    assert!(vcls.permissions.is_empty());
}

#[test]
fn test_second_run_changes_nothing() {
    let inventory = Arc::new(lab_inventory());
    reconcile(&inventory);
    let before = inventory.snapshot();

    let second = reconcile(&inventory);
    let summary = &second.report.summary;
    assert_eq!(second.report.status, RunStatus::Success);
    assert_eq!(summary.tags_created, 0);
    assert_eq!(summary.tags_assigned, 0);
    assert_eq!(summary.permissions_assigned, 0);
    assert_eq!(summary.permissions_skipped, 5);

    let after = inventory.snapshot();
    for (old, new) in before.objects.iter().zip(after.objects.iter()) {
        assert_eq!(old, new);
    }
    assert_eq!(before.tags.len(), after.tags.len());
    assert_eq!(before.roles.len(), after.roles.len());
}

#[test]
fn test_domain_controller_gets_readonly_role() {
    let inventory = Arc::new(MemoryInventory::new("vcenter-dev.local"));
    inventory.insert_role(TEMPLATE_ROLE, &["System.View"]);
    inventory.insert_object(
        InventoryObject::vm("vm-10", "DC01", PowerState::PoweredOn)
            .with_guest(windows_guest())
            .with_tag(FUNCTION_CATEGORY, "Domain Controller"),
    );

    let outcome = reconcile(&inventory);
    assert_eq!(outcome.report.summary.permissions_assigned, 1);

    let dc = inventory.object("vm-10").unwrap();
    assert_eq!(
        dc.permissions,
        vec![PermissionEntry::explicit("LAB\\Windows Server Team", "ReadOnly")]
    );
    assert!(dc.has_tag(OS_CATEGORY, "Windows"));
    let record = records_for(&outcome, "DC01")
        .into_iter()
        .find(|r| r.action == Action::PermissionCreated)
        .unwrap();
    assert_eq!(record.role, "ReadOnly");
}

#[test]
fn test_domain_controller_tag_inherited_from_folder_gets_readonly() {
    let inventory = Arc::new(MemoryInventory::new("vcenter-dev.local"));
    inventory.insert_role(TEMPLATE_ROLE, &["System.View"]);
    inventory.insert_object(InventoryObject::folder("group-v1", "vm"));
    inventory.insert_object(
        InventoryObject::folder("group-v7", "DomainControllers")
            .with_parent("group-v1")
            .with_tag(FUNCTION_CATEGORY, "Domain Controller"),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-11", "DC01", PowerState::PoweredOn)
            .with_parent("group-v7")
            .with_guest(windows_guest()),
    );

    let outcome = reconcile(&inventory);
    assert_eq!(outcome.report.status, RunStatus::Success);

    let dc = inventory.object("vm-11").unwrap();
    assert!(dc.has_tag(FUNCTION_CATEGORY, "Domain Controller"));
    assert!(dc.has_tag(OS_CATEGORY, "Windows"));
    assert_eq!(
        dc.permissions,
        vec![PermissionEntry::explicit("LAB\\Windows Server Team", "ReadOnly")]
    );
    assert!(inventory.get_role("Windows Admin").unwrap().is_none());
}

#[test]
fn test_grant_inherited_from_folder_is_skipped() {
    let inventory = Arc::new(MemoryInventory::new("vcenter-dev.local"));
    inventory.insert_role(TEMPLATE_ROLE, &["System.View"]);
    inventory.insert_object(InventoryObject::folder("group-v1", "vm"));
    inventory.insert_object(
        InventoryObject::folder("group-v5", "Shop")
            .with_parent("group-v1")
            .with_permission(PermissionEntry {
                principal: "LAB\\Web Team".to_string(),
                role: "Web Admin".to_string(),
                propagate: true,
            }),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-20", "SHOP01", PowerState::PoweredOn)
            .with_parent("group-v5")
            .with_tag(APP_CATEGORY, "Web"),
    );

    let outcome = reconcile(&inventory);
    let summary = &outcome.report.summary;
    assert_eq!(summary.permissions_skipped, 1);
    assert_eq!(summary.permissions_failed, 0);
    assert_eq!(outcome.report.status, RunStatus::Success);
    assert!(inventory.object("vm-20").unwrap().permissions.is_empty());

    let record = records_for(&outcome, "SHOP01")
        .into_iter()
        .find(|r| r.action == Action::PermissionSkipped)
        .unwrap();
    assert_eq!(record.reason, "permission inherited or already present");
}

#[test]
fn test_category_collision_aborts_before_mutation() {
    let inventory = Arc::new(lab_inventory());
    inventory.insert_tag("Legacy-Apps", "Web");

    let err = reconcile_with(
        inventory.clone(),
        Configuration::default(),
        &VmFilter::all(),
        &mut ProcessedMarker::today(),
    )
    .err()
    .unwrap();
    let message = format!("{:#}", err);
    assert!(message.contains("already exists in category 'Legacy-Apps'"), "{message}");

    for id in ["vm-1", "vm-2", "group-v2"] {
        assert!(inventory.object(id).unwrap().permissions.is_empty());
    }
    assert!(!inventory.object("vm-1").unwrap().has_category(OS_CATEGORY));
}

#[test]
fn test_marker_skips_vms_claimed_by_another_source() {
    let inventory = Arc::new(lab_inventory());
    let mut marker = ProcessedMarker::today();
    marker.mark("APP01|vm-1", "vcenter-dev-replica.local");

    let outcome = reconcile_with(
        inventory.clone(),
        Configuration::default(),
        &VmFilter::all(),
        &mut marker,
    )
    .unwrap();

    // APP01 claimed by the replica, NOOS01 skipped for missing OS information
    let summary = &outcome.report.summary;
    assert_eq!(summary.vms_skipped, 2);
    assert_eq!(summary.vms_processed, 2);
    assert!(inventory.object("vm-1").unwrap().tags.is_empty());

    assert_eq!(
        marker.claimed_by_other("APP01|vm-1", "vcenter-dev.local"),
        Some("vcenter-dev-replica.local")
    );
    assert_eq!(marker.entries.get("DB01|vm-2").map(String::as_str), Some("vcenter-dev.local"));
    assert_eq!(marker.len(), 3);
}

#[test]
fn test_vm_filter_limits_the_run() {
    let inventory = Arc::new(lab_inventory());
    let filter = VmFilter {
        names: vec!["DB*".to_string()],
    };

    let outcome = reconcile_with(
        inventory.clone(),
        Configuration::default(),
        &filter,
        &mut ProcessedMarker::today(),
    )
    .unwrap();

    assert_eq!(outcome.report.summary.vms_processed, 1);
    assert!(inventory.object("vm-1").unwrap().tags.is_empty());
    assert!(inventory.object("vm-2").unwrap().has_tag(OS_CATEGORY, "Linux"));
}

#[test]
fn test_tag_failures_make_a_partial_success() {
    let faulty = Arc::new(FaultyInventory::new(lab_inventory()));
    faulty.fail_always(
        FaultPoint::CreateTagAssignment,
        InventoryError::new(ErrorKind::PermissionDenied, "Permission denied on tag assignment"),
    );

    let outcome = reconcile_with(
        faulty.clone(),
        Configuration::default(),
        &VmFilter::all(),
        &mut ProcessedMarker::today(),
    )
    .unwrap();

    let summary = &outcome.report.summary;
    assert_eq!(outcome.report.status, RunStatus::PartialSuccess);
    assert_eq!(outcome.report.status.exit_code(), 2);
    assert_eq!(summary.tags_assigned, 0);
    assert_eq!(summary.errors_encountered, 3);
    assert_eq!(summary.permissions_assigned, 4);
    // Not retried: permission denied is terminal
    assert_eq!(faulty.calls(FaultPoint::CreateTagAssignment), 3);

    let failed: Vec<_> = outcome
        .report
        .records
        .iter()
        .filter(|r| r.action == Action::TagFailed)
        .collect();
    assert_eq!(failed.len(), 3);
    assert!(failed.iter().all(|r| r.error.contains("Permission denied")));
}

#[test]
fn test_missing_template_role_fails_grants() {
    let inventory = Arc::new(MemoryInventory::new("vcenter-dev.local"));
    inventory.insert_object(
        InventoryObject::vm("vm-2", "DB01", PowerState::PoweredOff).with_tag(APP_CATEGORY, "DB"),
    );

    let outcome = reconcile(&inventory);
    let summary = &outcome.report.summary;
    assert_eq!(summary.permissions_failed, 1);
    assert_eq!(outcome.report.status, RunStatus::Failed);

    let record = records_for(&outcome, "DB01")
        .into_iter()
        .find(|r| r.action == Action::PermissionFailed)
        .unwrap();
    assert!(record.error.contains("Template role"), "{}", record.error);
    assert_eq!(record.reason, "0 retries");
}

#[test]
fn test_unknown_environment_is_rejected() {
    let mut config = Configuration::default();
    config.run.environment = "QA".to_string();

    let err = reconcile_with(
        Arc::new(lab_inventory()),
        config,
        &VmFilter::all(),
        &mut ProcessedMarker::today(),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("Unknown environment 'QA'"));
}

#[test]
fn test_tag_refs_survive_snapshot_round_trip() {
    let fixture = Fixture::new();
    let inventory = Arc::new(
        MemoryInventory::load_from_file(&fixture.path("inventory.json")).unwrap(),
    );
    reconcile(&inventory);
    inventory.save_to_file(&fixture.path("inventory.json")).unwrap();

    let snapshot = fixture.snapshot();
    let app01 = object(&snapshot, "APP01");
    assert!(app01.tags.contains(&TagRef::new(OS_CATEGORY, "Windows")));
    assert!(snapshot
        .tags
        .iter()
        .any(|t| t.name == "DB" && t.category == APP_CATEGORY));
}
