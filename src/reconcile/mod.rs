//! Reconciliation module
//!
//! Ties the engine together for one run:
//! - Pre-flight: make sure every category and tag the rules need exists
//! - Container pass: app-rule permissions on folders and resource pools
//! - VM pass: container tag inheritance, then OS tagging and permissions,
//!   run in parallel batches
//! - Bookkeeping: exclusions, the processed marker and the run report

use crate::config::{Configuration, Environment};
use crate::decision::{DecisionEngine, RolePolicy};
use crate::error::{ConfigError, TagError};
use crate::executor::aggregator::{RunAggregator, VmOutcome};
use crate::executor::retry::RetryPolicy;
use crate::executor::{Coordinator, ExecutionReport, ExecutionSettings};
use crate::inventory::{Inventory, InventoryTree, VmFilter};
use crate::logging::RunLogger;
use crate::matcher::pattern::partition_excluded;
use crate::matcher::{inheritable_tags, match_app_rules, match_os_rules, InheritanceOrder, OsMatchOutcome};
use crate::models::{
    Action, Cardinality, InventoryObject, ObjectKind, OperationRecord, PermissionDecision,
    RuleSource, RunReport, RunSummary, TagCategory, TagRef,
};
use crate::planner::{plan, recommend_settings};
use crate::rules::RuleSet;
use crate::tags::TagResolver;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod marker;

pub use marker::ProcessedMarker;

/// Categories and tags confirmed before any mutation
#[derive(Debug, Clone)]
pub struct Preflight {
    pub os_category: TagCategory,
    pub categories: usize,
    pub tags: usize,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub execution: ExecutionReport,
    /// VMs dropped by exclusion patterns
    pub excluded: usize,
}

/// One reconciliation run against one inventory source
pub struct Reconciler {
    inventory: Arc<dyn Inventory>,
    rules: Arc<RuleSet>,
    config: Configuration,
    environment: Environment,
    cancel: Arc<AtomicBool>,
    logger: RunLogger,
}

impl Reconciler {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        rules: RuleSet,
        config: Configuration,
        cancel: Arc<AtomicBool>,
        logger: RunLogger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let environment = config.environment()?;
        Ok(Self {
            inventory,
            rules: Arc::new(rules),
            config,
            environment,
            cancel,
            logger,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Create every category and tag the rules refer to
    ///
    /// Any failure here is fatal: nothing has been mutated on objects yet.
    pub fn preflight(&self, tags: &TagResolver) -> Result<Preflight> {
        let all_kinds: BTreeSet<ObjectKind> = ObjectKind::ALL.into_iter().collect();
        let vm_only: BTreeSet<ObjectKind> = [ObjectKind::Vm].into_iter().collect();

        let os_category = tags
            .ensure_category(&self.environment.settings.os_category, &vm_only, Cardinality::Single)
            .map_err(fatal)
            .context("Pre-flight: OS category")?;
        let mut categories = 1;
        let mut tag_count = 0;

        for tag in self.rules.os_tags() {
            tags.ensure_tag(&tag, &os_category)
                .map_err(fatal)
                .with_context(|| format!("Pre-flight: OS tag '{}'", tag))?;
            tag_count += 1;
        }

        for category_name in self.rules.app_categories() {
            let category = tags
                .ensure_category(&category_name, &all_kinds, Cardinality::Multiple)
                .map_err(fatal)
                .with_context(|| format!("Pre-flight: category '{}'", category_name))?;
            categories += 1;
            for (_, tag) in self
                .rules
                .app_tags()
                .into_iter()
                .filter(|(c, _)| c.eq_ignore_ascii_case(&category_name))
            {
                tags.ensure_tag(&tag, &category)
                    .map_err(fatal)
                    .with_context(|| format!("Pre-flight: tag '{}/{}'", category_name, tag))?;
                tag_count += 1;
            }
        }

        info!(
            "Pre-flight complete: {} categories, {} tags ({} created)",
            categories,
            tag_count,
            tags.tags_created()
        );
        Ok(Preflight {
            os_category,
            categories,
            tags: tag_count,
        })
    }

    /// Reconcile every selected VM and container
    ///
    /// The configured timeout covers the whole run, from pre-flight to the
    /// last VM batch.
    pub fn run(&self, filter: &VmFilter, marker: &mut ProcessedMarker) -> Result<RunOutcome> {
        let started = Instant::now();
        let deadline = started + self.config.run.timeout();
        let source = self.inventory.source_id().to_string();

        let tags = Arc::new(TagResolver::new(Arc::clone(&self.inventory)));
        let preflight = self.preflight(&tags)?;

        let tree = InventoryTree::load(self.inventory.as_ref())
            .context("Failed to load folders and resource pools")?;
        let vms = self
            .inventory
            .list_vms(filter)
            .context("Failed to list virtual machines")?;
        let (vms, excluded) =
            partition_excluded(vms, &self.config.exclusions.vm_patterns, |vm| vm.name.as_str());
        for vm in &excluded {
            debug!("Excluding system VM '{}'", vm.name);
        }

        let mut pre_summary = RunSummary::default();
        let mut pre_records = Vec::new();
        let mut selected = Vec::with_capacity(vms.len());
        for vm in vms {
            match marker.claimed_by_other(&vm.marker_key(), &source) {
                Some(owner) => {
                    info!("Skipping '{}': already processed today by {}", vm.name, owner);
                    pre_summary.vms_skipped += 1;
                    pre_records.push(
                        OperationRecord::new(&vm, RuleSource::OsRule, Action::ObjectSkipped)
                            .reason(format!("already processed today by {}", owner)),
                    );
                }
                None => selected.push(vm),
            }
        }

        let retry = self.config.retry.policy();
        let engine = Arc::new(DecisionEngine::new(
            Arc::clone(&self.inventory),
            retry,
            RolePolicy::new(&self.config.policy, &self.environment.settings.function_category),
            Arc::clone(&self.cancel),
        ));

        let (container_summary, container_records) = self.reconcile_containers(&tree, &engine, deadline);
        pre_summary.absorb(&container_summary);
        pre_records.extend(container_records);

        let threads = self.config.run.max_threads;
        let (recommended_size, recommended_strategy) = recommend_settings(selected.len(), threads);
        let batch_size = self.config.run.batch_size.unwrap_or(recommended_size);
        let strategy = self.config.run.strategy.unwrap_or(recommended_strategy);
        let total_vms = selected.len();
        let batches = plan(selected, batch_size, strategy);

        let aggregator = Arc::new(RunAggregator::new(total_vms, batches.len()));
        aggregator.add(&pre_summary, pre_records);

        self.logger
            .run_started(&source, total_vms, threads, batches.len(), &strategy.to_string());

        let pipeline = Arc::new(VmPipeline {
            inventory: Arc::clone(&self.inventory),
            rules: Arc::clone(&self.rules),
            tags: Arc::clone(&tags),
            engine,
            tree: Arc::new(tree),
            os_category: preflight.os_category,
            inheritance: self.config.inheritance.enabled.then(|| {
                (
                    self.environment.inheritable_categories(&self.config.inheritance),
                    self.config.inheritance.order,
                )
            }),
            retry,
            cancel: Arc::clone(&self.cancel),
        });
        let coordinator = Coordinator::new(
            ExecutionSettings {
                threads,
                deadline,
                grace: self.config.run.grace(),
                report_interval: self.config.run.report_interval(),
            },
            Arc::clone(&self.cancel),
            self.logger.clone(),
        );
        let execution =
            coordinator.run(batches, Arc::clone(&aggregator), move |vm| pipeline.process(vm))?;

        let (mut summary, records, processed) = aggregator.results();
        summary.tags_created = tags.tags_created();
        for key in processed {
            marker.mark(key, &source);
        }

        let status = summary.status();
        let elapsed = started.elapsed();
        self.logger
            .run_finished(status, &summary, elapsed, execution.cut_short());

        Ok(RunOutcome {
            report: RunReport {
                run_id: self.logger.run_id().to_string(),
                environment: self.environment.key.clone(),
                source,
                status,
                summary,
                records,
                duration_ms: elapsed.as_millis() as u64,
                interrupted: execution.cut_short().then_some(true),
            },
            execution,
            excluded: excluded.len(),
        })
    }

    /// App-rule permissions on folders and resource pools, sequentially
    ///
    /// Stops at `deadline` and sets the cancel flag, so the VM pass that
    /// follows reports the run as timed out without starting any work.
    fn reconcile_containers(
        &self,
        tree: &InventoryTree,
        engine: &DecisionEngine,
        deadline: Instant,
    ) -> (RunSummary, Vec<OperationRecord>) {
        let mut outcome = VmOutcome::default();
        let mut containers: Vec<&InventoryObject> = tree.containers().collect();
        containers.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));

        for container in containers {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Run time limit reached during the container pass");
                self.cancel.store(true, Ordering::Relaxed);
                break;
            }
            for matched in match_app_rules(container, &self.rules.app_rules) {
                let decision = engine.decide(container, &matched.principal, &matched.rule.role);
                record_decision(
                    &mut outcome,
                    container,
                    RuleSource::AppRule,
                    &matched.principal,
                    &matched.rule.role,
                    decision,
                );
            }
        }
        (outcome.summary, outcome.records)
    }
}

/// Pre-flight failures abort the run; collisions are configuration errors
fn fatal(error: TagError) -> anyhow::Error {
    match error {
        TagError::CategoryCollision {
            tag,
            requested,
            existing,
        } => ConfigError::CategoryCollision {
            tag,
            requested,
            existing,
        }
        .into(),
        other => other.into(),
    }
}

/// Count a decision and append its audit row
fn record_decision(
    outcome: &mut VmOutcome,
    object: &InventoryObject,
    source: RuleSource,
    principal: &str,
    declared_role: &str,
    decision: PermissionDecision,
) {
    let record = match decision {
        PermissionDecision::Created(entry) => {
            outcome.summary.permissions_assigned += 1;
            OperationRecord::new(object, source, Action::PermissionCreated)
                .principal(principal, &entry.role)
        }
        PermissionDecision::Skipped { reason, role } => {
            outcome.summary.permissions_skipped += 1;
            OperationRecord::new(object, source, Action::PermissionSkipped)
                .principal(principal, &role)
                .reason(reason.to_string())
        }
        PermissionDecision::Failed { error, retries } => {
            outcome.summary.permissions_failed += 1;
            OperationRecord::new(object, source, Action::PermissionFailed)
                .principal(principal, declared_role)
                .reason(format!("{} retries", retries))
                .error(error)
        }
    };
    outcome.push(record);
}

/// Per-VM work shared by every worker
struct VmPipeline {
    inventory: Arc<dyn Inventory>,
    rules: Arc<RuleSet>,
    tags: Arc<TagResolver>,
    engine: Arc<DecisionEngine>,
    tree: Arc<InventoryTree>,
    os_category: TagCategory,
    /// Inheritable categories and search order, when inheritance is on
    inheritance: Option<(Vec<String>, InheritanceOrder)>,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl VmPipeline {
    fn process(&self, listed: &InventoryObject) -> VmOutcome {
        let mut outcome = VmOutcome::new(listed.marker_key());
        let mut vm = listed.clone();

        match self.inventory.get_tag_assignments(&vm) {
            Ok(current) => vm.tags = current.into_iter().collect(),
            Err(e) => {
                warn!("Using listed tags for '{}': {}", vm.name, e);
            }
        }

        // Inherited tags must be on the VM before any grant, so a
        // Domain Controller tag on a folder still triggers the override
        let inherited = self.inherit_container_tags(&mut vm, &mut outcome);
        self.apply_os_rule(&mut vm, &mut outcome);

        for matched in match_app_rules(&vm, &self.rules.app_rules) {
            let via_container = inherited
                .iter()
                .any(|t| t.is(&matched.rule.tag_category, &matched.rule.tag_name));
            let source = if via_container {
                RuleSource::Container
            } else {
                RuleSource::AppRule
            };
            let decision = self.engine.decide(&vm, &matched.principal, &matched.rule.role);
            record_decision(
                &mut outcome,
                &vm,
                source,
                &matched.principal,
                &matched.rule.role,
                decision,
            );
        }

        outcome.summary.vms_processed += 1;
        outcome
    }

    /// Tag the VM with its OS tag and grant the OS rule's role
    fn apply_os_rule(&self, vm: &mut InventoryObject, outcome: &mut VmOutcome) {
        let matched = match match_os_rules(vm, &self.rules.os_rules) {
            OsMatchOutcome::Matched(matched) => matched,
            OsMatchOutcome::NoOsInformation => {
                info!("'{}' has no OS information, skipping OS rules", vm.name);
                outcome.summary.vms_skipped += 1;
                outcome.push(
                    OperationRecord::new(vm, RuleSource::OsRule, Action::ObjectSkipped)
                        .reason("no OS information"),
                );
                return;
            }
            OsMatchOutcome::NoMatch => {
                debug!("No OS rule matches '{}'", vm.name);
                return;
            }
        };
        debug!(
            "'{}' matched OS rule '{}' via {:?} ('{}')",
            vm.name,
            matched.rule.pattern.as_str(),
            matched.source,
            matched.os_name
        );

        let target = TagRef::new(self.os_category.name.clone(), matched.rule.target_tag.clone());
        if !vm.has_tag(&target.category, &target.name) {
            self.assign_tag(vm, &self.os_category, &target.name, RuleSource::OsRule, None, outcome);
        }

        let decision = self.engine.decide(vm, &matched.principal, &matched.rule.role);
        record_decision(
            outcome,
            vm,
            RuleSource::OsRule,
            &matched.principal,
            &matched.rule.role,
            decision,
        );
    }

    /// Copy container tags onto the VM; returns the tags actually inherited
    fn inherit_container_tags(&self, vm: &mut InventoryObject, outcome: &mut VmOutcome) -> Vec<TagRef> {
        let Some((categories, order)) = &self.inheritance else {
            return Vec::new();
        };

        let candidates = match inheritable_tags(vm, &self.tree, categories, *order) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Cannot walk containers of '{}': {}", vm.name, e);
                outcome.summary.errors_encountered += 1;
                outcome.push(
                    OperationRecord::new(vm, RuleSource::Container, Action::TagFailed)
                        .error(e.to_string()),
                );
                return Vec::new();
            }
        };

        let all_kinds: BTreeSet<ObjectKind> = ObjectKind::ALL.into_iter().collect();
        let mut inherited = Vec::new();
        for candidate in candidates {
            let category = match self.tags.ensure_category(
                &candidate.tag.category,
                &all_kinds,
                Cardinality::Multiple,
            ) {
                Ok(category) => category,
                Err(e) => {
                    outcome.summary.errors_encountered += 1;
                    outcome.push(
                        OperationRecord::new(vm, RuleSource::Container, Action::TagFailed)
                            .reason(candidate.tag.to_string())
                            .error(e.to_string()),
                    );
                    continue;
                }
            };
            let reason = format!("inherited from '{}'", candidate.container);
            if self.assign_tag(
                vm,
                &category,
                &candidate.tag.name,
                RuleSource::Container,
                Some(reason),
                outcome,
            ) {
                inherited.push(candidate.tag);
            }
        }
        inherited
    }

    /// Resolve and attach a tag; returns whether the VM now carries it
    fn assign_tag(
        &self,
        vm: &mut InventoryObject,
        category: &TagCategory,
        name: &str,
        source: RuleSource,
        reason: Option<String>,
        outcome: &mut VmOutcome,
    ) -> bool {
        let label = format!("{}/{}", category.name, name);
        let tag = match self.tags.ensure_tag(name, category) {
            Ok(tag) => tag,
            Err(e) => {
                outcome.summary.errors_encountered += 1;
                outcome.push(
                    OperationRecord::new(vm, source, Action::TagFailed)
                        .reason(label)
                        .error(e.to_string()),
                );
                return false;
            }
        };

        let attempt = self
            .retry
            .execute(&self.cancel, |_| self.inventory.create_tag_assignment(vm, &tag));
        match attempt.result {
            Ok(()) => {
                info!("Assigned tag '{}' to '{}'", label, vm.name);
                vm.tags.insert(tag.tag_ref());
                outcome.summary.tags_assigned += 1;
                let record = OperationRecord::new(vm, source, Action::TagAssigned);
                outcome.push(record.reason(reason.unwrap_or(label)));
                true
            }
            Err(e) => {
                warn!("Failed to assign tag '{}' to '{}': {}", label, vm.name, e);
                outcome.summary.errors_encountered += 1;
                outcome.push(
                    OperationRecord::new(vm, source, Action::TagFailed)
                        .reason(label)
                        .error(e.to_string()),
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{FaultPoint, FaultyInventory, MemoryInventory};
    use crate::logging::LogLevel;
    use crate::rules::read_app_rules;
    use std::time::Duration;

    const APP_CSV: &str = "\
TagCategory,TagName,RoleName,SecurityGroupDomain,SecurityGroupName
vCenter-DEV-App-team,Web,Web Admin,LAB,Web Team
";

    fn reconciler(inventory: Arc<dyn Inventory>) -> Reconciler {
        let rules = RuleSet::new(read_app_rules(APP_CSV.as_bytes()).unwrap(), Vec::new());
        Reconciler::new(
            inventory,
            rules,
            Configuration::default(),
            Arc::new(AtomicBool::new(false)),
            RunLogger::new("run-1", "DEV", LogLevel::Error),
        )
        .unwrap()
    }

    fn web_folders(count: usize) -> MemoryInventory {
        let inventory = MemoryInventory::new("vcenter-dev.local");
        inventory.insert_role("Support Admin Template", &["System.View"]);
        for i in 0..count {
            inventory.insert_object(
                InventoryObject::folder(format!("group-v{i}"), format!("Web{i:02}"))
                    .with_tag("vCenter-DEV-App-team", "Web"),
            );
        }
        inventory
    }

    fn engine_for(reconciler: &Reconciler) -> DecisionEngine {
        DecisionEngine::new(
            Arc::clone(&reconciler.inventory),
            RetryPolicy::immediate(3),
            RolePolicy::new(&reconciler.config.policy, &reconciler.environment.settings.function_category),
            Arc::clone(&reconciler.cancel),
        )
    }

    #[test]
    fn test_container_pass_stops_at_deadline() {
        let faulty = Arc::new(FaultyInventory::new(web_folders(10)));
        faulty.slow_down(FaultPoint::GetPermissions, Duration::from_millis(100));
        let reconciler = reconciler(faulty.clone());
        let tree = InventoryTree::load(faulty.as_ref()).unwrap();
        let engine = engine_for(&reconciler);

        let started = Instant::now();
        let (summary, _) =
            reconciler.reconcile_containers(&tree, &engine, started + Duration::from_millis(250));

        assert!(reconciler.cancel.load(Ordering::Relaxed));
        assert!(summary.permissions_assigned > 0, "{summary:?}");
        assert!(summary.permissions_assigned < 10, "{summary:?}");
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn test_container_pass_completes_within_deadline() {
        let inventory = Arc::new(web_folders(3));
        let reconciler = reconciler(inventory.clone());
        let tree = InventoryTree::load(inventory.as_ref()).unwrap();
        let engine = engine_for(&reconciler);

        let (summary, records) =
            reconciler.reconcile_containers(&tree, &engine, Instant::now() + Duration::from_secs(60));

        assert!(!reconciler.cancel.load(Ordering::Relaxed));
        assert_eq!(summary.permissions_assigned, 3);
        assert_eq!(records.len(), 3);
    }
}
