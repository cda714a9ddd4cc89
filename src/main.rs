#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tagperm::config::Configuration;
use tagperm::inventory::{MemoryInventory, VmFilter};
use tagperm::logging::{self, LogLevel, RunLogger, Verbosity};
use tagperm::output;
use tagperm::reconcile::{ProcessedMarker, Reconciler};
use tagperm::rules::loader::{load_app_rules, load_os_rules};
use tagperm::rules::RuleSet;
use uuid::Uuid;

fn main() -> Result<()> {
    let code = run()?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run() -> Result<i32> {
    let args = cli::parse_args()?;
    logging::init(args.verbosity, args.log_file.as_deref())?;

    let mut config = Configuration::load(args.config_path.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let rules = RuleSet::new(load_app_rules(&args.app_csv)?, load_os_rules(&args.os_csv)?);
    info!(
        "Loaded {} app rule(s) and {} OS rule(s)",
        rules.app_rules.len(),
        rules.os_rules.len()
    );

    let inventory = Arc::new(MemoryInventory::load_from_file(&args.inventory)?);

    // Set up interrupt handling
    let cancel = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&cancel));

    let level = if args.verbosity == Verbosity::Quiet {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    let logger = RunLogger::new(
        Uuid::new_v4().to_string(),
        config.run.environment.to_uppercase(),
        level,
    );

    let reconciler = Reconciler::new(
        inventory.clone(),
        rules,
        config,
        cancel,
        logger.clone(),
    )?;

    let mut marker = match &args.marker_file {
        Some(path) => ProcessedMarker::load(path, ProcessedMarker::today().date),
        None => ProcessedMarker::today(),
    };

    let filter = VmFilter {
        names: args.vms.clone(),
    };
    let outcome = match reconciler.run(&filter, &mut marker) {
        Ok(outcome) => outcome,
        Err(e) => {
            logger.run_error(&format!("{:#}", e), Some("reconcile"));
            return Err(e);
        }
    };

    if args.dry_run {
        info!("Dry run: inventory snapshot and marker left unchanged");
    } else if !outcome.execution.settled() {
        warn!("Workers were abandoned mid-run: inventory snapshot and marker left unchanged");
    } else {
        inventory
            .save_to_file(&args.inventory)
            .context("Failed to write inventory snapshot")?;
        if let Some(path) = &args.marker_file {
            if let Err(e) = marker.save(path) {
                error!("{:#}", e);
            }
        }
    }

    if let Some(path) = &args.report_csv {
        output::write_records_csv(path, &outcome.report.records)?;
    }

    if args.json_output {
        output::format_json(&outcome.report)?;
    } else {
        output::format_human(&outcome.report)?;
        if outcome.excluded > 0 {
            println!("  Excluded by pattern: {}", outcome.excluded);
        }
    }

    Ok(outcome.report.status.exit_code())
}
