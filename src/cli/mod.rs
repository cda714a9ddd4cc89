//! CLI argument parsing and validation module
//!
//! Handles the command-line interface using clap, including:
//! - Rule CSV and inventory snapshot inputs
//! - Environment and configuration file selection
//! - Run tuning overrides (threads, batching, timeout)
//! - Output format selection (human/JSON/CSV export)
//! - Verbosity and quiet modes

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tagperm::config::Configuration;
use tagperm::logging::Verbosity;
use tagperm::matcher::pattern::validate_patterns;
use tagperm::planner::Strategy;

/// Parsed command-line arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config_path: Option<PathBuf>,
    pub environment: Option<String>,
    pub app_csv: PathBuf,
    pub os_csv: PathBuf,
    pub inventory: PathBuf,
    /// VM name targeting patterns; empty selects every VM
    pub vms: Vec<String>,
    pub max_threads: Option<usize>,
    pub batch_size: Option<usize>,
    pub strategy: Option<Strategy>,
    pub timeout_minutes: Option<u64>,
    pub marker_file: Option<PathBuf>,
    pub report_csv: Option<PathBuf>,
    pub json_output: bool,
    pub dry_run: bool,
    pub verbosity: Verbosity,
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay command-line values on the file configuration
    pub fn apply(&self, config: &mut Configuration) {
        if let Some(environment) = &self.environment {
            config.run.environment = environment.clone();
        }
        if let Some(threads) = self.max_threads {
            config.run.max_threads = threads;
        }
        if let Some(size) = self.batch_size {
            config.run.batch_size = Some(size);
        }
        if let Some(strategy) = self.strategy {
            config.run.strategy = Some(strategy);
        }
        if let Some(minutes) = self.timeout_minutes {
            config.run.timeout_minutes = minutes;
        }
    }
}

/// Build the command definition
pub fn build_command() -> Command {
    Command::new("tagperm")
        .version(env!("TAGPERM_VERSION"))
        .long_version(concat!(env!("TAGPERM_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Reconcile vCenter tags and permissions from CSV rules")
        .long_about(
            "Assigns OS and inherited container tags to VMs and grants role-based \
             permissions to security groups, driven by App-Permission and OS-Mapping CSV rules.",
        )
        .arg(
            Arg::new("environment")
                .short('E')
                .long("environment")
                .value_name("ENV")
                .help("Environment key (DEV, PROD, KLEB, OT or one from the config file)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("app-csv")
                .long("app-csv")
                .value_name("FILE")
                .help("App-Permission rules CSV")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("os-csv")
                .long("os-csv")
                .value_name("FILE")
                .help("OS-Mapping rules CSV")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("inventory")
                .short('i')
                .long("inventory")
                .value_name("FILE")
                .help("Inventory snapshot (JSON); updated in place unless --dry-run")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("vm")
                .long("vm")
                .value_name("NAME")
                .help("Only reconcile VMs matching this name or glob pattern")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("max-threads")
                .short('t')
                .long("max-threads")
                .value_name("N")
                .help("Worker threads (1-10)")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("batch-size")
                .short('b')
                .long("batch-size")
                .value_name("N")
                .help("VMs per batch (default: chosen from inventory size)")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .help("Batching strategy: round-robin, power-state-balanced, complexity-balanced")
                .value_parser(|s: &str| s.parse::<Strategy>()),
        )
        .arg(
            Arg::new("timeout-minutes")
                .long("timeout-minutes")
                .value_name("MINUTES")
                .help("Wall-clock limit for the run")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("marker-file")
                .long("marker-file")
                .value_name("FILE")
                .help("Processed-VM marker file shared by redundant runs")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("report-csv")
                .long("report-csv")
                .value_name("FILE")
                .help("Write the per-operation audit trail as CSV")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Output in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Do not write the inventory snapshot or marker file back")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log warnings and errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug detail")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Append log output to this file instead of stderr")
                .value_parser(value_parser!(PathBuf)),
        )
}

/// Parse command line arguments
pub fn parse_args() -> Result<RunArgs> {
    from_matches(&build_command().get_matches())
}

fn from_matches(matches: &ArgMatches) -> Result<RunArgs> {
    let path = |id: &str| matches.get_one::<PathBuf>(id).cloned();
    let required = |id: &str| path(id).ok_or_else(|| anyhow!("Missing required argument --{}", id));

    let app_csv = required("app-csv")?;
    let os_csv = required("os-csv")?;
    for (label, file) in [("App-Permission CSV", &app_csv), ("OS-Mapping CSV", &os_csv)] {
        if !file.exists() {
            return Err(anyhow!("{} does not exist: {}", label, file.display()));
        }
    }
    let inventory = required("inventory")?;
    if !inventory.exists() {
        return Err(anyhow!("Inventory snapshot does not exist: {}", inventory.display()));
    }

    let vms: Vec<String> = matches
        .get_many::<String>("vm")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    validate_patterns(&vms)?;

    let verbosity = if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };

    Ok(RunArgs {
        config_path: path("config"),
        environment: matches.get_one::<String>("environment").cloned(),
        app_csv,
        os_csv,
        inventory,
        vms,
        max_threads: matches.get_one::<usize>("max-threads").copied(),
        batch_size: matches.get_one::<usize>("batch-size").copied(),
        strategy: matches.get_one::<Strategy>("strategy").copied(),
        timeout_minutes: matches.get_one::<u64>("timeout-minutes").copied(),
        marker_file: path("marker-file"),
        report_csv: path("report-csv"),
        json_output: matches.get_flag("json"),
        dry_run: matches.get_flag("dry-run"),
        verbosity,
        log_file: path("log-file"),
    })
}
