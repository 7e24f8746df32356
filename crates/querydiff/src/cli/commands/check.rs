use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::{
    CheckConfig, LayoutName, PolicyName, RuntimePaths, parse_flag, resolve_user_path,
};
use crate::models::RunSummary;
use crate::pairs::{BlockLayout, parse_pairs_file};
use crate::report::{
    CheckReport, ReportSinks, SUMMARY_SCHEMA_VERSION, build_report_layout, write_summary_artifact,
};
use crate::sqlite::{SqliteExecutor, SqliteExecutorFactory, open_read_only_connection};
use crate::verify::{verify_parallel, verify_sequential};

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Normalize both queries before comparing (y/yes/true/t or n/no/false/f).
    #[arg(value_name = "WRAP", value_parser = parse_flag)]
    pub wrap: Option<bool>,

    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    pub max_pairs: Option<usize>,

    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub sequential: bool,

    #[arg(long, value_enum)]
    pub policy: Option<PolicyName>,

    #[arg(long, value_name = "N")]
    pub expected_tables: Option<usize>,

    #[arg(long, value_name = "TEXT")]
    pub marker: Option<String>,

    #[arg(long = "ignore-rule", value_name = "NAME")]
    pub ignore_rules: Vec<String>,

    #[arg(long, value_name = "MS")]
    pub statement_timeout_ms: Option<u64>,

    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum)]
    pub layout: Option<LayoutName>,
}

pub fn run(args: &CheckArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let started_at_utc = now_utc_rfc3339()?;
    let config = resolve_check_config(args, &runtime_paths.cwd)?;
    let database = config
        .database
        .clone()
        .ok_or_else(|| anyhow!("no database configured; pass --database or set it in --config"))?;
    let input = resolve_user_path(&args.input, &runtime_paths.cwd);
    let options = config.verify_options();
    println!(
        "check: start input={} database={} wrap={} policy={} layout={} ignore_rules={} workers={} out_dir={} at={}",
        input.display(),
        database.display(),
        config.wrap_input,
        options.wrap.as_ref().map_or("none", |policy| policy.key()),
        BlockLayout::from(config.layout).as_str(),
        options.ignore.len(),
        options.workers,
        runtime_paths.out_dir.display(),
        started_at_utc
    );

    let pairs = parse_pairs_file(&input, &config.parse_options())?;
    println!(
        "check: discovered pairs={} ignored={} overwritten={}",
        pairs.len(),
        pairs.ignored(),
        pairs.overwritten()
    );

    let layout = build_report_layout(&runtime_paths.out_dir);
    let sinks = ReportSinks::open(&layout)?;
    let handle = sinks
        .handle()
        .ok_or_else(|| anyhow!("report sinks closed before the run started"))?;

    let summary = if options.workers <= 1 {
        let connection = open_read_only_connection(&database)?;
        let mut executor = SqliteExecutor::new(connection, config.statement_timeout())?;
        verify_sequential(&pairs, &mut executor, &options, &handle)
    } else {
        let factory = SqliteExecutorFactory::new(&database, config.statement_timeout());
        verify_parallel(&pairs, &factory, &options, &handle)?
    };
    drop(handle);
    let sink_stats = sinks.finish()?;

    let report = CheckReport {
        schema_version: SUMMARY_SCHEMA_VERSION,
        started_at_utc,
        finished_at_utc: now_utc_rfc3339()?,
        input,
        database,
        workers: options.workers,
        overwritten: pairs.overwritten(),
        summary,
        sinks: sink_stats,
    };
    write_summary_artifact(&layout.summary_json, &report)?;

    print_completion(&summary);
    println!(
        "check: artifacts mismatches={} errors={} summary={}",
        layout.mismatch_log.display(),
        layout.error_log.display(),
        layout.summary_json.display()
    );
    if sink_stats.failed_writes > 0 {
        eprintln!(
            "check: warning failed_writes={} next=inspect_stderr",
            sink_stats.failed_writes
        );
    }

    Ok(())
}

/// Layers the config file (if any) under the command-line flags.
pub fn resolve_check_config(args: &CheckArgs, cwd: &Path) -> Result<CheckConfig> {
    let mut config = match &args.config {
        Some(path) => CheckConfig::load(&resolve_user_path(path, cwd))?,
        None => CheckConfig::default(),
    };

    if let Some(database) = &args.database {
        config.database = Some(resolve_user_path(database, cwd));
    }
    if let Some(wrap) = args.wrap {
        config.wrap_input = wrap;
    }
    if let Some(max_pairs) = args.max_pairs {
        config.max_pairs = Some(max_pairs);
    }
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if args.sequential {
        config.sequential = true;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(expected_tables) = args.expected_tables {
        config.expected_tables = expected_tables;
    }
    if let Some(marker) = &args.marker {
        config.root_marker.clone_from(marker);
    }
    config.ignore_rules.extend(args.ignore_rules.iter().cloned());
    if let Some(statement_timeout_ms) = args.statement_timeout_ms {
        config.statement_timeout_ms = statement_timeout_ms;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(layout) = args.layout {
        config.layout = layout;
    }

    config.validate().context("invalid check configuration")?;
    Ok(config)
}

fn print_completion(summary: &RunSummary) {
    println!(
        "check: complete discovered={} processed={} mismatches={} errors={} skipped={} ignored={}",
        summary.discovered,
        summary.processed,
        summary.mismatches,
        summary.errors,
        summary.skipped,
        summary.ignored
    );
}

fn now_utc_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format check timestamp as RFC3339")
}
