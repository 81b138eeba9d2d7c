use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::{
    app::{init_config, Config},
    cache::CacheStore,
    constants::FINDINGS_EXIT_CODE,
    policy::{PlanKind, ScanPlan},
    scanner::{ExternalEngine, Orchestrator, ScanOutcome, ScanState, Severity},
    utils::ScanError,
};

use super::{CacheCommand, Commands};

/// Handle CLI subcommands
///
/// Returns the process exit code: 1 when a scan reported error findings.
pub async fn handle_command(command: &Commands, root: &Path, config: Config) -> Result<i32> {
    match command {
        Commands::Scan { no_vcs, full, json } => run_scan(root, config, !no_vcs, *full, *json).await,
        Commands::Plan { no_vcs, full } => {
            show_plan(root, config, !no_vcs, *full).await?;
            Ok(0)
        }
        Commands::History { limit } => {
            show_history(root, &config, *limit);
            Ok(0)
        }
        Commands::Cache { action } => {
            handle_cache(action, root, config)?;
            Ok(0)
        }
        Commands::Init => {
            let (path, created) = init_config(root)?;
            if created {
                println!("Configuration written to {}", path.display().to_string().green());
            } else {
                println!("Configuration already exists at {}", path.display());
            }
            Ok(0)
        }
    }
}

/// Whether `err` means the engine run itself failed, as opposed to setup or I/O
pub fn is_scan_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ScanError>()
        .is_some_and(ScanError::is_fatal)
}

fn open_orchestrator(root: &Path, config: Config) -> Result<Orchestrator> {
    let engine = ExternalEngine::new(root, &config.engine);
    Orchestrator::open(root, config, Box::new(engine))
}

/// Run a scan and print the findings
async fn run_scan(root: &Path, config: Config, use_vcs: bool, full: bool, as_json: bool) -> Result<i32> {
    let mut orchestrator = open_orchestrator(root, config)?;
    let outcome = orchestrator.run(use_vcs, full).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }

    let has_errors = outcome
        .findings
        .iter()
        .any(|f| f.severity == Severity::Error);
    Ok(if has_errors { FINDINGS_EXIT_CODE } else { 0 })
}

fn outcome_json(outcome: &ScanOutcome) -> serde_json::Value {
    json!({
        "from_cache": outcome.from_cache,
        "detection_mode": outcome.detection_mode,
        "duration_ms": outcome.duration.as_millis() as u64,
        "plan": outcome.plan,
        "findings": outcome.findings,
        "warnings": outcome.warnings,
    })
}

fn print_outcome(outcome: &ScanOutcome) {
    print_plan(&outcome.plan);
    let source = if outcome.from_cache {
        "cached result".cyan()
    } else {
        "engine run".normal()
    };
    println!(
        "  Result: {} ({} ms, {} detection)",
        source,
        outcome.duration.as_millis(),
        outcome.detection_mode
    );
    println!();

    if outcome.findings.is_empty() {
        println!("{}", "No findings".green());
    } else {
        for finding in &outcome.findings {
            let severity = match finding.severity {
                Severity::Error => "error".red().bold(),
                Severity::Warning => "warning".yellow(),
                Severity::Info => "info".normal(),
            };
            println!(
                "{}:{}: {} [{}] {}",
                finding.path, finding.start_line, severity, finding.rule_id, finding.message
            );
        }
        println!();
        println!("{} findings", outcome.findings.len());
    }

    for warning in &outcome.warnings {
        println!("  [WARNING] {}", warning.yellow());
    }
}

/// Show the plan without running the engine
async fn show_plan(root: &Path, config: Config, use_vcs: bool, full: bool) -> Result<()> {
    let mut orchestrator = open_orchestrator(root, config)?;
    let plan = orchestrator.plan(use_vcs, full).await?;
    print_plan(&plan);

    if plan.kind == PlanKind::Incremental {
        println!("  Targets:");
        for target in &plan.target_paths {
            println!("      • {}", target);
        }
    }
    Ok(())
}

fn print_plan(plan: &ScanPlan) {
    let kind = match plan.kind {
        PlanKind::Full => plan.kind.as_str().yellow().bold(),
        PlanKind::Incremental => plan.kind.as_str().green().bold(),
    };
    println!("{} scan: {}", kind, plan.reason);
    println!(
        "  Changed: {}  Affected: {}  Targets: {}",
        plan.changed_count,
        plan.affected_count,
        plan.target_paths.len()
    );
    println!("  Fingerprint: {}", plan.fingerprint.dimmed());
}

/// Show recent scans, newest first
fn show_history(root: &Path, config: &Config, limit: usize) {
    let paths = config.state_paths(root);
    let state = ScanState::load(&paths.scan_state_file);

    if state.history.is_empty() {
        println!("No scans recorded yet");
        return;
    }

    println!("Recent scans:");
    for record in state.recent(limit) {
        let when = format_timestamp(record.timestamp);
        let source = if record.from_cache { " (cached)" } else { "" };
        println!(
            "  {}  {:<11} {:>5} targets {:>5} findings {:>7} ms{}",
            when,
            record.kind.as_str(),
            record.target_count,
            record.findings_count,
            record.duration_ms,
            source.cyan()
        );
    }

    println!();
    println!("Performance:");
    for (kind, performance) in &state.performance {
        println!(
            "  {:<11} {} runs, avg {} ms, {} findings total, {} cache hits",
            kind.as_str(),
            performance.runs,
            performance.average_duration_ms(),
            performance.total_findings,
            performance.cache_hits
        );
    }

    match state.last_full_scan_at {
        Some(ts) => println!("  Last full scan: {}", format_timestamp(ts)),
        None => println!("  Last full scan: {}", "never".yellow()),
    }
}

fn handle_cache(action: &CacheCommand, root: &Path, config: Config) -> Result<()> {
    let cache_dir: PathBuf = config.state_paths(root).cache_dir;
    let mut cache = CacheStore::open(&cache_dir, config.cache)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    match action {
        CacheCommand::Stats => {
            println!("{}", cache.stats().format());
            println!("Capacity: {:.2} MB", cache.capacity() as f64 / 1_048_576.0);
        }
        CacheCommand::List { entry_type } => {
            let entries = cache.list(entry_type.as_deref());
            if entries.is_empty() {
                println!("Cache is empty");
            }
            for entry in entries {
                println!(
                    "  {}  {:<16} {:>10} bytes  created {}  expires {}",
                    entry.key,
                    entry.entry_type,
                    entry.size_bytes,
                    format_timestamp(entry.created_at),
                    format_timestamp(entry.expires_at)
                );
            }
        }
        CacheCommand::Cleanup => {
            let report = cache.cleanup()?;
            println!(
                "Removed {} expired entries, freed {} bytes",
                report.expired_count, report.freed_bytes
            );
        }
        CacheCommand::Clear => {
            let count = cache.clear()?;
            println!("Cleared {} cache entries", count);
        }
        CacheCommand::Invalidate {
            entry_type,
            pattern,
        } => {
            if entry_type.is_none() && pattern.is_none() {
                anyhow::bail!("Pass --type and/or --pattern, or use `cache clear`");
            }
            let count = cache.invalidate(entry_type.as_deref(), pattern.as_deref())?;
            println!("Invalidated {} cache entries", count);
        }
    }
    Ok(())
}

fn format_timestamp(ts: u64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
