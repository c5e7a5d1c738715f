use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use colored::Colorize;
use serde::Serialize;
use tessera_audit::AuditEvent;
use tessera_core::{ConfigError, TesseraConfig};
use tessera_resilience::{BreakerConfig, BreakerMetrics, CircuitBreakerRegistry, CircuitState};
use tessera_store::{ArchiveStore, FileStateStore, FsArchive, StateStore};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Config(ConfigCommand::Check(args)) => cmd_config_check(&args, format),
        Command::Breaker(BreakerCommand::Status(args)) => cmd_breaker_status(&args, format),
        Command::Breaker(BreakerCommand::Reset(args)) => cmd_breaker_reset(&args),
        Command::Archive(ArchiveCommand::Verify(args)) => cmd_archive_verify(&args, format),
    }
}

fn cmd_config_check(args: &ConfigCheckArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match TesseraConfig::load(&args.path) {
        Ok(config) => config,
        Err(ConfigError::Invalid(errors)) => {
            println!("{} {}", "✗".red().bold(), args.path.display());
            for e in &errors {
                println!("  {} {}", e.field.yellow(), e.message);
            }
            bail!("{} validation error(s)", errors.len());
        }
        Err(e) => return Err(e).with_context(|| format!("loading {}", args.path.display())),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    println!("{} {} is valid", "✓".green().bold(), args.path.display());
    println!("  Environment: {}", config.audit.environment.cyan());
    println!(
        "  Breaker: threshold {}, recovery {}ms, timeout {}ms",
        config.breaker.failure_threshold,
        config.breaker.recovery_timeout_ms,
        config.breaker.call_timeout_ms
    );
    for name in config.dependencies.keys() {
        println!("    override: {}", name.yellow());
    }
    println!(
        "  Retry: {} retries, {}..{}ms",
        config.retry.max_retries, config.retry.base_delay_ms, config.retry.max_delay_ms
    );
    println!("  Audit retention: {} years", config.audit.retention_years);
    println!("  Log filter: {}", config.logging.filter);
    Ok(())
}

fn registry(state_dir: &Path) -> anyhow::Result<(Arc<FileStateStore>, CircuitBreakerRegistry)> {
    let store = Arc::new(
        FileStateStore::open(state_dir)
            .with_context(|| format!("opening state dir {}", state_dir.display()))?,
    );
    let registry = CircuitBreakerRegistry::new(store.clone(), BreakerConfig::default());
    Ok((store, registry))
}

pub(crate) fn breaker_status(state_dir: &Path) -> anyhow::Result<Vec<BreakerMetrics>> {
    let (_, registry) = registry(state_dir)?;
    Ok(registry.all_metrics()?)
}

fn cmd_breaker_status(args: &BreakerStatusArgs, format: OutputFormat) -> anyhow::Result<()> {
    let all = breaker_status(&args.state_dir)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    if all.is_empty() {
        println!("No breaker state in {}", args.state_dir.display());
        return Ok(());
    }
    for m in &all {
        let state = match m.state {
            CircuitState::Closed => m.state.as_str().green(),
            CircuitState::HalfOpen => m.state.as_str().yellow(),
            CircuitState::Open => m.state.as_str().red().bold(),
        };
        let rate = m
            .success_rate
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "-".into());
        print!(
            "{:<24} {:<10} failures {:<3} successes {:<3} window {:<3} success rate {}",
            m.dependency.bold(),
            state,
            m.failure_count,
            m.success_count,
            m.window_size,
            rate
        );
        match m.retry_after_ms {
            Some(ms) => println!("  retry in {}", format!("{ms}ms").dimmed()),
            None => println!(),
        }
    }
    Ok(())
}

pub(crate) fn breaker_reset(state_dir: &Path, name: &str) -> anyhow::Result<()> {
    let (store, registry) = registry(state_dir)?;
    if !store.keys()?.iter().any(|k| k == name) {
        bail!("no breaker state for {name:?} in {}", state_dir.display());
    }
    registry.reset(name)?;
    Ok(())
}

fn cmd_breaker_reset(args: &BreakerResetArgs) -> anyhow::Result<()> {
    breaker_reset(&args.state_dir, &args.name)?;
    println!(
        "{} Breaker {} reset to {}",
        "✓".green().bold(),
        args.name.yellow(),
        "closed".green()
    );
    Ok(())
}

/// One archived entry that failed verification.
#[derive(Debug, Serialize)]
pub(crate) struct ArchiveProblem {
    pub date: NaiveDate,
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct ArchiveReport {
    pub partitions: usize,
    pub checked: usize,
    pub problems: Vec<ArchiveProblem>,
}

pub(crate) fn verify_archive(
    archive: &dyn ArchiveStore,
    date: Option<NaiveDate>,
) -> anyhow::Result<ArchiveReport> {
    let partitions = match date {
        Some(d) => vec![d],
        None => archive.partitions()?,
    };
    let mut report = ArchiveReport {
        partitions: partitions.len(),
        ..ArchiveReport::default()
    };
    for day in partitions {
        for id in archive.list(day)? {
            report.checked += 1;
            if let Some(reason) = check_entry(archive, day, &id)? {
                report.problems.push(ArchiveProblem {
                    date: day,
                    id,
                    reason,
                });
            }
        }
    }
    Ok(report)
}

fn check_entry(
    archive: &dyn ArchiveStore,
    day: NaiveDate,
    id: &str,
) -> anyhow::Result<Option<String>> {
    let Some(bytes) = archive.get(day, id)? else {
        return Ok(Some("listed but missing".into()));
    };
    let event: AuditEvent = match serde_json::from_slice(&bytes) {
        Ok(e) => e,
        Err(e) => return Ok(Some(format!("not an audit event: {e}"))),
    };
    debug!(id, date = %day, "checking archived event");

    if event.audit_id.to_string() != id {
        return Ok(Some(format!("file holds audit id {}", event.audit_id)));
    }
    if event.event_timestamp.date_naive() != day {
        return Ok(Some(format!(
            "event dated {} filed under {day}",
            event.event_timestamp.date_naive()
        )));
    }
    if event.is_erased() {
        return Ok(Some("archived copy carries an erasure mark".into()));
    }
    if !event.hash_matches()? {
        return Ok(Some("event hash mismatch".into()));
    }
    Ok(None)
}

fn cmd_archive_verify(args: &ArchiveVerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let archive = FsArchive::open(&args.archive_dir)
        .with_context(|| format!("opening archive {}", args.archive_dir.display()))?;
    let report = verify_archive(&archive, args.date)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for p in &report.problems {
            println!("{} {}/{}: {}", "✗".red().bold(), p.date, p.id, p.reason);
        }
        let summary = format!(
            "{} events in {} partition(s), {} problem(s)",
            report.checked,
            report.partitions,
            report.problems.len()
        );
        if report.problems.is_empty() {
            println!("{} {}", "✓".green().bold(), summary);
        } else {
            println!("{} {}", "✗".red().bold(), summary);
        }
    }

    if !report.problems.is_empty() {
        bail!("archive verification failed");
    }
    Ok(())
}
