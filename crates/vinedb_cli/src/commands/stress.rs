//! Stress command implementation.

use super::{CliError, OutputFormat};
use serde::Serialize;
use std::sync::Arc;
use vinedb_core::{Config, Database, StatsSnapshot};
use vinedb_testkit::{
    populate, prepare_stress_schema, stress_concurrent_updates, stress_unique_inserts,
    verify_stress_indexes, StressConfig, StressTestResult,
};

/// Stress run report.
#[derive(Debug, Serialize)]
pub struct StressReport {
    /// Harness configuration.
    pub config: StressConfig,
    /// Concurrent update phase.
    pub updates: StressTestResult,
    /// Concurrent unique insert phase.
    pub unique_inserts: StressTestResult,
    /// Whether every index matched the records afterwards.
    pub verified: bool,
    /// Engine counters after the run.
    pub stats: StatsSnapshot,
}

/// Runs the stress command.
pub fn run(
    operations: usize,
    threads: usize,
    records: usize,
    cleanup_interval: u64,
    format: OutputFormat,
) -> Result<(), CliError> {
    let db = Arc::new(Database::open_with_config(
        Config::default().cleanup_interval(cleanup_interval),
    )?);
    prepare_stress_schema(&db)?;
    let ids = Arc::new(populate(&db, records)?);

    let config = StressConfig {
        operations,
        threads,
        record_count: records,
        ..Default::default()
    };
    tracing::info!(operations, threads, records, "running concurrent updates");
    let updates = stress_concurrent_updates(Arc::clone(&db), Arc::clone(&ids), &config);
    tracing::info!(codes = records, "running concurrent unique inserts");
    let unique_inserts = stress_unique_inserts(Arc::clone(&db), &config);

    let verification = verify_stress_indexes(&db, &ids);
    if let Err(err) = &verification {
        tracing::warn!(error = %err, "index verification failed");
    }
    let report = StressReport {
        config,
        updates,
        unique_inserts,
        verified: verification.is_ok(),
        stats: db.stats(),
    };

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize report"),
        },
        OutputFormat::Text => print_text_output(&report),
    }

    verification.map_err(CliError::from)
}

fn print_text_output(report: &StressReport) {
    report.updates.print_summary("Concurrent updates");
    report.unique_inserts.print_summary("Concurrent unique inserts");

    let stats = &report.stats;
    println!("\n=== Engine ===");
    println!("Transactions started: {}", stats.transactions_started);
    println!("Committed: {}", stats.transactions_committed);
    println!("Rolled back: {}", stats.transactions_rolled_back);
    println!("Conflicts: {}", stats.conflicts);
    println!("Uniqueness violations: {}", stats.uniqueness_violations);
    println!(
        "Cleanups: {} ({} versions, {} index entries collected)",
        stats.cleanups, stats.versions_collected, stats.index_entries_collected
    );
    println!("Live records: {}", stats.live_records);
    println!("Index entries: {}", stats.index_entries);
    println!(
        "Verification: {}",
        if report.verified { "OK" } else { "FAILED" }
    );
}
