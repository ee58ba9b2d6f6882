use std::path::Path;

use anyhow::{bail, Result};

use strata_engine::result::{ExportFailure, RunReport};
use strata_engine::{run_pipeline, ConfigError, PipelineError, PipelineStage};
use strata_types::Environment;

/// Execute one pipeline run for `profile` in `environment`.
pub fn execute(config_path: &Path, environment: &str, profile: &str) -> Result<()> {
    let environment: Environment = match environment.parse() {
        Ok(environment) => environment,
        Err(e) => {
            let error = PipelineError::from(ConfigError::from(e));
            bail!(
                "pipeline failed at stage {} ({}): {error}",
                PipelineStage::Init,
                error.kind()
            );
        }
    };
    tracing::debug!(config = %config_path.display(), "Using config file");

    match run_pipeline(config_path, environment, profile) {
        Ok(report) => {
            print_summary(&report);
            Ok(())
        }
        Err(failure) => {
            if failure.report.reached(PipelineStage::Connected) {
                print_progress(&failure.report);
            }
            bail!("{failure}")
        }
    }
}

fn print_summary(report: &RunReport) {
    println!(
        "Pipeline '{}' ({}) completed successfully.",
        report.profile, report.environment
    );
    print_progress(report);
    println!("  Duration:        {:.2}s", report.duration_secs);
}

fn print_progress(report: &RunReport) {
    println!("  Tables loaded:   {}", report.tables.len());
    println!("  Rows loaded:     {}", report.rows_loaded());
    for table in &report.tables {
        let history = table
            .history_appended
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!(
            "    {:<20} {:>8} rows, {:>8} to history @ {}",
            table.table, table.rows_loaded, history, table.ingested_at
        );
    }
    println!("  Exports:         {}", report.exports.len());
    for export in &report.exports {
        let published = if export.published { " (published)" } else { "" };
        println!(
            "    {:<20} {:>8} rows -> {}{published}",
            export.view,
            export.rows,
            export.path.display()
        );
    }
    if !report.export_failures.is_empty() {
        println!("  Export failures: {}", report.export_failures.len());
        for ExportFailure { view, error } in &report.export_failures {
            println!("    {view:<20} {error}");
        }
    }
}
