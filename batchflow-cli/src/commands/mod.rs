pub mod launch;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use batchflow::core::{JobExecution, JobParameters};
use batchflow::state::{ExecutionStateStore, SqliteStateStore};

/// Parses repeated `--param` values.
pub(crate) fn parse_params(pairs: &[String]) -> Result<JobParameters> {
    JobParameters::from_pairs(pairs.iter().map(String::as_str)).context("Invalid job parameter")
}

pub(crate) fn open_store(path: &Path) -> Result<Arc<dyn ExecutionStateStore>> {
    let store = SqliteStateStore::open(path)
        .with_context(|| format!("Failed to open state database: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// The state database: the flag wins over `BATCHFLOW_STATE_DB` and the default.
pub(crate) fn state_db_path(flag: Option<PathBuf>, configured: &Path) -> PathBuf {
    flag.unwrap_or_else(|| configured.to_path_buf())
}

/// Prints one execution and its steps.
pub(crate) fn print_execution(execution: &JobExecution) {
    println!(
        "Job '{}' execution {} (instance {}): {}",
        execution.job_name, execution.id, execution.instance_id, execution.status
    );
    println!("  Parameters:      {}", execution.parameters);
    println!("  Records read:    {}", execution.read_count);
    println!("  Records written: {}", execution.write_count);
    println!("  Records skipped: {}", execution.skip_count);
    if let (Some(start), Some(end)) = (execution.start_time, execution.end_time) {
        println!("  Duration:        {}ms", (end - start).num_milliseconds());
    }
    if let Some(message) = &execution.exit_message {
        println!("  Exit message:    {message}");
    }
    for step in &execution.step_executions {
        println!(
            "    {:<24} {:<10} read={} write={} skip={} commits={} rollbacks={}",
            step.step_name,
            step.status.to_string(),
            step.read_count,
            step.write_count,
            step.skip_count(),
            step.commit_count,
            step.rollback_count,
        );
        if let Some(message) = &step.exit_message {
            println!("      {message}");
        }
    }
}
