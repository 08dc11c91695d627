use std::path::PathBuf;

use anyhow::Result;

use batchflow::config::BatchConfig;
use batchflow::core::JobIdentity;
use batchflow::job::{EXIT_COMPLETED, EXIT_ERROR};

use super::{open_store, parse_params, print_execution, state_db_path};

/// Execute the `status` command: print every attempt, newest first.
pub async fn execute(job_name: &str, params: &[String], state_db: Option<PathBuf>) -> Result<i32> {
    let parameters = parse_params(params)?;
    let config = BatchConfig::from_env()?;
    let store = open_store(&state_db_path(state_db, &config.state_db))?;

    let identity = JobIdentity::new(job_name, parameters);
    let executions = store.find_job_executions(&identity).await?;
    if executions.is_empty() {
        println!("No executions of '{job_name}' with {}", identity.parameters);
        return Ok(EXIT_ERROR);
    }
    for execution in &executions {
        print_execution(execution);
    }
    Ok(EXIT_COMPLETED)
}
