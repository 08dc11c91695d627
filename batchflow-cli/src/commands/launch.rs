use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use batchflow::config::BatchConfig;
use batchflow::job::{Job, JobDefinition, JobOrchestrator, LaunchOutcome};
use batchflow::partition::{GlobResolver, Partitioner};
use batchflow::people::{PeopleStepFactory, SqlitePeopleSink};
use batchflow::step::LoggingChunkListener;

use super::{open_store, parse_params, print_execution, state_db_path};

/// Engine settings overridable per launch.
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Database receiving imported people
    #[arg(long, env = "BATCHFLOW_PEOPLE_DB", default_value = "people.db")]
    pub people_db: PathBuf,

    /// Consumed records per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Skips allowed per step
    #[arg(long)]
    pub skip_limit: Option<u64>,

    /// Partitions run at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run a single step instead of one step per input file
    #[arg(long)]
    pub unpartitioned: bool,

    /// Retry failed chunk writes item by item
    #[arg(long)]
    pub isolate_write_failures: bool,
}

impl LaunchOptions {
    fn apply(&self, mut config: BatchConfig, state_db: Option<PathBuf>) -> BatchConfig {
        if let Some(size) = self.chunk_size {
            config = config.with_chunk_size(size);
        }
        if let Some(limit) = self.skip_limit {
            config = config.with_skip_limit(limit);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if self.isolate_write_failures {
            config = config.with_write_isolation(true);
        }
        let state_db = state_db_path(state_db, &config.state_db);
        config.with_state_db(state_db)
    }
}

/// Execute the `launch` command and return the process exit code.
pub async fn execute(
    job_name: &str,
    params: &[String],
    state_db: Option<PathBuf>,
    options: &LaunchOptions,
) -> Result<i32> {
    let parameters = parse_params(params)?;
    let config = options.apply(BatchConfig::from_env()?, state_db);
    config.validate()?;

    let store = open_store(&config.state_db)?;
    let sink = Arc::new(SqlitePeopleSink::open(&options.people_db).with_context(|| {
        format!("Failed to open people database: {}", options.people_db.display())
    })?);

    let definition = JobDefinition::new(job_name)
        .with_step_config(config.step_config())
        .with_skip_policy(config.skip_policy())
        .with_partitioning(!options.unpartitioned)
        .with_file_pattern(config.file_pattern.clone());
    let job = Job::new(definition, PeopleStepFactory::from_config(&config, sink.clone()))
        .with_listener(Arc::new(LoggingChunkListener));
    let partitioner = Partitioner::new(Arc::new(GlobResolver), config.error_file_suffix.clone());
    let orchestrator =
        JobOrchestrator::new(store, partitioner, config.concurrency).with_job(Arc::new(job));

    tracing::info!(
        job = job_name,
        parameters = %parameters,
        chunk_size = config.chunk_size,
        skip_limit = config.skip_limit,
        concurrency = config.concurrency,
        "Launching job"
    );

    let outcome = LaunchOutcome::from(orchestrator.launch(job_name, parameters).await);
    match &outcome {
        LaunchOutcome::Completed(execution) | LaunchOutcome::Failed(execution) => {
            print_execution(execution);
            println!("  People stored:   {}", sink.count()?);
        }
        LaunchOutcome::Rejected(err) => eprintln!("Launch rejected: {err}"),
    }
    Ok(outcome.exit_code())
}
