//! # Batchflow
//!
//! A fault-tolerant, restartable chunk batch engine.
//!
//! Batchflow reads delimited records, transforms them and writes them in
//! bounded chunks, with support for:
//!
//! - **Chunk checkpoints**: every committed chunk persists counters and the
//!   resume offset, so a restart continues where the last commit left off
//! - **Skip policies**: malformed or rejected records are skipped within a
//!   shared budget and recorded in an error file
//! - **Partitioning**: a directory of inputs becomes independent partitions
//!   run on a bounded worker pool
//! - **Job identity**: a completed job instance is never run twice
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchflow::prelude::*;
//!
//! let store: Arc<dyn ExecutionStateStore> = Arc::new(SqliteStateStore::open(path)?);
//! let sink = Arc::new(SqlitePeopleSink::open(people_db)?);
//! let job = Job::new(JobDefinition::new(IMPORT_PEOPLE_JOB), PeopleStepFactory::new(sink));
//!
//! let orchestrator = JobOrchestrator::new(store, Partitioner::default(), 2)
//!     .with_job(Arc::new(job));
//! let params = JobParameters::new().with("input.dir", "data/");
//! let execution = orchestrator.launch(IMPORT_PEOPLE_JOB, params).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod io;
pub mod job;
pub mod logging;
pub mod partition;
pub mod people;
pub mod skip;
pub mod state;
pub mod step;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::BatchConfig;
    pub use crate::core::{
        BatchStatus, ExecutionContext, JobExecution, JobIdentity, JobParameter, JobParameters,
        SkipPhase, StepExecution, StepStatus,
    };
    pub use crate::errors::{BatchError, ErrorKind, ParseError};
    pub use crate::io::{RawRecord, RecordSink, RecordSource, RecordTransform};
    pub use crate::job::{Job, JobDefinition, JobOrchestrator, JobRunner, LaunchOutcome, StepFactory};
    pub use crate::partition::{InputSpec, Partitioner};
    pub use crate::people::{PeopleStepFactory, Person, SqlitePeopleSink, IMPORT_PEOPLE_JOB};
    pub use crate::skip::{FieldTable, SkipPolicy};
    pub use crate::state::{ExecutionStateStore, InMemoryStateStore, SqliteStateStore};
    pub use crate::step::{ChunkExecutor, StepConfig};
}
