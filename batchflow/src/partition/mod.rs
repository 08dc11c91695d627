//! Partitioning a job into independent per-file steps.
//!
//! The [`Partitioner`] turns the job input into ordered
//! [`PartitionPlan`]s, and the [`PartitionCoordinator`] runs the resulting
//! steps on a bounded pool of workers, aggregating their outcomes.

mod coordinator;
mod partitioner;

pub use coordinator::{JobOutcome, PartitionCoordinator, PartitionRunner};
pub use partitioner::{
    GlobResolver, InputSpec, PartitionPlan, Partitioner, ResourceResolver, INPUT_DIR_PARAM,
    INPUT_FILE_PARAM,
};
