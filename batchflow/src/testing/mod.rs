//! Testing utilities for batchflow jobs.
//!
//! This module provides:
//! - People CSV fixtures with chosen invalid records
//! - Flaky sinks and recording chunk listeners
//! - Assertions over step and job executions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_counts_conserved, assert_job, assert_step_counts, assert_step_status,
};
pub use fixtures::{
    people_file_content, people_lines, write_people_csv, write_people_dir, PEOPLE_HEADER,
};
pub use mocks::{FlakySink, RecordingListener, SinkFailure};
