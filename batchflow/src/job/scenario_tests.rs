//! End-to-end job scenarios: people files through the orchestrator.

use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::*;
use crate::core::{BatchStatus, JobIdentity, JobParameters, StepStatus};
use crate::errors::{BatchError, ErrorKind};
use crate::io::{CollectingSink, RecordSink};
use crate::partition::Partitioner;
use crate::people::{PeopleStepFactory, Person, SqlitePeopleSink, IMPORT_PEOPLE_JOB};
use crate::state::{ExecutionStateStore, InMemoryStateStore, SqliteStateStore};
use crate::step::StepConfig;
use crate::testing::{
    assert_counts_conserved, assert_job, assert_step_counts, assert_step_status, people_lines,
    write_people_csv, write_people_dir, RecordingListener,
};

fn definition() -> JobDefinition {
    JobDefinition::new(IMPORT_PEOPLE_JOB)
}

fn build_orchestrator(
    store: Arc<dyn ExecutionStateStore>,
    sink: Arc<dyn RecordSink<Person>>,
    definition: JobDefinition,
    concurrency: usize,
    listener: Arc<RecordingListener>,
) -> JobOrchestrator {
    let job = Job::new(definition, PeopleStepFactory::new(sink)).with_listener(listener);
    JobOrchestrator::new(store, Partitioner::default(), concurrency).with_job(Arc::new(job))
}

/// In-memory store and collecting sink around a temp directory.
struct Harness {
    dir: TempDir,
    store: Arc<InMemoryStateStore>,
    sink: CollectingSink<Person>,
    listener: Arc<RecordingListener>,
    orchestrator: JobOrchestrator,
}

impl Harness {
    fn new(definition: JobDefinition, concurrency: usize) -> Self {
        let store = Arc::new(InMemoryStateStore::new());
        let sink = CollectingSink::new();
        let listener = RecordingListener::new();
        let orchestrator = build_orchestrator(
            store.clone(),
            Arc::new(sink.clone()),
            definition,
            concurrency,
            listener.clone(),
        );
        Self {
            dir: tempfile::tempdir().unwrap(),
            store,
            sink,
            listener,
            orchestrator,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    async fn launch(&self, params: &JobParameters) -> crate::errors::Result<crate::core::JobExecution> {
        self.orchestrator.launch(IMPORT_PEOPLE_JOB, params.clone()).await
    }
}

fn file_params(file: &Path) -> JobParameters {
    JobParameters::new().with("input.file", file.display().to_string())
}

fn dir_params(dir: &Path) -> JobParameters {
    JobParameters::new().with("input.dir", dir.display().to_string())
}

fn error_file(input: &Path) -> PathBuf {
    Partitioner::default().error_file_for(&std::fs::canonicalize(input).unwrap())
}

#[tokio::test]
async fn test_single_file_skips_within_limit() {
    let h = Harness::new(definition(), 2);
    let file = write_people_csv(h.path(), "people.csv", 10, &[3, 7]).unwrap();

    let execution = h.launch(&file_params(&file)).await.unwrap();

    assert_job(&execution, BatchStatus::Completed, 10, 8, 2);
    assert_eq!(execution.step_executions.len(), 2);
    let manager = execution.step("partitionStep").unwrap();
    assert_step_status(manager, StepStatus::Completed);
    assert_step_counts(manager, 10, 8, 2);
    let worker = execution.step("step1:partition0").unwrap();
    assert_step_status(worker, StepStatus::Completed);
    assert_step_counts(worker, 10, 8, 2);
    assert_eq!(worker.skips.process, 2);
    assert_eq!(worker.commit_count, 5);
    assert_eq!(h.sink.items().len(), 8);
    assert!(h.listener.violations().is_empty());

    let errors = std::fs::read_to_string(error_file(&file)).unwrap();
    let lines: Vec<&str> = errors.lines().collect();
    assert_eq!(lines.len(), 3, "{errors}");
    assert_eq!(lines[0], "firstName;lastName;age;type;error");
    assert_eq!(lines[1], "alan;turing;-3;process;Validation failed: must be born");
    assert!(lines[2].ends_with(";process;Validation failed: must be born"));
}

#[tokio::test]
async fn test_completed_instance_is_rejected() {
    let h = Harness::new(definition(), 2);
    let file = write_people_csv(h.path(), "people.csv", 4, &[]).unwrap();
    let params = file_params(&file);

    let first = h.launch(&params).await.unwrap();
    assert_eq!(first.status, BatchStatus::Completed);

    let err = h.launch(&params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyCompleted);
    assert_eq!(LaunchOutcome::from(Err(err)).exit_code(), EXIT_ALREADY_COMPLETE);
    assert_eq!(h.sink.items().len(), 4);

    let history = h
        .orchestrator
        .history(IMPORT_PEOPLE_JOB, &params)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // A different parameter set is a different instance.
    let rerun = params.clone().with("run", 2_i64);
    assert_eq!(h.launch(&rerun).await.unwrap().status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_skip_limit_exceeded_fails_after_last_commit() {
    let h = Harness::new(definition(), 2);
    let file = write_people_csv(h.path(), "people.csv", 10, &[3, 7, 9]).unwrap();

    let execution = h.launch(&file_params(&file)).await.unwrap();

    assert_job(&execution, BatchStatus::Failed, 8, 6, 2);
    let worker = execution.step("step1:partition0").unwrap();
    assert_step_status(worker, StepStatus::Failed);
    assert_step_counts(worker, 8, 6, 2);
    assert_eq!(worker.commit_count, 4);
    assert_eq!(worker.rollback_count, 1);
    assert_eq!(worker.resume_offset(), 8);
    assert!(worker
        .exit_message
        .as_deref()
        .unwrap()
        .contains("Skip limit of 2 exceeded"));
    assert_step_status(execution.step("partitionStep").unwrap(), StepStatus::Failed);
    assert_eq!(h.sink.items().len(), 6);
    assert_eq!(
        LaunchOutcome::from(Ok(execution)).exit_code(),
        EXIT_FAILED
    );
}

#[tokio::test]
async fn test_restart_resumes_from_last_commit() {
    let h = Harness::new(definition(), 2);
    let file = write_people_csv(h.path(), "people.csv", 10, &[3, 7, 9]).unwrap();
    let params = file_params(&file);
    let failed = h.launch(&params).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);

    // Fix the record that broke the budget and launch again.
    write_people_csv(h.path(), "people.csv", 10, &[3, 7]).unwrap();
    let restarted = h.launch(&params).await.unwrap();

    assert_job(&restarted, BatchStatus::Completed, 10, 8, 2);
    assert_eq!(restarted.instance_id, failed.instance_id);
    assert_ne!(restarted.id, failed.id);
    let worker = restarted.step("step1:partition0").unwrap();
    assert_step_counts(worker, 10, 8, 2);
    assert_eq!(worker.commit_count, 5);
    assert_counts_conserved(worker);

    // Only records 8 and 9 were read again.
    let written = h.sink.items();
    assert_eq!(written.len(), 8);
    let expected: Vec<String> = people_lines(10, &[])[8..]
        .iter()
        .map(|l| crate::people::capitalize(l.split(';').next().unwrap()))
        .collect();
    let tail: Vec<String> = written[6..].iter().map(|p| p.first_name.clone()).collect();
    assert_eq!(tail, expected);

    let history = h.orchestrator.history(IMPORT_PEOPLE_JOB, &params).await.unwrap();
    assert_eq!(
        history.iter().map(|e| e.status).collect::<Vec<_>>(),
        vec![BatchStatus::Completed, BatchStatus::Failed]
    );
    assert!(h.launch(&params).await.is_err());

    // The two skipped records, fixed, run as their own job.
    let fixed = h.path().join("fixed");
    let fixed_file = write_people_csv(&fixed, "people-fixed.csv", 2, &[]).unwrap();
    let separate = h.launch(&file_params(&fixed_file)).await.unwrap();
    assert_job(&separate, BatchStatus::Completed, 2, 2, 0);
}

#[tokio::test]
async fn test_partitioned_directory_aggregates() {
    let h = Harness::new(definition(), 2);
    let input = h.path().join("in");
    write_people_dir(&input, 10, 10, &[3, 7]).unwrap();

    let execution = h.launch(&dir_params(&input)).await.unwrap();

    assert_job(&execution, BatchStatus::Completed, 100, 80, 20);
    assert_eq!(execution.step_executions.len(), 11);
    let mut names: Vec<&str> = execution
        .step_executions
        .iter()
        .map(|s| s.step_name.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), 11);
    for i in 0..10 {
        let worker = execution.step(&format!("step1:partition{i}")).unwrap();
        assert_step_status(worker, StepStatus::Completed);
        assert_step_counts(worker, 10, 8, 2);
        assert!(worker.context.get_string("output.error.file").unwrap().ends_with("-errors.csv"));
    }
    assert_step_counts(execution.step("partitionStep").unwrap(), 100, 80, 20);
    assert_eq!(h.sink.items().len(), 80);
    assert!(h.listener.violations().is_empty());

    let stored = h.store.find_step_executions(execution.id).await.unwrap();
    assert_eq!(stored.len(), 11);
}

#[tokio::test]
async fn test_failed_partition_does_not_undo_others() {
    let h = Harness::new(definition(), 2);
    let input = h.path().join("in");
    write_people_csv(&input, "people-00.csv", 10, &[]).unwrap();
    write_people_csv(&input, "people-01.csv", 10, &[1, 3, 5]).unwrap();
    let params = dir_params(&input);

    let failed = h.launch(&params).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    let good = failed.step("step1:partition0").unwrap();
    assert_step_status(good, StepStatus::Completed);
    assert_step_counts(good, 10, 10, 0);
    let bad = failed.step("step1:partition1").unwrap();
    assert_step_status(bad, StepStatus::Failed);
    assert_step_counts(bad, 4, 2, 2);
    assert_eq!(h.sink.items().len(), 12);

    write_people_csv(&input, "people-01.csv", 10, &[1, 3]).unwrap();
    let restarted = h.launch(&params).await.unwrap();
    assert_job(&restarted, BatchStatus::Completed, 20, 18, 2);
    let carried = restarted.step("step1:partition0").unwrap();
    assert_step_status(carried, StepStatus::Completed);
    assert_step_counts(carried, 10, 10, 0);
    assert_step_counts(restarted.step("step1:partition1").unwrap(), 10, 8, 2);
    assert_eq!(h.sink.items().len(), 18);
}

#[tokio::test]
async fn test_error_files_are_not_partitions() {
    let h = Harness::new(definition(), 2);
    let input = h.path().join("in");
    write_people_csv(&input, "a.csv", 4, &[1]).unwrap();
    let first = h.launch(&dir_params(&input)).await.unwrap();
    assert_eq!(first.status, BatchStatus::Completed);
    assert!(input.join("a-errors.csv").exists());

    let second = h
        .launch(&dir_params(&input).with("run", 2_i64))
        .await
        .unwrap();
    assert_eq!(second.step_executions.len(), 2);
}

#[tokio::test]
async fn test_empty_directory_completes_without_partitions() {
    let h = Harness::new(definition(), 2);
    let input = h.path().join("empty");
    std::fs::create_dir_all(&input).unwrap();
    let execution = h.launch(&dir_params(&input)).await.unwrap();
    assert_job(&execution, BatchStatus::Completed, 0, 0, 0);
    assert_eq!(execution.step_executions.len(), 1);
}

#[tokio::test]
async fn test_input_errors_are_rejected_before_running() {
    let h = Harness::new(definition(), 2);
    let err = h.launch(&JobParameters::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(LaunchOutcome::from(Err(err)).exit_code(), EXIT_ERROR);

    let missing = h.path().join("missing.csv");
    let err = h.launch(&file_params(&missing)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let identity = JobIdentity::new(IMPORT_PEOPLE_JOB, file_params(&missing));
    assert!(h.store.find_latest_execution(&identity).await.unwrap().is_none());

    let err = h
        .orchestrator
        .launch("unknownJob", JobParameters::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_zero_chunk_size_is_rejected_without_completing() {
    let step: StepConfig = serde_json::from_str(r#"{"chunk_size": 0}"#).unwrap();
    let h = Harness::new(definition().with_step_config(step), 2);
    let input = h.path().join("people.csv");
    std::fs::write(&input, format!("firstName;lastName;age\n{}\n", people_lines(10, &[]).join("\n")))
        .unwrap();

    let err = h.launch(&file_params(&input)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(h.sink.items().is_empty());
    let identity = JobIdentity::new(IMPORT_PEOPLE_JOB, file_params(&input));
    assert!(h.store.find_latest_execution(&identity).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_launch_of_same_identity() {
    let h = Harness::new(definition(), 2);
    let input = h.path().join("in");
    write_people_dir(&input, 4, 10, &[]).unwrap();
    let params = dir_params(&input);

    let (first, second) = tokio::join!(h.launch(&params), h.launch(&params));
    assert_eq!(first.unwrap().status, BatchStatus::Completed);
    let err = second.unwrap_err();
    assert!(matches!(err, BatchError::AlreadyRunning { .. }), "{err}");
    assert_eq!(LaunchOutcome::from(Err(err)).exit_code(), EXIT_ALREADY_RUNNING);
}

#[tokio::test]
async fn test_abandoned_execution_is_restarted() {
    let h = Harness::new(definition(), 2);
    let file = write_people_csv(h.path(), "people.csv", 6, &[]).unwrap();
    let params = file_params(&file);

    let identity = JobIdentity::new(IMPORT_PEOPLE_JOB, params.clone());
    let instance = h.store.create_job_instance(&identity).await.unwrap();
    let mut stale = h.store.create_job_execution(&instance, &params).await.unwrap();
    stale.status = BatchStatus::Started;
    h.store.update_job_execution(&stale).await.unwrap();

    let execution = h.launch(&params).await.unwrap();
    assert_job(&execution, BatchStatus::Completed, 6, 6, 0);

    let history = h.orchestrator.history(IMPORT_PEOPLE_JOB, &params).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, BatchStatus::Failed);
    assert!(history[1].exit_message.as_deref().unwrap().starts_with("abandoned"));
}

#[tokio::test]
async fn test_unpartitioned_job_runs_single_step() {
    let h = Harness::new(definition().with_partitioning(false), 2);
    let file = write_people_csv(h.path(), "people.csv", 10, &[3, 7, 9]).unwrap();
    let params = file_params(&file);

    let failed = h.launch(&params).await.unwrap();
    assert_eq!(failed.step_executions.len(), 1);
    assert_step_counts(failed.step("step1").unwrap(), 8, 6, 2);

    write_people_csv(h.path(), "people.csv", 10, &[3, 7]).unwrap();
    let restarted = h.launch(&params).await.unwrap();
    assert_job(&restarted, BatchStatus::Completed, 10, 8, 2);
    assert_eq!(restarted.step_executions.len(), 1);

    let err = h
        .launch(&dir_params(h.path()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sqlite_state_with_concurrent_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_people_dir(&input, 6, 10, &[3, 7]).unwrap();
    let store = Arc::new(SqliteStateStore::open(&dir.path().join("state.db")).unwrap());
    let sink = Arc::new(SqlitePeopleSink::open(&dir.path().join("people.db")).unwrap());
    let orchestrator = build_orchestrator(
        store.clone(),
        sink.clone(),
        definition(),
        2,
        RecordingListener::new(),
    );

    let execution = orchestrator
        .launch(IMPORT_PEOPLE_JOB, dir_params(&input))
        .await
        .unwrap();

    assert_job(&execution, BatchStatus::Completed, 60, 48, 12);
    assert_eq!(sink.count().unwrap(), 48);
    let stored = store.find_step_executions(execution.id).await.unwrap();
    assert_eq!(stored.len(), 7);
    for step in stored.iter().filter(|s| s.step_name != "partitionStep") {
        assert_step_counts(step, 10, 8, 2);
        assert_eq!(step.commit_count, 5);
    }
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_people_csv(dir.path(), "people.csv", 10, &[3, 7, 9]).unwrap();
    let state_db = dir.path().join("state.db");
    let people_db = dir.path().join("people.db");
    let params = file_params(&file);

    {
        let store = Arc::new(SqliteStateStore::open(&state_db).unwrap());
        let sink = Arc::new(SqlitePeopleSink::open(&people_db).unwrap());
        let orchestrator = build_orchestrator(store, sink.clone(), definition(), 2, RecordingListener::new());
        let failed = orchestrator.launch(IMPORT_PEOPLE_JOB, params.clone()).await.unwrap();
        assert_job(&failed, BatchStatus::Failed, 8, 6, 2);
        assert_eq!(sink.count().unwrap(), 6);
    }

    write_people_csv(dir.path(), "people.csv", 10, &[3, 7]).unwrap();
    let store = Arc::new(SqliteStateStore::open(&state_db).unwrap());
    let sink = Arc::new(SqlitePeopleSink::open(&people_db).unwrap());
    let orchestrator = build_orchestrator(store, sink.clone(), definition(), 2, RecordingListener::new());
    let restarted = orchestrator.launch(IMPORT_PEOPLE_JOB, params.clone()).await.unwrap();
    assert_job(&restarted, BatchStatus::Completed, 10, 8, 2);
    assert_eq!(sink.count().unwrap(), 8);

    let err = orchestrator.launch(IMPORT_PEOPLE_JOB, params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyCompleted);
}

#[tokio::test]
async fn test_write_isolation_skips_rejected_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = String::from("firstName;lastName;age\n");
    for (i, line) in people_lines(6, &[]).iter().enumerate() {
        if i == 2 {
            content.push_str(";nobody;30\n");
        } else {
            content.push_str(line);
            content.push('\n');
        }
    }
    let file = dir.path().join("people.csv");
    std::fs::write(&file, content).unwrap();
    let params = file_params(&file);

    let isolating = definition()
        .with_step_config(StepConfig::default().with_write_isolation(true));
    let sink = Arc::new(SqlitePeopleSink::in_memory().unwrap());
    let orchestrator = build_orchestrator(
        Arc::new(InMemoryStateStore::new()),
        sink.clone(),
        isolating,
        1,
        RecordingListener::new(),
    );
    let execution = orchestrator.launch(IMPORT_PEOPLE_JOB, params.clone()).await.unwrap();
    assert_job(&execution, BatchStatus::Completed, 6, 5, 1);
    assert_eq!(execution.step("step1:partition0").unwrap().skips.write, 1);
    assert_eq!(sink.count().unwrap(), 5);
    let errors = std::fs::read_to_string(error_file(&file)).unwrap();
    assert!(errors.lines().any(|l| l.starts_with(";NOBODY;30;write;")), "{errors}");

    // Without isolation the same rejection fails the step.
    let strict_sink = Arc::new(SqlitePeopleSink::in_memory().unwrap());
    let strict = build_orchestrator(
        Arc::new(InMemoryStateStore::new()),
        strict_sink.clone(),
        definition(),
        1,
        RecordingListener::new(),
    );
    let failed = strict.launch(IMPORT_PEOPLE_JOB, params).await.unwrap();
    assert_job(&failed, BatchStatus::Failed, 2, 2, 0);
    assert_eq!(strict_sink.count().unwrap(), 2);
}
