//! Tests for the chunk executor.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use super::*;
use crate::core::{JobIdentity, JobParameters, SkipPhase, StepExecution, StepStatus};
use crate::errors::{BatchError, ErrorKind, ParseError, Result};
use crate::io::{CollectingErrorSink, CollectingSink, LineTokenizer, RawRecord, VecSource};
use crate::skip::{FieldTable, SkipClassifier, SkipPolicy};
use crate::state::{ExecutionStateStore, InMemoryStateStore};
use crate::testing::{
    assert_counts_conserved, assert_step_counts, assert_step_status, people_lines, FlakySink,
    RecordingListener, SinkFailure,
};

#[derive(Debug, Clone, PartialEq)]
struct Row {
    name: String,
    age: i64,
}

struct RowTransform;

#[async_trait]
impl RecordTransform<Row> for RowTransform {
    async fn apply(&self, record: &RawRecord) -> Result<Row> {
        let age: i64 = record
            .field(2)
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|e| ParseError::new(format!("age: {e}")).with_input(record.line.clone()))?;
        if age <= 0 {
            return Err(BatchError::validation("must be born"));
        }
        Ok(Row {
            name: record.field(0).unwrap_or_default().to_string(),
            age,
        })
    }
}

fn fields() -> FieldTable<Row> {
    FieldTable::new()
        .field("firstName", |r: &Row| r.name.clone())
        .field("lastName", |_: &Row| String::new())
        .field("age", |r: &Row| r.age.to_string())
}

fn resources(
    lines: Vec<String>,
    sink: Arc<dyn RecordSink<Row>>,
    errors: &CollectingErrorSink,
    skip_limit: u64,
) -> StepResources<Row> {
    StepResources {
        source: Box::new(VecSource::new(lines, LineTokenizer::new(';', 3))),
        transform: Arc::new(RowTransform),
        sink,
        classifier: SkipClassifier::new(
            SkipPolicy::default().with_skip_limit(skip_limit),
            fields(),
            ';',
            Arc::new(errors.clone()),
        ),
    }
}

async fn new_step(store: &InMemoryStateStore) -> StepExecution {
    let identity = JobIdentity::new("executorTest", JobParameters::new());
    let instance = match store.find_job_instance(&identity).await.unwrap() {
        Some(instance) => instance,
        None => store.create_job_instance(&identity).await.unwrap(),
    };
    let execution = store
        .create_job_execution(&instance, &identity.parameters)
        .await
        .unwrap();
    store
        .create_step_execution(StepExecution::new(execution.id, "step1"))
        .await
        .unwrap()
}

async fn restart_step(store: &InMemoryStateStore, prior: &StepExecution) -> StepExecution {
    let identity = JobIdentity::new("executorTest", JobParameters::new());
    let instance = store.find_job_instance(&identity).await.unwrap().unwrap();
    let execution = store
        .create_job_execution(&instance, &identity.parameters)
        .await
        .unwrap();
    store
        .create_step_execution(StepExecution::continue_from(prior, execution.id))
        .await
        .unwrap()
}

fn executor(store: &Arc<InMemoryStateStore>, chunk_size: usize) -> ChunkExecutor {
    ChunkExecutor::new(
        store.clone(),
        StepConfig::default().with_chunk_size(chunk_size),
    )
}

#[tokio::test]
async fn test_skips_within_limit_complete() {
    let store = Arc::new(InMemoryStateStore::new());
    let sink = CollectingSink::new();
    let errors = CollectingErrorSink::new();
    let listener = RecordingListener::new();
    let step = new_step(&store).await;

    let outcome = executor(&store, 2)
        .with_listener(listener.clone())
        .run(
            step,
            resources(people_lines(10, &[3, 7]), Arc::new(sink.clone()), &errors, 2),
        )
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let step = &outcome.execution;
    assert_step_status(step, StepStatus::Completed);
    assert_step_counts(step, 10, 8, 2);
    assert_eq!(step.skips.process, 2);
    assert_eq!(step.commit_count, 5);
    assert_eq!(step.resume_offset(), 10);
    assert_eq!(sink.items().len(), 8);
    assert_eq!(sink.chunks().len(), 5);
    assert!(listener.violations().is_empty(), "{:?}", listener.violations());

    let records = errors.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.phase == SkipPhase::Process));
    assert_eq!(records[0].line_number, Some(4));

    let persisted = store.find_step_executions(step.job_execution_id).await.unwrap();
    assert_eq!(persisted[0], outcome.execution);
}

#[tokio::test]
async fn test_skip_limit_exceeded_fails_after_last_commit() {
    let store = Arc::new(InMemoryStateStore::new());
    let sink = CollectingSink::new();
    let errors = CollectingErrorSink::new();
    let step = new_step(&store).await;

    let outcome = executor(&store, 2)
        .run(
            step,
            resources(people_lines(10, &[3, 7, 9]), Arc::new(sink.clone()), &errors, 2),
        )
        .await;

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.failure.as_ref().map(BatchError::kind),
        Some(ErrorKind::SkipLimitExceeded)
    );
    let step = &outcome.execution;
    assert_step_status(step, StepStatus::Failed);
    assert_step_counts(step, 8, 6, 2);
    assert_eq!(step.commit_count, 4);
    assert_eq!(step.rollback_count, 1);
    assert_eq!(step.resume_offset(), 8);
    assert!(step.exit_message.is_some());
    assert_eq!(sink.items().len(), 6);

    let persisted = &store.find_step_executions(step.job_execution_id).await.unwrap()[0];
    assert_step_status(persisted, StepStatus::Failed);
    assert_step_counts(persisted, 8, 6, 2);
    assert_eq!(persisted.resume_offset(), 8);
}

#[tokio::test]
async fn test_restart_resumes_at_committed_offset() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let step = new_step(&store).await;
    let failed = executor(&store, 2)
        .run(
            step,
            resources(
                people_lines(10, &[3, 7, 9]),
                Arc::new(CollectingSink::new()),
                &errors,
                2,
            ),
        )
        .await;
    assert_step_status(&failed.execution, StepStatus::Failed);

    let resumed_sink = CollectingSink::new();
    let restarted = restart_step(&store, &failed.execution).await;
    let outcome = executor(&store, 2)
        .run(
            restarted,
            resources(people_lines(10, &[3, 7]), Arc::new(resumed_sink.clone()), &errors, 2),
        )
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_step_counts(&outcome.execution, 10, 8, 2);
    assert_eq!(outcome.execution.commit_count, 5);
    let resumed: Vec<String> = resumed_sink.items().into_iter().map(|r| r.name).collect();
    let expected: Vec<String> = people_lines(10, &[])[8..]
        .iter()
        .map(|l| l.split(';').next().unwrap().to_string())
        .collect();
    assert_eq!(resumed, expected);
}

#[tokio::test]
async fn test_exact_limit_completes_and_one_more_fails() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();

    let step = new_step(&store).await;
    let exact = executor(&store, 2)
        .run(
            step,
            resources(people_lines(10, &[1, 4, 8]), Arc::new(CollectingSink::new()), &errors, 3),
        )
        .await;
    assert!(exact.is_success());
    assert_eq!(exact.execution.skip_count(), 3);

    let step = new_step(&store).await;
    let over = executor(&store, 2)
        .run(
            step,
            resources(
                people_lines(10, &[1, 4, 8, 9]),
                Arc::new(CollectingSink::new()),
                &errors,
                3,
            ),
        )
        .await;
    assert_step_status(&over.execution, StepStatus::Failed);
    assert_eq!(
        over.failure.as_ref().map(BatchError::kind),
        Some(ErrorKind::SkipLimitExceeded)
    );
    // The failing chunk held the third skip and was rolled back.
    assert_eq!(over.execution.skip_count(), 2);
}

#[tokio::test]
async fn test_read_errors_are_consumed_and_skipped() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let mut lines = people_lines(10, &[]);
    lines[4] = "broken".to_string();
    let step = new_step(&store).await;

    let outcome = executor(&store, 3)
        .run(
            step,
            resources(lines, Arc::new(CollectingSink::new()), &errors, 2),
        )
        .await;

    assert!(outcome.is_success());
    assert_step_counts(&outcome.execution, 10, 9, 1);
    assert_eq!(outcome.execution.skips.read, 1);
    assert_counts_conserved(&outcome.execution);
    let record = &errors.records()[0];
    assert_eq!(record.phase, SkipPhase::Read);
    assert_eq!(record.fields, vec!["broken", "N/A", "N/A"]);
}

#[tokio::test]
async fn test_sink_failure_fails_step_and_rolls_back() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let listener = RecordingListener::new();
    let sink = Arc::new(FlakySink::new(SinkFailure::Sink).fail_on_call(2));
    let step = new_step(&store).await;

    let outcome = executor(&store, 2)
        .with_listener(listener.clone())
        .run(step, resources(people_lines(10, &[]), sink.clone(), &errors, 2))
        .await;

    assert_eq!(
        outcome.failure.as_ref().map(BatchError::kind),
        Some(ErrorKind::Sink)
    );
    assert_step_counts(&outcome.execution, 2, 2, 0);
    assert_eq!(outcome.execution.rollback_count, 1);
    assert_eq!(outcome.execution.resume_offset(), 2);
    assert_eq!(sink.items().len(), 2);
    assert_eq!(
        listener.events(),
        vec!["before:0", "after:1", "before:1", "error:1"]
    );
}

#[tokio::test]
async fn test_resume_is_exact_for_any_crash_point() {
    for crash_call in 1..=4 {
        let store = Arc::new(InMemoryStateStore::new());
        let errors = CollectingErrorSink::new();
        let flaky = Arc::new(FlakySink::new(SinkFailure::Sink).fail_on_call(crash_call));
        let step = new_step(&store).await;
        let failed = executor(&store, 3)
            .run(step, resources(people_lines(10, &[5]), flaky.clone(), &errors, 2))
            .await;
        assert_step_status(&failed.execution, StepStatus::Failed);
        assert_eq!(failed.execution.resume_offset(), (crash_call as u64 - 1) * 3);

        let healthy = CollectingSink::new();
        let restarted = restart_step(&store, &failed.execution).await;
        let outcome = executor(&store, 3)
            .run(
                restarted,
                resources(people_lines(10, &[5]), Arc::new(healthy.clone()), &errors, 2),
            )
            .await;

        assert!(outcome.is_success(), "crash at call {crash_call}");
        assert_step_counts(&outcome.execution, 10, 9, 1);
        assert_eq!(
            flaky.items().len() + healthy.items().len(),
            9,
            "crash at call {crash_call}"
        );
    }
}

#[tokio::test]
async fn test_write_isolation_skips_bad_item() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let sink = Arc::new(
        FlakySink::new(SinkFailure::Validation).fail_items(|r: &Row| r.name == "ada"),
    );
    let step = new_step(&store).await;

    let outcome = ChunkExecutor::new(
        store.clone(),
        StepConfig::default().with_write_isolation(true),
    )
    .run(step, resources(people_lines(10, &[]), sink.clone(), &errors, 2))
    .await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_step_counts(&outcome.execution, 10, 9, 1);
    assert_eq!(outcome.execution.skips.write, 1);
    assert_eq!(sink.items().len(), 9);
    let record = &errors.records()[0];
    assert_eq!(record.phase, SkipPhase::Write);
    assert_eq!(record.fields[0], "ada");
}

#[tokio::test]
async fn test_write_failure_without_isolation_fails_step() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let sink = Arc::new(
        FlakySink::new(SinkFailure::Validation).fail_items(|r: &Row| r.name == "ada"),
    );
    let step = new_step(&store).await;

    let outcome = executor(&store, 2)
        .run(step, resources(people_lines(10, &[]), sink.clone(), &errors, 2))
        .await;

    assert_step_status(&outcome.execution, StepStatus::Failed);
    assert_step_counts(&outcome.execution, 2, 2, 0);
    assert!(errors.records().is_empty());
}

#[tokio::test]
async fn test_completed_step_is_not_rerun() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let sink = CollectingSink::new();
    let mut step = StepExecution::new(1, "step1");
    step.status = StepStatus::Completed;
    step.read_count = 4;
    step.write_count = 4;

    let outcome = executor(&store, 2)
        .run(step, resources(people_lines(4, &[]), Arc::new(sink.clone()), &errors, 2))
        .await;

    assert!(outcome.is_success());
    assert_step_counts(&outcome.execution, 4, 4, 0);
    assert!(sink.items().is_empty());
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped_as_read_error() {
    use crate::io::DelimitedFileSource;
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"firstName;lastName;age\nann;lee;30\nb\xffb;x;20\ncid;roe;40\n")
        .unwrap();
    let store = Arc::new(InMemoryStateStore::new());
    let sink = CollectingSink::new();
    let errors = CollectingErrorSink::new();
    let step = new_step(&store).await;
    let mut step_resources = resources(Vec::new(), Arc::new(sink.clone()), &errors, 2);
    step_resources.source = Box::new(
        DelimitedFileSource::open(file.path(), LineTokenizer::new(';', 3), 1)
            .await
            .unwrap(),
    );

    let outcome = executor(&store, 10).run(step, step_resources).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_step_counts(&outcome.execution, 3, 2, 1);
    assert_eq!(outcome.execution.skips.read, 1);
    assert_eq!(outcome.execution.resume_offset(), 3);
    assert_eq!(sink.items().len(), 2);
    let record = &errors.records()[0];
    assert_eq!(record.phase, SkipPhase::Read);
    assert_eq!(record.line_number, Some(3));
}

#[tokio::test]
async fn test_zero_chunk_size_fails_before_reading() {
    let store = Arc::new(InMemoryStateStore::new());
    let sink = CollectingSink::new();
    let errors = CollectingErrorSink::new();
    let step = new_step(&store).await;
    let config: StepConfig = serde_json::from_str(r#"{"chunk_size": 0}"#).unwrap();

    let outcome = ChunkExecutor::new(store.clone(), config)
        .run(
            step,
            resources(people_lines(10, &[]), Arc::new(sink.clone()), &errors, 2),
        )
        .await;

    assert_step_status(&outcome.execution, StepStatus::Failed);
    assert_eq!(
        outcome.failure.as_ref().map(BatchError::kind),
        Some(ErrorKind::Configuration)
    );
    assert_step_counts(&outcome.execution, 0, 0, 0);
    assert!(sink.items().is_empty());
    let persisted = store
        .find_step_executions(outcome.execution.job_execution_id)
        .await
        .unwrap();
    assert_eq!(persisted[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_empty_input_completes_without_commit() {
    let store = Arc::new(InMemoryStateStore::new());
    let errors = CollectingErrorSink::new();
    let step = new_step(&store).await;

    let outcome = executor(&store, 2)
        .run(step, resources(Vec::new(), Arc::new(CollectingSink::new()), &errors, 2))
        .await;

    assert!(outcome.is_success());
    assert_step_counts(&outcome.execution, 0, 0, 0);
    assert_eq!(outcome.execution.commit_count, 0);
}
