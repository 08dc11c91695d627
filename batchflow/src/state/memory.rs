//! In-memory execution state store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::ExecutionStateStore;
use crate::core::{
    BatchStatus, JobExecution, JobIdentity, JobInstance, JobParameters, StepCounts,
    StepExecution,
};
use crate::errors::{StateError, StateResult};

/// Keeps every record in process memory.
///
/// Job and step executions live in separate `DashMap`s, so workers updating
/// different steps never contend on the same entry.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    instances: RwLock<Vec<JobInstance>>,
    executions: DashMap<i64, JobExecution>,
    steps: DashMap<i64, StepExecution>,
    step_names: DashMap<(i64, String), i64>,
    next_id: AtomicI64,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn load_steps(&self, job_execution_id: i64) -> Vec<StepExecution> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .iter()
            .filter(|entry| entry.job_execution_id == job_execution_id)
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by_key(|s| s.id);
        steps
    }

    fn executions_of(&self, instance_id: i64) -> Vec<JobExecution> {
        let mut executions: Vec<JobExecution> = self
            .executions
            .iter()
            .filter(|entry| entry.instance_id == instance_id)
            .map(|entry| {
                let mut execution = entry.value().clone();
                execution.step_executions = self.load_steps(execution.id);
                execution
            })
            .collect();
        executions.sort_by_key(|e| std::cmp::Reverse(e.id));
        executions
    }

    fn instance_id(&self, identity: &JobIdentity) -> Option<i64> {
        let key = identity.key();
        self.instances
            .read()
            .iter()
            .find(|i| i.name == identity.name && i.key == key)
            .map(|i| i.id)
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryStateStore {
    async fn find_job_instance(&self, identity: &JobIdentity) -> StateResult<Option<JobInstance>> {
        let key = identity.key();
        Ok(self
            .instances
            .read()
            .iter()
            .find(|i| i.name == identity.name && i.key == key)
            .cloned())
    }

    async fn create_job_instance(&self, identity: &JobIdentity) -> StateResult<JobInstance> {
        let key = identity.key();
        let mut instances = self.instances.write();
        if instances
            .iter()
            .any(|i| i.name == identity.name && i.key == key)
        {
            return Err(StateError::Conflict(format!(
                "job instance already exists for {identity}"
            )));
        }
        let instance = JobInstance {
            id: self.allocate_id(),
            name: identity.name.clone(),
            key,
        };
        instances.push(instance.clone());
        Ok(instance)
    }

    async fn find_latest_execution(
        &self,
        identity: &JobIdentity,
    ) -> StateResult<Option<JobExecution>> {
        Ok(self
            .instance_id(identity)
            .and_then(|id| self.executions_of(id).into_iter().next()))
    }

    async fn find_job_executions(&self, identity: &JobIdentity) -> StateResult<Vec<JobExecution>> {
        Ok(self
            .instance_id(identity)
            .map(|id| self.executions_of(id))
            .unwrap_or_default())
    }

    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> StateResult<JobExecution> {
        let execution = JobExecution::new(self.allocate_id(), instance, parameters.clone());
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> StateResult<()> {
        let mut stored = self
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| StateError::not_found("job execution", execution.id))?;
        if stored.status.is_terminal() {
            return Err(StateError::Conflict(format!(
                "job execution {} is already {}",
                execution.id, stored.status
            )));
        }
        stored.status = execution.status;
        stored.start_time = execution.start_time;
        stored.end_time = execution.end_time;
        stored.read_count = execution.read_count;
        stored.write_count = execution.write_count;
        stored.skip_count = execution.skip_count;
        stored.exit_message.clone_from(&execution.exit_message);
        Ok(())
    }

    async fn add_job_counts(&self, job_execution_id: i64, delta: StepCounts) -> StateResult<()> {
        let mut stored = self
            .executions
            .get_mut(&job_execution_id)
            .ok_or_else(|| StateError::not_found("job execution", job_execution_id))?;
        stored.read_count += delta.read;
        stored.write_count += delta.write;
        stored.skip_count += delta.skips.total();
        Ok(())
    }

    async fn finalize_job_execution(
        &self,
        job_execution_id: i64,
        status: BatchStatus,
        exit_message: Option<String>,
    ) -> StateResult<JobExecution> {
        let mut execution = {
            let mut stored = self
                .executions
                .get_mut(&job_execution_id)
                .ok_or_else(|| StateError::not_found("job execution", job_execution_id))?;
            if stored.status.is_terminal() {
                return Err(StateError::Conflict(format!(
                    "job execution {job_execution_id} is already {}",
                    stored.status
                )));
            }
            stored.status = status;
            stored.end_time = Some(Utc::now());
            stored.exit_message = exit_message;
            stored.clone()
        };
        execution.step_executions = self.load_steps(job_execution_id);
        Ok(execution)
    }

    async fn create_step_execution(&self, mut step: StepExecution) -> StateResult<StepExecution> {
        if !self.executions.contains_key(&step.job_execution_id) {
            return Err(StateError::not_found("job execution", step.job_execution_id));
        }
        match self
            .step_names
            .entry((step.job_execution_id, step.step_name.clone()))
        {
            Entry::Occupied(_) => Err(StateError::Conflict(format!(
                "step '{}' already exists in job execution {}",
                step.step_name, step.job_execution_id
            ))),
            Entry::Vacant(slot) => {
                step.id = self.allocate_id();
                slot.insert(step.id);
                self.steps.insert(step.id, step.clone());
                Ok(step)
            }
        }
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StateResult<()> {
        let mut stored = self
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| StateError::not_found("step execution", step.id))?;
        if stored.status.is_terminal() {
            return Err(StateError::Conflict(format!(
                "step '{}' is already {}",
                step.step_name, stored.status
            )));
        }
        *stored = step.clone();
        Ok(())
    }

    async fn find_step_executions(&self, job_execution_id: i64) -> StateResult<Vec<StepExecution>> {
        Ok(self.load_steps(job_execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepStatus, READ_OFFSET_KEY};

    fn identity() -> JobIdentity {
        JobIdentity::new(
            "importUserJob",
            JobParameters::new().with("input.file", "/tmp/a.csv"),
        )
    }

    #[tokio::test]
    async fn test_instance_is_unique_per_identity() {
        let store = InMemoryStateStore::new();
        assert!(store.find_job_instance(&identity()).await.unwrap().is_none());
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let found = store.find_job_instance(&identity()).await.unwrap().unwrap();
        assert_eq!(found, instance);
        assert!(store.create_job_instance(&identity()).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_execution_is_newest() {
        let store = InMemoryStateStore::new();
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let params = identity().parameters;
        let first = store.create_job_execution(&instance, &params).await.unwrap();
        store
            .finalize_job_execution(first.id, BatchStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let second = store.create_job_execution(&instance, &params).await.unwrap();

        let latest = store.find_latest_execution(&identity()).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        let all = store.find_job_executions(&identity()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_step_names_unique_per_execution() {
        let store = InMemoryStateStore::new();
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let execution = store
            .create_job_execution(&instance, &JobParameters::new())
            .await
            .unwrap();
        let step = store
            .create_step_execution(StepExecution::new(execution.id, "step1:partition0"))
            .await
            .unwrap();
        assert!(step.id > 0);
        assert!(store
            .create_step_execution(StepExecution::new(execution.id, "step1:partition0"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_step_update_and_terminal_guard() {
        let store = InMemoryStateStore::new();
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let execution = store
            .create_job_execution(&instance, &JobParameters::new())
            .await
            .unwrap();
        let mut step = store
            .create_step_execution(StepExecution::new(execution.id, "step1"))
            .await
            .unwrap();
        step.transition(StepStatus::Running).unwrap();
        step.read_count = 2;
        step.context.put(READ_OFFSET_KEY, 2_u64);
        store.update_step_execution(&step).await.unwrap();
        step.transition(StepStatus::Completed).unwrap();
        store.update_step_execution(&step).await.unwrap();

        let steps = store.find_step_executions(execution.id).await.unwrap();
        assert_eq!(steps[0].resume_offset(), 2);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert!(store.update_step_execution(&step).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_count_increments() {
        let store = std::sync::Arc::new(InMemoryStateStore::new());
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let execution = store
            .create_job_execution(&instance, &JobParameters::new())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let delta = StepCounts {
                        read: 2,
                        write: 1,
                        ..StepCounts::default()
                    };
                    store.add_job_counts(execution.id, delta).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let latest = store.find_latest_execution(&identity()).await.unwrap().unwrap();
        assert_eq!(latest.read_count, 400);
        assert_eq!(latest.write_count, 200);
    }

    #[tokio::test]
    async fn test_finalized_execution_is_immutable() {
        let store = InMemoryStateStore::new();
        let instance = store.create_job_instance(&identity()).await.unwrap();
        let execution = store
            .create_job_execution(&instance, &JobParameters::new())
            .await
            .unwrap();
        let done = store
            .finalize_job_execution(execution.id, BatchStatus::Completed, None)
            .await
            .unwrap();
        assert!(done.end_time.is_some());
        assert!(store
            .finalize_job_execution(execution.id, BatchStatus::Failed, None)
            .await
            .is_err());
        assert!(store.update_job_execution(&done).await.is_err());
    }
}
