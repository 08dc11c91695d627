//! `SQLite`-backed implementation of [`ExecutionStateStore`].
//!
//! Uses a single connection behind a `parking_lot::Mutex`. Each operation is
//! one statement or one transaction, so every call is atomic on its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use super::ExecutionStateStore;
use crate::core::{
    BatchStatus, ExecutionContext, JobExecution, JobIdentity, JobInstance, JobParameters,
    SkipCounters, StepCounts, StepExecution, StepStatus,
};
use crate::errors::{StateError, StateResult};

/// Idempotent DDL for the execution tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS job_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    key TEXT NOT NULL,
    UNIQUE (name, key)
);

CREATE TABLE IF NOT EXISTS job_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id INTEGER NOT NULL REFERENCES job_instances(id),
    parameters TEXT NOT NULL,
    status TEXT NOT NULL,
    create_time TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    read_count INTEGER NOT NULL DEFAULT 0,
    write_count INTEGER NOT NULL DEFAULT 0,
    skip_count INTEGER NOT NULL DEFAULT 0,
    exit_message TEXT
);

CREATE TABLE IF NOT EXISTS step_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_execution_id INTEGER NOT NULL REFERENCES job_executions(id),
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    read_count INTEGER NOT NULL DEFAULT 0,
    write_count INTEGER NOT NULL DEFAULT 0,
    read_skip_count INTEGER NOT NULL DEFAULT 0,
    process_skip_count INTEGER NOT NULL DEFAULT 0,
    write_skip_count INTEGER NOT NULL DEFAULT 0,
    commit_count INTEGER NOT NULL DEFAULT 0,
    rollback_count INTEGER NOT NULL DEFAULT 0,
    context TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    exit_message TEXT,
    UNIQUE (job_execution_id, step_name)
);

CREATE INDEX IF NOT EXISTS idx_job_executions_instance ON job_executions (instance_id);
";

const JOB_EXECUTION_COLUMNS: &str = "e.id, e.instance_id, i.name, e.parameters, e.status, \
     e.create_time, e.start_time, e.end_time, e.read_count, e.write_count, e.skip_count, \
     e.exit_message";

const STEP_EXECUTION_COLUMNS: &str = "id, job_execution_id, step_name, status, read_count, \
     write_count, read_skip_count, process_skip_count, write_skip_count, commit_count, \
     rollback_count, context, start_time, end_time, exit_message";

/// `SQLite`-backed execution state.
///
/// Create with [`SqliteStateStore::open`] for file-backed persistence
/// or [`SqliteStateStore::in_memory`] for tests.
///
/// All operations share one connection behind a mutex, so concurrent
/// partitions checkpoint one at a time. Each call is a single short
/// statement or transaction run on the calling worker thread.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish_non_exhaustive()
    }
}

impl SqliteStateStore {
    /// Open or create a state database at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory database.
    pub fn in_memory() -> StateResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StateResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn load_steps(conn: &Connection, job_execution_id: i64) -> StateResult<Vec<StepExecution>> {
        let sql = format!(
            "SELECT {STEP_EXECUTION_COLUMNS} FROM step_executions \
             WHERE job_execution_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([job_execution_id], StepRow::from_row)?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?.into_step()?);
        }
        Ok(steps)
    }

    fn load_executions(
        conn: &Connection,
        identity: &JobIdentity,
        limit: Option<u32>,
    ) -> StateResult<Vec<JobExecution>> {
        let sql = format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM job_executions e \
             JOIN job_instances i ON i.id = e.instance_id \
             WHERE i.name = ?1 AND i.key = ?2 ORDER BY e.id DESC LIMIT ?3"
        );
        let limit = limit.map_or(-1, i64::from);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![identity.name, identity.key(), limit],
            JobRow::from_row,
        )?;
        let mut executions = Vec::new();
        for row in rows {
            let mut execution = row?.into_execution()?;
            execution.step_executions = Self::load_steps(conn, execution.id)?;
            executions.push(execution);
        }
        Ok(executions)
    }

    fn load_execution(conn: &Connection, job_execution_id: i64) -> StateResult<JobExecution> {
        let sql = format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM job_executions e \
             JOIN job_instances i ON i.id = e.instance_id WHERE e.id = ?1"
        );
        let row = conn
            .query_row(&sql, [job_execution_id], JobRow::from_row)
            .optional()?
            .ok_or_else(|| StateError::not_found("job execution", job_execution_id))?;
        let mut execution = row.into_execution()?;
        execution.step_executions = Self::load_steps(conn, job_execution_id)?;
        Ok(execution)
    }

    fn execution_status(conn: &Connection, job_execution_id: i64) -> StateResult<BatchStatus> {
        let raw: String = conn
            .query_row(
                "SELECT status FROM job_executions WHERE id = ?1",
                [job_execution_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StateError::not_found("job execution", job_execution_id))?;
        parse_status(&raw)
    }
}

#[async_trait]
impl ExecutionStateStore for SqliteStateStore {
    async fn find_job_instance(&self, identity: &JobIdentity) -> StateResult<Option<JobInstance>> {
        let conn = self.lock_conn();
        let instance = conn
            .query_row(
                "SELECT id, name, key FROM job_instances WHERE name = ?1 AND key = ?2",
                params![identity.name, identity.key()],
                |row| {
                    Ok(JobInstance {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        key: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(instance)
    }

    async fn create_job_instance(&self, identity: &JobIdentity) -> StateResult<JobInstance> {
        let conn = self.lock_conn();
        let key = identity.key();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO job_instances (name, key) VALUES (?1, ?2)",
            params![identity.name, key],
        )?;
        if inserted == 0 {
            return Err(StateError::Conflict(format!(
                "job instance already exists for {identity}"
            )));
        }
        Ok(JobInstance {
            id: conn.last_insert_rowid(),
            name: identity.name.clone(),
            key,
        })
    }

    async fn find_latest_execution(
        &self,
        identity: &JobIdentity,
    ) -> StateResult<Option<JobExecution>> {
        let conn = self.lock_conn();
        Ok(Self::load_executions(&conn, identity, Some(1))?
            .into_iter()
            .next())
    }

    async fn find_job_executions(&self, identity: &JobIdentity) -> StateResult<Vec<JobExecution>> {
        let conn = self.lock_conn();
        Self::load_executions(&conn, identity, None)
    }

    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> StateResult<JobExecution> {
        let conn = self.lock_conn();
        let mut execution = JobExecution::new(0, instance, parameters.clone());
        conn.execute(
            "INSERT INTO job_executions (instance_id, parameters, status, create_time) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                instance.id,
                serde_json::to_string(parameters)?,
                execution.status.as_str(),
                execution.create_time.to_rfc3339(),
            ],
        )?;
        execution.id = conn.last_insert_rowid();
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> StateResult<()> {
        let conn = self.lock_conn();
        let current = Self::execution_status(&conn, execution.id)?;
        if current.is_terminal() {
            return Err(StateError::Conflict(format!(
                "job execution {} is already {current}",
                execution.id
            )));
        }
        conn.execute(
            "UPDATE job_executions SET status = ?1, start_time = ?2, end_time = ?3, \
             read_count = ?4, write_count = ?5, skip_count = ?6, exit_message = ?7 \
             WHERE id = ?8",
            params![
                execution.status.as_str(),
                execution.start_time.map(|t| t.to_rfc3339()),
                execution.end_time.map(|t| t.to_rfc3339()),
                to_sql_int(execution.read_count),
                to_sql_int(execution.write_count),
                to_sql_int(execution.skip_count),
                execution.exit_message,
                execution.id,
            ],
        )?;
        Ok(())
    }

    async fn add_job_counts(&self, job_execution_id: i64, delta: StepCounts) -> StateResult<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE job_executions SET read_count = read_count + ?1, \
             write_count = write_count + ?2, skip_count = skip_count + ?3 WHERE id = ?4",
            params![
                to_sql_int(delta.read),
                to_sql_int(delta.write),
                to_sql_int(delta.skips.total()),
                job_execution_id,
            ],
        )?;
        if updated == 0 {
            return Err(StateError::not_found("job execution", job_execution_id));
        }
        Ok(())
    }

    async fn finalize_job_execution(
        &self,
        job_execution_id: i64,
        status: BatchStatus,
        exit_message: Option<String>,
    ) -> StateResult<JobExecution> {
        let conn = self.lock_conn();
        let current = Self::execution_status(&conn, job_execution_id)?;
        if current.is_terminal() {
            return Err(StateError::Conflict(format!(
                "job execution {job_execution_id} is already {current}"
            )));
        }
        conn.execute(
            "UPDATE job_executions SET status = ?1, end_time = ?2, exit_message = ?3 \
             WHERE id = ?4",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                exit_message,
                job_execution_id,
            ],
        )?;
        Self::load_execution(&conn, job_execution_id)
    }

    async fn create_step_execution(&self, mut step: StepExecution) -> StateResult<StepExecution> {
        let conn = self.lock_conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO step_executions (job_execution_id, step_name, status, \
             read_count, write_count, read_skip_count, process_skip_count, write_skip_count, \
             commit_count, rollback_count, context, start_time, end_time, exit_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                step.job_execution_id,
                step.step_name,
                step.status.as_str(),
                to_sql_int(step.read_count),
                to_sql_int(step.write_count),
                to_sql_int(step.skips.read),
                to_sql_int(step.skips.process),
                to_sql_int(step.skips.write),
                to_sql_int(step.commit_count),
                to_sql_int(step.rollback_count),
                serde_json::to_string(&step.context)?,
                step.start_time.map(|t| t.to_rfc3339()),
                step.end_time.map(|t| t.to_rfc3339()),
                step.exit_message,
            ],
        )?;
        if inserted == 0 {
            return Err(StateError::Conflict(format!(
                "step '{}' already exists in job execution {}",
                step.step_name, step.job_execution_id
            )));
        }
        step.id = conn.last_insert_rowid();
        Ok(step)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StateResult<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE step_executions SET status = ?1, read_count = ?2, write_count = ?3, \
             read_skip_count = ?4, process_skip_count = ?5, write_skip_count = ?6, \
             commit_count = ?7, rollback_count = ?8, context = ?9, start_time = ?10, \
             end_time = ?11, exit_message = ?12 \
             WHERE id = ?13 AND status NOT IN ('COMPLETED', 'FAILED')",
            params![
                step.status.as_str(),
                to_sql_int(step.read_count),
                to_sql_int(step.write_count),
                to_sql_int(step.skips.read),
                to_sql_int(step.skips.process),
                to_sql_int(step.skips.write),
                to_sql_int(step.commit_count),
                to_sql_int(step.rollback_count),
                serde_json::to_string(&step.context)?,
                step.start_time.map(|t| t.to_rfc3339()),
                step.end_time.map(|t| t.to_rfc3339()),
                step.exit_message,
                step.id,
            ],
        )?;
        if updated == 0 {
            return Err(StateError::Conflict(format!(
                "step execution {} is missing or already terminal",
                step.id
            )));
        }
        Ok(())
    }

    async fn find_step_executions(&self, job_execution_id: i64) -> StateResult<Vec<StepExecution>> {
        let conn = self.lock_conn();
        Self::load_steps(&conn, job_execution_id)
    }
}

/// Raw `job_executions` row before status/time/JSON decoding.
struct JobRow {
    id: i64,
    instance_id: i64,
    name: String,
    parameters: String,
    status: String,
    create_time: String,
    start_time: Option<String>,
    end_time: Option<String>,
    read_count: i64,
    write_count: i64,
    skip_count: i64,
    exit_message: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            instance_id: row.get(1)?,
            name: row.get(2)?,
            parameters: row.get(3)?,
            status: row.get(4)?,
            create_time: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            read_count: row.get(8)?,
            write_count: row.get(9)?,
            skip_count: row.get(10)?,
            exit_message: row.get(11)?,
        })
    }

    fn into_execution(self) -> StateResult<JobExecution> {
        Ok(JobExecution {
            id: self.id,
            instance_id: self.instance_id,
            job_name: self.name,
            parameters: serde_json::from_str(&self.parameters)?,
            status: parse_status(&self.status)?,
            create_time: parse_time(&self.create_time)?,
            start_time: self.start_time.as_deref().map(parse_time).transpose()?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            read_count: from_sql_int(self.read_count),
            write_count: from_sql_int(self.write_count),
            skip_count: from_sql_int(self.skip_count),
            exit_message: self.exit_message,
            step_executions: Vec::new(),
        })
    }
}

/// Raw `step_executions` row.
struct StepRow {
    id: i64,
    job_execution_id: i64,
    step_name: String,
    status: String,
    counts: [i64; 7],
    context: String,
    start_time: Option<String>,
    end_time: Option<String>,
    exit_message: Option<String>,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_execution_id: row.get(1)?,
            step_name: row.get(2)?,
            status: row.get(3)?,
            counts: [
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ],
            context: row.get(11)?,
            start_time: row.get(12)?,
            end_time: row.get(13)?,
            exit_message: row.get(14)?,
        })
    }

    fn into_step(self) -> StateResult<StepExecution> {
        let [read, write, read_skip, process_skip, write_skip, commits, rollbacks] =
            self.counts.map(from_sql_int);
        let status = self
            .status
            .parse::<StepStatus>()
            .map_err(StateError::Conflict)?;
        let context: ExecutionContext = serde_json::from_str(&self.context)?;
        Ok(StepExecution {
            id: self.id,
            job_execution_id: self.job_execution_id,
            step_name: self.step_name,
            status,
            read_count: read,
            write_count: write,
            skips: SkipCounters {
                read: read_skip,
                process: process_skip,
                write: write_skip,
            },
            commit_count: commits,
            rollback_count: rollbacks,
            context,
            start_time: self.start_time.as_deref().map(parse_time).transpose()?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            exit_message: self.exit_message,
        })
    }
}

fn parse_status(raw: &str) -> StateResult<BatchStatus> {
    raw.parse::<BatchStatus>().map_err(StateError::Conflict)
}

fn parse_time(raw: &str) -> StateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StateError::Conflict(format!("invalid timestamp '{raw}': {e}")))
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
