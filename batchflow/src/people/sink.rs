//! `SQLite` destination for imported people.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;

use super::Person;
use crate::errors::{BatchError, Result, StateResult};
use crate::io::RecordSink;

const CREATE_PEOPLE: &str = r"
CREATE TABLE IF NOT EXISTS people (
    person_id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL CHECK (length(first_name) > 0),
    last_name TEXT NOT NULL CHECK (length(last_name) > 0),
    age INTEGER NOT NULL,
    national_id TEXT
);
";

/// Writes chunks of people into a `people` table, one transaction per chunk.
///
/// Constraint violations are reported as validation errors so that item-level
/// write isolation can skip the offending rows; any other failure is a sink
/// error.
pub struct SqlitePeopleSink {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqlitePeopleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePeopleSink").finish_non_exhaustive()
    }
}

impl SqlitePeopleSink {
    /// Opens or creates the people database at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Creates an in-memory people database.
    pub fn in_memory() -> StateResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StateResult<Self> {
        conn.execute_batch(CREATE_PEOPLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored people.
    pub fn count(&self) -> StateResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Every stored person, in insertion order.
    pub fn people(&self) -> StateResult<Vec<Person>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT first_name, last_name, age, national_id FROM people ORDER BY person_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Person {
                first_name: row.get(0)?,
                last_name: row.get(1)?,
                age: row.get(2)?,
                national_id: row.get(3)?,
            })
        })?;
        let mut people = Vec::new();
        for person in rows {
            people.push(person?);
        }
        Ok(people)
    }

    fn insert_all(conn: &mut Connection, items: &[Person]) -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO people (first_name, last_name, age, national_id) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for person in items {
                stmt.execute(params![
                    person.first_name,
                    person.last_name,
                    person.age,
                    person.national_id
                ])?;
            }
        }
        tx.commit()
    }
}

#[async_trait]
impl RecordSink<Person> for SqlitePeopleSink {
    async fn write_all(&self, items: &[Person]) -> Result<()> {
        let mut conn = self.conn.lock();
        Self::insert_all(&mut conn, items).map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                BatchError::validation(format!("rejected by people table: {e}"))
            }
            _ => BatchError::sink(format!("people insert failed: {e}")),
        })
    }
}
