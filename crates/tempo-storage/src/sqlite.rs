use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use tempo_core::{
    Clock, ExecutionLog, ExecutionRecord, LogId, Task, TaskId, TaskStatus, format_instant,
};
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, StorageError},
    store::{TaskQuery, TaskStore, TransitionUpdate},
};

const TASK_COLUMNS: &str = "id, kind, user_id, endpoint, method, headers, body, recurrence,
     max_runs, start_time, next_run_time, status, attempts, run_count,
     last_execution, created_at, updated_at";

/// SQLite-backed [`TaskStore`].
///
/// One connection behind a mutex; the compare-and-swap in
/// [`TaskStore::transition`] is a single conditional `UPDATE`, so claims stay
/// exclusive even when several schedulers share the database file.
#[derive(Debug)]
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskStore {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening task store");
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, clock)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn now(&self) -> String {
        format_instant(self.clock.now())
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, task: &Task) -> Result<TaskId> {
        let conn = self.lock()?;
        let now = self.now();
        let headers = to_json(&task.headers)?;
        let recurrence = task.recurrence.as_ref().map(to_json).transpose()?;
        let last_execution = task.last_execution.as_ref().map(to_json).transpose()?;

        let inserted = conn.execute(
            "INSERT INTO tasks
             (id, kind, user_id, endpoint, method, headers, body, recurrence,
              max_runs, start_time, next_run_time, status, attempts, run_count,
              last_execution, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?16)",
            params![
                task.id.as_str(),
                task.kind.as_str(),
                task.user_id,
                task.endpoint,
                task.method.as_str(),
                headers,
                task.body,
                recurrence,
                task.max_runs,
                format_instant(task.start_time),
                format_instant(task.next_run_time),
                task.status.as_str(),
                task.attempts,
                task.run_count,
                last_execution,
                now,
            ],
        );

        match inserted {
            Ok(_) => {
                debug!(task_id = %task.id, next_run_time = %task.next_run_time, "task inserted");
                Ok(task.id.clone())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(task.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id.as_str()],
                TaskRow::read,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'pending' AND next_run_time <= ?1
             ORDER BY next_run_time ASC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![format_instant(now), limit as i64], TaskRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn transition(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        update: TransitionUpdate,
    ) -> Result<bool> {
        expected.transition_to(update.status)?;

        let mut conn = self.lock()?;
        let now = self.now();
        let execution = update.execution.as_ref().map(to_json).transpose()?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE tasks SET
                status         = ?1,
                next_run_time  = COALESCE(?2, next_run_time),
                attempts       = COALESCE(?3, attempts),
                run_count      = COALESCE(?4, run_count),
                last_execution = COALESCE(?5, last_execution),
                updated_at     = ?6
             WHERE id = ?7 AND status = ?8",
            params![
                update.status.as_str(),
                update.next_run_time.map(format_instant),
                update.attempts,
                update.run_count,
                execution,
                now,
                id.as_str(),
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            // dropping `tx` rolls back
            return Ok(false);
        }

        if let (Some(record), Some(json)) = (&update.execution, &execution) {
            tx.execute(
                "INSERT INTO task_logs (id, task_id, executed_at, record)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    LogId::new().as_str(),
                    id.as_str(),
                    format_instant(record.executed_at),
                    json
                ],
            )?;
        }
        tx.commit()?;

        debug!(task_id = %id, from = %expected, to = %update.status, "task transitioned");
        Ok(true)
    }

    fn list_stale(
        &self,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = ?1 AND updated_at <= ?2
             ORDER BY updated_at ASC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![status.as_str(), format_instant(updated_before), limit as i64],
                TaskRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn delete(&self, id: &TaskId, expected: TaskStatus) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM task_logs WHERE task_id = ?1", [id.as_str()])?;
        let n = tx.execute(
            "DELETE FROM tasks WHERE id = ?1 AND status = ?2",
            params![id.as_str(), expected.as_str()],
        )?;
        if n == 0 {
            return Ok(false);
        }
        tx.commit()?;
        info!(task_id = %id, "task deleted");
        Ok(true)
    }

    fn list_for_user(&self, query: &TaskQuery) -> Result<(Vec<Task>, u64)> {
        let conn = self.lock()?;
        let status = query.status.map(|s| s.as_str());

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![query.user_id, status],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
            .query_map(
                params![query.user_id, status, query.limit, query.offset],
                TaskRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let tasks = rows
            .into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>>>()?;

        Ok((tasks, total.max(0) as u64))
    }

    fn count_active_for_user(&self, user_id: i64) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE user_id = ?1 AND status IN ('pending', 'running')",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn logs(&self, id: &TaskId, limit: usize) -> Result<Vec<ExecutionLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, record FROM task_logs
             WHERE task_id = ?1
             ORDER BY executed_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![id.as_str(), limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(log_id, record)| {
                Ok(ExecutionLog {
                    id: LogId::from(log_id),
                    task_id: id.clone(),
                    record: from_json(id.as_str(), &record)?,
                })
            })
            .collect()
    }
}

/// Raw column values, decoded into a [`Task`] outside the rusqlite callback
/// so bad JSON or timestamps surface as [`StorageError::Corrupt`].
struct TaskRow {
    id: String,
    kind: String,
    user_id: i64,
    endpoint: String,
    method: String,
    headers: String,
    body: Option<String>,
    recurrence: Option<String>,
    max_runs: Option<u32>,
    start_time: String,
    next_run_time: String,
    status: String,
    attempts: u32,
    run_count: u32,
    last_execution: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            user_id: row.get(2)?,
            endpoint: row.get(3)?,
            method: row.get(4)?,
            headers: row.get(5)?,
            body: row.get(6)?,
            recurrence: row.get(7)?,
            max_runs: row.get(8)?,
            start_time: row.get(9)?,
            next_run_time: row.get(10)?,
            status: row.get(11)?,
            attempts: row.get(12)?,
            run_count: row.get(13)?,
            last_execution: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let id = self.id.as_str();
        let corrupt = |reason: String| StorageError::Corrupt {
            id: id.to_string(),
            reason,
        };

        let headers: BTreeMap<String, String> = from_json(id, &self.headers)?;
        let recurrence = self
            .recurrence
            .as_deref()
            .map(|json| from_json(id, json))
            .transpose()?;
        let last_execution: Option<ExecutionRecord> = self
            .last_execution
            .as_deref()
            .map(|json| from_json(id, json))
            .transpose()?;

        Ok(Task {
            kind: self.kind.parse().map_err(corrupt)?,
            user_id: self.user_id,
            endpoint: self.endpoint,
            method: self.method.parse().map_err(corrupt)?,
            headers,
            body: self.body,
            recurrence,
            max_runs: self.max_runs,
            start_time: parse_ts(id, &self.start_time)?,
            next_run_time: parse_ts(id, &self.next_run_time)?,
            status: self
                .status
                .parse()
                .map_err(|e: tempo_core::UnknownStatus| corrupt(e.to_string()))?,
            attempts: self.attempts,
            run_count: self.run_count,
            last_execution,
            created_at: parse_ts(id, &self.created_at)?,
            updated_at: parse_ts(id, &self.updated_at)?,
            id: TaskId::from(self.id),
        })
    }
}

fn parse_ts(id: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp `{value}`: {e}"),
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
        id: String::new(),
        reason: e.to_string(),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(id: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| StorageError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}
