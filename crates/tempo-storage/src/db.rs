use rusqlite::Connection;

use crate::error::Result;

/// Creates the `tasks` and `task_logs` tables (idempotent).
///
/// Instants are stored as fixed-width UTC strings, so `next_run_time <= ?`
/// compares chronologically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT    NOT NULL PRIMARY KEY,
            kind            TEXT    NOT NULL,
            user_id         INTEGER NOT NULL,
            endpoint        TEXT    NOT NULL,
            method          TEXT    NOT NULL,
            headers         TEXT    NOT NULL,   -- JSON object
            body            TEXT,
            recurrence      TEXT,               -- JSON-encoded Recurrence
            max_runs        INTEGER,
            start_time      TEXT    NOT NULL,
            next_run_time   TEXT    NOT NULL,
            status          TEXT    NOT NULL DEFAULT 'pending',
            attempts        INTEGER NOT NULL DEFAULT 0,
            run_count       INTEGER NOT NULL DEFAULT 0,
            last_execution  TEXT,               -- JSON-encoded ExecutionRecord
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks (status, next_run_time);
        CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks (user_id, created_at);

        CREATE TABLE IF NOT EXISTS task_logs (
            id           TEXT    NOT NULL PRIMARY KEY,
            task_id      TEXT    NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            executed_at  TEXT    NOT NULL,
            record       TEXT    NOT NULL    -- JSON-encoded ExecutionRecord
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs (task_id, executed_at);
        ",
    )?;
    Ok(())
}
