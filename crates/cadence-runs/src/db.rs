use rusqlite::Connection;

use crate::error::Result;

/// Initialise the runs table.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
/// The primary key doubles as the materialization idempotency guard.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            id            TEXT PRIMARY KEY,   -- '<template id>:<due date>'
            template_id   TEXT NOT NULL,
            template_name TEXT NOT NULL,
            source_key    TEXT NOT NULL,
            source_name   TEXT NOT NULL,
            instance_key  TEXT NOT NULL,
            due_date      TEXT NOT NULL,      -- YYYY-MM-DD
            lead_days     INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'pending',
            manual        INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            completed_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_due ON runs (due_date);",
    )?;
    Ok(())
}
