use rusqlite::Connection;

use crate::error::Result;

/// Initialise the templates table.
///
/// Safe to call on every startup — uses `IF NOT EXISTS`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS templates (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            source_key  TEXT NOT NULL,
            frequency   TEXT NOT NULL,
            lead_days   INTEGER NOT NULL DEFAULT 0,
            next_due    TEXT NOT NULL,   -- YYYY-MM-DD
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
