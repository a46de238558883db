use rusqlite::Connection;

use crate::error::Result;

/// Initialise the checklist tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS instances (
            key         TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            items       TEXT NOT NULL DEFAULT '[]',  -- JSON array of item texts
            meta        TEXT,                        -- JSON RunMeta; NULL for base instances
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS completion (
            key         TEXT PRIMARY KEY,  -- '<instance key>::<item text>'
            checked_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
