//! Composite completion keys and the sparse checked-state map.
//!
//! Checked state is tracked per `(instance, item text)` pair under the
//! key `"<instance key>::<item text>"`. Instance keys are slugs or
//! UUIDs and can never contain `::`, so splitting at the first
//! occurrence of the separator is unambiguous even when an item text
//! itself contains `::`. Presence of a key means checked; unchecking
//! deletes the row, so the persisted map stays sparse.

use rusqlite::OptionalExtension;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::store::ChecklistStore;

/// Separator between the instance key and the item text.
pub const SEPARATOR: &str = "::";

/// A parsed composite completion key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionKey {
    pub instance_key: String,
    pub item_text: String,
}

impl CompletionKey {
    pub fn new(instance_key: &str, item_text: &str) -> Self {
        Self {
            instance_key: instance_key.to_string(),
            item_text: item_text.to_string(),
        }
    }

    /// Canonical stored form: `<instance key>::<item text>`.
    pub fn format(&self) -> String {
        format!("{}{}{}", self.instance_key, SEPARATOR, self.item_text)
    }

    /// Parse a stored key. `None` for keys without the separator —
    /// those are legacy flat keys (bare item text) from before
    /// completion state was namespaced.
    pub fn parse(s: &str) -> Option<Self> {
        let (instance_key, item_text) = s.split_once(SEPARATOR)?;
        Some(Self {
            instance_key: instance_key.to_string(),
            item_text: item_text.to_string(),
        })
    }
}

impl std::fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl ChecklistStore {
    /// Whether the item is checked in the given instance.
    pub fn is_checked(&self, instance_key: &str, item_text: &str) -> Result<bool> {
        let key = CompletionKey::new(instance_key, item_text).format();
        let db = self.db_handle().lock().unwrap();
        let hit: Option<bool> = db
            .query_row("SELECT 1 FROM completion WHERE key = ?1", [&key], |_| {
                Ok(true)
            })
            .optional()?;
        Ok(hit.is_some())
    }

    /// Check or uncheck an item. Unchecking deletes the row; `false` is
    /// never stored.
    #[instrument(skip(self))]
    pub fn set_checked(&self, instance_key: &str, item_text: &str, value: bool) -> Result<()> {
        let key = CompletionKey::new(instance_key, item_text).format();
        let db = self.db_handle().lock().unwrap();
        if value {
            let now = chrono::Utc::now().to_rfc3339();
            db.execute(
                "INSERT OR IGNORE INTO completion (key, checked_at) VALUES (?1, ?2)",
                rusqlite::params![key, now],
            )?;
        } else {
            db.execute("DELETE FROM completion WHERE key = ?1", [&key])?;
        }
        Ok(())
    }

    /// One-time migration of legacy flat keys (bare item text, no
    /// separator). Each legacy key is fanned out to every instance
    /// whose item list contains that exact text, then removed.
    ///
    /// Deliberately lossy: an item text appearing in several instances
    /// becomes checked in all of them, because the flat keyspace never
    /// recorded which instance the check belonged to.
    pub fn migrate_legacy_keys(&self) -> Result<usize> {
        let db = self.db_handle().lock().unwrap();

        let legacy: Vec<String> = {
            let mut stmt = db.prepare("SELECT key FROM completion")?;
            let rows: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .filter(|k| !k.contains(SEPARATOR))
                .collect();
            rows
        };
        if legacy.is_empty() {
            return Ok(0);
        }

        let instances: Vec<(String, Vec<String>)> = {
            let mut stmt = db.prepare("SELECT key, items FROM instances")?;
            let rows: Vec<(String, Vec<String>)> = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(|r| r.ok())
                .map(|(key, items_json)| {
                    let items: Vec<String> = serde_json::from_str(&items_json).unwrap_or_default();
                    (key, items)
                })
                .collect();
            rows
        };

        let now = chrono::Utc::now().to_rfc3339();
        for item_text in &legacy {
            for (instance_key, items) in &instances {
                if items.iter().any(|i| i == item_text) {
                    let composite = CompletionKey::new(instance_key, item_text).format();
                    db.execute(
                        "INSERT OR IGNORE INTO completion (key, checked_at) VALUES (?1, ?2)",
                        rusqlite::params![composite, now],
                    )?;
                    debug!(key = %composite, "legacy key fanned out");
                }
            }
            db.execute("DELETE FROM completion WHERE key = ?1", [item_text])?;
        }

        info!(count = legacy.len(), "legacy completion keys migrated");
        Ok(legacy.len())
    }
}
