use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

use crate::error::{ChecklistError, Result};
use crate::keyspace::CompletionKey;
use crate::types::{ChecklistInstance, RunMeta};
use cadence_core::types::InstanceKey;

/// Store for checklist instances and their completion state.
///
/// Wraps a shared SQLite connection in a Mutex. Every public method
/// takes the lock exactly once; cross-store callers (run registry,
/// scheduler) therefore never deadlock against it.
pub struct ChecklistStore {
    db: Arc<Mutex<Connection>>,
}

impl ChecklistStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub(crate) fn db_handle(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }

    /// Create a base instance. The key is a slug of the display name,
    /// so "Web Application" becomes `web-application`.
    #[instrument(skip(self))]
    pub fn create(&self, name: &str) -> Result<ChecklistInstance> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChecklistError::InvalidName("name is empty".into()));
        }
        let key = InstanceKey::slug(name);
        if key.is_empty() {
            return Err(ChecklistError::InvalidName(format!(
                "name produces an empty key: {name:?}"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let instance = ChecklistInstance {
            key: key.0,
            name: name.to_string(),
            items: Vec::new(),
            meta: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.insert(&instance)?;
        Ok(instance)
    }

    /// Insert a fully formed instance. Used by `create` and by the
    /// materialization engine for run clones.
    pub fn insert(&self, instance: &ChecklistInstance) -> Result<()> {
        let items = serde_json::to_string(&instance.items).unwrap_or_else(|_| "[]".into());
        let meta = instance
            .meta
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT OR IGNORE INTO instances (key, name, items, meta, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                instance.key,
                instance.name,
                items,
                meta,
                instance.created_at,
                instance.updated_at,
            ],
        )?;
        if n == 0 {
            return Err(ChecklistError::AlreadyExists {
                key: instance.key.clone(),
            });
        }
        debug!(key = %instance.key, "instance inserted");
        Ok(())
    }

    /// Retrieve an instance by key, `None` if it does not exist.
    pub fn get(&self, key: &str) -> Result<Option<ChecklistInstance>> {
        let db = self.db.lock().unwrap();
        load_instance(&db, key)
    }

    /// All instances in creation order, run clones included.
    pub fn list(&self) -> Result<Vec<ChecklistInstance>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT key, name, items, meta, created_at, updated_at
             FROM instances ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_instance)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Base instances only (the categories the host edits).
    pub fn list_base(&self) -> Result<Vec<ChecklistInstance>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT key, name, items, meta, created_at, updated_at
             FROM instances WHERE meta IS NULL ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_instance)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Change an instance's display name. The key stays stable.
    #[instrument(skip(self))]
    pub fn rename(&self, key: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(ChecklistError::InvalidName("name is empty".into()));
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE instances SET name = ?1, updated_at = ?2 WHERE key = ?3",
            rusqlite::params![new_name, now, key],
        )?;
        if n == 0 {
            return Err(ChecklistError::NotFound { key: key.into() });
        }
        Ok(())
    }

    /// Delete an instance and every completion key namespaced under it.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        clear_completion(&db, key)?;
        let n = db.execute("DELETE FROM instances WHERE key = ?1", [key])?;
        if n == 0 {
            return Err(ChecklistError::NotFound { key: key.into() });
        }
        debug!(key, "instance deleted");
        Ok(())
    }

    /// Append an item to the end of the instance's list.
    #[instrument(skip(self))]
    pub fn add_item(&self, key: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChecklistError::InvalidName("item text is empty".into()));
        }
        let db = self.db.lock().unwrap();
        let mut instance =
            load_instance(&db, key)?.ok_or_else(|| ChecklistError::NotFound { key: key.into() })?;
        instance.items.push(text.to_string());
        store_items(&db, key, &instance.items)?;
        Ok(())
    }

    /// Rewrite the item at `index`. If the text changes and the old item
    /// was checked, its completion state moves to the new text.
    #[instrument(skip(self))]
    pub fn rename_item(&self, key: &str, index: usize, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(ChecklistError::InvalidName("item text is empty".into()));
        }
        let db = self.db.lock().unwrap();
        let mut instance =
            load_instance(&db, key)?.ok_or_else(|| ChecklistError::NotFound { key: key.into() })?;
        let len = instance.items.len();
        let slot = instance
            .items
            .get_mut(index)
            .ok_or(ChecklistError::InvalidIndex { index, len })?;
        let old_text = std::mem::replace(slot, new_text.to_string());
        store_items(&db, key, &instance.items)?;

        if old_text != new_text {
            let old_key = CompletionKey::new(key, &old_text).format();
            let was_checked: bool = db
                .query_row(
                    "SELECT 1 FROM completion WHERE key = ?1",
                    [&old_key],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if was_checked {
                let new_key = CompletionKey::new(key, new_text).format();
                let now = chrono::Utc::now().to_rfc3339();
                db.execute(
                    "INSERT OR IGNORE INTO completion (key, checked_at) VALUES (?1, ?2)",
                    rusqlite::params![new_key, now],
                )?;
                db.execute("DELETE FROM completion WHERE key = ?1", [&old_key])?;
            }
        }
        Ok(())
    }

    /// Remove the item at `index` along with its completion state.
    #[instrument(skip(self))]
    pub fn remove_item(&self, key: &str, index: usize) -> Result<()> {
        let db = self.db.lock().unwrap();
        let mut instance =
            load_instance(&db, key)?.ok_or_else(|| ChecklistError::NotFound { key: key.into() })?;
        let len = instance.items.len();
        if index >= len {
            return Err(ChecklistError::InvalidIndex { index, len });
        }
        let removed = instance.items.remove(index);
        store_items(&db, key, &instance.items)?;
        let comp_key = CompletionKey::new(key, &removed).format();
        db.execute("DELETE FROM completion WHERE key = ?1", [&comp_key])?;
        Ok(())
    }

    /// Uncheck every item of the instance. Items themselves stay.
    #[instrument(skip(self))]
    pub fn reset(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        if load_instance(&db, key)?.is_none() {
            return Err(ChecklistError::NotFound { key: key.into() });
        }
        clear_completion(&db, key)?;
        Ok(())
    }

    /// Completion percentage of an instance, rounded to whole percent.
    /// An empty item list counts as 0, not a division by zero.
    pub fn progress(&self, key: &str) -> Result<u8> {
        let db = self.db.lock().unwrap();
        let instance =
            load_instance(&db, key)?.ok_or_else(|| ChecklistError::NotFound { key: key.into() })?;
        if instance.items.is_empty() {
            return Ok(0);
        }
        let mut checked = 0usize;
        for item in &instance.items {
            let comp_key = CompletionKey::new(key, item).format();
            let hit: Option<bool> = db
                .query_row(
                    "SELECT 1 FROM completion WHERE key = ?1",
                    [&comp_key],
                    |_| Ok(true),
                )
                .optional()?;
            if hit.is_some() {
                checked += 1;
            }
        }
        Ok(((checked as f64 / instance.items.len() as f64) * 100.0).round() as u8)
    }
}

/// Map a SELECT row (key, name, items, meta, created_at, updated_at) to
/// an instance. Corrupt JSON in `items` or `meta` degrades to an empty
/// list / no meta with a warning instead of failing the whole load.
pub(crate) fn row_to_instance(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChecklistInstance> {
    let key: String = row.get(0)?;
    let items_json: String = row.get(2)?;
    let items: Vec<String> = serde_json::from_str(&items_json).unwrap_or_else(|e| {
        warn!(key = %key, "corrupt items JSON, resetting to empty: {e}");
        Vec::new()
    });
    let meta: Option<RunMeta> = match row.get::<_, Option<String>>(3)? {
        Some(json) => match serde_json::from_str(&json) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(key = %key, "corrupt meta JSON, treating as base instance: {e}");
                None
            }
        },
        None => None,
    };
    Ok(ChecklistInstance {
        key,
        name: row.get(1)?,
        items,
        meta,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn load_instance(conn: &Connection, key: &str) -> Result<Option<ChecklistInstance>> {
    match conn.query_row(
        "SELECT key, name, items, meta, created_at, updated_at
         FROM instances WHERE key = ?1",
        [key],
        row_to_instance,
    ) {
        Ok(i) => Ok(Some(i)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ChecklistError::Database(e)),
    }
}

fn store_items(conn: &Connection, key: &str, items: &[String]) -> Result<()> {
    let json = serde_json::to_string(items).unwrap_or_else(|_| "[]".into());
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE instances SET items = ?1, updated_at = ?2 WHERE key = ?3",
        rusqlite::params![json, now, key],
    )?;
    Ok(())
}

/// Remove every completion key namespaced under `instance_key`.
///
/// Keys are matched by parsing rather than a LIKE pattern so item texts
/// containing SQL wildcard characters cannot leak across instances.
pub(crate) fn clear_completion(conn: &Connection, instance_key: &str) -> Result<()> {
    let mut stmt = conn.prepare("SELECT key FROM completion")?;
    let keys: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .filter(|k| {
            CompletionKey::parse(k)
                .map(|c| c.instance_key == instance_key)
                .unwrap_or(false)
        })
        .collect();
    drop(stmt);
    for k in keys {
        conn.execute("DELETE FROM completion WHERE key = ?1", [&k])?;
    }
    Ok(())
}
