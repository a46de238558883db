use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::{Result, RunError};
use crate::types::{Run, RunStatus};
use cadence_checklists::ChecklistStore;

/// Registry of materialized runs.
///
/// Status changes come from two directions: explicit complete/reopen
/// actions here, and the progress-sync pass that reconciles status with
/// checklist completion. Both go through the same update paths.
pub struct RunRegistry {
    db: Arc<Mutex<Connection>>,
}

impl RunRegistry {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Insert a freshly materialized run. The caller must have written
    /// the cloned checklist instance first, so a crash between the two
    /// writes leaves an orphan instance rather than a dangling run.
    pub fn insert(&self, run: &Run) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO runs
             (id, template_id, template_name, source_key, source_name, instance_key,
              due_date, lead_days, status, manual, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                run.id,
                run.template_id,
                run.template_name,
                run.source_key,
                run.source_name,
                run.instance_key,
                run.due_date.to_string(),
                run.lead_days,
                run.status.to_string(),
                run.manual as i64,
                run.created_at,
                run.completed_at,
            ],
        )?;
        debug!(run_id = %run.id, "run inserted");
        Ok(())
    }

    /// Whether a run with this id already exists (idempotency guard).
    pub fn exists(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM runs WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Retrieve a run by id, `None` if it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<Run>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, template_id, template_name, source_key, source_name, instance_key,
                    due_date, lead_days, status, manual, created_at, completed_at
             FROM runs WHERE id = ?1",
            [id],
            row_to_run,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RunError::Database(e)),
        }
    }

    /// All runs, soonest due date first.
    pub fn list(&self) -> Result<Vec<Run>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, template_id, template_name, source_key, source_name, instance_key,
                    due_date, lead_days, status, manual, created_at, completed_at
             FROM runs ORDER BY due_date",
        )?;
        let rows = stmt.query_map([], row_to_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark a run completed and, as an explicit shortcut, check every
    /// item of its backing checklist. A run whose instance has been
    /// removed still completes; the bulk check is skipped.
    #[instrument(skip(self, checklists))]
    pub fn complete(&self, id: &str, checklists: &ChecklistStore) -> Result<Run> {
        let run = self
            .get(id)?
            .ok_or_else(|| RunError::NotFound { id: id.into() })?;

        if let Some(instance) = checklists.get(&run.instance_key)? {
            for item in &instance.items {
                checklists.set_checked(&run.instance_key, item, true)?;
            }
        } else {
            debug!(run_id = %id, "backing instance gone, completing status only");
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.set_status(id, RunStatus::Completed, Some(&now))?;
        info!(run_id = %id, "run completed");
        self.get(id)?
            .ok_or_else(|| RunError::NotFound { id: id.into() })
    }

    /// Move a completed run back to pending. Checked items stay checked.
    #[instrument(skip(self))]
    pub fn reopen(&self, id: &str) -> Result<Run> {
        if self.get(id)?.is_none() {
            return Err(RunError::NotFound { id: id.into() });
        }
        self.set_status(id, RunStatus::Pending, None)?;
        info!(run_id = %id, "run reopened");
        self.get(id)?
            .ok_or_else(|| RunError::NotFound { id: id.into() })
    }

    /// Remove a run, its cloned checklist instance and every completion
    /// key namespaced under that instance. The run row goes first so a
    /// crash mid-archive never leaves a run pointing at freed state.
    #[instrument(skip(self, checklists))]
    pub fn archive(&self, id: &str, checklists: &ChecklistStore) -> Result<()> {
        let run = self
            .get(id)?
            .ok_or_else(|| RunError::NotFound { id: id.into() })?;

        {
            let db = self.db.lock().unwrap();
            db.execute("DELETE FROM runs WHERE id = ?1", [id])?;
        }

        match checklists.delete(&run.instance_key) {
            Ok(()) => {}
            // Already gone: archiving a "removed" run is fine.
            Err(cadence_checklists::ChecklistError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        info!(run_id = %id, "run archived");
        Ok(())
    }

    /// Status update used by complete/reopen and by progress sync.
    pub fn set_status(
        &self,
        id: &str,
        status: RunStatus,
        completed_at: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
            rusqlite::params![status.to_string(), completed_at, id],
        )?;
        if n == 0 {
            return Err(RunError::NotFound { id: id.into() });
        }
        Ok(())
    }
}

/// Map a SELECT row (column order as in `list`) to a Run.
fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let due_str: String = row.get(6)?;
    let status_str: String = row.get(8)?;
    Ok(Run {
        id: row.get(0)?,
        template_id: row.get(1)?,
        template_name: row.get(2)?,
        source_key: row.get(3)?,
        source_name: row.get(4)?,
        instance_key: row.get(5)?,
        due_date: chrono::NaiveDate::parse_from_str(&due_str, "%Y-%m-%d").unwrap_or_default(),
        lead_days: row.get::<_, i64>(7)?.max(0) as u32,
        status: status_str.parse().unwrap_or(RunStatus::Pending),
        manual: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stores() -> (RunRegistry, ChecklistStore) {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        cadence_checklists::db::init_db(&conn).expect("checklist schema");
        crate::db::init_db(&conn).expect("runs schema");
        let db = Arc::new(Mutex::new(conn));
        (RunRegistry::new(Arc::clone(&db)), ChecklistStore::new(db))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed_run(registry: &RunRegistry, checklists: &ChecklistStore, due: NaiveDate) -> Run {
        let instance = cadence_checklists::ChecklistInstance {
            key: format!("clone-{due}"),
            name: format!("QA - Weekly {due}"),
            items: vec!["a".into(), "b".into(), "c".into()],
            meta: Some(cadence_checklists::RunMeta {
                run_id: crate::types::run_id("t1", due),
                template_id: "t1".into(),
                due_date: due,
                generated_at: "2024-01-05T00:00:00Z".into(),
                source_key: "qa".into(),
                lead_days: 2,
            }),
            created_at: "2024-01-05T00:00:00Z".into(),
            updated_at: "2024-01-05T00:00:00Z".into(),
        };
        checklists.insert(&instance).unwrap();
        let run = Run {
            id: crate::types::run_id("t1", due),
            template_id: "t1".into(),
            template_name: "Weekly QA".into(),
            source_key: "qa".into(),
            source_name: "QA".into(),
            instance_key: instance.key,
            due_date: due,
            lead_days: 2,
            status: RunStatus::Pending,
            manual: false,
            created_at: "2024-01-05T00:00:00Z".into(),
            completed_at: None,
        };
        registry.insert(&run).unwrap();
        run
    }

    #[test]
    fn insert_then_exists() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));
        assert!(registry.exists(&run.id).unwrap());
        assert!(!registry.exists("t1:2024-01-15").unwrap());
    }

    #[test]
    fn duplicate_id_is_rejected_by_the_primary_key() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));
        assert!(registry.insert(&run).is_err());
    }

    #[test]
    fn complete_checks_every_item() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));

        let completed = registry.complete(&run.id, &checklists).unwrap();
        assert_eq!(completed.status, RunStatus::Completed);
        assert!(completed.completed_at.is_some());
        for item in ["a", "b", "c"] {
            assert!(checklists.is_checked(&run.instance_key, item).unwrap());
        }
    }

    #[test]
    fn reopen_clears_completed_at_but_keeps_items() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));
        registry.complete(&run.id, &checklists).unwrap();

        let reopened = registry.reopen(&run.id).unwrap();
        assert_eq!(reopened.status, RunStatus::Pending);
        assert!(reopened.completed_at.is_none());
        // Items stay checked; only the status moves.
        assert!(checklists.is_checked(&run.instance_key, "a").unwrap());
    }

    #[test]
    fn archive_removes_run_instance_and_completion() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));
        checklists.set_checked(&run.instance_key, "a", true).unwrap();

        registry.archive(&run.id, &checklists).unwrap();
        assert!(registry.get(&run.id).unwrap().is_none());
        assert!(checklists.get(&run.instance_key).unwrap().is_none());
        assert!(!checklists.is_checked(&run.instance_key, "a").unwrap());
    }

    #[test]
    fn archive_tolerates_an_already_removed_instance() {
        let (registry, checklists) = stores();
        let run = seed_run(&registry, &checklists, date(2024, 1, 8));
        checklists.delete(&run.instance_key).unwrap();
        registry.archive(&run.id, &checklists).unwrap();
        assert!(registry.get(&run.id).unwrap().is_none());
    }

    #[test]
    fn complete_unknown_run_is_not_found() {
        let (registry, checklists) = stores();
        assert!(matches!(
            registry.complete("nope", &checklists).unwrap_err(),
            RunError::NotFound { .. }
        ));
    }

    #[test]
    fn list_is_ordered_by_due_date() {
        let (registry, checklists) = stores();
        seed_run(&registry, &checklists, date(2024, 1, 15));
        seed_run(&registry, &checklists, date(2024, 1, 8));
        seed_run(&registry, &checklists, date(2024, 1, 22));

        let runs = registry.list().unwrap();
        let dues: Vec<NaiveDate> = runs.iter().map(|r| r.due_date).collect();
        assert_eq!(
            dues,
            vec![date(2024, 1, 8), date(2024, 1, 15), date(2024, 1, 22)]
        );
    }
}
