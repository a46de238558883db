use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::sync::reconcile;
use cadence_checklists::{ChecklistInstance, ChecklistStore, RunMeta};
use cadence_core::types::InstanceKey;
use cadence_runs::{run_id, Run, RunRegistry, RunStatus};
use cadence_templates::{Template, TemplateStore};

/// One template the engine could not materialize this tick. The
/// template's due date is left untouched so it is retried next tick.
#[derive(Debug, Clone)]
pub struct MaterializeFailure {
    pub template_id: String,
    pub template_name: String,
    pub reason: String,
}

/// Outcome of one `evaluate` pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub created: Vec<Run>,
    pub failures: Vec<MaterializeFailure>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.created.is_empty() && self.failures.is_empty()
    }
}

/// The materialization engine: converts due templates into runs,
/// exactly once each.
///
/// All work is synchronous; `run` only wraps `evaluate` + `reconcile`
/// in a tokio interval loop the way the host drives it.
pub struct Engine {
    checklists: Arc<ChecklistStore>,
    templates: Arc<TemplateStore>,
    runs: Arc<RunRegistry>,
}

impl Engine {
    pub fn new(
        checklists: Arc<ChecklistStore>,
        templates: Arc<TemplateStore>,
        runs: Arc<RunRegistry>,
    ) -> Self {
        Self {
            checklists,
            templates,
            runs,
        }
    }

    /// Re-check every template against `now` and materialize whatever
    /// has entered its lead window.
    ///
    /// Per-template failures (usually a source instance deleted after
    /// the template was created) are collected in the report and never
    /// abort the pass; the failing template keeps its due date and is
    /// retried next tick.
    pub fn evaluate(&self, now: NaiveDate) -> Result<TickReport> {
        let mut report = TickReport::default();

        for template in self.templates.list()? {
            if now < template.lead_threshold() {
                continue;
            }

            // Idempotency guard: this occurrence was already materialized.
            let id = run_id(&template.id, template.next_due);
            if self.runs.exists(&id)? {
                debug!(run_id = %id, "occurrence already materialized, skipping");
                continue;
            }

            match self.materialize(&template, false) {
                Ok(run) => report.created.push(run),
                Err(SchedulerError::SourceMissing {
                    template_id,
                    source_key,
                }) => {
                    warn!(
                        template_id = %template_id,
                        source_key = %source_key,
                        "source instance missing, template skipped this tick"
                    );
                    report.failures.push(MaterializeFailure {
                        template_id,
                        template_name: template.name.clone(),
                        reason: format!("source instance missing: {source_key}"),
                    });
                }
                Err(e) => {
                    warn!(template_id = %template.id, "materialization failed: {e}");
                    report.failures.push(MaterializeFailure {
                        template_id: template.id.clone(),
                        template_name: template.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Force materialization of a template's current occurrence,
    /// ignoring the lead window. Still idempotent: returns `None` when
    /// the occurrence already has a run.
    pub fn generate_now(&self, template_id: &str) -> Result<Option<Run>> {
        let template = self
            .templates
            .get(template_id)?
            .ok_or_else(|| SchedulerError::TemplateNotFound {
                id: template_id.into(),
            })?;

        let id = run_id(&template.id, template.next_due);
        if self.runs.exists(&id)? {
            debug!(run_id = %id, "occurrence already materialized, nothing to generate");
            return Ok(None);
        }
        self.materialize(&template, true).map(Some)
    }

    /// Clone the source checklist, record the run, advance the due date.
    ///
    /// Write order matters: the cloned instance is persisted before the
    /// run record that references it, so a crash between the two leaves
    /// at worst an orphan instance (swept by `cleanup_orphans`), never
    /// a run pointing at a nonexistent checklist.
    fn materialize(&self, template: &Template, manual: bool) -> Result<Run> {
        let source = self
            .checklists
            .get(&template.source_key)?
            .ok_or_else(|| SchedulerError::SourceMissing {
                template_id: template.id.clone(),
                source_key: template.source_key.clone(),
            })?;

        let due = template.next_due;
        let id = run_id(&template.id, due);
        let now_ts = Utc::now().to_rfc3339();

        let clone = ChecklistInstance {
            key: InstanceKey::fresh().0,
            name: format!("{} - {} {}", source.name, template.name, due),
            items: source.items.clone(),
            meta: Some(RunMeta {
                run_id: id.clone(),
                template_id: template.id.clone(),
                due_date: due,
                generated_at: now_ts.clone(),
                source_key: template.source_key.clone(),
                lead_days: template.lead_days,
            }),
            created_at: now_ts.clone(),
            updated_at: now_ts.clone(),
        };
        self.checklists.insert(&clone)?;

        let run = Run {
            id: id.clone(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            source_key: template.source_key.clone(),
            source_name: source.name.clone(),
            instance_key: clone.key.clone(),
            due_date: due,
            lead_days: template.lead_days,
            status: RunStatus::Pending,
            manual,
            created_at: now_ts,
            completed_at: None,
        };
        self.runs.insert(&run)?;

        let next = due + chrono::Duration::days(template.frequency.days());
        self.templates.advance_next_due(&template.id, next)?;

        info!(
            run_id = %id,
            template_id = %template.id,
            due = %due,
            manual,
            "run materialized"
        );
        Ok(run)
    }

    /// Startup sweep: delete run clones whose run record never landed
    /// (crash between the two materialization writes, or between the
    /// two archive deletes). Call before the tick loop starts.
    pub fn cleanup_orphans(&self) -> Result<usize> {
        let mut removed = 0;
        for instance in self.checklists.list()? {
            if let Some(meta) = &instance.meta {
                if !self.runs.exists(&meta.run_id)? {
                    self.checklists.delete(&instance.key)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            warn!(count = removed, "orphan run instances removed");
        }
        Ok(removed)
    }

    /// Tick loop: evaluate + reconcile every `tick` until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, tick: Duration) {
        info!(tick_secs = tick.as_secs(), "scheduler loop started");
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let today = Utc::now().date_naive();
                    match self.evaluate(today) {
                        Ok(report) if !report.is_quiet() => {
                            info!(
                                created = report.created.len(),
                                failed = report.failures.len(),
                                "evaluation pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("evaluation pass failed: {e}"),
                    }
                    match reconcile(&self.checklists, &self.runs) {
                        Ok(0) => {}
                        Ok(n) => info!(transitions = n, "run status reconciled"),
                        Err(e) => error!("reconcile pass failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_templates::TemplateInput;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        engine: Engine,
        checklists: Arc<ChecklistStore>,
        templates: Arc<TemplateStore>,
        runs: Arc<RunRegistry>,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        cadence_checklists::db::init_db(&conn).expect("checklist schema");
        cadence_templates::db::init_db(&conn).expect("template schema");
        cadence_runs::db::init_db(&conn).expect("runs schema");
        let db = Arc::new(Mutex::new(conn));
        let checklists = Arc::new(ChecklistStore::new(Arc::clone(&db)));
        let templates = Arc::new(TemplateStore::new(Arc::clone(&db)));
        let runs = Arc::new(RunRegistry::new(db));
        Fixture {
            engine: Engine::new(
                Arc::clone(&checklists),
                Arc::clone(&templates),
                Arc::clone(&runs),
            ),
            checklists,
            templates,
            runs,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Base checklist "QA" with five items plus a weekly template with a
    /// two-day lead window due 2024-01-08.
    fn seed_weekly(f: &Fixture) -> Template {
        f.checklists.create("QA").unwrap();
        for item in ["a", "b", "c", "d", "e"] {
            f.checklists.add_item("qa", item).unwrap();
        }
        f.templates
            .create(
                &TemplateInput {
                    name: "Weekly QA".into(),
                    source_key: "qa".into(),
                    frequency: "weekly".into(),
                    lead_days: 2,
                    next_due: "2024-01-08".into(),
                },
                &f.checklists,
            )
            .unwrap()
    }

    #[test]
    fn materializes_inside_lead_window() {
        let f = fixture();
        let template = seed_weekly(&f);

        let report = f.engine.evaluate(date(2024, 1, 6)).unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.failures.is_empty());

        let run = &report.created[0];
        assert_eq!(run.due_date, date(2024, 1, 8));
        assert_eq!(run.status, RunStatus::Pending);
        assert!(!run.manual);
        assert_eq!(run.template_name, "Weekly QA");

        // The clone carries the source items and the run metadata.
        let clone = f.checklists.get(&run.instance_key).unwrap().unwrap();
        assert_eq!(clone.items, vec!["a", "b", "c", "d", "e"]);
        assert!(clone.name.contains("Weekly QA"));
        assert!(clone.name.contains("2024-01-08"));
        let meta = clone.meta.unwrap();
        assert_eq!(meta.run_id, run.id);
        assert_eq!(meta.lead_days, 2);

        // Due date advanced by exactly one cadence.
        let after = f.templates.get(&template.id).unwrap().unwrap();
        assert_eq!(after.next_due, date(2024, 1, 15));
    }

    #[test]
    fn skips_before_lead_threshold() {
        let f = fixture();
        let template = seed_weekly(&f);

        // Threshold is Jan 6 (due Jan 8, lead 2); Jan 5 is too early.
        let report = f.engine.evaluate(date(2024, 1, 5)).unwrap();
        assert!(report.created.is_empty());
        assert!(f.runs.list().unwrap().is_empty());
        let t = f.templates.get(&template.id).unwrap().unwrap();
        assert_eq!(t.next_due, date(2024, 1, 8));
    }

    #[test]
    fn run_exists_exactly_from_the_threshold_date() {
        let f = fixture();
        seed_weekly(&f);
        assert!(f.engine.evaluate(date(2024, 1, 5)).unwrap().created.is_empty());
        assert_eq!(f.engine.evaluate(date(2024, 1, 6)).unwrap().created.len(), 1);
    }

    #[test]
    fn reevaluation_never_duplicates_an_occurrence() {
        let f = fixture();
        let template = seed_weekly(&f);

        assert_eq!(f.engine.evaluate(date(2024, 1, 6)).unwrap().created.len(), 1);

        // Wind the template back to the same occurrence, as a form edit
        // would: the existing run id must block a second materialization.
        f.templates
            .advance_next_due(&template.id, date(2024, 1, 8))
            .unwrap();
        let again = f.engine.evaluate(date(2024, 1, 7)).unwrap();
        assert!(again.created.is_empty());
        assert!(again.failures.is_empty());
        assert_eq!(f.runs.list().unwrap().len(), 1);
    }

    #[test]
    fn catches_up_one_occurrence_per_pass() {
        let f = fixture();
        let template = seed_weekly(&f);

        // Far in the future: each pass materializes the current
        // occurrence and advances once.
        let now = date(2024, 1, 20);
        assert_eq!(f.engine.evaluate(now).unwrap().created[0].due_date, date(2024, 1, 8));
        assert_eq!(f.engine.evaluate(now).unwrap().created[0].due_date, date(2024, 1, 15));
        assert_eq!(f.engine.evaluate(now).unwrap().created[0].due_date, date(2024, 1, 22));
        // Next occurrence (Jan 29, threshold Jan 27) is out of reach.
        assert!(f.engine.evaluate(now).unwrap().created.is_empty());
        assert_eq!(
            f.templates.get(&template.id).unwrap().unwrap().next_due,
            date(2024, 1, 29)
        );
    }

    #[test]
    fn missing_source_is_nonfatal_and_leaves_the_template_retryable() {
        let f = fixture();
        let broken = seed_weekly(&f);

        // A healthy second template on its own checklist.
        f.checklists.create("Ops").unwrap();
        f.checklists.add_item("ops", "rotate logs").unwrap();
        f.templates
            .create(
                &TemplateInput {
                    name: "Daily ops".into(),
                    source_key: "ops".into(),
                    frequency: "daily".into(),
                    lead_days: 0,
                    next_due: "2024-01-06".into(),
                },
                &f.checklists,
            )
            .unwrap();

        // Source of the first template disappears after creation.
        f.checklists.delete("qa").unwrap();

        let report = f.engine.evaluate(date(2024, 1, 6)).unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].template_name, "Daily ops");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].template_id, broken.id);

        // Not advanced: eligible for retry once the source returns.
        let t = f.templates.get(&broken.id).unwrap().unwrap();
        assert_eq!(t.next_due, date(2024, 1, 8));

        // Restoring the source heals it on the next tick.
        f.checklists.create("QA").unwrap();
        let retry = f.engine.evaluate(date(2024, 1, 6)).unwrap();
        assert_eq!(retry.created.len(), 1);
        assert!(retry.failures.is_empty());
    }

    #[test]
    fn deleting_the_base_instance_leaves_existing_runs_intact() {
        let f = fixture();
        seed_weekly(&f);
        let run = f.engine.evaluate(date(2024, 1, 6)).unwrap().created[0].clone();

        f.checklists.delete("qa").unwrap();

        // The run and its clone are independent of the base instance.
        assert!(f.runs.get(&run.id).unwrap().is_some());
        let clone = f.checklists.get(&run.instance_key).unwrap().unwrap();
        assert_eq!(clone.items.len(), 5);
    }

    #[test]
    fn generate_now_ignores_the_lead_window_and_marks_manual() {
        let f = fixture();
        let template = seed_weekly(&f);

        // Well before the threshold, forcing still works.
        let run = f.engine.generate_now(&template.id).unwrap().unwrap();
        assert!(run.manual);
        assert_eq!(run.due_date, date(2024, 1, 8));
        assert_eq!(
            f.templates.get(&template.id).unwrap().unwrap().next_due,
            date(2024, 1, 15)
        );
    }

    #[test]
    fn generate_now_respects_the_idempotency_guard() {
        let f = fixture();
        let template = seed_weekly(&f);
        f.engine.generate_now(&template.id).unwrap().unwrap();

        f.templates
            .advance_next_due(&template.id, date(2024, 1, 8))
            .unwrap();
        assert!(f.engine.generate_now(&template.id).unwrap().is_none());
        assert_eq!(f.runs.list().unwrap().len(), 1);
    }

    #[test]
    fn generate_now_unknown_template_errors() {
        let f = fixture();
        assert!(matches!(
            f.engine.generate_now("nope").unwrap_err(),
            SchedulerError::TemplateNotFound { .. }
        ));
    }

    #[test]
    fn templates_sharing_a_source_clone_independently() {
        let f = fixture();
        seed_weekly(&f);
        f.templates
            .create(
                &TemplateInput {
                    name: "Monthly deep pass".into(),
                    source_key: "qa".into(),
                    frequency: "monthly".into(),
                    lead_days: 2,
                    next_due: "2024-01-08".into(),
                },
                &f.checklists,
            )
            .unwrap();

        let report = f.engine.evaluate(date(2024, 1, 6)).unwrap();
        assert_eq!(report.created.len(), 2);
        assert_ne!(report.created[0].instance_key, report.created[1].instance_key);
        assert_ne!(report.created[0].id, report.created[1].id);
    }

    #[test]
    fn cleanup_removes_clones_without_a_run_record() {
        let f = fixture();
        seed_weekly(&f);
        let run = f.engine.evaluate(date(2024, 1, 6)).unwrap().created[0].clone();

        // Simulate the crash window: a clone whose run row never landed.
        let orphan = ChecklistInstance {
            key: "orphan-clone".into(),
            name: "QA - Weekly QA 2024-01-15".into(),
            items: vec!["a".into()],
            meta: Some(RunMeta {
                run_id: "t-gone:2024-01-15".into(),
                template_id: "t-gone".into(),
                due_date: date(2024, 1, 15),
                generated_at: "2024-01-13T00:00:00Z".into(),
                source_key: "qa".into(),
                lead_days: 2,
            }),
            created_at: "2024-01-13T00:00:00Z".into(),
            updated_at: "2024-01-13T00:00:00Z".into(),
        };
        f.checklists.insert(&orphan).unwrap();

        assert_eq!(f.engine.cleanup_orphans().unwrap(), 1);
        assert!(f.checklists.get("orphan-clone").unwrap().is_none());
        // The healthy clone and base instance survive.
        assert!(f.checklists.get(&run.instance_key).unwrap().is_some());
        assert!(f.checklists.get("qa").unwrap().is_some());
    }
}
