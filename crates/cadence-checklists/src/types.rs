use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Provenance metadata attached to instances cloned by the
/// materialization engine. Base instances have no meta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Id of the run this clone backs.
    pub run_id: String,
    /// Template that produced the run.
    pub template_id: String,
    /// Occurrence date the run is due.
    pub due_date: NaiveDate,
    /// RFC3339 timestamp of materialization.
    pub generated_at: String,
    /// Key of the base instance the items were cloned from.
    pub source_key: String,
    /// Lead window copied from the template at materialization time.
    pub lead_days: u32,
}

/// A named, ordered list of checklist item texts.
///
/// Either a base category (editable by the host) or a run clone
/// (`meta` set, owned by its run). Item order is insertion order;
/// duplicate texts are permitted but share completion state, since the
/// completion keyspace is keyed by text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistInstance {
    pub key: String,
    pub name: String,
    pub items: Vec<String>,
    pub meta: Option<RunMeta>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last edit.
    pub updated_at: String,
}

impl ChecklistInstance {
    /// True for instances created by the materialization engine.
    pub fn is_run_instance(&self) -> bool {
        self.meta.is_some()
    }
}
