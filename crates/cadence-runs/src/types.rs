use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Work remains (or the run was reopened).
    Pending,
    /// Every item checked, or explicitly completed.
    Completed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "completed" => Ok(RunStatus::Completed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Deterministic run id for a `(template, due date)` occurrence.
///
/// Template ids are UUIDs (no `:` in their alphabet) and the date is
/// `YYYY-MM-DD`, so the mapping is injective: the same occurrence
/// always derives the same id and two occurrences never collide.
pub fn run_id(template_id: &str, due_date: NaiveDate) -> String {
    format!("{template_id}:{due_date}")
}

/// A persisted run record.
///
/// Provenance fields (`template_name`, `source_name`, `lead_days`) are
/// captured at materialization time and never rewritten when the
/// template is later edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// `<template id>:<due date>` — the idempotency key.
    pub id: String,
    pub template_id: String,
    pub template_name: String,
    /// Base instance the checklist was cloned from.
    pub source_key: String,
    pub source_name: String,
    /// Cloned instance holding this run's working checklist. May stop
    /// resolving if external collaborators delete the instance; such a
    /// "removed" run is still listed but not openable.
    pub instance_key: String,
    pub due_date: NaiveDate,
    pub lead_days: u32,
    pub status: RunStatus,
    /// True when created via an explicit "generate now" action rather
    /// than the automatic lead-threshold crossing.
    pub manual: bool,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 completion timestamp; `None` while pending.
    pub completed_at: Option<String>,
}

impl Run {
    /// Derived, never stored: pending and past its due date.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != RunStatus::Completed && self.due_date < today
    }
}
