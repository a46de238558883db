//! `cadence-scheduler` — materialization engine and progress sync.
//!
//! # Overview
//!
//! The engine turns due templates into runs, exactly once per
//! occurrence. Every tick it re-checks each template against the lead
//! window (`next_due - lead_days`), clones the source checklist into a
//! fresh instance, records the run and advances the template's due
//! date. The deterministic run id makes re-evaluation harmless.
//!
//! Progress sync is the other half of the loop: it recomputes each
//! run's checklist progress and moves run status to match, in both
//! directions (all items checked completes the run; unchecking one
//! reopens it).

pub mod engine;
pub mod error;
pub mod sync;

pub use engine::{Engine, MaterializeFailure, TickReport};
pub use error::{Result, SchedulerError};
pub use sync::reconcile;
