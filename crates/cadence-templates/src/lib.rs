//! `cadence-templates` — recurrence templates that produce checklist runs.
//!
//! A template names a base checklist, a cadence (fixed day-count
//! interval) and a lead window, plus the date of its next occurrence.
//! The scheduler turns due templates into runs; this crate only stores
//! and validates them.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, TemplateError};
pub use store::TemplateStore;
pub use types::{Frequency, Template, TemplateInput};
