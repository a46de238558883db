//! `cadence-core` — shared config, id types and top-level error.

pub mod config;
pub mod error;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use types::{InstanceKey, TemplateId};
