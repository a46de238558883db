use thiserror::Error;

/// Errors that can occur during run-registry operations.
#[derive(Debug, Error)]
pub enum RunError {
    /// No run with the given id exists.
    #[error("run not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A checklist side effect (bulk check, archive cleanup) failed.
    #[error(transparent)]
    Checklist(#[from] cadence_checklists::ChecklistError),
}

pub type Result<T> = std::result::Result<T, RunError>;
