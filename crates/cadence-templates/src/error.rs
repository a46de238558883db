use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Bad form input. Nothing was mutated.
    #[error("invalid template: {0}")]
    Validation(String),

    /// No template with the given id exists.
    #[error("template not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Source-instance lookup failed at the storage layer.
    #[error(transparent)]
    Checklist(#[from] cadence_checklists::ChecklistError),
}

pub type Result<T> = std::result::Result<T, TemplateError>;
