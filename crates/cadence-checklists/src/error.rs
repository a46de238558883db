use thiserror::Error;

/// Errors that can occur during checklist and keyspace operations.
#[derive(Debug, Error)]
pub enum ChecklistError {
    /// No instance with the given key exists.
    #[error("checklist instance not found: {key}")]
    NotFound { key: String },

    /// An instance with the given key already exists.
    #[error("checklist instance already exists: {key}")]
    AlreadyExists { key: String },

    /// The display name is empty or produces an empty key.
    #[error("invalid checklist name: {0}")]
    InvalidName(String),

    /// An item index is outside the instance's item list.
    #[error("item index {index} out of range (instance has {len} items)")]
    InvalidIndex { index: usize, len: usize },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ChecklistError>;
