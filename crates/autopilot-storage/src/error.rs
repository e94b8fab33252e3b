//! Error types for the storage layer.

/// Errors from the persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
    #[error("Storage lock poisoned")]
    LockPoisoned,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}
