use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Business data column is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored raw bytes could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A column held a value outside its domain, e.g. an unknown state name
    #[error("Corrupt column {column}: {value}")]
    CorruptColumn { column: String, value: String },

    /// A record with this message id already exists
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn corrupt(column: &str, value: impl Into<String>) -> Self {
        StorageError::CorruptColumn {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

/// Storage failures surface to the lifecycle as retryable `STORAGE_ERROR`s.
impl From<StorageError> for devcomm_core::Error {
    fn from(err: StorageError) -> Self {
        devcomm_core::Error::Storage(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
