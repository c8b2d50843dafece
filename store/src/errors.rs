use thiserror::Error;

/// A result type for table store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// An error when reading or writing the table store
#[derive(Error, Debug)]
pub enum StoreError {
    /// When the store root is not usable as a directory
    #[error("Invalid store path: {0}")]
    InvalidPath(String),
    /// When a table name contains forbidden characters
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),
    /// When a table is not found
    #[error("Table not found: {0}")]
    TableNotFound(String),
    /// When appended rows do not follow the table schema
    #[error("Schema mismatch for table '{table}': {reason}")]
    SchemaMismatch {
        /// table name
        table: String,
        /// mismatch description
        reason: String,
    },
    /// When a column is not found in a table
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    /// When stored data cannot be decoded
    #[error("Corrupted table '{table}': {reason}")]
    Corrupted {
        /// table name
        table: String,
        /// decoding failure
        reason: String,
    },
    /// When bincode encoding fails
    #[error("Binary encoding error")]
    BinaryError(#[from] bincode::Error),
    /// When json (de)serialization fails
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
