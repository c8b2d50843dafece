use thiserror::Error;

/// A result type for frame operations
pub type Result<T> = std::result::Result<T, FrameError>;

/// An error when building, reading or filtering a [`Frame`](crate::Frame)
#[derive(Error, Debug)]
pub enum FrameError {
    /// When a column is not found
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    /// When a column name is given twice
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),
    /// When data dimensions do not match column names
    #[error("Shape error: {0}")]
    ShapeError(String),
    /// When an ndarray shape error occurs
    #[error(transparent)]
    NdarrayShapeError(#[from] ndarray::ShapeError),
    /// When a comparator string is not understood
    #[error("Invalid comparator: {0}")]
    InvalidComparator(String),
    /// When a csv value cannot be parsed as a float
    #[error("Parse error at line {line}, column '{column}': {value}")]
    ParseError {
        /// line in the source file
        line: u64,
        /// column name
        column: String,
        /// raw value
        value: String,
    },
    /// When csv reading fails
    #[error("CSV error")]
    CsvError(#[from] csv::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
