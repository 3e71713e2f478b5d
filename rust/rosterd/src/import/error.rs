use thiserror::Error;

/// Failures that reject a whole request before any row is processed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file type '{0}': expected .csv, .xlsx, .xls, .xlsm or .ods")]
    UnsupportedFormat(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} input: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Failures confined to one input row. `Display` is the report cause.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("Invalid {field} '{value}': expected one of male, female, other")]
    InvalidEnumValue { field: &'static str, value: String },

    #[error("{0}")]
    Validation(String),

    #[error("Duplicate record (email or roll/admission already exists)")]
    Duplicate,

    #[error("identifier space exhausted: {0}")]
    IdentifierSpaceExhausted(String),

    #[error("UNIQUE constraint failed: students.{0}")]
    Constraint(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for RowError {
    fn from(e: rusqlite::Error) -> Self {
        RowError::Storage(e.to_string())
    }
}
