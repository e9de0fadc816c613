//! Error types for ingestion runs
//!
//! Every failure of a run falls into one of four kinds. None of them is
//! retried here; retry policy belongs to whatever schedules the run.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration is malformed, incomplete or references missing files
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source (database or file) could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Expected columns are missing or carry values of an unusable type
    #[error("Schema error: {0}")]
    Schema(String),

    /// The object store rejected or failed the write
    #[error("Write error: {0}")]
    Write(String),

    /// The run state machine was driven through an illegal transition
    #[error("Invalid run state transition: {from} -> {to}")]
    State { from: &'static str, to: &'static str },
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }

    /// Stable machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection(_) => "connection",
            Self::Schema(_) => "schema",
            Self::Write(_) => "write",
            Self::State { .. } => "state",
        }
    }

    /// Process exit code (sysexits.h)
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,     // EX_CONFIG
            Self::Connection(_) => 69, // EX_UNAVAILABLE
            Self::Schema(_) => 65,     // EX_DATAERR
            Self::Write(_) => 74,      // EX_IOERR
            Self::State { .. } => 70,  // EX_SOFTWARE
        }
    }
}

impl From<serde_yaml::Error> for IngestError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("invalid YAML: {err}"))
    }
}

impl From<arrow::error::ArrowError> for IngestError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Schema(format!("cannot build columnar batch: {err}"))
    }
}

impl From<parquet::errors::ParquetError> for IngestError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::Write(format!("parquet encoding failed: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_exits_non_zero() {
        let errors = [
            IngestError::config("missing bucket"),
            IngestError::connection("refused"),
            IngestError::schema("no created_at"),
            IngestError::write("403"),
            IngestError::State {
                from: "completed",
                to: "writing",
            },
        ];

        for err in &errors {
            assert_ne!(err.exit_code(), 0, "{} must exit non-zero", err.kind());
        }
    }

    #[test]
    fn test_messages_name_the_kind() {
        assert_eq!(
            IngestError::schema("column 'created_at' not found").to_string(),
            "Schema error: column 'created_at' not found"
        );
        assert_eq!(IngestError::connection("refused").kind(), "connection");
    }
}
