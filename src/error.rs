//! Error types for telestore

use std::fmt;

/// Result type alias for telestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for telestore
#[derive(Debug)]
pub enum Error {
    /// No schema registered under the record type name
    SchemaNotFound(String),
    /// A different descriptor is already registered under the same name
    SchemaConflict(String),
    /// The registry was published; new record types can no longer be added
    RegistrySealed(String),
    /// Descriptor failed validation
    InvalidSchema(String),
    /// Record carries a column the schema does not declare
    UnknownColumn { record_type: String, column: String },
    /// Record lacks a value the identity rule needs
    MissingValue { record_type: String, column: String },
    /// Value does not match the declared semantic type
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },
    /// Stored value does not have the declared shape
    Decode { column: String, reason: String },
    /// Backend unreachable or handshake failed
    Connection(String),
    /// Backend marked unhealthy, call rejected without I/O
    Unhealthy(String),
    /// Backend rejected an individual write
    PartialBatchFailure {
        table: String,
        id: String,
        reason: String,
    },
    /// Backend rejected a whole bulk request
    WholeBatchFailure(String),
    /// Submit after shutdown
    PipelineClosed,
    /// Too many batches waiting on the backend; the request was not accepted
    BufferFull,
    /// Merge of two records that cannot be combined
    Merge(String),
    /// Module or service lookup failed
    Module(String),
    /// Configuration errors
    Config(String),
    /// Arrow-related errors
    Arrow(arrow::error::ArrowError),
    /// Parquet-related errors
    Parquet(parquet::errors::ParquetError),
    /// Object store errors
    ObjectStore(object_store::Error),
    /// HTTP client errors
    Http(reqwest::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Timeout
    Timeout,
    /// Internal error
    Internal(String),
}

impl Error {
    /// Errors that say nothing about the payload and everything about the link.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Timeout => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Arrow(e) => Some(e),
            Error::Parquet(e) => Some(e),
            Error::ObjectStore(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SchemaNotFound(name) => write!(f, "Schema not found: {}", name),
            Error::SchemaConflict(name) => {
                write!(f, "Conflicting schema registration for: {}", name)
            }
            Error::RegistrySealed(name) => {
                write!(f, "Schema registry is published, cannot register: {}", name)
            }
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::UnknownColumn {
                record_type,
                column,
            } => write!(f, "Unknown column '{}' for record type {}", column, record_type),
            Error::MissingValue {
                record_type,
                column,
            } => write!(f, "Missing value '{}' for record type {}", column, record_type),
            Error::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(
                f,
                "Type mismatch on column '{}': expected {}, got {}",
                column, expected, actual
            ),
            Error::Decode { column, reason } => {
                write!(f, "Decode error on column '{}': {}", column, reason)
            }
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Unhealthy(backend) => write!(f, "Backend {} is unhealthy", backend),
            Error::PartialBatchFailure { table, id, reason } => {
                write!(f, "Write of {} into {} rejected: {}", id, table, reason)
            }
            Error::WholeBatchFailure(msg) => write!(f, "Bulk write failed: {}", msg),
            Error::PipelineClosed => write!(f, "Write pipeline is closed"),
            Error::BufferFull => write!(f, "Write pipeline backlog is full"),
            Error::Merge(msg) => write!(f, "Merge error: {}", msg),
            Error::Module(msg) => write!(f, "Module error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Arrow(e) => write!(f, "Arrow error: {}", e),
            Error::Parquet(e) => write!(f, "Parquet error: {}", e),
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Arrow(e)
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Parquet(e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_classification() {
        assert!(Error::Connection("refused".into()).is_connection_level());
        assert!(Error::Timeout.is_connection_level());
        assert!(!Error::WholeBatchFailure("400".into()).is_connection_level());
        assert!(!Error::PipelineClosed.is_connection_level());
    }

    #[test]
    fn unknown_column_message_names_column() {
        let err = Error::UnknownColumn {
            record_type: "segment".into(),
            column: "nope".into(),
        };
        assert_eq!(format!("{err}"), "Unknown column 'nope' for record type segment");
    }
}
