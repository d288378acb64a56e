use std::fmt;

use tessera_batch::MaterializeError;
use tessera_schema::SchemaError;
use tessera_source::SourceError;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
    InvalidInput(String),
    Binder(String),
    NotImplemented(String),
    SchemaViolation {
        doc_id: String,
        field: String,
        expected: String,
        found: String,
    },
    Source(SourceError),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ScanError::Binder(msg) => write!(f, "binder error: {msg}"),
            ScanError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            ScanError::SchemaViolation {
                doc_id,
                field,
                expected,
                found,
            } => write!(
                f,
                "Schema violation in document _id='{doc_id}': Field '{field}' expected type \
                 {expected} but found {found}.\nHint: Use schema_mode='permissive' to replace \
                 with NULL, or 'dropmalformed' to skip bad rows."
            ),
            ScanError::Source(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<SourceError> for ScanError {
    fn from(e: SourceError) -> Self {
        ScanError::Source(e)
    }
}

impl From<SchemaError> for ScanError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::Source(inner) => ScanError::Source(inner),
            other => ScanError::InvalidInput(other.to_string()),
        }
    }
}

impl From<MaterializeError> for ScanError {
    fn from(e: MaterializeError) -> Self {
        match e {
            MaterializeError::SchemaViolation {
                doc_id,
                field,
                expected,
                found,
            } => ScanError::SchemaViolation {
                doc_id,
                field,
                expected,
                found,
            },
        }
    }
}
