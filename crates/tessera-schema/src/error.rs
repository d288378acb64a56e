use std::fmt;

use tessera_source::SourceError;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    UnknownType(String),
    InvalidMode(String),
    InvalidColumns(String),
    Source(SourceError),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnknownType(name) => write!(f, "unknown column type: {name}"),
            SchemaError::InvalidMode(mode) => write!(
                f,
                "invalid schema_mode '{mode}'. Valid options: 'permissive', 'dropmalformed', 'failfast'"
            ),
            SchemaError::InvalidColumns(msg) => write!(f, "invalid columns parameter: {msg}"),
            SchemaError::Source(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<SourceError> for SchemaError {
    fn from(e: SourceError) -> Self {
        SchemaError::Source(e)
    }
}
