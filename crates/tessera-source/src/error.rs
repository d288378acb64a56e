use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Connection(String),
    InvalidUri(String),
    Query(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Connection(msg) => write!(f, "connection error: {msg}"),
            SourceError::InvalidUri(uri) => write!(f, "invalid connection uri: {uri}"),
            SourceError::Query(msg) => write!(f, "query error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}
