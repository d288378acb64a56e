use serde::{Deserialize, Serialize};

/// A single materialized value in a columnar batch.
///
/// Dates are days since the Unix epoch, timestamps are microseconds since
/// the Unix epoch, matching the engine-side representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Varchar(String),
    Bigint(i64),
    Hugeint(i128),
    Double(f64),
    Boolean(bool),
    Date(i32),
    Timestamp(i64),
    Blob(Vec<u8>),
    List(Vec<Cell>),
    Struct(Vec<(String, Cell)>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Varchar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Bigint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Double(v) => Some(*v),
            _ => None,
        }
    }
}
