use std::fmt;

use crate::error::SchemaError;

/// Policy for documents whose field types disagree with the declared schema.
/// Only enforced when the schema was supplied explicitly (columns parameter
/// or sidecar document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Replace mismatching cells with NULL, keep the row.
    #[default]
    Permissive,
    /// Drop any row with a mismatching cell.
    DropMalformed,
    /// Raise on the first mismatch.
    FailFast,
}

impl SchemaMode {
    /// Case-insensitive; underscore variants accepted.
    pub fn parse(input: &str) -> Result<SchemaMode, SchemaError> {
        match input.to_ascii_lowercase().as_str() {
            "permissive" => Ok(SchemaMode::Permissive),
            "dropmalformed" | "drop_malformed" => Ok(SchemaMode::DropMalformed),
            "failfast" | "fail_fast" => Ok(SchemaMode::FailFast),
            _ => Err(SchemaError::InvalidMode(input.to_string())),
        }
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMode::Permissive => write!(f, "permissive"),
            SchemaMode::DropMalformed => write!(f, "dropmalformed"),
            SchemaMode::FailFast => write!(f, "failfast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_variants() {
        assert_eq!(SchemaMode::parse("PERMISSIVE").unwrap(), SchemaMode::Permissive);
        assert_eq!(
            SchemaMode::parse("drop_malformed").unwrap(),
            SchemaMode::DropMalformed
        );
        assert_eq!(SchemaMode::parse("FailFast").unwrap(), SchemaMode::FailFast);
        assert!(SchemaMode::parse("strict").is_err());
    }

    #[test]
    fn display_round_trip() {
        for mode in [
            SchemaMode::Permissive,
            SchemaMode::DropMalformed,
            SchemaMode::FailFast,
        ] {
            assert_eq!(SchemaMode::parse(&mode.to_string()).unwrap(), mode);
        }
    }
}
