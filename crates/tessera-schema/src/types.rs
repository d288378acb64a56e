use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// The closed column type algebra presented to the SQL engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    Varchar,
    Bigint,
    Hugeint,
    Double,
    Boolean,
    Date,
    Timestamp,
    Blob,
    List(Box<ColumnType>),
    Struct(Vec<(String, ColumnType)>),
}

impl ColumnType {
    /// Number of `List` wrappers around the innermost type.
    pub fn list_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let ColumnType::List(child) = current {
            depth += 1;
            current = child;
        }
        depth
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, ColumnType::List(_) | ColumnType::Struct(_))
    }

    /// Parse a type string. Case-insensitive; accepts common aliases,
    /// a `T[]` suffix, `LIST(T)`, and `STRUCT(name T, ...)`.
    pub fn parse(input: &str) -> Result<ColumnType, SchemaError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SchemaError::UnknownType(input.to_string()));
        }

        if let Some(inner) = trimmed.strip_suffix("[]") {
            return Ok(ColumnType::List(Box::new(ColumnType::parse(inner)?)));
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(inner) = strip_wrapper(&upper, trimmed, "LIST") {
            return Ok(ColumnType::List(Box::new(ColumnType::parse(inner)?)));
        }
        if let Some(inner) = strip_wrapper(&upper, trimmed, "STRUCT") {
            return parse_struct_fields(inner);
        }

        match upper.as_str() {
            "VARCHAR" | "TEXT" | "STRING" => Ok(ColumnType::Varchar),
            "BIGINT" | "INT" | "INTEGER" | "INT8" | "LONG" => Ok(ColumnType::Bigint),
            "HUGEINT" => Ok(ColumnType::Hugeint),
            "DOUBLE" | "FLOAT" | "REAL" => Ok(ColumnType::Double),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "DATE" => Ok(ColumnType::Date),
            "TIMESTAMP" | "DATETIME" => Ok(ColumnType::Timestamp),
            "BLOB" | "BYTEA" => Ok(ColumnType::Blob),
            _ => Err(SchemaError::UnknownType(trimmed.to_string())),
        }
    }
}

/// If `upper` looks like `WRAPPER(...)`, return the original-cased inner text.
fn strip_wrapper<'a>(upper: &str, original: &'a str, wrapper: &str) -> Option<&'a str> {
    let prefix = format!("{wrapper}(");
    if upper.starts_with(&prefix) && upper.ends_with(')') {
        Some(&original[prefix.len()..original.len() - 1])
    } else {
        None
    }
}

fn parse_struct_fields(inner: &str) -> Result<ColumnType, SchemaError> {
    let mut fields = Vec::new();
    for part in split_top_level(inner) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, type_str) = part
            .split_once(char::is_whitespace)
            .ok_or_else(|| SchemaError::UnknownType(format!("STRUCT({inner})")))?;
        fields.push((name.trim().to_string(), ColumnType::parse(type_str)?));
    }
    if fields.is_empty() {
        return Err(SchemaError::UnknownType(format!("STRUCT({inner})")));
    }
    Ok(ColumnType::Struct(fields))
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar => write!(f, "VARCHAR"),
            ColumnType::Bigint => write!(f, "BIGINT"),
            ColumnType::Hugeint => write!(f, "HUGEINT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::Blob => write!(f, "BLOB"),
            ColumnType::List(child) => write!(f, "LIST({child})"),
            ColumnType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
        }
    }
}
