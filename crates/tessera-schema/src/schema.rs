use std::collections::HashMap;

use crate::types::ColumnType;

/// The relational shape of a collection, produced once per scan bind.
///
/// `column_names` and `column_types` are parallel; `path_map` maps every
/// column name to the dotted document path it reads from. Flattened nested
/// columns use `_` in the name (`address_city`) and keep the real path
/// (`address.city`) in the map; document reads always go through the map.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    pub path_map: HashMap<String, String>,
}

impl ResolvedSchema {
    pub fn len(&self) -> usize {
        self.column_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column_names.is_empty()
    }

    /// The document path for a column: the registered mapping, or the name
    /// itself when no mapping exists.
    pub fn path_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.path_map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }
}
