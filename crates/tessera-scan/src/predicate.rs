use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tessera_batch::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A predicate the engine pushed down against a single column.
#[derive(Debug, Clone)]
pub enum TableFilter {
    Comparison { op: CompareOp, value: Cell },
    In(Vec<Cell>),
    IsNull,
    IsNotNull,
    And(Vec<TableFilter>),
    Or(Vec<TableFilter>),
    /// A filter on a field inside a STRUCT column.
    StructField {
        child: String,
        filter: Box<TableFilter>,
    },
    /// A best-effort filter the engine may also re-check itself.
    Optional(Box<TableFilter>),
    /// A filter whose constant materializes at runtime (semi-join pushdown).
    /// Translated only once the slot is populated.
    Dynamic(Arc<Mutex<Option<TableFilter>>>),
}

impl TableFilter {
    pub fn eq(value: Cell) -> TableFilter {
        TableFilter::Comparison {
            op: CompareOp::Eq,
            value,
        }
    }
}

/// Pushed filters keyed by schema column index.
#[derive(Debug, Clone, Default)]
pub struct TableFilterSet {
    pub filters: BTreeMap<usize, TableFilter>,
}

impl TableFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: usize, filter: TableFilter) {
        self.filters.insert(column, filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn column_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.filters.keys().copied()
    }
}
