use tessera_schema::ColumnType;

use crate::cell::Cell;

/// Rows produced per `next` call.
pub const BATCH_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct Column {
    ty: ColumnType,
    cells: Vec<Cell>,
}

/// A fixed-capacity columnar output slot.
///
/// Every cell starts as `Null`, so a partially filled row never exposes
/// stale values. `len` is the row cursor the producer advances.
#[derive(Debug, Clone)]
pub struct Batch {
    columns: Vec<Column>,
    capacity: usize,
    len: usize,
}

impl Batch {
    pub fn new(types: &[ColumnType]) -> Self {
        Self::with_capacity(types, BATCH_SIZE)
    }

    pub fn with_capacity(types: &[ColumnType], capacity: usize) -> Self {
        let columns = types
            .iter()
            .map(|ty| Column {
                ty: ty.clone(),
                cells: vec![Cell::Null; capacity],
            })
            .collect();
        Batch {
            columns,
            capacity,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_type(&self, column: usize) -> &ColumnType {
        &self.columns[column].ty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len;
    }

    pub fn set(&mut self, column: usize, row: usize, cell: Cell) {
        self.columns[column].cells[row] = cell;
    }

    pub fn cell(&self, column: usize, row: usize) -> &Cell {
        &self.columns[column].cells[row]
    }

    /// Reset for reuse: every cell back to `Null`, row cursor to zero.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            for cell in &mut column.cells {
                *cell = Cell::Null;
            }
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_start_null() {
        let batch = Batch::with_capacity(&[ColumnType::Varchar, ColumnType::Bigint], 4);
        assert_eq!(batch.column_count(), 2);
        assert_eq!(batch.capacity(), 4);
        assert!(batch.cell(0, 3).is_null());
    }

    #[test]
    fn clear_resets_cells_and_len() {
        let mut batch = Batch::with_capacity(&[ColumnType::Bigint], 2);
        batch.set(0, 0, Cell::Bigint(7));
        batch.set_len(1);
        batch.clear();
        assert_eq!(batch.len(), 0);
        assert!(batch.cell(0, 0).is_null());
    }
}
