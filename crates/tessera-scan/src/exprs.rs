use tessera_batch::Cell;
use tessera_schema::ColumnType;

use crate::predicate::CompareOp;

/// Bound scalar expressions as handed over by the engine's planner.
/// Only the shapes the pushdown layers inspect are modeled.
#[derive(Debug, Clone)]
pub enum ScalarExpr {
    ColumnRef {
        table_index: usize,
        column_index: usize,
        ty: ColumnType,
    },
    Constant(Cell),
    Cast {
        child: Box<ScalarExpr>,
        ty: ColumnType,
    },
    Function {
        name: String,
        args: Vec<ScalarExpr>,
        ty: ColumnType,
        volatile: bool,
        can_throw: bool,
    },
    Comparison {
        op: CompareOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
}

impl ScalarExpr {
    pub fn column(table_index: usize, column_index: usize, ty: ColumnType) -> ScalarExpr {
        ScalarExpr::ColumnRef {
            table_index,
            column_index,
            ty,
        }
    }

    pub fn compare(op: CompareOp, left: ScalarExpr, right: ScalarExpr) -> ScalarExpr {
        ScalarExpr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Strip CAST wrappers.
    pub fn unwrap_casts(&self) -> &ScalarExpr {
        let mut current = self;
        while let ScalarExpr::Cast { child, .. } = current {
            current = child;
        }
        current
    }

    pub fn return_type(&self) -> ColumnType {
        match self {
            ScalarExpr::ColumnRef { ty, .. } => ty.clone(),
            ScalarExpr::Constant(cell) => match cell {
                Cell::Null | Cell::Varchar(_) => ColumnType::Varchar,
                Cell::Bigint(_) => ColumnType::Bigint,
                Cell::Hugeint(_) => ColumnType::Hugeint,
                Cell::Double(_) => ColumnType::Double,
                Cell::Boolean(_) => ColumnType::Boolean,
                Cell::Date(_) => ColumnType::Date,
                Cell::Timestamp(_) => ColumnType::Timestamp,
                Cell::Blob(_) => ColumnType::Blob,
                Cell::List(_) => ColumnType::List(Box::new(ColumnType::Varchar)),
                Cell::Struct(_) => ColumnType::Struct(vec![]),
            },
            ScalarExpr::Cast { ty, .. } => ty.clone(),
            ScalarExpr::Function { ty, .. } => ty.clone(),
            ScalarExpr::Comparison { .. } => ColumnType::Boolean,
        }
    }

    pub fn is_volatile(&self) -> bool {
        self.any_function(|volatile, _| volatile)
    }

    pub fn can_throw(&self) -> bool {
        self.any_function(|_, can_throw| can_throw)
    }

    fn any_function(&self, predicate: fn(bool, bool) -> bool) -> bool {
        match self {
            ScalarExpr::Function {
                volatile,
                can_throw,
                args,
                ..
            } => {
                predicate(*volatile, *can_throw)
                    || args.iter().any(|a| a.any_function(predicate))
            }
            ScalarExpr::Cast { child, .. } => child.any_function(predicate),
            ScalarExpr::Comparison { left, right, .. } => {
                left.any_function(predicate) || right.any_function(predicate)
            }
            _ => false,
        }
    }

    /// Collect every `(table_index, column_index)` binding in the tree.
    pub fn column_bindings(&self, out: &mut Vec<(usize, usize)>) {
        match self {
            ScalarExpr::ColumnRef {
                table_index,
                column_index,
                ..
            } => out.push((*table_index, *column_index)),
            ScalarExpr::Cast { child, .. } => child.column_bindings(out),
            ScalarExpr::Function { args, .. } => {
                for arg in args {
                    arg.column_bindings(out);
                }
            }
            ScalarExpr::Comparison { left, right, .. } => {
                left.column_bindings(out);
                right.column_bindings(out);
            }
            ScalarExpr::Constant(_) => {}
        }
    }
}
