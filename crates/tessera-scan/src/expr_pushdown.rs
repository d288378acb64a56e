use bson::{Bson, Document, doc};
use tessera_batch::Cell;
use tessera_schema::{ColumnType, ResolvedSchema};

use crate::exprs::ScalarExpr;
use crate::filter::combine_conjuncts;
use crate::predicate::CompareOp;

struct FunctionMapping {
    names: &'static [&'static str],
    operator: &'static str,
    arg_count: usize,
}

/// Functions with a native aggregation-operator equivalent.
static FUNCTION_MAPPINGS: &[FunctionMapping] = &[
    FunctionMapping {
        names: &["length", "len", "char_length", "character_length"],
        operator: "$strLenCP",
        arg_count: 1,
    },
    FunctionMapping {
        names: &["substring", "substr"],
        operator: "$substrCP",
        arg_count: 3,
    },
];

fn find_mapping(name: &str) -> Option<&'static FunctionMapping> {
    let lower = name.to_ascii_lowercase();
    FUNCTION_MAPPINGS
        .iter()
        .find(|m| m.names.contains(&lower.as_str()))
}

/// Translate complex predicates into an `$expr` document and remove them
/// from the filter list. Simple `column op constant` comparisons are left
/// for the find-filter path, which produces indexable native filters.
///
/// Returns the surviving filters; the combined `$expr` lands in `slot`.
pub fn pushdown_complex(
    filters: Vec<ScalarExpr>,
    schema: &ResolvedSchema,
    table_index: usize,
    slot: &mut Option<Document>,
) -> Vec<ScalarExpr> {
    let mut survivors = Vec::new();
    let mut converted: Vec<Document> = Vec::new();

    for filter in filters {
        if is_simple_column_constant(&filter) {
            survivors.push(filter);
            continue;
        }
        match convert_expression(&filter, schema, table_index) {
            Some(expr_doc) => {
                tracing::debug!(fragment = ?expr_doc, "pushed complex filter as $expr");
                converted.push(expr_doc);
            }
            None => survivors.push(filter),
        }
    }

    if !converted.is_empty() {
        let combined = if converted.len() == 1 {
            converted.into_iter().next().unwrap()
        } else {
            let terms: Vec<Bson> = converted.into_iter().map(Bson::Document).collect();
            doc! { "$and": terms }
        };
        *slot = Some(match slot.take() {
            Some(existing) => doc! { "$and": [Bson::Document(existing), Bson::Document(combined)] },
            None => combined,
        });
    }

    survivors
}

/// Plain `column op constant` with no functions on either side.
pub fn is_simple_column_constant(expr: &ScalarExpr) -> bool {
    let (left, right) = match expr {
        ScalarExpr::Comparison { left, right, .. } => (left.unwrap_casts(), right.unwrap_casts()),
        _ => return false,
    };
    matches!(left, ScalarExpr::ColumnRef { .. }) && matches!(right, ScalarExpr::Constant(_))
}

/// The narrow safe-list for expressions flagged volatile or throwing:
/// a comparison over `substring` with in-range constant bounds.
fn is_safe_expression(expr: &ScalarExpr) -> bool {
    let (left, right) = match expr {
        ScalarExpr::Comparison { left, right, .. } => (left.unwrap_casts(), right.unwrap_casts()),
        _ => return false,
    };
    is_safe_function(left) || is_safe_function(right)
}

fn is_safe_function(expr: &ScalarExpr) -> bool {
    let (name, args) = match expr {
        ScalarExpr::Function { name, args, .. } => (name, args),
        _ => return false,
    };
    let mapping = match find_mapping(name) {
        Some(m) if m.operator == "$substrCP" => m,
        _ => return false,
    };
    if !validate_signature(mapping, args) {
        return false;
    }
    let start = constant_i64(&args[1]);
    let length = constant_i64(&args[2]);
    matches!((start, length), (Some(s), Some(l)) if s >= 1 && l >= 0)
}

fn constant_i64(expr: &ScalarExpr) -> Option<i64> {
    match expr {
        ScalarExpr::Constant(Cell::Bigint(v)) => Some(*v),
        _ => None,
    }
}

fn validate_signature(mapping: &FunctionMapping, args: &[ScalarExpr]) -> bool {
    if args.len() != mapping.arg_count {
        return false;
    }
    if args[0].return_type() != ColumnType::Varchar {
        return false;
    }
    if mapping.operator == "$substrCP" {
        // substring(string, start, length) with constant bounds.
        return matches!(args[1], ScalarExpr::Constant(_))
            && matches!(args[2], ScalarExpr::Constant(_));
    }
    true
}

fn compare_op_key(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::NotEq => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::LtEq => "$lte",
        CompareOp::Gt => "$gt",
        CompareOp::GtEq => "$gte",
    }
}

fn column_path(
    expr: &ScalarExpr,
    schema: &ResolvedSchema,
    table_index: usize,
) -> Option<String> {
    match expr.unwrap_casts() {
        ScalarExpr::ColumnRef {
            table_index: t,
            column_index,
            ..
        } if *t == table_index && *column_index < schema.len() => {
            let name = &schema.column_names[*column_index];
            Some(format!("${}", schema.path_of(name)))
        }
        _ => None,
    }
}

fn constant_to_bson(cell: &Cell) -> Bson {
    match cell {
        Cell::Varchar(s) => Bson::String(s.clone()),
        Cell::Bigint(v) => Bson::Int64(*v),
        Cell::Double(v) => Bson::Double(*v),
        Cell::Boolean(v) => Bson::Boolean(*v),
        Cell::Null => Bson::Null,
        other => Bson::String(format!("{other:?}")),
    }
}

/// Re-cast a constant toward a target type; the original survives a failed
/// cast.
fn cast_constant(cell: &Cell, ty: &ColumnType) -> Cell {
    let casted = match (cell, ty) {
        (Cell::Bigint(v), ColumnType::Double) => Some(Cell::Double(*v as f64)),
        (Cell::Double(v), ColumnType::Bigint) => Some(Cell::Bigint(*v as i64)),
        (Cell::Bigint(v), ColumnType::Varchar) => Some(Cell::Varchar(v.to_string())),
        (Cell::Double(v), ColumnType::Varchar) => Some(Cell::Varchar(v.to_string())),
        (Cell::Varchar(s), ColumnType::Bigint) => s.parse().ok().map(Cell::Bigint),
        (Cell::Varchar(s), ColumnType::Double) => s.parse().ok().map(Cell::Double),
        _ => None,
    };
    casted.unwrap_or_else(|| cell.clone())
}

fn convert_function(
    name: &str,
    args: &[ScalarExpr],
    schema: &ResolvedSchema,
    table_index: usize,
) -> Option<Document> {
    let mapping = find_mapping(name)?;
    if !validate_signature(mapping, args) {
        return None;
    }

    let mut wire_args: Vec<Bson> = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        if let Some(path) = column_path(arg, schema, table_index) {
            wire_args.push(Bson::String(path));
            continue;
        }
        if let ScalarExpr::Constant(cell) = arg {
            if mapping.operator == "$substrCP" && i == 1 {
                // 1-based SQL start to 0-based code-point offset.
                let start = constant_i64(arg)?;
                wire_args.push(Bson::Int64(start - 1));
            } else {
                wire_args.push(constant_to_bson(cell));
            }
            continue;
        }
        return None;
    }

    let mut result = Document::new();
    result.insert(mapping.operator, Bson::Array(wire_args));
    Some(result)
}

/// Convert one predicate into an `$expr` fragment. `None` leaves the
/// predicate with the engine.
fn convert_expression(
    expr: &ScalarExpr,
    schema: &ResolvedSchema,
    table_index: usize,
) -> Option<Document> {
    if (expr.is_volatile() || expr.can_throw()) && !is_safe_expression(expr) {
        return None;
    }
    if is_simple_column_constant(expr) {
        return None;
    }

    // Every referenced column must belong to this scan.
    let mut bindings = Vec::new();
    expr.column_bindings(&mut bindings);
    if bindings.iter().any(|(t, _)| *t != table_index) {
        return None;
    }

    match expr {
        ScalarExpr::Comparison { op, left, right } => {
            let left = left.unwrap_casts();
            let right = right.unwrap_casts();

            let left_bson = convert_side(left, schema, table_index, None)?;
            let right_bson = convert_side(right, schema, table_index, Some(left))?;

            let mut result = Document::new();
            result.insert(
                compare_op_key(*op),
                Bson::Array(vec![left_bson, right_bson]),
            );
            Some(result)
        }
        ScalarExpr::Function { name, args, .. } => {
            convert_function(name, args, schema, table_index)
        }
        _ => None,
    }
}

/// Convert one side of a comparison: a column path, a mapped function, or
/// (right side only) a constant re-cast to the opposite side's type.
fn convert_side(
    side: &ScalarExpr,
    schema: &ResolvedSchema,
    table_index: usize,
    opposite: Option<&ScalarExpr>,
) -> Option<Bson> {
    if let Some(path) = column_path(side, schema, table_index) {
        return Some(Bson::String(path));
    }
    if let ScalarExpr::Function { name, args, .. } = side {
        return convert_function(name, args, schema, table_index).map(Bson::Document);
    }
    if let (ScalarExpr::Constant(cell), Some(other)) = (side, opposite) {
        let target = other.return_type();
        let cell = if side.return_type() != target {
            cast_constant(cell, &target)
        } else {
            cell.clone()
        };
        return Some(constant_to_bson(&cell));
    }
    None
}

/// Fold the find filter, the `$expr` fragment, and an optional raw filter
/// into one conjunction, the shape shared by the find path and the
/// pipeline `$match` stage.
pub fn merge_filter_conjuncts(
    raw_filter: Option<&Document>,
    find_filter: Option<&Document>,
    complex_expr: Option<&Document>,
) -> Document {
    let mut conjuncts = Vec::new();
    if let Some(raw) = raw_filter {
        if !raw.is_empty() {
            conjuncts.push(raw.clone());
        }
    }
    if let Some(simple) = find_filter {
        if !simple.is_empty() {
            conjuncts.push(simple.clone());
        }
    }
    if let Some(expr) = complex_expr {
        if !expr.is_empty() {
            conjuncts.push(doc! { "$expr": expr.clone() });
        }
    }
    combine_conjuncts(conjuncts)
}
