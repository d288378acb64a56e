use std::fmt;

use bson::{Bson, Document};
use tessera_schema::{ColumnType, ResolvedSchema, SchemaMode};
use tessera_source::matcher::lookup_path;

use crate::batch::Batch;
use crate::cell::Cell;
use crate::json::bson_to_json;

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeError {
    SchemaViolation {
        doc_id: String,
        field: String,
        expected: String,
        found: String,
    },
}

impl fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterializeError::SchemaViolation {
                doc_id,
                field,
                expected,
                found,
            } => write!(
                f,
                "Schema violation in document _id='{doc_id}': Field '{field}' expected type \
                 {expected} but found {found}.\nHint: Use schema_mode='permissive' to replace \
                 with NULL, or 'dropmalformed' to skip bad rows."
            ),
        }
    }
}

impl std::error::Error for MaterializeError {}

/// Driver-style type names used in violation messages.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "document",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binary",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::DbPointer(_) => "dbPointer",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int32",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "int64",
        Bson::Decimal128(_) => "decimal128",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
    }
}

/// Materialize one document into a batch row.
///
/// `requested` holds schema column indices; batch column `i` receives the
/// value for `schema.column_names[requested[i]]`. Returns `Ok(false)` when
/// DropMalformed rejects the row; FailFast surfaces a `SchemaViolation`.
/// Under Permissive every requested cell is written (a value or `Null`) and
/// the call never fails.
pub fn write_row(
    doc: &Document,
    schema: &ResolvedSchema,
    requested: &[usize],
    batch: &mut Batch,
    row: usize,
    mode: SchemaMode,
    has_explicit: bool,
) -> Result<bool, MaterializeError> {
    for (batch_col, &col_idx) in requested.iter().enumerate() {
        let name = &schema.column_names[col_idx];
        let ty = &schema.column_types[col_idx];

        match ty {
            ColumnType::List(_) => {
                let element = locate_element(doc, schema, name);
                let cell = match element {
                    Some(Bson::Array(elements)) => array_to_list(elements, ty),
                    _ => Cell::Null,
                };
                batch.set(batch_col, row, cell);
            }
            ColumnType::Struct(fields) => {
                let element = locate_element(doc, schema, name);
                let cell = match element {
                    Some(Bson::Document(sub)) => struct_from_document(sub, fields),
                    _ => Cell::Null,
                };
                batch.set(batch_col, row, cell);
            }
            scalar_ty => {
                let element = locate_element(doc, schema, name);
                let element = match element {
                    None | Some(Bson::Null) | Some(Bson::Undefined) => {
                        batch.set(batch_col, row, Cell::Null);
                        continue;
                    }
                    Some(e) => e,
                };

                match coerce_scalar(element, scalar_ty) {
                    Some(cell) => batch.set(batch_col, row, cell),
                    None => {
                        // Type mismatch: the enforcement policy only applies
                        // when the caller pinned the schema.
                        if has_explicit {
                            match mode {
                                SchemaMode::Permissive => {
                                    batch.set(batch_col, row, Cell::Null);
                                }
                                SchemaMode::DropMalformed => return Ok(false),
                                SchemaMode::FailFast => {
                                    return Err(MaterializeError::SchemaViolation {
                                        doc_id: document_id(doc),
                                        field: name.clone(),
                                        expected: scalar_ty.to_string(),
                                        found: bson_type_name(element).to_string(),
                                    });
                                }
                            }
                        } else {
                            batch.set(batch_col, row, Cell::Null);
                        }
                    }
                }
            }
        }
    }
    Ok(true)
}

/// Validation-only pass over the scalar columns of the full schema.
/// Used when the engine requests a strict column subset (COUNT(*)) but the
/// explicit schema contract still has to hold. Never writes.
pub fn validate_document(
    doc: &Document,
    schema: &ResolvedSchema,
    mode: SchemaMode,
) -> Result<bool, MaterializeError> {
    for (name, ty) in schema.column_names.iter().zip(&schema.column_types) {
        if ty.is_nested() {
            continue;
        }
        let element = match locate_element(doc, schema, name) {
            None | Some(Bson::Null) | Some(Bson::Undefined) => continue,
            Some(e) => e,
        };
        if !is_compatible(element, ty) {
            if mode == SchemaMode::FailFast {
                return Err(MaterializeError::SchemaViolation {
                    doc_id: document_id(doc),
                    field: name.clone(),
                    expected: ty.to_string(),
                    found: bson_type_name(element).to_string(),
                });
            }
            return Ok(false);
        }
    }
    Ok(true)
}

/// Locate a column's source element: the registered document path first
/// (dotted navigation for nested paths, direct access otherwise), then an
/// underscore-segment walk of the column name for unmapped flattened names.
fn locate_element<'a>(
    doc: &'a Document,
    schema: &ResolvedSchema,
    name: &str,
) -> Option<&'a Bson> {
    let path = schema.path_of(name);
    if path.contains('.') {
        return lookup_path(doc, path);
    }
    if let Some(element) = doc.get(path) {
        return Some(element);
    }
    element_by_underscore(doc, name)
}

/// Walk `a_b_c` as `a.b.c`: every intermediate segment must be a document.
fn element_by_underscore<'a>(doc: &'a Document, name: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = name.split('_').peekable();
    while let Some(segment) = segments.next() {
        let element = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(element);
        }
        match element {
            Bson::Document(sub) => current = sub,
            _ => return None,
        }
    }
    None
}

fn document_id(doc: &Document) -> String {
    match doc.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s.clone(),
        _ => "<unknown>".to_string(),
    }
}

fn is_compatible(value: &Bson, ty: &ColumnType) -> bool {
    match ty {
        ColumnType::Varchar => true,
        ColumnType::Bigint => {
            matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
        }
        ColumnType::Hugeint => matches!(
            value,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
        ),
        ColumnType::Double => matches!(
            value,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
        ),
        ColumnType::Boolean => matches!(value, Bson::Boolean(_)),
        ColumnType::Date | ColumnType::Timestamp => matches!(value, Bson::DateTime(_)),
        ColumnType::Blob => matches!(value, Bson::Binary(_)),
        ColumnType::List(_) => matches!(value, Bson::Array(_)),
        ColumnType::Struct(_) => matches!(value, Bson::Document(_)),
    }
}

fn decimal_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerce a scalar source element to a scalar target type.
/// `None` means the source type is outside the accepted set.
fn coerce_scalar(value: &Bson, ty: &ColumnType) -> Option<Cell> {
    match ty {
        ColumnType::Varchar => Some(Cell::Varchar(varchar_text(value))),
        ColumnType::Bigint => match value {
            Bson::Int32(v) => Some(Cell::Bigint(*v as i64)),
            Bson::Int64(v) => Some(Cell::Bigint(*v)),
            Bson::Double(v) => Some(Cell::Bigint(*v as i64)),
            _ => None,
        },
        ColumnType::Hugeint => match value {
            Bson::Int32(v) => Some(Cell::Hugeint(*v as i128)),
            Bson::Int64(v) => Some(Cell::Hugeint(*v as i128)),
            Bson::Double(v) => Some(Cell::Hugeint(*v as i64 as i128)),
            Bson::Decimal128(_) => {
                let d = decimal_to_f64(value).unwrap_or(0.0);
                Some(Cell::Hugeint(d as i64 as i128))
            }
            _ => None,
        },
        ColumnType::Double => match value {
            Bson::Double(v) => Some(Cell::Double(*v)),
            Bson::Int32(v) => Some(Cell::Double(*v as f64)),
            Bson::Int64(v) => Some(Cell::Double(*v as f64)),
            Bson::Decimal128(_) => Some(Cell::Double(decimal_to_f64(value).unwrap_or(0.0))),
            _ => None,
        },
        ColumnType::Boolean => match value {
            Bson::Boolean(v) => Some(Cell::Boolean(*v)),
            _ => None,
        },
        ColumnType::Date => match value {
            Bson::DateTime(dt) => Some(Cell::Date(
                dt.timestamp_millis().div_euclid(MILLIS_PER_DAY) as i32,
            )),
            _ => None,
        },
        ColumnType::Timestamp => match value {
            Bson::DateTime(dt) => Some(Cell::Timestamp(dt.timestamp_millis() * 1000)),
            _ => None,
        },
        ColumnType::Blob => match value {
            Bson::Binary(b) => Some(Cell::Blob(b.bytes.clone())),
            _ => None,
        },
        ColumnType::List(_) | ColumnType::Struct(_) => None,
    }
}

/// The defined textual form of every source type for VARCHAR targets.
pub fn varchar_text(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Document(_) | Bson::Array(_) => bson_to_json(value),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) => v.to_string(),
        Bson::Boolean(v) => if *v { "true" } else { "false" }.to_string(),
        Bson::DateTime(dt) => dt.timestamp_millis().to_string(),
        Bson::Null => "null".to_string(),
        Bson::Binary(_) => "<binary data>".to_string(),
        Bson::Undefined => "undefined".to_string(),
        Bson::RegularExpression(re) => format!("/{}/{}", re.pattern, re.options),
        Bson::DbPointer(_) => "<dbpointer>".to_string(),
        Bson::JavaScriptCode(code) => code.clone(),
        Bson::JavaScriptCodeWithScope(code) => code.code.clone(),
        Bson::Symbol(s) => s.clone(),
        Bson::Timestamp(ts) => format!("{}:{}", ts.time, ts.increment),
        Bson::Decimal128(d) => d.to_string(),
        _ => "<unknown type>".to_string(),
    }
}

// ── LIST / STRUCT materialization ───────────────────────────────

/// Nesting depth of an array value: `[1]` is 1, `[[1]]` is 2, `[]` is 0.
fn array_depth(elements: &[Bson], depth_limit: usize) -> usize {
    if depth_limit == 0 || elements.is_empty() {
        return 0;
    }
    let mut max = 0;
    for element in elements {
        let depth = match element {
            Bson::Array(nested) => 1 + array_depth(nested, depth_limit - 1),
            _ => 1,
        };
        if depth > max {
            max = depth;
        }
    }
    max
}

fn innermost(ty: &ColumnType) -> &ColumnType {
    let mut current = ty;
    while let ColumnType::List(child) = current {
        current = child;
    }
    current
}

/// Materialize an array into a LIST cell.
///
/// A shallower source is re-boxed element by element until the depths match;
/// a deeper source yields `Null` for the whole cell rather than truncating.
pub fn array_to_list(elements: &[Bson], ty: &ColumnType) -> Cell {
    let child = match ty {
        ColumnType::List(child) => child.as_ref(),
        _ => return Cell::Null,
    };
    let expected = ty.list_depth();
    let actual = array_depth(elements, 10);

    if actual > expected {
        return Cell::Null;
    }

    if actual < expected {
        let base = innermost(ty);
        let wraps = expected - actual;
        let items = elements
            .iter()
            .map(|element| match element {
                Bson::Null | Bson::Undefined => Cell::Null,
                Bson::Array(nested) => {
                    let inner: Vec<Cell> = nested
                        .iter()
                        .map(|e| match e {
                            Bson::Null | Bson::Undefined => Cell::Null,
                            other => coerce_scalar(other, base).unwrap_or(Cell::Null),
                        })
                        .collect();
                    rebox(Cell::List(inner), wraps)
                }
                scalar => rebox(coerce_scalar(scalar, base).unwrap_or(Cell::Null), wraps),
            })
            .collect();
        return Cell::List(items);
    }

    let items = elements
        .iter()
        .map(|element| match (child, element) {
            (_, Bson::Null | Bson::Undefined) => Cell::Null,
            (ColumnType::Struct(fields), Bson::Document(sub)) => struct_from_document(sub, fields),
            (ColumnType::List(_), Bson::Array(nested)) => array_to_list(nested, child),
            (ColumnType::List(_) | ColumnType::Struct(_), _) => Cell::Null,
            (scalar_ty, scalar) => coerce_scalar(scalar, scalar_ty).unwrap_or(Cell::Null),
        })
        .collect();
    Cell::List(items)
}

fn rebox(cell: Cell, wraps: usize) -> Cell {
    let mut wrapped = cell;
    for _ in 0..wraps {
        wrapped = Cell::List(vec![wrapped]);
    }
    wrapped
}

/// Materialize a document into a STRUCT cell: declared fields only,
/// missing fields become `Null`.
pub fn struct_from_document(doc: &Document, fields: &[(String, ColumnType)]) -> Cell {
    let values = fields
        .iter()
        .map(|(name, field_ty)| {
            let cell = match (field_ty, doc.get(name)) {
                (_, None) | (_, Some(Bson::Null)) | (_, Some(Bson::Undefined)) => Cell::Null,
                (ColumnType::Struct(nested), Some(Bson::Document(sub))) => {
                    struct_from_document(sub, nested)
                }
                (ColumnType::List(_), Some(Bson::Array(elements))) => {
                    array_to_list(elements, field_ty)
                }
                (ColumnType::List(_) | ColumnType::Struct(_), Some(_)) => Cell::Null,
                (scalar_ty, Some(value)) => coerce_scalar(value, scalar_ty).unwrap_or(Cell::Null),
            };
            (name.clone(), cell)
        })
        .collect();
    Cell::Struct(values)
}
