use std::collections::{BTreeMap, HashMap};

use bson::{Bson, Document, doc};
use tessera_source::{CollectionRef, DocumentSource, FindOptions};

use crate::error::SchemaError;
use crate::infer::{self, MAX_DEPTH};
use crate::schema::ResolvedSchema;
use crate::types::ColumnType;

/// The `_id` of the in-collection sidecar schema document.
pub const SIDECAR_SCHEMA_ID: &str = "__schema";

/// A caller-supplied column in the `columns` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSpec {
    /// `name: "TYPE"`: the document path equals the column name.
    Type(String),
    /// `name: {type, path}`: an explicit path override.
    Detailed {
        type_string: String,
        path: Option<String>,
    },
}

/// An ordered explicit schema, as supplied by the scan's `columns` option.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplicitColumns {
    pub columns: Vec<(String, ColumnSpec)>,
}

/// Resolve the relational schema for a collection.
///
/// Priority: explicit caller columns, then a `__schema` sidecar document in
/// the collection, then inference over a bounded sample. The boolean in the
/// result reports whether the schema is explicit (columns or sidecar), which
/// is what arms schema enforcement downstream.
pub fn resolve_schema<S: DocumentSource>(
    collection: CollectionRef<'_, S>,
    sample_size: i64,
    explicit: Option<&ExplicitColumns>,
) -> Result<(ResolvedSchema, bool), SchemaError> {
    if let Some(columns) = explicit {
        let schema = parse_explicit_columns(columns)?;
        return Ok((schema, true));
    }

    if let Some(schema) = parse_sidecar_schema(collection)? {
        tracing::debug!(
            collection = collection.name(),
            columns = schema.len(),
            "schema resolved from sidecar document"
        );
        return Ok((schema, true));
    }

    let schema = infer_from_samples(collection, sample_size)?;
    tracing::debug!(
        collection = collection.name(),
        columns = schema.len(),
        sample_size,
        "schema inferred from sample"
    );
    Ok((schema, false))
}

/// Parse the `columns` parameter, preserving caller order.
pub fn parse_explicit_columns(columns: &ExplicitColumns) -> Result<ResolvedSchema, SchemaError> {
    if columns.columns.is_empty() {
        return Err(SchemaError::InvalidColumns(
            "needs at least one column".into(),
        ));
    }

    let mut column_names = Vec::with_capacity(columns.columns.len());
    let mut column_types = Vec::with_capacity(columns.columns.len());
    let mut path_map = HashMap::new();

    for (name, spec) in &columns.columns {
        let (type_string, path) = match spec {
            ColumnSpec::Type(t) => (t, None),
            ColumnSpec::Detailed { type_string, path } => (type_string, path.as_deref()),
        };
        if type_string.trim().is_empty() {
            return Err(SchemaError::InvalidColumns(format!(
                "column {name} is missing a type"
            )));
        }
        column_names.push(name.clone());
        column_types.push(ColumnType::parse(type_string)?);
        path_map.insert(name.clone(), path.unwrap_or(name).to_string());
    }

    ensure_id(&mut column_names, &mut column_types, &mut path_map);
    Ok(ResolvedSchema {
        column_names,
        column_types,
        path_map,
    })
}

/// Look for a `{_id: "__schema"}` document declaring field types, in either
/// the flat form, the `schema`-wrapped form, or the per-field `{type, path}`
/// form. Entries with unusable shapes are skipped.
fn parse_sidecar_schema<S: DocumentSource>(
    collection: CollectionRef<'_, S>,
) -> Result<Option<ResolvedSchema>, SchemaError> {
    let sidecar = match collection.find_one(doc! { "_id": SIDECAR_SCHEMA_ID })? {
        Some(d) => d,
        None => return Ok(None),
    };

    let declarations = match sidecar.get("schema") {
        Some(Bson::Document(inner)) => inner.clone(),
        _ => sidecar.clone(),
    };

    let mut column_names = Vec::new();
    let mut column_types = Vec::new();
    let mut path_map = HashMap::new();

    for (name, value) in declarations.iter() {
        if name == "_id" || name == "schema" {
            continue;
        }
        let (ty, path) = match value {
            Bson::String(type_string) => match ColumnType::parse(type_string) {
                Ok(ty) => (ty, name.clone()),
                Err(_) => continue,
            },
            Bson::Document(field) => {
                let ty = match field.get("type") {
                    Some(Bson::String(t)) => match ColumnType::parse(t) {
                        Ok(ty) => ty,
                        Err(_) => continue,
                    },
                    _ => continue,
                };
                let path = match field.get("path") {
                    Some(Bson::String(p)) => p.clone(),
                    _ => name.clone(),
                };
                (ty, path)
            }
            _ => continue,
        };
        column_names.push(name.clone());
        column_types.push(ty);
        path_map.insert(name.clone(), path);
    }

    ensure_id(&mut column_names, &mut column_types, &mut path_map);
    Ok(Some(ResolvedSchema {
        column_names,
        column_types,
        path_map,
    }))
}

/// Infer the schema from at most `sample_size` documents.
/// `_id` is always present and first; the remaining flattened paths follow
/// in sorted order so repeated binds see the same shape.
fn infer_from_samples<S: DocumentSource>(
    collection: CollectionRef<'_, S>,
    sample_size: i64,
) -> Result<ResolvedSchema, SchemaError> {
    let mut field_types: BTreeMap<String, Vec<ColumnType>> = BTreeMap::new();
    let mut path_map = HashMap::new();

    let options = FindOptions {
        limit: Some(sample_size),
        projection: None,
    };
    let cursor = collection.find(Document::new(), options)?;
    let mut seen = 0_i64;
    for document in cursor {
        let document = document?;
        collect_field_paths(&document, "", "", 0, &mut field_types, &mut path_map);
        seen += 1;
        if seen >= sample_size {
            break;
        }
    }

    if !field_types.contains_key("_id") {
        field_types.insert("_id".into(), vec![ColumnType::Varchar]);
        path_map.insert("_id".into(), "_id".into());
    }

    let mut column_names = vec!["_id".to_string()];
    let mut column_types = vec![infer::resolve(&field_types["_id"])];
    for (path, samples) in &field_types {
        if path != "_id" {
            column_names.push(path.clone());
            column_types.push(infer::resolve(samples));
        }
    }

    Ok(ResolvedSchema {
        column_names,
        column_types,
        path_map,
    })
}

/// Walk a sampled document, recording an inferred type per flattened path.
///
/// Nested documents recurse and are not recorded themselves; only their
/// flattened children appear. Flat names join segments with `_`, while the
/// path map keeps the real dotted path.
fn collect_field_paths(
    document: &Document,
    prefix: &str,
    path_prefix: &str,
    depth: usize,
    field_types: &mut BTreeMap<String, Vec<ColumnType>>,
    path_map: &mut HashMap<String, String>,
) {
    if depth > MAX_DEPTH {
        // Too deep; the whole subtree spills over as JSON text.
        if !prefix.is_empty() {
            field_types
                .entry(prefix.to_string())
                .or_default()
                .push(ColumnType::Varchar);
        }
        return;
    }

    for (name, value) in document.iter() {
        let flat = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}_{name}")
        };
        let path = if path_prefix.is_empty() {
            name.clone()
        } else {
            format!("{path_prefix}.{name}")
        };
        path_map.insert(flat.clone(), path.clone());

        match value {
            Bson::Document(nested) => {
                collect_field_paths(nested, &flat, &path, depth + 1, field_types, path_map);
            }
            Bson::Array(elements) => {
                field_types
                    .entry(flat)
                    .or_default()
                    .push(infer::infer_array(elements, depth));
            }
            scalar => {
                field_types
                    .entry(flat)
                    .or_default()
                    .push(infer::infer_scalar(scalar));
            }
        }
    }
}

fn ensure_id(
    column_names: &mut Vec<String>,
    column_types: &mut Vec<ColumnType>,
    path_map: &mut HashMap<String, String>,
) {
    if !column_names.iter().any(|n| n == "_id") {
        column_names.push("_id".into());
        column_types.push(ColumnType::Varchar);
        path_map.insert("_id".into(), "_id".into());
    }
}
