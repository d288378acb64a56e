use std::collections::BTreeSet;

use bson::{Bson, Document};
use tessera_batch::{Batch, Cell, validate_document, write_row};
use tessera_schema::{ResolvedSchema, SchemaMode};
use tessera_source::{DocumentSource, FindOptions};

use crate::bind::ScanBind;
use crate::error::ScanError;
use crate::expr_pushdown::merge_filter_conjuncts;
use crate::filter::build_find_filter;
use crate::predicate::TableFilterSet;

/// Per-worker scan state: an exclusive cursor plus the documents kept
/// alive for its lifetime. Dropped when the scan ends.
pub struct ScanLocalState<S: DocumentSource> {
    cursor: S::Cursor,
    /// Schema indices the engine's batch columns map to, in schema order.
    pub output_columns: Vec<usize>,
    /// Schema indices fetched from the server. Equals `output_columns`
    /// unless enforcement needs the full schema for validation.
    pub projection_columns: Vec<usize>,
    pub projection_doc: Option<Document>,
    pub pipeline: Option<Vec<Document>>,
    /// LIMIT pushed into the cursor, when one sat directly above the scan.
    pub limit: Option<u64>,
    validate_full: bool,
    count_field: Option<String>,
    finished: bool,
    rows_emitted: u64,
}

impl<S: DocumentSource> ScanLocalState<S> {
    pub fn finished(&self) -> bool {
        self.finished
    }
}

/// Initialize per-worker state: decide the requested column set, build the
/// find filter and projection, and open the cursor.
pub fn init_local<S: DocumentSource>(
    bind: &ScanBind<S>,
    column_ids: &[usize],
    filters: &TableFilterSet,
    limit: Option<u64>,
) -> Result<ScanLocalState<S>, ScanError> {
    let schema = &bind.schema;

    let mut needed: BTreeSet<usize> = column_ids
        .iter()
        .copied()
        .filter(|&c| c < schema.len())
        .collect();

    // Build the find filter. A raw `filter` parameter replaces the pushed
    // filters entirely; the caller takes responsibility for it.
    let (query_filter, filters_pushed) = match &bind.filter_doc {
        Some(raw) => (raw.clone(), true),
        None => {
            let simple = build_find_filter(filters, schema);
            let pushed = filters.is_empty() || !simple.is_empty();
            let combined = merge_filter_conjuncts(
                None,
                Some(&simple),
                bind.complex_filter_expr.as_ref(),
            );
            (combined, pushed)
        }
    };

    // Filter columns are only fetched when the filters stayed with the
    // engine; a server-side filter needs no post-scan data.
    if !filters_pushed {
        for column in filters.column_indices() {
            if column < schema.len() {
                needed.insert(column);
            }
        }
    }

    let output_columns: Vec<usize> = needed.iter().copied().collect();

    // Enforcement validates every column, so the cursor must fetch the
    // full schema even when the engine asked for a subset.
    let validate_full = bind.has_explicit_schema && bind.schema_mode != SchemaMode::Permissive;
    let projection_columns: Vec<usize> = if validate_full {
        (0..schema.len()).collect()
    } else {
        output_columns.clone()
    };

    let projection_doc = build_projection(&projection_columns, schema);

    let (cursor, count_field) = match &bind.pipeline {
        Some(stages) => {
            let cursor = bind
                .collection_ref()
                .aggregate(stages.clone())?;
            (cursor, pipeline_count_field(stages))
        }
        None => {
            let options = FindOptions {
                limit: limit.map(|l| l as i64),
                projection: if projection_doc.is_empty() {
                    None
                } else {
                    Some(projection_doc.clone())
                },
            };
            let cursor = bind
                .collection_ref()
                .find(query_filter, options)?;
            (cursor, None)
        }
    };

    Ok(ScanLocalState {
        cursor,
        output_columns,
        projection_columns,
        projection_doc: if projection_doc.is_empty() {
            None
        } else {
            Some(projection_doc)
        },
        pipeline: bind.pipeline.clone(),
        limit,
        validate_full,
        count_field,
        finished: false,
        rows_emitted: 0,
    })
}

/// Fill a batch from the cursor. Returns the number of rows produced;
/// zero means the scan is complete.
pub fn next<S: DocumentSource>(
    bind: &ScanBind<S>,
    state: &mut ScanLocalState<S>,
    batch: &mut Batch,
) -> Result<usize, ScanError> {
    batch.clear();
    if state.finished {
        return Ok(0);
    }

    let capacity = batch.capacity();
    let mut rows = 0usize;

    // COUNT(*) over a find cursor: the engine binds a single dummy column
    // while the state carries more. Count documents without materializing.
    if batch.column_count() == 1 && state.output_columns.len() > 1 {
        while rows < capacity {
            let document = match state.cursor.next() {
                None => {
                    state.finished = true;
                    break;
                }
                Some(result) => result?,
            };
            if state.validate_full
                && !validate_document(&document, &bind.schema, bind.schema_mode)?
            {
                continue;
            }
            rows += 1;
        }
        state.rows_emitted += rows as u64;
        batch.set_len(rows);
        return Ok(rows);
    }

    while rows < capacity {
        let document = match state.cursor.next() {
            None => {
                state.finished = true;
                break;
            }
            Some(result) => result?,
        };
        if state.validate_full && !validate_document(&document, &bind.schema, bind.schema_mode)? {
            // DropMalformed: the row disappears from the batch.
            continue;
        }
        let kept = write_row(
            &document,
            &bind.schema,
            &state.output_columns,
            batch,
            rows,
            bind.schema_mode,
            bind.has_explicit_schema,
        )?;
        if !kept {
            continue;
        }
        rows += 1;
    }

    // A $count pipeline over an empty collection yields no documents at
    // all; SQL still expects a single zero.
    if state.finished && rows == 0 && state.rows_emitted == 0 {
        if let Some(count_field) = &state.count_field {
            let single_count_column = state.output_columns.len() == 1
                && bind
                    .schema
                    .column_names
                    .get(state.output_columns[0])
                    .is_some_and(|name| name == count_field);
            if single_count_column && batch.column_count() == 1 {
                batch.set(0, 0, Cell::Bigint(0));
                rows = 1;
            }
        }
    }

    state.rows_emitted += rows as u64;
    batch.set_len(rows);
    Ok(rows)
}

/// The `$count` output field, when the pipeline ends in a count.
fn pipeline_count_field(stages: &[Document]) -> Option<String> {
    stages.iter().rev().find_map(|stage| match stage.get("$count") {
        Some(Bson::String(name)) => Some(name.clone()),
        _ => None,
    })
}

/// Build the inclusion projection for the requested columns.
///
/// Duplicate paths collapse; a child path is dropped when its parent is
/// already projected (and vice versa) since the server includes parents of
/// nested projections implicitly. `_id` is always included.
pub fn build_projection(columns: &[usize], schema: &ResolvedSchema) -> Document {
    let mut added: Vec<String> = Vec::new();
    let mut has_id = false;

    for &column in columns {
        if column >= schema.len() {
            continue;
        }
        let name = &schema.column_names[column];
        let path = schema.path_of(name);

        if added.iter().any(|p| p == path) {
            continue;
        }
        if let Some((parent, _)) = path.split_once('.') {
            if added.iter().any(|p| p == parent) {
                continue;
            }
        } else if added.iter().any(|p| {
            p.len() > path.len() && p.starts_with(path) && p.as_bytes()[path.len()] == b'.'
        }) {
            continue;
        }

        if path == "_id" {
            has_id = true;
        }
        added.push(path.to_string());
    }

    if added.is_empty() {
        return Document::new();
    }

    let mut projection = Document::new();
    for path in added {
        projection.insert(path, Bson::Int32(1));
    }
    if !has_id {
        projection.insert("_id", Bson::Int32(1));
    }
    projection
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tessera_schema::ColumnType;

    use super::*;

    fn nested_schema() -> ResolvedSchema {
        let mut path_map = HashMap::new();
        path_map.insert("_id".into(), "_id".into());
        path_map.insert("addr_city".into(), "addr.city".into());
        path_map.insert("addr_zip".into(), "addr.zip".into());
        path_map.insert("addr".into(), "addr".into());
        ResolvedSchema {
            column_names: vec![
                "_id".into(),
                "addr_city".into(),
                "addr_zip".into(),
                "addr".into(),
            ],
            column_types: vec![
                ColumnType::Varchar,
                ColumnType::Varchar,
                ColumnType::Varchar,
                ColumnType::Varchar,
            ],
            path_map,
        }
    }

    #[test]
    fn projection_includes_id_automatically() {
        let schema = nested_schema();
        let projection = build_projection(&[1], &schema);
        assert_eq!(
            projection,
            bson::doc! { "addr.city": 1, "_id": 1 }
        );
    }

    #[test]
    fn projection_drops_child_when_parent_present() {
        let schema = nested_schema();
        // addr (parent) first, then addr.city: the child collapses away.
        let projection = build_projection(&[3, 1], &schema);
        assert_eq!(projection, bson::doc! { "addr": 1, "_id": 1 });
    }

    #[test]
    fn projection_drops_parent_when_child_present() {
        let schema = nested_schema();
        let projection = build_projection(&[1, 3], &schema);
        assert_eq!(projection, bson::doc! { "addr.city": 1, "_id": 1 });
    }

    #[test]
    fn projection_keeps_sibling_children() {
        let schema = nested_schema();
        let projection = build_projection(&[1, 2], &schema);
        assert_eq!(
            projection,
            bson::doc! { "addr.city": 1, "addr.zip": 1, "_id": 1 }
        );
    }

    #[test]
    fn empty_request_means_no_projection() {
        let schema = nested_schema();
        assert!(build_projection(&[], &schema).is_empty());
    }
}
