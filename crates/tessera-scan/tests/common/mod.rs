use bson::Document;
use tessera_batch::{Batch, Cell};
use tessera_scan::{ScanArguments, ScanBind, ScanLocalState, bind, next};
use tessera_schema::ColumnType;
use tessera_source::{DocumentSource, MemorySource};

pub const DB: &str = "analytics";

/// Seed a shared in-memory source behind `uri`.
pub fn seeded_source(uri: &str, collection: &str, docs: Vec<Document>) -> MemorySource {
    let src = MemorySource::connect(uri).unwrap();
    src.clear();
    src.insert_many(DB, collection, docs);
    src
}

pub fn bind_scan(uri: &str, collection: &str) -> ScanBind<MemorySource> {
    bind(&ScanArguments::new(uri, DB, collection)).unwrap()
}

pub fn output_batch(bind: &ScanBind<MemorySource>, state: &ScanLocalState<MemorySource>) -> Batch {
    let types: Vec<ColumnType> = state
        .output_columns
        .iter()
        .map(|&i| bind.schema.column_types[i].clone())
        .collect();
    // Small capacity so multi-batch draining gets exercised.
    Batch::with_capacity(&types, 4)
}

/// Drain a scan into row-major cells.
pub fn collect_rows(
    bind: &ScanBind<MemorySource>,
    state: &mut ScanLocalState<MemorySource>,
) -> Vec<Vec<Cell>> {
    let mut batch = output_batch(bind, state);
    let mut rows = Vec::new();
    loop {
        let produced = next(bind, state, &mut batch).unwrap();
        if produced == 0 {
            break;
        }
        for row in 0..produced {
            rows.push(
                (0..batch.column_count())
                    .map(|col| batch.cell(col, row).clone())
                    .collect(),
            );
        }
    }
    rows
}
