mod batch;
mod cell;
mod json;
mod materialize;

pub use batch::{BATCH_SIZE, Batch, Column};
pub use cell::Cell;
pub use json::{bson_to_json, normalize_json};
pub use materialize::{
    MaterializeError, array_to_list, bson_type_name, struct_from_document, validate_document,
    varchar_text, write_row,
};
