mod error;
mod infer;
mod mode;
mod resolve;
mod schema;
mod types;

pub use error::SchemaError;
pub use infer::{infer_scalar, resolve};
pub use mode::SchemaMode;
pub use resolve::{
    ColumnSpec, ExplicitColumns, SIDECAR_SCHEMA_ID, parse_explicit_columns, resolve_schema,
};
pub use schema::ResolvedSchema;
pub use types::ColumnType;
