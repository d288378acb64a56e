mod bind;
mod catalog;
mod error;
mod expr_pushdown;
mod exprs;
mod filter;
mod plan;
mod predicate;
mod rewrite;
mod scan;

pub use bind::{
    DEFAULT_SAMPLE_SIZE, SCAN_FUNCTION_NAME, ScanArguments, ScanBind, ScanCapabilities,
    ScanExplain, bind, capabilities, parse_filter_json, parse_pipeline_json, pipeline_to_json,
};
pub use catalog::{DocumentCatalog, clear_cache};
pub use error::ScanError;
pub use expr_pushdown::{merge_filter_conjuncts, pushdown_complex};
pub use exprs::ScalarExpr;
pub use filter::{build_find_filter, cell_to_bson, is_object_id_column, is_object_id_hex};
pub use plan::{AggregateExpr, AggregateKind, LogicalPlan, OrderByNode, ScanNode};
pub use predicate::{CompareOp, TableFilter, TableFilterSet};
pub use rewrite::{BindingRule, apply_rules_to_expr, rewrite_plan};
pub use scan::{ScanLocalState, build_projection, init_local, next};
