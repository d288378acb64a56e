use std::sync::Arc;

use bson::{Bson, Document};
use tessera_schema::{
    ExplicitColumns, ResolvedSchema, SchemaMode, resolve_schema,
};
use tessera_source::{CollectionRef, DocumentSource, driver};

use crate::error::ScanError;
use crate::exprs::ScalarExpr;
use crate::expr_pushdown;

/// The SQL-visible name of the scan table function.
pub const SCAN_FUNCTION_NAME: &str = "mongo_scan";

/// Default inference sample cap.
pub const DEFAULT_SAMPLE_SIZE: i64 = 100;

/// EXPLAIN truncates the pipeline text at this many characters.
const EXPLAIN_PIPELINE_MAX: usize = 400;

/// Arguments to `mongo_scan(conn, db, collection, ...)`.
#[derive(Debug, Clone, Default)]
pub struct ScanArguments {
    pub positional: Vec<String>,
    /// Raw native filter document as JSON text.
    pub filter: Option<String>,
    /// JSON array of pipeline stage documents; switches the scan to
    /// `aggregate`.
    pub pipeline: Option<String>,
    pub sample_size: Option<i64>,
    /// Explicit schema override.
    pub columns: Option<ExplicitColumns>,
    pub schema_mode: Option<String>,
}

impl ScanArguments {
    pub fn new(connection: &str, database: &str, collection: &str) -> Self {
        ScanArguments {
            positional: vec![
                connection.to_string(),
                database.to_string(),
                collection.to_string(),
            ],
            ..Default::default()
        }
    }
}

/// Pushdown capabilities advertised to the planner.
#[derive(Debug, Clone, Copy)]
pub struct ScanCapabilities {
    pub filter_pushdown: bool,
    pub projection_pushdown: bool,
    pub filter_prune: bool,
    pub complex_filter_pushdown: bool,
}

pub fn capabilities() -> ScanCapabilities {
    ScanCapabilities {
        filter_pushdown: true,
        projection_pushdown: true,
        filter_prune: true,
        complex_filter_pushdown: true,
    }
}

/// Per-statement bind state: connection, resolved schema, and the filter
/// and pipeline fragments accumulated before execution.
pub struct ScanBind<S: DocumentSource> {
    pub connection_uri: String,
    pub connection: Arc<S>,
    pub database: String,
    pub collection: String,
    /// Raw `filter` parameter, parsed once at bind.
    pub filter_doc: Option<Document>,
    pub filter_json: Option<String>,
    /// Pipeline stages (user parameter or rewriter output).
    pub pipeline: Option<Vec<Document>>,
    pub pipeline_json: Option<String>,
    pub sample_size: i64,
    pub schema_mode: SchemaMode,
    pub has_explicit_schema: bool,
    pub schema: ResolvedSchema,
    /// `$expr` fragment produced by complex-filter pushdown.
    pub complex_filter_expr: Option<Document>,
}

impl<S: DocumentSource> Clone for ScanBind<S> {
    fn clone(&self) -> Self {
        ScanBind {
            connection_uri: self.connection_uri.clone(),
            connection: Arc::clone(&self.connection),
            database: self.database.clone(),
            collection: self.collection.clone(),
            filter_doc: self.filter_doc.clone(),
            filter_json: self.filter_json.clone(),
            pipeline: self.pipeline.clone(),
            pipeline_json: self.pipeline_json.clone(),
            sample_size: self.sample_size,
            schema_mode: self.schema_mode,
            has_explicit_schema: self.has_explicit_schema,
            schema: self.schema.clone(),
            complex_filter_expr: self.complex_filter_expr.clone(),
        }
    }
}

impl<S: DocumentSource> ScanBind<S> {
    pub fn collection_ref(&self) -> CollectionRef<'_, S> {
        self.connection
            .collection(&self.database, &self.collection)
    }

    /// Run complex-filter pushdown over the planner's residual filters,
    /// storing the `$expr` fragment and returning the survivors.
    pub fn pushdown_complex_filters(
        &mut self,
        filters: Vec<ScalarExpr>,
        table_index: usize,
    ) -> Vec<ScalarExpr> {
        expr_pushdown::pushdown_complex(
            filters,
            &self.schema,
            table_index,
            &mut self.complex_filter_expr,
        )
    }

    pub fn scan_method(&self) -> &'static str {
        if self.pipeline.is_some() { "aggregate" } else { "find" }
    }

    pub fn explain(&self) -> ScanExplain {
        let pipeline = self.pipeline_json.as_ref().map(|json| {
            if json.len() > EXPLAIN_PIPELINE_MAX {
                let mut truncated: String = json.chars().take(EXPLAIN_PIPELINE_MAX).collect();
                truncated.push_str("...");
                truncated
            } else {
                json.clone()
            }
        });
        ScanExplain {
            database: self.database.clone(),
            collection: self.collection.clone(),
            scan_method: self.scan_method(),
            pipeline,
            filter: self.filter_json.clone(),
            expr: self
                .complex_filter_expr
                .as_ref()
                .map(|d| document_to_json(d)),
        }
    }
}

/// What a scan reports to EXPLAIN.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanExplain {
    pub database: String,
    pub collection: String,
    pub scan_method: &'static str,
    pub pipeline: Option<String>,
    pub filter: Option<String>,
    pub expr: Option<String>,
}

/// Bind a scan call: parse arguments, open the connection, resolve the
/// schema, and advertise it to the engine.
pub fn bind<S: DocumentSource>(args: &ScanArguments) -> Result<ScanBind<S>, ScanError> {
    if args.positional.len() < 3 {
        return Err(ScanError::InvalidInput(format!(
            "{SCAN_FUNCTION_NAME} requires at least 3 arguments: connection_string, database, collection"
        )));
    }
    let connection_uri = args.positional[0].clone();
    let database = args.positional[1].clone();
    let collection = args.positional[2].clone();

    let sample_size = args.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE);
    let schema_mode = match &args.schema_mode {
        Some(text) => SchemaMode::parse(text)?,
        None => SchemaMode::default(),
    };

    let filter_doc = match &args.filter {
        Some(text) => Some(parse_filter_json(text)?),
        None => None,
    };
    let pipeline = match &args.pipeline {
        Some(text) => Some(parse_pipeline_json(text)?),
        None => None,
    };

    driver::global();
    let connection = Arc::new(S::connect(&connection_uri)?);

    let (schema, has_explicit_schema) = resolve_schema(
        connection.collection(&database, &collection),
        sample_size,
        args.columns.as_ref(),
    )?;
    tracing::debug!(
        database = %database,
        collection = %collection,
        columns = schema.len(),
        explicit = has_explicit_schema,
        "bound scan"
    );

    Ok(ScanBind {
        connection_uri,
        connection,
        database,
        collection,
        filter_doc,
        filter_json: args.filter.clone(),
        pipeline_json: pipeline.as_ref().map(|stages| pipeline_to_json(stages)),
        pipeline,
        sample_size,
        schema_mode,
        has_explicit_schema,
        schema,
        complex_filter_expr: None,
    })
}

/// Parse the raw `filter` parameter into a document.
pub fn parse_filter_json(text: &str) -> Result<Document, ScanError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ScanError::InvalidInput(format!("invalid filter JSON: {e}")))?;
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        _ => Err(ScanError::InvalidInput(
            "filter must be a JSON object".into(),
        )),
    }
}

/// Parse the `pipeline` parameter: a JSON array of stage documents.
/// Wrapped as `{"pipeline": [...]}` so the array parses as a document
/// field.
pub fn parse_pipeline_json(text: &str) -> Result<Vec<Document>, ScanError> {
    let wrapped = format!("{{\"pipeline\":{text}}}");
    let value: serde_json::Value = serde_json::from_str(&wrapped)
        .map_err(|e| ScanError::InvalidInput(format!("invalid pipeline JSON: {e}")))?;
    let stages = value
        .get("pipeline")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ScanError::InvalidInput("pipeline must be a JSON array".into()))?;

    let mut result = Vec::with_capacity(stages.len());
    for stage in stages {
        match Bson::try_from(stage.clone()) {
            Ok(Bson::Document(doc)) => result.push(doc),
            _ => {
                return Err(ScanError::InvalidInput(
                    "pipeline stages must be JSON objects".into(),
                ));
            }
        }
    }
    Ok(result)
}

pub fn document_to_json(doc: &Document) -> String {
    let value = Bson::Document(doc.clone()).into_relaxed_extjson();
    serde_json::to_string(&value).unwrap_or_default()
}

/// Serialize stages as the canonical `[{...},{...}]` pipeline text.
pub fn pipeline_to_json(stages: &[Document]) -> String {
    let mut out = String::from("[");
    for (i, stage) in stages.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&document_to_json(stage));
    }
    out.push(']');
    out
}
