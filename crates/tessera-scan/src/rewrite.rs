use std::collections::HashMap;

use bson::{Bson, Document, doc};
use tessera_schema::{ColumnType, ResolvedSchema};
use tessera_source::DocumentSource;

use crate::bind::pipeline_to_json;
use crate::expr_pushdown::merge_filter_conjuncts;
use crate::exprs::ScalarExpr;
use crate::filter::build_find_filter;
use crate::plan::{AggregateKind, LogicalPlan, ScanNode};
use crate::predicate::TableFilterSet;

/// A column-binding remap produced when a plan node is replaced by a scan
/// with a different table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRule {
    pub from_table_index: usize,
    pub to_table_index: usize,
    pub column_offset: usize,
}

/// Late optimizer pass: rewrite `TopN{_id}` and supported aggregates over a
/// scan into aggregation-pipeline scans, then re-point stale column
/// bindings in a single post-pass.
pub fn rewrite_plan<S: DocumentSource>(plan: LogicalPlan<S>) -> LogicalPlan<S> {
    let mut rules = Vec::new();
    let mut plan = rewrite_node(plan, &mut rules);
    if !rules.is_empty() {
        apply_rules_to_plan(&mut plan, &rules);
    }
    plan
}

fn rewrite_node<S: DocumentSource>(
    node: LogicalPlan<S>,
    rules: &mut Vec<BindingRule>,
) -> LogicalPlan<S> {
    let node = match try_rewrite_topn(node) {
        // The TopN was removed; keep rewriting at the replacement node.
        Ok(rewritten) => return rewrite_node(rewritten, rules),
        Err(original) => original,
    };
    let node = match try_rewrite_aggregate(node, rules) {
        Ok(rewritten) => return rewritten,
        Err(original) => original,
    };
    recurse_children(node, rules)
}

fn recurse_children<S: DocumentSource>(
    node: LogicalPlan<S>,
    rules: &mut Vec<BindingRule>,
) -> LogicalPlan<S> {
    match node {
        LogicalPlan::Projection {
            table_index,
            exprs,
            child,
        } => LogicalPlan::Projection {
            table_index,
            exprs,
            child: Box::new(rewrite_node(*child, rules)),
        },
        LogicalPlan::TopN {
            limit,
            offset,
            orders,
            child,
        } => LogicalPlan::TopN {
            limit,
            offset,
            orders,
            child: Box::new(rewrite_node(*child, rules)),
        },
        LogicalPlan::Aggregate {
            group_index,
            aggregate_index,
            grouping_set_count,
            groups,
            aggregates,
            child,
        } => LogicalPlan::Aggregate {
            group_index,
            aggregate_index,
            grouping_set_count,
            groups,
            aggregates,
            child: Box::new(rewrite_node(*child, rules)),
        },
        LogicalPlan::Limit { limit, child } => LogicalPlan::Limit {
            limit,
            child: Box::new(rewrite_node(*child, rules)),
        },
        LogicalPlan::Order { orders, child } => LogicalPlan::Order {
            orders,
            child: Box::new(rewrite_node(*child, rules)),
        },
        leaf @ LogicalPlan::Scan(_) => leaf,
    }
}

// ── Shared resolution helpers ───────────────────────────────────

/// Collect the projection chain between a node's child and its scan leaf.
fn projection_chain<S: DocumentSource>(
    mut node: &LogicalPlan<S>,
) -> (Vec<(usize, &Vec<ScalarExpr>)>, Option<&ScanNode<S>>) {
    let mut projections = Vec::new();
    loop {
        match node {
            LogicalPlan::Projection {
                table_index,
                exprs,
                child,
            } => {
                projections.push((*table_index, exprs));
                node = child;
            }
            LogicalPlan::Scan(scan) => return (projections, Some(scan)),
            _ => return (projections, None),
        }
    }
}

/// Resolve a plain column reference through the projection chain down to a
/// scan column index. Anything other than direct references cancels.
fn resolve_column_to_scan(
    expr: &ScalarExpr,
    projections: &[(usize, &Vec<ScalarExpr>)],
    scan_table_index: usize,
) -> Option<usize> {
    let (mut table, mut column) = match expr {
        ScalarExpr::ColumnRef {
            table_index,
            column_index,
            ..
        } => (*table_index, *column_index),
        _ => return None,
    };
    for (projection_index, exprs) in projections {
        if table != *projection_index {
            continue;
        }
        if column >= exprs.len() {
            return None;
        }
        match &exprs[column] {
            ScalarExpr::ColumnRef {
                table_index,
                column_index,
                ..
            } => {
                table = *table_index;
                column = *column_index;
            }
            _ => return None,
        }
    }
    (table == scan_table_index).then_some(column)
}

/// `$match` contents for a scan: the raw filter parameter, the translated
/// pushed filters, and the `$expr` fragment, folded into one conjunction.
fn match_from_existing_filters<S: DocumentSource>(scan: &ScanNode<S>) -> Document {
    let simple = build_find_filter(&scan.filters, &scan.bind.schema);
    merge_filter_conjuncts(
        scan.bind.filter_doc.as_ref(),
        Some(&simple),
        scan.bind.complex_filter_expr.as_ref(),
    )
}

// ── TopN-by-_id rewrite ─────────────────────────────────────────

fn topn_pipeline<S: DocumentSource>(node: &LogicalPlan<S>) -> Option<Vec<Document>> {
    let (limit, orders, child) = match node {
        LogicalPlan::TopN {
            limit,
            offset: 0,
            orders,
            child,
        } if *limit > 0 && orders.len() == 1 => (*limit, orders, child),
        _ => return None,
    };

    let (projections, scan) = projection_chain(child);
    let scan = scan?;

    // The sort key must resolve to the scan's _id column.
    let order = &orders[0];
    let column = resolve_column_to_scan(&order.expr, &projections, scan.table_index)?;
    if !scan
        .bind
        .schema
        .column_names
        .get(column)
        .is_some_and(|name| name.eq_ignore_ascii_case("_id"))
    {
        return None;
    }

    let mut stages = Vec::new();
    let match_doc = match_from_existing_filters(scan);
    if !match_doc.is_empty() {
        stages.push(doc! { "$match": match_doc });
    }
    let direction = if order.ascending { 1_i32 } else { -1_i32 };
    stages.push(doc! { "$sort": { "_id": direction } });
    stages.push(doc! { "$limit": limit as i64 });
    Some(stages)
}

fn try_rewrite_topn<S: DocumentSource>(
    node: LogicalPlan<S>,
) -> Result<LogicalPlan<S>, LogicalPlan<S>> {
    let stages = match topn_pipeline(&node) {
        Some(stages) => stages,
        None => return Err(node),
    };

    match node {
        LogicalPlan::TopN { child, .. } => {
            let mut child = *child;
            install_pipeline(&mut child, stages);
            tracing::debug!("rewrote TopN over scan into a sorted pipeline");
            Ok(child)
        }
        other => Err(other),
    }
}

/// Install pipeline stages on the scan leaf under a projection chain.
/// The pipeline already sorts and limits, so the TopN node is gone; the
/// projection chain stays intact.
fn install_pipeline<S: DocumentSource>(node: &mut LogicalPlan<S>, stages: Vec<Document>) {
    match node {
        LogicalPlan::Projection { child, .. } => install_pipeline(child, stages),
        LogicalPlan::Scan(scan) => {
            scan.bind.pipeline_json = Some(pipeline_to_json(&stages));
            scan.bind.pipeline = Some(stages);
        }
        _ => {}
    }
}

// ── Aggregate rewrite ───────────────────────────────────────────

struct AggregateRewrite {
    stages: Vec<Document>,
    schema: ResolvedSchema,
    column_offset: usize,
}

fn aggregate_rewrite<S: DocumentSource>(node: &LogicalPlan<S>) -> Option<AggregateRewrite> {
    let (groups, aggregates, grouping_set_count, child) = match node {
        LogicalPlan::Aggregate {
            groups,
            aggregates,
            grouping_set_count,
            child,
            ..
        } => (groups, aggregates, *grouping_set_count, child),
        _ => return None,
    };
    if grouping_set_count > 1 {
        return None;
    }

    let (projections, scan) = projection_chain(child);
    let scan = scan?;
    let schema = &scan.bind.schema;

    // Group keys must be plain column references into the scan.
    let mut group_fields: Vec<(String, String)> = Vec::new();
    let mut group_types: Vec<ColumnType> = Vec::new();
    for group in groups {
        let column = resolve_column_to_scan(group, &projections, scan.table_index)?;
        let name = schema.column_names.get(column)?;
        group_fields.push((name.clone(), schema.path_of(name).to_string()));
        group_types.push(schema.column_types[column].clone());
    }

    let ungrouped = group_fields.is_empty();
    let count_star_only = ungrouped
        && aggregates.len() == 1
        && aggregates[0].kind == AggregateKind::CountStar
        && supported_aggregate(&aggregates[0], &projections, scan).is_some();

    let mut out_names: Vec<String> = group_fields.iter().map(|(n, _)| n.clone()).collect();
    let mut out_types = group_types;
    let mut agg_specs: Vec<(String, Document)> = Vec::new();

    if count_star_only {
        out_names = vec!["count".into()];
        out_types = vec![ColumnType::Bigint];
    } else {
        for (i, aggregate) in aggregates.iter().enumerate() {
            let column = supported_aggregate(aggregate, &projections, scan)?;
            // Stable output names keep the pipeline schema deterministic.
            let out_field = format!("__agg{i}");
            let spec = match aggregate.kind {
                AggregateKind::CountStar => doc! { "$sum": 1_i32 },
                AggregateKind::Count => {
                    let name = &schema.column_names[column?];
                    let path = format!("${}", schema.path_of(name));
                    doc! { "$sum": { "$cond": [ { "$ne": [path, Bson::Null] }, 1_i32, 0_i32 ] } }
                }
                kind => {
                    let name = &schema.column_names[column?];
                    let path = format!("${}", schema.path_of(name));
                    let operator = match kind {
                        AggregateKind::Sum => "$sum",
                        AggregateKind::Min => "$min",
                        AggregateKind::Max => "$max",
                        AggregateKind::Avg => "$avg",
                        _ => unreachable!(),
                    };
                    let mut spec = Document::new();
                    spec.insert(operator, Bson::String(path));
                    spec
                }
            };
            let out_type = match aggregate.kind {
                AggregateKind::CountStar | AggregateKind::Count => ColumnType::Bigint,
                _ => aggregate.return_type.clone(),
            };
            out_names.push(out_field.clone());
            out_types.push(out_type);
            agg_specs.push((out_field, spec));
        }
    }

    // Assemble stages.
    let mut stages = Vec::new();
    let match_doc = match_from_existing_filters(scan);
    if !match_doc.is_empty() {
        stages.push(doc! { "$match": match_doc });
    }

    if count_star_only {
        stages.push(doc! { "$count": "count" });
    } else {
        let mut group_spec = Document::new();
        if group_fields.is_empty() {
            group_spec.insert("_id", Bson::Null);
        } else {
            let mut id_doc = Document::new();
            for (name, path) in &group_fields {
                id_doc.insert(name.clone(), Bson::String(format!("${path}")));
            }
            group_spec.insert("_id", Bson::Document(id_doc));
        }
        for (name, spec) in &agg_specs {
            group_spec.insert(name.clone(), Bson::Document(spec.clone()));
        }
        stages.push(doc! { "$group": group_spec });

        // Flatten the compound _id back into named columns.
        let mut project_spec = Document::new();
        for (name, _) in &group_fields {
            project_spec.insert(name.clone(), Bson::String(format!("$_id.{name}")));
        }
        for (name, _) in &agg_specs {
            project_spec.insert(name.clone(), Bson::Int32(1));
        }
        project_spec.insert("_id", Bson::Int32(0));
        stages.push(doc! { "$project": project_spec });
    }

    let mut path_map = HashMap::new();
    for name in &out_names {
        path_map.insert(name.clone(), name.clone());
    }
    Some(AggregateRewrite {
        stages,
        schema: ResolvedSchema {
            column_names: out_names,
            column_types: out_types,
            path_map,
        },
        column_offset: if count_star_only { 0 } else { group_fields.len() },
    })
}

/// Supported: COUNT(*), COUNT(col), SUM/MIN/MAX/AVG(col) over direct column
/// references, no DISTINCT/FILTER/ORDER. Returns the resolved scan column
/// (None inside Some for COUNT(*)).
fn supported_aggregate<S: DocumentSource>(
    aggregate: &crate::plan::AggregateExpr,
    projections: &[(usize, &Vec<ScalarExpr>)],
    scan: &ScanNode<S>,
) -> Option<Option<usize>> {
    if aggregate.distinct || aggregate.has_filter || aggregate.has_order {
        return None;
    }
    match aggregate.kind {
        AggregateKind::CountStar => {
            if aggregate.arg.is_some() {
                return None;
            }
            Some(None)
        }
        _ => {
            let arg = aggregate.arg.as_ref()?;
            let column = resolve_column_to_scan(arg, projections, scan.table_index)?;
            if column >= scan.bind.schema.len() {
                return None;
            }
            Some(Some(column))
        }
    }
}

fn try_rewrite_aggregate<S: DocumentSource>(
    node: LogicalPlan<S>,
    rules: &mut Vec<BindingRule>,
) -> Result<LogicalPlan<S>, LogicalPlan<S>> {
    let rewrite = match aggregate_rewrite(&node) {
        Some(r) => r,
        None => return Err(node),
    };

    let (group_index, aggregate_index, child) = match node {
        LogicalPlan::Aggregate {
            group_index,
            aggregate_index,
            child,
            ..
        } => (group_index, aggregate_index, child),
        other => return Err(other),
    };

    let scan = extract_scan(*child);
    let mut bind = scan.bind;
    bind.pipeline_json = Some(pipeline_to_json(&rewrite.stages));
    bind.pipeline = Some(rewrite.stages);
    bind.schema = rewrite.schema;
    // The original filters are folded into the pipeline's $match.
    bind.filter_doc = None;
    bind.filter_json = None;
    bind.complex_filter_expr = None;
    bind.has_explicit_schema = false;

    // Upper references into the aggregate's output move to the new scan.
    rules.push(BindingRule {
        from_table_index: aggregate_index,
        to_table_index: group_index,
        column_offset: rewrite.column_offset,
    });
    tracing::debug!("rewrote aggregate over scan into a pipeline");

    let column_ids = (0..bind.schema.len()).collect();
    Ok(LogicalPlan::Scan(ScanNode {
        table_index: group_index,
        bind,
        filters: TableFilterSet::new(),
        column_ids,
    }))
}

fn extract_scan<S: DocumentSource>(mut node: LogicalPlan<S>) -> ScanNode<S> {
    loop {
        match node {
            LogicalPlan::Projection { child, .. } => node = *child,
            LogicalPlan::Scan(scan) => return scan,
            // aggregate_rewrite validated the shape already.
            _ => unreachable!("aggregate rewrite requires a projection chain over a scan"),
        }
    }
}

// ── Binding rule application ────────────────────────────────────

pub fn apply_rules_to_expr(expr: &mut ScalarExpr, rules: &[BindingRule]) {
    match expr {
        ScalarExpr::ColumnRef {
            table_index,
            column_index,
            ..
        } => {
            for rule in rules {
                if *table_index == rule.from_table_index {
                    *table_index = rule.to_table_index;
                    *column_index += rule.column_offset;
                }
            }
        }
        ScalarExpr::Cast { child, .. } => apply_rules_to_expr(child, rules),
        ScalarExpr::Function { args, .. } => {
            for arg in args {
                apply_rules_to_expr(arg, rules);
            }
        }
        ScalarExpr::Comparison { left, right, .. } => {
            apply_rules_to_expr(left, rules);
            apply_rules_to_expr(right, rules);
        }
        ScalarExpr::Constant(_) => {}
    }
}

fn apply_rules_to_plan<S: DocumentSource>(plan: &mut LogicalPlan<S>, rules: &[BindingRule]) {
    match plan {
        LogicalPlan::Scan(_) => {}
        LogicalPlan::Projection { exprs, child, .. } => {
            for expr in exprs {
                apply_rules_to_expr(expr, rules);
            }
            apply_rules_to_plan(child, rules);
        }
        LogicalPlan::TopN { orders, child, .. } | LogicalPlan::Order { orders, child } => {
            for order in orders {
                apply_rules_to_expr(&mut order.expr, rules);
            }
            apply_rules_to_plan(child, rules);
        }
        LogicalPlan::Aggregate {
            groups,
            aggregates,
            child,
            ..
        } => {
            for group in groups {
                apply_rules_to_expr(group, rules);
            }
            for aggregate in aggregates {
                if let Some(arg) = aggregate.arg.as_mut() {
                    apply_rules_to_expr(arg, rules);
                }
            }
            apply_rules_to_plan(child, rules);
        }
        LogicalPlan::Limit { child, .. } => apply_rules_to_plan(child, rules),
    }
}
