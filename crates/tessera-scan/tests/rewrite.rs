mod common;

use bson::doc;
use common::{DB, bind_scan, seeded_source};
use tessera_batch::{Batch, Cell};
use tessera_scan::{
    AggregateExpr, AggregateKind, LogicalPlan, OrderByNode, ScalarExpr, ScanNode, TableFilter,
    TableFilterSet, init_local, next, rewrite_plan,
};
use tessera_schema::ColumnType;
use tessera_source::{DocumentSource, MemorySource};

const SCAN_INDEX: usize = 1;
const GROUP_INDEX: usize = 3;
const AGGREGATE_INDEX: usize = 5;
const UPPER_INDEX: usize = 7;

fn scan_node(uri: &str, collection: &str) -> ScanNode<MemorySource> {
    let bind = bind_scan(uri, collection);
    let column_ids = (0..bind.schema.len()).collect();
    ScanNode {
        table_index: SCAN_INDEX,
        bind,
        filters: TableFilterSet::new(),
        column_ids,
    }
}

fn column(table: usize, index: usize, ty: ColumnType) -> ScalarExpr {
    ScalarExpr::column(table, index, ty)
}

fn run_scan(scan: &ScanNode<MemorySource>) -> Vec<Vec<Cell>> {
    let column_ids: Vec<usize> = (0..scan.bind.schema.len()).collect();
    let mut state = init_local(&scan.bind, &column_ids, &scan.filters, None).unwrap();
    let mut batch = Batch::with_capacity(&scan.bind.schema.column_types, 16);
    let mut rows = Vec::new();
    loop {
        let produced = next(&scan.bind, &mut state, &mut batch).unwrap();
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

#[test]
fn count_star_becomes_count_pipeline() {
    seeded_source(
        "mem://rewrite-count",
        "t",
        vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 3 }],
    );
    let plan = LogicalPlan::Aggregate {
        group_index: GROUP_INDEX,
        aggregate_index: AGGREGATE_INDEX,
        grouping_set_count: 1,
        groups: vec![],
        aggregates: vec![AggregateExpr::count_star()],
        child: Box::new(LogicalPlan::Scan(scan_node("mem://rewrite-count", "t"))),
    };

    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected aggregate to collapse into a scan"),
    };
    assert_eq!(scan.table_index, GROUP_INDEX);
    assert_eq!(scan.bind.schema.column_names, vec!["count"]);
    assert_eq!(scan.bind.schema.column_types, vec![ColumnType::Bigint]);
    assert_eq!(
        scan.bind.pipeline_json.as_deref(),
        Some(r#"[{"$count":"count"}]"#)
    );

    assert_eq!(run_scan(scan), vec![vec![Cell::Bigint(3)]]);
}

#[test]
fn count_star_pipeline_over_empty_collection() {
    let src = MemorySource::connect("mem://rewrite-count-empty").unwrap();
    src.clear();
    src.create_collection(DB, "t");

    let plan = LogicalPlan::Aggregate {
        group_index: GROUP_INDEX,
        aggregate_index: AGGREGATE_INDEX,
        grouping_set_count: 1,
        groups: vec![],
        aggregates: vec![AggregateExpr::count_star()],
        child: Box::new(LogicalPlan::Scan(scan_node("mem://rewrite-count-empty", "t"))),
    };
    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected a scan"),
    };
    assert_eq!(run_scan(scan), vec![vec![Cell::Bigint(0)]]);
}

#[test]
fn grouped_aggregate_builds_group_and_project_stages() {
    seeded_source(
        "mem://rewrite-group",
        "t",
        vec![
            doc! { "_id": 1, "dept": "a", "score": 10 },
            doc! { "_id": 2, "dept": "b", "score": 20 },
            doc! { "_id": 3, "dept": "a", "score": 30 },
        ],
    );
    let scan = scan_node("mem://rewrite-group", "t");
    let dept = scan.bind.schema.column_index("dept").unwrap();
    let score = scan.bind.schema.column_index("score").unwrap();

    let plan = LogicalPlan::Aggregate {
        group_index: GROUP_INDEX,
        aggregate_index: AGGREGATE_INDEX,
        grouping_set_count: 1,
        groups: vec![column(SCAN_INDEX, dept, ColumnType::Varchar)],
        aggregates: vec![AggregateExpr::simple(
            AggregateKind::Sum,
            column(SCAN_INDEX, score, ColumnType::Bigint),
            ColumnType::Bigint,
        )],
        child: Box::new(LogicalPlan::Scan(scan)),
    };

    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected a scan"),
    };
    assert_eq!(scan.bind.schema.column_names, vec!["dept", "__agg0"]);

    let stages = scan.bind.pipeline.as_ref().unwrap();
    assert_eq!(stages.len(), 2);
    assert_eq!(
        stages[0],
        doc! { "$group": { "_id": { "dept": "$dept" }, "__agg0": { "$sum": "$score" } } }
    );
    assert_eq!(
        stages[1],
        doc! { "$project": { "dept": "$_id.dept", "__agg0": 1, "_id": 0 } }
    );

    let mut rows = run_scan(scan);
    rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        rows,
        vec![
            vec![Cell::Varchar("a".into()), Cell::Bigint(40)],
            vec![Cell::Varchar("b".into()), Cell::Bigint(20)],
        ]
    );
}

#[test]
fn binding_rule_repoints_upper_references() {
    seeded_source(
        "mem://rewrite-binding",
        "t",
        vec![doc! { "_id": 1, "dept": "a", "score": 10 }],
    );
    let scan = scan_node("mem://rewrite-binding", "t");
    let dept = scan.bind.schema.column_index("dept").unwrap();
    let score = scan.bind.schema.column_index("score").unwrap();

    // Upper projection reads the aggregate's output: group key then the sum.
    let plan = LogicalPlan::Projection {
        table_index: UPPER_INDEX,
        exprs: vec![
            column(GROUP_INDEX, 0, ColumnType::Varchar),
            column(AGGREGATE_INDEX, 0, ColumnType::Bigint),
        ],
        child: Box::new(LogicalPlan::Aggregate {
            group_index: GROUP_INDEX,
            aggregate_index: AGGREGATE_INDEX,
            grouping_set_count: 1,
            groups: vec![column(SCAN_INDEX, dept, ColumnType::Varchar)],
            aggregates: vec![AggregateExpr::simple(
                AggregateKind::Sum,
                column(SCAN_INDEX, score, ColumnType::Bigint),
                ColumnType::Bigint,
            )],
            child: Box::new(LogicalPlan::Scan(scan)),
        }),
    };

    let rewritten = rewrite_plan(plan);
    let exprs = match &rewritten {
        LogicalPlan::Projection { exprs, .. } => exprs,
        _ => panic!("expected the projection to survive"),
    };
    // Group reference untouched; aggregate reference shifted past the keys.
    match &exprs[0] {
        ScalarExpr::ColumnRef {
            table_index,
            column_index,
            ..
        } => {
            assert_eq!((*table_index, *column_index), (GROUP_INDEX, 0));
        }
        other => panic!("expected column ref, got {other:?}"),
    }
    match &exprs[1] {
        ScalarExpr::ColumnRef {
            table_index,
            column_index,
            ..
        } => {
            assert_eq!((*table_index, *column_index), (GROUP_INDEX, 1));
        }
        other => panic!("expected column ref, got {other:?}"),
    }
}

#[test]
fn distinct_aggregate_cancels_rewrite() {
    seeded_source("mem://rewrite-distinct", "t", vec![doc! { "_id": 1, "x": 1 }]);
    let scan = scan_node("mem://rewrite-distinct", "t");
    let x = scan.bind.schema.column_index("x").unwrap();

    let mut aggregate = AggregateExpr::simple(
        AggregateKind::Sum,
        column(SCAN_INDEX, x, ColumnType::Bigint),
        ColumnType::Bigint,
    );
    aggregate.distinct = true;

    let plan = LogicalPlan::Aggregate {
        group_index: GROUP_INDEX,
        aggregate_index: AGGREGATE_INDEX,
        grouping_set_count: 1,
        groups: vec![],
        aggregates: vec![aggregate],
        child: Box::new(LogicalPlan::Scan(scan)),
    };
    let rewritten = rewrite_plan(plan);
    match &rewritten {
        LogicalPlan::Aggregate { child, .. } => match child.as_ref() {
            LogicalPlan::Scan(scan) => assert!(scan.bind.pipeline.is_none()),
            _ => panic!("expected the original scan"),
        },
        _ => panic!("expected the aggregate to survive"),
    }
}

#[test]
fn topn_by_id_becomes_sorted_pipeline() {
    seeded_source(
        "mem://rewrite-topn",
        "t",
        vec![
            doc! { "_id": 3 },
            doc! { "_id": 1 },
            doc! { "_id": 2 },
        ],
    );
    let scan = scan_node("mem://rewrite-topn", "t");
    let plan = LogicalPlan::TopN {
        limit: 2,
        offset: 0,
        orders: vec![OrderByNode {
            expr: column(SCAN_INDEX, 0, ColumnType::Bigint),
            ascending: true,
        }],
        child: Box::new(LogicalPlan::Scan(scan)),
    };

    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected the TopN to be removed"),
    };
    let stages = scan.bind.pipeline.as_ref().unwrap();
    assert_eq!(stages[0], doc! { "$sort": { "_id": 1 } });
    assert_eq!(stages[1], doc! { "$limit": 2_i64 });

    let rows = run_scan(scan);
    assert_eq!(rows, vec![vec![Cell::Bigint(1)], vec![Cell::Bigint(2)]]);
}

#[test]
fn topn_descending_with_existing_filters_adds_match() {
    seeded_source(
        "mem://rewrite-topn-match",
        "t",
        vec![
            doc! { "_id": 1, "x": 1 },
            doc! { "_id": 2, "x": 5 },
            doc! { "_id": 3, "x": 9 },
        ],
    );
    let mut scan = scan_node("mem://rewrite-topn-match", "t");
    let x = scan.bind.schema.column_index("x").unwrap();
    scan.filters.insert(
        x,
        TableFilter::Comparison {
            op: tessera_scan::CompareOp::Gt,
            value: Cell::Bigint(2),
        },
    );
    let plan = LogicalPlan::TopN {
        limit: 1,
        offset: 0,
        orders: vec![OrderByNode {
            expr: column(SCAN_INDEX, 0, ColumnType::Bigint),
            ascending: false,
        }],
        child: Box::new(LogicalPlan::Scan(scan)),
    };

    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected a scan"),
    };
    let stages = scan.bind.pipeline.as_ref().unwrap();
    assert_eq!(stages[0], doc! { "$match": { "x": { "$gt": 2_i64 } } });
    assert_eq!(stages[1], doc! { "$sort": { "_id": -1 } });

    let rows = run_scan(scan);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Cell::Bigint(3));
}

#[test]
fn topn_through_projection_keeps_projection() {
    seeded_source(
        "mem://rewrite-topn-proj",
        "t",
        vec![doc! { "_id": 2 }, doc! { "_id": 1 }],
    );
    let scan = scan_node("mem://rewrite-topn-proj", "t");
    let projection_index = 9;
    let plan = LogicalPlan::TopN {
        limit: 1,
        offset: 0,
        orders: vec![OrderByNode {
            // The order key goes through the projection.
            expr: column(projection_index, 0, ColumnType::Bigint),
            ascending: true,
        }],
        child: Box::new(LogicalPlan::Projection {
            table_index: projection_index,
            exprs: vec![column(SCAN_INDEX, 0, ColumnType::Bigint)],
            child: Box::new(LogicalPlan::Scan(scan)),
        }),
    };

    let rewritten = rewrite_plan(plan);
    match &rewritten {
        LogicalPlan::Projection { child, .. } => match child.as_ref() {
            LogicalPlan::Scan(scan) => {
                assert!(scan.bind.pipeline.is_some());
            }
            _ => panic!("expected the scan under the projection"),
        },
        _ => panic!("expected the projection chain to survive"),
    }
}

#[test]
fn topn_on_non_id_column_is_left_alone() {
    seeded_source(
        "mem://rewrite-topn-nonid",
        "t",
        vec![doc! { "_id": 1, "x": 2 }],
    );
    let scan = scan_node("mem://rewrite-topn-nonid", "t");
    let x = scan.bind.schema.column_index("x").unwrap();
    let plan = LogicalPlan::TopN {
        limit: 5,
        offset: 0,
        orders: vec![OrderByNode {
            expr: column(SCAN_INDEX, x, ColumnType::Bigint),
            ascending: true,
        }],
        child: Box::new(LogicalPlan::Scan(scan)),
    };
    let rewritten = rewrite_plan(plan);
    assert!(matches!(rewritten, LogicalPlan::TopN { .. }));
}

#[test]
fn topn_with_offset_is_left_alone() {
    seeded_source("mem://rewrite-topn-offset", "t", vec![doc! { "_id": 1 }]);
    let scan = scan_node("mem://rewrite-topn-offset", "t");
    let plan = LogicalPlan::TopN {
        limit: 5,
        offset: 10,
        orders: vec![OrderByNode {
            expr: column(SCAN_INDEX, 0, ColumnType::Bigint),
            ascending: true,
        }],
        child: Box::new(LogicalPlan::Scan(scan)),
    };
    let rewritten = rewrite_plan(plan);
    assert!(matches!(rewritten, LogicalPlan::TopN { .. }));
}

#[test]
fn grouped_count_column_ignores_nulls() {
    seeded_source(
        "mem://rewrite-count-col",
        "t",
        vec![
            doc! { "_id": 1, "dept": "a", "score": 10 },
            doc! { "_id": 2, "dept": "a", "score": null },
            doc! { "_id": 3, "dept": "a" },
        ],
    );
    let scan = scan_node("mem://rewrite-count-col", "t");
    let dept = scan.bind.schema.column_index("dept").unwrap();
    let score = scan.bind.schema.column_index("score").unwrap();

    let plan = LogicalPlan::Aggregate {
        group_index: GROUP_INDEX,
        aggregate_index: AGGREGATE_INDEX,
        grouping_set_count: 1,
        groups: vec![column(SCAN_INDEX, dept, ColumnType::Varchar)],
        aggregates: vec![AggregateExpr::simple(
            AggregateKind::Count,
            column(SCAN_INDEX, score, ColumnType::Double),
            ColumnType::Bigint,
        )],
        child: Box::new(LogicalPlan::Scan(scan)),
    };
    let rewritten = rewrite_plan(plan);
    let scan = match &rewritten {
        LogicalPlan::Scan(scan) => scan,
        _ => panic!("expected a scan"),
    };
    assert_eq!(
        run_scan(scan),
        vec![vec![Cell::Varchar("a".into()), Cell::Bigint(1)]]
    );
}
