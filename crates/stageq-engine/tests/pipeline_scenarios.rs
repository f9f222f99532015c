use stageq_engine::*;
use stageq_ir::*;

fn store() -> StoreSnapshot {
    let mut store = RelationStore::new();
    store.insert_rows(
        "orders",
        vec![
            Row::from_pairs([("id", 1), ("user", 1), ("amt", 10)]),
            Row::from_pairs([("id", 2), ("user", 1), ("amt", 5)]),
            Row::from_pairs([("id", 3), ("user", 2), ("amt", 7)]),
        ],
    );
    store.insert_rows(
        "users",
        vec![
            Row::from_pairs([("id", Value::from(1)), ("name", Value::from("A"))]),
            Row::from_pairs([("id", Value::from(2)), ("name", Value::from("B"))]),
        ],
    );
    store.snapshot()
}

fn explicit_join(kind: JoinKind) -> PipelineStep {
    PipelineStep::Join(JoinStep {
        right_relation: "users".to_string(),
        left_key: Some(FieldPath::parse("orders.user")),
        right_key: Some(FieldPath::parse("users.id")),
        kind,
    })
}

fn run(steps: Vec<PipelineStep>) -> ResultTable {
    Executor::default()
        .execute(&store(), &Pipeline::new("orders", steps))
        .unwrap()
}

fn field<'a>(row: &'a Row, name: &str) -> &'a Value {
    row.resolve(&FieldPath::parse(name))
}

#[test]
fn test_join_then_group_totals() {
    let result = run(vec![
        explicit_join(JoinKind::Inner),
        PipelineStep::Group(GroupStep {
            group_keys: vec![FieldPath::parse("users.name")],
            aggregates: vec![AggregateSpec::new(AggOp::Sum, FieldPath::parse("orders.amt")).with_alias("total")],
        }),
    ]);

    assert_eq!(result.column_names(), vec!["name", "total"]);
    assert_eq!(result.row_count(), 2);
    assert_eq!(field(&result.rows[0], "name"), &Value::from("A"));
    assert_eq!(field(&result.rows[0], "total"), &Value::from(15));
    assert_eq!(field(&result.rows[1], "name"), &Value::from("B"));
    assert_eq!(field(&result.rows[1], "total"), &Value::from(7));
    assert!(result.notices.is_empty());
}

#[test]
fn test_pivot_counts_per_user() {
    let result = run(vec![
        explicit_join(JoinKind::Inner),
        PipelineStep::Pivot(PivotStep {
            row_keys: vec![FieldPath::parse("users.name")],
            col_keys: vec![],
            values: vec![PivotValue::new(AggOp::Count, FieldPath::wildcard())],
        }),
    ]);

    assert_eq!(result.column_names(), vec!["name", "count"]);
    assert_eq!(field(&result.rows[0], "count"), &Value::from(2));
    assert_eq!(field(&result.rows[1], "count"), &Value::from(1));
}

#[test]
fn test_pivot_column_buckets() {
    let result = run(vec![
        explicit_join(JoinKind::Inner),
        PipelineStep::Pivot(PivotStep {
            row_keys: vec![FieldPath::parse("orders.user")],
            col_keys: vec![FieldPath::parse("users.name")],
            values: vec![PivotValue::new(AggOp::Sum, FieldPath::parse("orders.amt"))],
        }),
    ]);

    // one row key plus one field per distinct column value
    assert_eq!(result.column_names(), vec!["user", "sum_orders_amt.A", "sum_orders_amt.B"]);
    assert_eq!(field(&result.rows[0], "sum_orders_amt.A"), &Value::from(15));
    assert_eq!(field(&result.rows[0], "sum_orders_amt.B"), &Value::Null);
    assert_eq!(field(&result.rows[1], "sum_orders_amt.B"), &Value::from(7));
}

#[test]
fn test_inferred_join_after_group_falls_back() {
    let result = run(vec![
        PipelineStep::Group(GroupStep {
            group_keys: vec![FieldPath::parse("orders.user")],
            aggregates: vec![AggregateSpec::new(AggOp::Count, FieldPath::wildcard())],
        }),
        PipelineStep::Join(JoinStep {
            right_relation: "users".to_string(),
            left_key: None,
            right_key: None,
            kind: JoinKind::Inner,
        }),
    ]);

    assert_eq!(result.row_count(), 4);
    assert!(matches!(result.notices[0], Notice::CartesianFallback { step: 1, .. }));
}

#[test]
fn test_left_join_keeps_every_left_row() {
    let mut store = RelationStore::new();
    store.insert_rows(
        "orders",
        vec![
            Row::from_pairs([("id", 1), ("user", 1)]),
            Row::from_pairs([("id", 2), ("user", 9)]),
        ],
    );
    store.insert_rows("users", vec![Row::from_pairs([("id", 1)])]);

    let result = Executor::default()
        .execute(&store.snapshot(), &Pipeline::new("orders", vec![explicit_join(JoinKind::Left)]))
        .unwrap();
    assert!(result.row_count() >= 2);
    assert_eq!(field(&result.rows[1], "users.id"), &Value::Null);
}

#[test]
fn test_unresolvable_explicit_key_aborts() {
    let steps = vec![PipelineStep::Join(JoinStep {
        right_relation: "users".to_string(),
        left_key: Some(FieldPath::parse("orders.customer")),
        right_key: Some(FieldPath::parse("users.id")),
        kind: JoinKind::Inner,
    })];
    let err = Executor::default()
        .execute(&store(), &Pipeline::new("orders", steps))
        .unwrap_err();
    match err {
        PipelineError::StepFailed { source, partial, .. } => {
            assert!(matches!(source, StepError::UnresolvableJoin { .. }));
            assert_eq!(partial.row_count(), 3);
        }
        other => panic!("expected step failure, got {:?}", other),
    }
}

#[test]
fn test_avg_without_numbers_is_null() {
    let mut store = RelationStore::new();
    store.insert_rows(
        "notes",
        vec![
            Row::from_pairs([("k", "x"), ("v", "n/a")]),
            Row::from_pairs([("k", "x"), ("v", "")]),
        ],
    );
    let steps = vec![PipelineStep::Group(GroupStep {
        group_keys: vec![FieldPath::parse("k")],
        aggregates: vec![AggregateSpec::new(AggOp::Avg, FieldPath::parse("v"))],
    })];

    let result = Executor::default()
        .execute(&store.snapshot(), &Pipeline::new("notes", steps))
        .unwrap();
    assert_eq!(field(&result.rows[0], "avg_v"), &Value::Null);
    assert!(result
        .notices
        .iter()
        .any(|n| matches!(n, Notice::AggregationTypeMismatch { op: AggOp::Avg, .. })));
}

#[test]
fn test_limit_zero_or_negative_is_identity() {
    for count in [0, -3] {
        let result = run(vec![PipelineStep::Limit(LimitStep { offset: 0, count })]);
        assert_eq!(result.row_count(), 3);
    }
}

#[test]
fn test_sort_keeps_ties_in_order() {
    let result = run(vec![PipelineStep::Sort(SortStep {
        orders: vec![SortKey::desc("user")],
    })]);
    let ids: Vec<&Value> = result.rows.iter().map(|r| field(r, "id")).collect();
    assert_eq!(ids, vec![&Value::from(3), &Value::from(1), &Value::from(2)]);
}

#[test]
fn test_empty_group_filter_accepts_all() {
    let result = run(vec![PipelineStep::Filter(FilterStep {
        condition: FilterExpr::and(vec![]),
    })]);
    assert_eq!(result.row_count(), 3);
}

#[test]
fn test_compute_then_select() {
    let result = run(vec![
        PipelineStep::Compute(ComputeStep {
            alias: "double".to_string(),
            expression: "orders.amt * 2".to_string(),
        }),
        PipelineStep::Select(SelectStep {
            projections: vec![Projection::new("id"), Projection::aliased("double", "twice")],
        }),
    ]);
    assert_eq!(result.column_names(), vec!["id", "twice"]);
    assert_eq!(field(&result.rows[0], "twice"), &Value::from(20));
}

#[test]
fn test_skip_policy_records_failures() {
    let executor = Executor::new(ExecutorOptions {
        failure_policy: FailurePolicy::SkipStep,
    });
    let steps = vec![
        PipelineStep::Compute(ComputeStep {
            alias: "x".to_string(),
            expression: "nosuchfn(amt)".to_string(),
        }),
        PipelineStep::Join(JoinStep {
            right_relation: "ghosts".to_string(),
            left_key: None,
            right_key: None,
            kind: JoinKind::Inner,
        }),
        PipelineStep::Limit(LimitStep { offset: 0, count: 2 }),
    ];

    let result = executor.execute(&store(), &Pipeline::new("orders", steps)).unwrap();
    assert_eq!(result.row_count(), 2);
    let skipped: Vec<(usize, &str)> = result.skipped.iter().map(|s| (s.index, s.kind)).collect();
    assert_eq!(skipped, vec![(0, "compute"), (1, "join")]);
}

#[test]
fn test_runs_are_deterministic() {
    let steps = vec![
        explicit_join(JoinKind::Left),
        PipelineStep::Sort(SortStep {
            orders: vec![SortKey::asc("users.name"), SortKey::desc("orders.amt")],
        }),
    ];
    let a = serde_json::to_string(&run(steps.clone())).unwrap();
    let b = serde_json::to_string(&run(steps)).unwrap();
    assert_eq!(a, b);
}
