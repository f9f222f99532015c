use stageq_ir::*;
use stageq_render::{render, RenderError, RenderOptions};

fn schemas() -> StaticSchemaProvider {
    StaticSchemaProvider::new()
        .with_columns("orders", &["id", "user", "user_id", "amt", "status"])
        .with_columns("users", &["id", "name"])
        .with_columns("notes", &["body"])
}

fn plain(dataset: &str, steps: Vec<PipelineStep>) -> String {
    render(&Pipeline::new(dataset, steps), &schemas(), &RenderOptions::plain()).unwrap()
}

fn join(right: &str, kind: JoinKind) -> PipelineStep {
    PipelineStep::Join(JoinStep {
        right_relation: right.to_string(),
        left_key: None,
        right_key: None,
        kind,
    })
}

fn explicit_join() -> PipelineStep {
    PipelineStep::Join(JoinStep {
        right_relation: "users".to_string(),
        left_key: Some(FieldPath::parse("orders.user")),
        right_key: Some(FieldPath::parse("users.id")),
        kind: JoinKind::Inner,
    })
}

fn group_totals() -> PipelineStep {
    PipelineStep::Group(GroupStep {
        group_keys: vec![FieldPath::parse("users.name")],
        aggregates: vec![AggregateSpec::new(AggOp::Sum, FieldPath::parse("orders.amt")).with_alias("total")],
    })
}

#[test]
fn test_staging_join_and_group() {
    let pipeline = Pipeline::new("orders", vec![explicit_join(), group_totals()]);
    let text = render(&pipeline, &schemas(), &RenderOptions::default()).unwrap();

    let expected = [
        "SELECT JSON_VALUE(users.Content, '$.name') AS name, ROUND(SUM(JSON_VALUE(orders.Content, '$.amt')), 4) AS total",
        "FROM DefaultStagingData orders",
        "INNER JOIN DefaultStagingData users ON JSON_VALUE(orders.Content, '$.user') = JSON_VALUE(users.Content, '$.id')",
        "WHERE orders.DefaultStagingDataBatchId = (SELECT TOP 1 Id FROM DefaultStagingDataBatch WHERE DrawflowIdentifier = 'orders' ORDER BY CreatedAt DESC) \
         AND users.DefaultStagingDataBatchId = (SELECT TOP 1 Id FROM DefaultStagingDataBatch WHERE DrawflowIdentifier = 'users' ORDER BY CreatedAt DESC)",
        "GROUP BY JSON_VALUE(users.Content, '$.name')",
    ]
    .join("\n");
    assert_eq!(text, expected);
}

#[test]
fn test_inferred_join_names_keys() {
    let text = plain("orders", vec![join("users", JoinKind::Inner)]);
    assert_eq!(text, "SELECT *\nFROM orders\nINNER JOIN users ON orders.user_id = users.id");
}

#[test]
fn test_cartesian_fallback_is_annotated() {
    let text = plain("orders", vec![join("notes", JoinKind::Inner)]);
    assert_eq!(
        text,
        "SELECT *\nFROM orders\n-- cartesian fallback: no join key between orders and notes\nCROSS JOIN notes"
    );

    let text = plain("orders", vec![join("notes", JoinKind::Left)]);
    assert!(text.ends_with("LEFT JOIN notes ON TRUE"));
}

#[test]
fn test_join_after_group_falls_back() {
    let text = plain(
        "orders",
        vec![
            PipelineStep::Group(GroupStep {
                group_keys: vec![FieldPath::parse("orders.status")],
                aggregates: vec![],
            }),
            join("users", JoinKind::Inner),
        ],
    );
    assert!(text.contains("-- cartesian fallback"));
    assert!(text.contains(") AS stage_1\n"));
}

#[test]
fn test_where_forms() {
    let condition = FilterExpr::or(vec![
        FilterExpr::predicate("orders.status", FilterOp::Contains, Value::from("pai")),
        FilterExpr::predicate("orders.amt", FilterOp::Between, vec![Value::from(1), Value::from(5)]),
    ]);
    let text = plain(
        "orders",
        vec![
            PipelineStep::Filter(FilterStep { condition }),
            PipelineStep::Filter(FilterStep {
                condition: FilterExpr::predicate("amt", FilterOp::NoneOf, vec![Value::from(3)]),
            }),
        ],
    );
    assert!(text.ends_with(
        "WHERE (orders.status LIKE '%pai%' OR orders.amt BETWEEN 1 AND 5) AND orders.amt NOT IN (3)"
    ));
}

#[test]
fn test_group_then_sort_by_output_name() {
    let text = plain(
        "orders",
        vec![
            explicit_join(),
            group_totals(),
            PipelineStep::Sort(SortStep {
                orders: vec![SortKey::desc("total")],
            }),
            PipelineStep::Limit(LimitStep { offset: 2, count: 10 }),
        ],
    );
    assert!(text.ends_with("GROUP BY users.name\nORDER BY total DESC\nLIMIT 10\nOFFSET 2"));
}

#[test]
fn test_limit_without_count_renders_offset_only() {
    let text = plain("orders", vec![PipelineStep::Limit(LimitStep { offset: 3, count: 0 })]);
    assert_eq!(text, "SELECT *\nFROM orders\nOFFSET 3");
}

#[test]
fn test_compute_uses_registry_names() {
    let text = plain(
        "users",
        vec![PipelineStep::Compute(ComputeStep {
            alias: "shout".to_string(),
            expression: "upper(name)".to_string(),
        })],
    );
    assert_eq!(text, "SELECT *, UPPER(users.name) AS shout\nFROM users");
}

#[test]
fn test_pivot_with_columns() {
    let text = plain(
        "orders",
        vec![
            PipelineStep::Pivot(PivotStep {
                row_keys: vec![FieldPath::parse("user")],
                col_keys: vec![FieldPath::parse("status")],
                values: vec![PivotValue::new(AggOp::Sum, FieldPath::parse("amt"))],
            }),
            PipelineStep::Sort(SortStep {
                orders: vec![SortKey::asc("user")],
            }),
        ],
    );
    let expected = [
        "SELECT *",
        "FROM (",
        "  PIVOT (",
        "    SELECT orders.user AS user, orders.status AS status, orders.amt AS amt",
        "    FROM orders",
        "  ) AS stage_1",
        "  ON status",
        "  USING ROUND(SUM(amt), 4) AS sum_amt",
        "  GROUP BY user",
        ") AS stage_2",
        "ORDER BY stage_2.user ASC",
    ]
    .join("\n");
    assert_eq!(text, expected);
}

#[test]
fn test_pivot_without_columns_is_a_group() {
    let text = plain(
        "orders",
        vec![PipelineStep::Pivot(PivotStep {
            row_keys: vec![FieldPath::parse("orders.user")],
            col_keys: vec![],
            values: vec![],
        })],
    );
    assert_eq!(
        text,
        "SELECT orders.user AS user, COUNT(*) AS count\nFROM orders\nGROUP BY orders.user"
    );
}

#[test]
fn test_malformed_step_reports_index() {
    let steps = vec![
        explicit_join(),
        PipelineStep::Filter(FilterStep {
            condition: FilterExpr::predicate("amt", FilterOp::Between, Value::from(1)),
        }),
    ];
    let err = render(&Pipeline::new("orders", steps), &schemas(), &RenderOptions::plain()).unwrap_err();
    assert!(matches!(err, RenderError::InvalidStep { index: 1, kind: "filter", .. }));
}

#[test]
fn test_rendering_is_deterministic() {
    let steps = vec![
        join("users", JoinKind::Left),
        group_totals(),
        PipelineStep::Filter(FilterStep {
            condition: FilterExpr::predicate("total", FilterOp::Gt, Value::from(3)),
        }),
    ];
    let pipeline = Pipeline::new("orders", steps);
    let a = render(&pipeline, &schemas(), &RenderOptions::default()).unwrap();
    let b = render(&pipeline.clone(), &schemas(), &RenderOptions::default()).unwrap();
    assert_eq!(a, b);
    assert!(a.contains("WHERE stage_1.total > 3"));
}
