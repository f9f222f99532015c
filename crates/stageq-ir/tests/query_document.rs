use stageq_ir::*;

const DOCUMENT: &str = r#"{
    "dataset": "orders",
    "steps": [
        {
            "type": "filter",
            "condition": {
                "combinator": "and",
                "children": [
                    {"field": "orders.status", "operator": "anyOf", "operand": ["paid", "shipped"]},
                    {
                        "combinator": "notOr",
                        "children": [
                            {"field": "orders.amt", "operator": "between", "operand": [0, 5]},
                            {"field": "orders.note", "operator": "isBlank"}
                        ]
                    }
                ]
            }
        },
        {"type": "join", "rightRelation": "users", "leftKey": "orders.user", "rightKey": "users.id"},
        {"type": "pivot", "rowKeys": ["users.name"], "colKeys": ["orders.status"], "values": [{"op": "sum", "field": "orders.amt"}]},
        {"type": "sort", "orders": [{"field": "name", "direction": "desc"}]}
    ]
}"#;

#[test]
fn test_parse_full_document() {
    let pipeline: Pipeline = serde_json::from_str(DOCUMENT).unwrap();

    assert_eq!(pipeline.dataset, "orders");
    let kinds: Vec<&str> = pipeline.steps.iter().map(PipelineStep::kind).collect();
    assert_eq!(kinds, vec!["filter", "join", "pivot", "sort"]);

    match &pipeline.steps[0] {
        PipelineStep::Filter(FilterStep {
            condition: FilterExpr::Group { children, combinator, .. },
        }) => {
            assert_eq!(*combinator, Combinator::And);
            assert_eq!(children.len(), 2);
            assert!(matches!(
                &children[1],
                FilterExpr::Group { combinator: Combinator::NotOr, .. }
            ));
        }
        other => panic!("expected filter group, got {:?}", other),
    }

    match &pipeline.steps[2] {
        PipelineStep::Pivot(pivot) => {
            assert_eq!(pivot.col_keys, vec![FieldPath::parse("orders.status")]);
            assert_eq!(pivot.values[0].label(), "sum_orders_amt");
        }
        other => panic!("expected pivot, got {:?}", other),
    }
}

#[test]
fn test_fingerprint_tracks_content() {
    let pipeline: Pipeline = serde_json::from_str(DOCUMENT).unwrap();
    let mut changed = pipeline.clone();
    changed.steps.push(PipelineStep::Limit(LimitStep { offset: 0, count: 5 }));

    let a = pipeline.fingerprint().unwrap();
    let b = changed.fingerprint().unwrap();
    assert_eq!(a.len(), 64);
    assert_ne!(a, b);
    assert_eq!(a, pipeline.clone().fingerprint().unwrap());
}

#[test]
fn test_unknown_step_type_rejected() {
    let result: Result<Pipeline, _> =
        serde_json::from_str(r#"{"dataset": "x", "steps": [{"type": "explode"}]}"#);
    assert!(result.is_err());
}
