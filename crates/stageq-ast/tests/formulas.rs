use stageq_ast::parse_compute;
use stageq_ir::ComputeExpr;

#[test]
fn test_prototype_style_formulas_parse() {
    let formulas = [
        "orders.amt * 1.2",
        "upper(users.name)",
        "year(parseDate(orders.created)) == 2024",
        "coalesce(orders.note, '') + ' (' + orders.status + ')'",
        "orders.amt > 100 && !(orders.status == 'void') ? 'big' : 'small'",
        "round(orders.amt / 3, 2)",
        "len(trim(users.name)) % 2",
    ];

    for formula in formulas {
        let result = parse_compute(formula);
        assert!(result.is_ok(), "{} failed: {:?}", formula, result.err());
    }
}

#[test]
fn test_call_arguments_lowered_in_order() {
    match parse_compute("concat(a, 'x', 3)").unwrap() {
        ComputeExpr::Call { func, args } => {
            assert_eq!(func, "concat");
            assert_eq!(
                args,
                vec![
                    ComputeExpr::field("a"),
                    ComputeExpr::literal("x"),
                    ComputeExpr::literal(3.0)
                ]
            );
        }
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn test_open_ended_script_rejected() {
    assert!(parse_compute("r => r.amt").is_err());
    assert!(parse_compute("a; b").is_err());
    assert!(parse_compute("a = 1").is_err());
}
