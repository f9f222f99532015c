//! StageQ AST - compute formula parser and AST types

pub mod ast;
mod parser;
mod to_ir;

pub use ast::*;
pub use parser::{parse, ParseError};

use stageq_ir::ComputeExpr;

/// Parse formula text straight to its IR expression.
pub fn parse_compute(source: &str) -> Result<ComputeExpr, ParseError> {
    Ok(parse(source)?.to_ir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageq_ir::{BinOp as IrBinOp, FieldPath, Value};

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(parse_compute("-2.5").unwrap(), ComputeExpr::literal(-2.5));
    }

    #[test]
    fn test_lowering_keeps_paths() {
        let expr = parse_compute("orders.amt * 2").unwrap();
        assert_eq!(
            expr,
            ComputeExpr::binary(IrBinOp::Mul, ComputeExpr::field("orders.amt"), ComputeExpr::literal(2.0))
        );
        assert_eq!(expr.referenced_fields(), vec![&FieldPath::parse("orders.amt")]);
    }

    #[test]
    fn test_quoted_segment_with_dot() {
        let expr = parse_compute("`sum_amt.paid` + 1").unwrap();
        let fields = expr.referenced_fields();
        assert_eq!(fields[0].segments(), ["sum_amt.paid"]);
    }

    #[test]
    fn test_null_literal() {
        assert_eq!(parse_compute("null").unwrap(), ComputeExpr::literal(Value::Null));
    }
}
