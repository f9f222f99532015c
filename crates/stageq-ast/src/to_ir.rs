//! Convert AST to IR compute expressions

use stageq_ir::{self as ir, FieldPath, Value};

use crate::ast::*;

impl Expr {
    /// Convert AST expression to IR
    pub fn to_ir(self) -> ir::ComputeExpr {
        match self {
            Expr::Literal(lit) => ir::ComputeExpr::Literal { value: lit.to_ir() },
            Expr::Field(segments) => ir::ComputeExpr::Field {
                path: FieldPath::new(segments),
            },
            Expr::UnaryOp { op, expr } => match (op, *expr) {
                // `-3` is a literal, not a negation node
                (UnOp::Neg, Expr::Literal(Literal::Number(n))) => ir::ComputeExpr::Literal {
                    value: Value::Number(-n),
                },
                (op, inner) => ir::ComputeExpr::Unary {
                    op: op.to_ir(),
                    expr: Box::new(inner.to_ir()),
                },
            },
            Expr::BinaryOp { op, left, right } => ir::ComputeExpr::Binary {
                op: op.to_ir(),
                left: Box::new(left.to_ir()),
                right: Box::new(right.to_ir()),
            },
            Expr::FuncCall(call) => ir::ComputeExpr::Call {
                func: call.name,
                args: call.args.into_iter().map(Expr::to_ir).collect(),
            },
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => ir::ComputeExpr::Conditional {
                condition: Box::new(condition.to_ir()),
                then: Box::new(then.to_ir()),
                otherwise: Box::new(otherwise.to_ir()),
            },
        }
    }
}

impl Literal {
    fn to_ir(self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(b),
            Literal::Number(n) => Value::Number(n),
            Literal::String(s) => Value::String(s),
        }
    }
}

impl BinOp {
    fn to_ir(self) -> ir::BinOp {
        match self {
            BinOp::Add => ir::BinOp::Add,
            BinOp::Sub => ir::BinOp::Sub,
            BinOp::Mul => ir::BinOp::Mul,
            BinOp::Div => ir::BinOp::Div,
            BinOp::Mod => ir::BinOp::Mod,
            BinOp::Eq => ir::BinOp::Eq,
            BinOp::Ne => ir::BinOp::Ne,
            BinOp::Lt => ir::BinOp::Lt,
            BinOp::Le => ir::BinOp::Le,
            BinOp::Gt => ir::BinOp::Gt,
            BinOp::Ge => ir::BinOp::Ge,
            BinOp::And => ir::BinOp::And,
            BinOp::Or => ir::BinOp::Or,
        }
    }
}

impl UnOp {
    fn to_ir(self) -> ir::UnOp {
        match self {
            UnOp::Neg => ir::UnOp::Neg,
            UnOp::Not => ir::UnOp::Not,
        }
    }
}
