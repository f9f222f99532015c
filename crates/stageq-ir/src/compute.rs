//! Expression tree for `Compute` steps
//!
//! The formula text is parsed by `stageq-ast`; this is the lowered form the
//! engine evaluates and the renderer prints.

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ComputeExpr {
    Literal { value: Value },
    Field { path: FieldPath },
    Unary { op: UnOp, expr: Box<ComputeExpr> },
    Binary { op: BinOp, left: Box<ComputeExpr>, right: Box<ComputeExpr> },
    Call { func: String, args: Vec<ComputeExpr> },
    Conditional {
        condition: Box<ComputeExpr>,
        then: Box<ComputeExpr>,
        otherwise: Box<ComputeExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod,
    // Comparison
    Eq, Ne, Lt, Le, Gt, Ge,
    // Logical
    And, Or,
}

impl BinOp {
    /// Operator as written in query text.
    pub fn sql_symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl ComputeExpr {
    pub fn field(path: impl Into<FieldPath>) -> Self {
        ComputeExpr::Field { path: path.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ComputeExpr::Literal { value: value.into() }
    }

    pub fn call(func: impl Into<String>, args: Vec<ComputeExpr>) -> Self {
        ComputeExpr::Call {
            func: func.into(),
            args,
        }
    }

    pub fn binary(op: BinOp, left: ComputeExpr, right: ComputeExpr) -> Self {
        ComputeExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Every field path referenced by the expression, in visit order.
    pub fn referenced_fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            ComputeExpr::Literal { .. } => {}
            ComputeExpr::Field { path } => out.push(path),
            ComputeExpr::Unary { expr, .. } => expr.collect_fields(out),
            ComputeExpr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            ComputeExpr::Call { args, .. } => args.iter().for_each(|a| a.collect_fields(out)),
            ComputeExpr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_fields(out);
                then.collect_fields(out);
                otherwise.collect_fields(out);
            }
        }
    }
}
