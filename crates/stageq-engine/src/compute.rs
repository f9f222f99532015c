//! Compute formula evaluator
//!
//! Formulas are parsed, checked against the function registry and bound to
//! evaluator function pointers before any row is touched. Evaluation itself
//! never fails: type errors produce `Null` for that row.

use stageq_ir::{BinOp, ComputeExpr, FieldPath, Row, UnOp, Value};
use stageq_registry::{FunctionRegistry, ScalarFn};
use std::cmp::Ordering;

use crate::error::StepError;

#[derive(Debug, Clone)]
enum Node {
    Const(Value),
    Field(FieldPath),
    Unary(UnOp, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(ScalarFn, Vec<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
}

/// A compiled `Compute` formula.
#[derive(Debug, Clone)]
pub struct Formula {
    root: Node,
}

impl Formula {
    /// Parse and bind formula text.
    pub fn compile(source: &str, registry: &FunctionRegistry) -> Result<Self, StepError> {
        if source.trim().is_empty() {
            return Err(StepError::malformed("empty formula"));
        }
        let expr = stageq_ast::parse_compute(source)?;
        Self::bind(&expr, registry)
    }

    /// Bind an already-lowered expression.
    pub fn bind(expr: &ComputeExpr, registry: &FunctionRegistry) -> Result<Self, StepError> {
        Ok(Self {
            root: bind(expr, registry)?,
        })
    }

    pub fn eval(&self, row: &Row) -> Value {
        eval(&self.root, row)
    }
}

fn bind(expr: &ComputeExpr, registry: &FunctionRegistry) -> Result<Node, StepError> {
    Ok(match expr {
        ComputeExpr::Literal { value } => Node::Const(value.clone()),
        ComputeExpr::Field { path } => Node::Field(path.clone()),
        ComputeExpr::Unary { op, expr } => Node::Unary(*op, Box::new(bind(expr, registry)?)),
        ComputeExpr::Binary { op, left, right } => Node::Binary(
            *op,
            Box::new(bind(left, registry)?),
            Box::new(bind(right, registry)?),
        ),
        ComputeExpr::Call { func, args } => {
            let sig = registry.lookup(func, args.len())?;
            let args = args
                .iter()
                .map(|a| bind(a, registry))
                .collect::<Result<Vec<_>, _>>()?;
            Node::Call(sig.eval, args)
        }
        ComputeExpr::Conditional {
            condition,
            then,
            otherwise,
        } => Node::Conditional(
            Box::new(bind(condition, registry)?),
            Box::new(bind(then, registry)?),
            Box::new(bind(otherwise, registry)?),
        ),
    })
}

/// JS-like truthiness: null, false, 0, NaN and "" are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Date(_) => true,
    }
}

fn eval(node: &Node, row: &Row) -> Value {
    match node {
        Node::Const(v) => v.clone(),
        Node::Field(path) => row.resolve(path).clone(),
        Node::Unary(UnOp::Not, inner) => Value::Bool(!truthy(&eval(inner, row))),
        Node::Unary(UnOp::Neg, inner) => match eval(inner, row).as_number() {
            Some(n) => Value::Number(-n),
            None => Value::Null,
        },
        Node::Binary(BinOp::And, left, right) => {
            Value::Bool(truthy(&eval(left, row)) && truthy(&eval(right, row)))
        }
        Node::Binary(BinOp::Or, left, right) => {
            Value::Bool(truthy(&eval(left, row)) || truthy(&eval(right, row)))
        }
        Node::Binary(op, left, right) => binary(*op, &eval(left, row), &eval(right, row)),
        Node::Call(f, args) => {
            let values: Vec<Value> = args.iter().map(|a| eval(a, row)).collect();
            f(&values)
        }
        Node::Conditional(condition, then, otherwise) => {
            if truthy(&eval(condition, row)) {
                eval(then, row)
            } else {
                eval(otherwise, row)
            }
        }
    }
}

/// A string that does not read as a number.
fn is_text(value: &Value) -> bool {
    matches!(value, Value::String(_)) && value.as_number().is_none()
}

fn number(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Null
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Value {
    match op {
        BinOp::Eq => return Value::Bool(equals(left, right)),
        BinOp::Ne => return Value::Bool(!equals(left, right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            return match compare(left, right) {
                Some(ord) => Value::Bool(match op {
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Le => ord != Ordering::Greater,
                    BinOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }),
                None => Value::Null,
            };
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Value::Null;
    }

    if op == BinOp::Add && (is_text(left) || is_text(right)) {
        return Value::String(format!("{}{}", left.display_string(), right.display_string()));
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Value::Null;
    };
    match op {
        BinOp::Add => number(a + b),
        BinOp::Sub => number(a - b),
        BinOp::Mul => number(a * b),
        BinOp::Div => number(a / b),
        BinOp::Mod => number(a % b),
        _ => Value::Null,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => compare(left, right) == Some(Ordering::Equal),
    }
}

/// Numbers numerically, dates by instant, otherwise by string form.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (left.as_epoch_millis(), right.as_epoch_millis()) {
        return Some(a.cmp(&b));
    }
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => Some(left.display_string().cmp(&right.display_string())),
    }
}
