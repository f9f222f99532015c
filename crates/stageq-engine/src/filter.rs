//! Filter Expression Compiler
//!
//! A [`FilterExpr`] tree is walked once and turned into nested closures.
//! Operands are normalized at compile time, so evaluating a row only
//! resolves the field and compares.

use stageq_ir::{Combinator, FieldPath, FilterExpr, FilterOp, Operand, Row, Value};
use std::cmp::Ordering;

use crate::error::StepError;

/// Compiled row predicate.
pub type Predicate = Box<dyn Fn(&Row) -> bool + Send + Sync>;

/// Comparable form of a value for ranges and set membership.
#[derive(Debug, Clone, PartialEq)]
enum Normalized {
    Number(f64),
    Epoch(i64),
    Text(String),
}

impl Normalized {
    fn of(value: &Value) -> Option<Self> {
        if let Some(n) = value.as_number() {
            return Some(Normalized::Number(n));
        }
        if let Some(ms) = value.as_epoch_millis() {
            return Some(Normalized::Epoch(ms));
        }
        match value {
            Value::Null => None,
            other => Some(Normalized::Text(other.display_string().to_lowercase())),
        }
    }

    /// Coerce into the domain of `self`; `None` when the value has no form
    /// in that domain.
    fn coerce_like(&self, value: &Value) -> Option<Self> {
        match self {
            Normalized::Number(_) => value.as_number().map(Normalized::Number),
            Normalized::Epoch(_) => value.as_epoch_millis().map(Normalized::Epoch),
            Normalized::Text(_) => match value {
                Value::Null => None,
                other => Some(Normalized::Text(other.display_string().to_lowercase())),
            },
        }
    }

    fn compare(&self, other: &Normalized) -> Option<Ordering> {
        match (self, other) {
            (Normalized::Number(a), Normalized::Number(b)) => a.partial_cmp(b),
            (Normalized::Epoch(a), Normalized::Epoch(b)) => Some(a.cmp(b)),
            (Normalized::Text(a), Normalized::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Membership key; null is a member like any other value.
fn set_key(value: &Value) -> Option<Normalized> {
    Normalized::of(value)
}

/// Relational operand, pre-converted into every domain it has a form in.
struct RelationalOperand {
    is_number: bool,
    number: Option<f64>,
    epoch: Option<i64>,
    text: String,
}

impl RelationalOperand {
    fn new(value: &Value) -> Self {
        Self {
            is_number: matches!(value, Value::Number(_)),
            number: value.as_number(),
            epoch: match value {
                Value::Date(d) => Some(d.timestamp_millis()),
                Value::String(s) => stageq_ir::parse_datetime(s).map(|d| d.timestamp_millis()),
                _ => None,
            },
            text: value.display_string().to_lowercase(),
        }
    }

    /// Numeric when either side is a number and both parse, then dates,
    /// then case-insensitive text.
    fn compare(&self, value: &Value) -> Ordering {
        let value_is_number = matches!(value, Value::Number(_));
        if value_is_number || self.is_number {
            if let (Some(a), Some(b)) = (value.as_number(), self.number) {
                return a.total_cmp(&b);
            }
        }
        if let (Some(a), Some(b)) = (value.as_epoch_millis(), self.epoch) {
            return a.cmp(&b);
        }
        value.display_string().to_lowercase().cmp(&self.text)
    }
}

/// Compile a filter tree into a predicate.
pub fn compile(expr: &FilterExpr) -> Result<Predicate, StepError> {
    match expr {
        FilterExpr::Group {
            children,
            combinator,
            negate,
        } => compile_group(children, *combinator, *negate),
        FilterExpr::Predicate {
            field,
            operator,
            operand,
        } => compile_predicate(field.clone(), *operator, operand),
    }
}

fn compile_group(children: &[FilterExpr], combinator: Combinator, negate: bool) -> Result<Predicate, StepError> {
    let mut compiled = children.iter().map(compile).collect::<Result<Vec<_>, _>>()?;
    let invert = negate ^ combinator.is_negated();

    if compiled.is_empty() {
        return Ok(Box::new(move |_: &Row| !invert));
    }
    if compiled.len() == 1 && !invert {
        if let Some(only) = compiled.pop() {
            return Ok(only);
        }
    }

    if combinator.is_conjunction() {
        Ok(Box::new(move |row: &Row| compiled.iter().all(|p| p(row)) != invert))
    } else {
        Ok(Box::new(move |row: &Row| compiled.iter().any(|p| p(row)) != invert))
    }
}

fn scalar_operand<'a>(op: FilterOp, operand: &'a Operand) -> Result<&'a Value, StepError> {
    match operand {
        Operand::Scalar(v) => Ok(v),
        Operand::List(values) if values.len() == 1 => Ok(&values[0]),
        Operand::List(_) => Err(StepError::malformed(format!(
            "operator {} takes a single operand",
            op.symbol()
        ))),
    }
}

fn compile_predicate(field: FieldPath, op: FilterOp, operand: &Operand) -> Result<Predicate, StepError> {
    match op {
        FilterOp::IsBlank => Ok(Box::new(move |row: &Row| row.resolve(&field).is_blank())),
        FilterOp::IsNotBlank => Ok(Box::new(move |row: &Row| !row.resolve(&field).is_blank())),

        FilterOp::Between => {
            let (low, high) = match operand {
                Operand::List(values) if values.len() == 2 => (&values[0], &values[1]),
                _ => {
                    return Err(StepError::malformed(format!(
                        "between on {} needs a two-element range",
                        field
                    )))
                }
            };
            let range = Normalized::of(low).and_then(|lo| {
                let hi = lo.coerce_like(high)?;
                Some((lo, hi))
            });
            Ok(Box::new(move |row: &Row| {
                let Some((lo, hi)) = &range else {
                    return false;
                };
                match lo.coerce_like(row.resolve(&field)) {
                    Some(v) => {
                        matches!(v.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                            && matches!(v.compare(hi), Some(Ordering::Less | Ordering::Equal))
                    }
                    None => false,
                }
            }))
        }

        FilterOp::AnyOf | FilterOp::NoneOf => {
            let values = match operand {
                Operand::List(values) => values,
                Operand::Scalar(_) => {
                    return Err(StepError::malformed(format!(
                        "{} on {} needs a list operand",
                        op.symbol(),
                        field
                    )))
                }
            };
            let members: Vec<Option<Normalized>> = values.iter().map(set_key).collect();
            let expect = op == FilterOp::AnyOf;
            Ok(Box::new(move |row: &Row| {
                let key = set_key(row.resolve(&field));
                members.contains(&key) == expect
            }))
        }

        FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
            let rhs = RelationalOperand::new(scalar_operand(op, operand)?);
            Ok(Box::new(move |row: &Row| {
                let ord = rhs.compare(row.resolve(&field));
                match op {
                    FilterOp::Eq => ord == Ordering::Equal,
                    FilterOp::Ne => ord != Ordering::Equal,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Ge => ord != Ordering::Less,
                    FilterOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            }))
        }

        FilterOp::Contains | FilterOp::NotContains | FilterOp::StartsWith | FilterOp::EndsWith => {
            let needle = scalar_operand(op, operand)?.display_string().to_lowercase();
            Ok(Box::new(move |row: &Row| {
                let hay = row.resolve(&field).display_string().to_lowercase();
                match op {
                    FilterOp::Contains => hay.contains(&needle),
                    FilterOp::NotContains => !hay.contains(&needle),
                    FilterOp::StartsWith => hay.starts_with(&needle),
                    _ => hay.ends_with(&needle),
                }
            }))
        }
    }
}
