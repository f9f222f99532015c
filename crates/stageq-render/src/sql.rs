//! Text forms for literals, filter trees and compute expressions

use stageq_ir::{format_number, ComputeExpr, FilterExpr, FilterOp, Operand, UnOp, Value};
use stageq_registry::FunctionRegistry;

/// Bare identifier when it is one, double-quoted otherwise.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => quote_text(s),
        Value::Date(d) => quote_text(&d.to_rfc3339()),
    }
}

fn scalar<'a>(op: FilterOp, operand: &'a Operand) -> Result<&'a Value, String> {
    match operand {
        Operand::Scalar(value) => Ok(value),
        Operand::List(_) => Err(format!("{} needs a single operand", op.symbol())),
    }
}

/// Render a filter tree. `field` turns a path into its access expression.
pub(crate) fn filter_text(expr: &FilterExpr, field: &dyn Fn(&stageq_ir::FieldPath) -> String) -> Result<String, String> {
    match expr {
        FilterExpr::Group {
            children,
            combinator,
            negate,
        } => {
            let invert = *negate ^ combinator.is_negated();
            if children.is_empty() {
                return Ok(if invert { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let joiner = if combinator.is_conjunction() { " AND " } else { " OR " };
            let parts = children
                .iter()
                .map(|child| {
                    let text = filter_text(child, field)?;
                    Ok(match child {
                        FilterExpr::Group { children, .. } if children.len() > 1 => format!("({})", text),
                        _ => text,
                    })
                })
                .collect::<Result<Vec<_>, String>>()?;
            let body = parts.join(joiner);
            Ok(if invert { format!("NOT ({})", body) } else { body })
        }
        FilterExpr::Predicate {
            field: path,
            operator,
            operand,
        } => predicate_text(&field(path), *operator, operand),
    }
}

fn predicate_text(lhs: &str, op: FilterOp, operand: &Operand) -> Result<String, String> {
    let like = |negated: bool, prefix: &str, suffix: &str| -> Result<String, String> {
        let needle = scalar(op, operand)?.display_string();
        let keyword = if negated { "NOT LIKE" } else { "LIKE" };
        Ok(format!("{} {} {}", lhs, keyword, quote_text(&format!("{prefix}{needle}{suffix}"))))
    };

    match op {
        FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
            let value = scalar(op, operand)?;
            Ok(format!("{} {} {}", lhs, op.symbol(), quote_literal(value)))
        }
        FilterOp::Contains => like(false, "%", "%"),
        FilterOp::NotContains => like(true, "%", "%"),
        FilterOp::StartsWith => like(false, "", "%"),
        FilterOp::EndsWith => like(false, "%", ""),
        FilterOp::Between => match operand {
            Operand::List(bounds) if bounds.len() == 2 => Ok(format!(
                "{} BETWEEN {} AND {}",
                lhs,
                quote_literal(&bounds[0]),
                quote_literal(&bounds[1])
            )),
            _ => Err("between needs a two-element range".to_string()),
        },
        FilterOp::AnyOf | FilterOp::NoneOf => {
            let values = match operand {
                Operand::List(values) => values,
                Operand::Scalar(_) => return Err(format!("{} needs a list operand", op.symbol())),
            };
            let any = op == FilterOp::AnyOf;
            if values.is_empty() {
                return Ok(if any { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let list = values.iter().map(quote_literal).collect::<Vec<_>>().join(", ");
            Ok(format!("{} {} ({})", lhs, if any { "IN" } else { "NOT IN" }, list))
        }
        FilterOp::IsBlank => Ok(format!("({lhs} IS NULL OR {lhs} = '')")),
        FilterOp::IsNotBlank => Ok(format!("({lhs} IS NOT NULL AND {lhs} <> '')")),
    }
}

/// Render a compute expression, calling registered functions by their SQL
/// form.
pub(crate) fn compute_text(
    expr: &ComputeExpr,
    registry: &FunctionRegistry,
    field: &dyn Fn(&stageq_ir::FieldPath) -> String,
) -> Result<String, String> {
    Ok(match expr {
        ComputeExpr::Literal { value } => quote_literal(value),
        ComputeExpr::Field { path } => field(path),
        ComputeExpr::Unary { op: UnOp::Neg, expr } => format!("-{}", compute_text(expr, registry, field)?),
        ComputeExpr::Unary { op: UnOp::Not, expr } => format!("NOT {}", compute_text(expr, registry, field)?),
        ComputeExpr::Binary { op, left, right } => {
            let l = compute_text(left, registry, field)?;
            let r = compute_text(right, registry, field)?;
            format!("({} {} {})", l, op.sql_symbol(), r)
        }
        ComputeExpr::Call { func, args } => {
            let sig = registry.lookup(func, args.len()).map_err(|e| e.to_string())?;
            let rendered = args
                .iter()
                .map(|a| compute_text(a, registry, field))
                .collect::<Result<Vec<_>, String>>()?;
            sig.render_sql(&rendered)
        }
        ComputeExpr::Conditional {
            condition,
            then,
            otherwise,
        } => format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            compute_text(condition, registry, field)?,
            compute_text(then, registry, field)?,
            compute_text(otherwise, registry, field)?
        ),
    })
}
