//! Pest-based parser for compute formulas

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "compute.pest"]
pub struct ComputeParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

/// Parse formula text into AST
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut pairs = ComputeParser::parse(Rule::formula, source)?;
    let formula = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let expr = formula
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| ParseError::Syntax("Missing expression".to_string()))?;
    parse_expr(expr)
}

fn next_pair<'i>(inner: &mut Pairs<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, ParseError> {
    inner
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("Missing {}", what)))
}

fn parse_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            let condition = parse_expr(next_pair(&mut inner, "expression")?)?;
            match inner.next() {
                None => Ok(condition),
                Some(then) => {
                    let otherwise = next_pair(&mut inner, "ternary else branch")?;
                    Ok(Expr::Ternary {
                        condition: Box::new(condition),
                        then: Box::new(parse_expr(then)?),
                        otherwise: Box::new(parse_expr(otherwise)?),
                    })
                }
            }
        }
        // Left-associative chains: [operand, op, operand, op, operand, ...]
        Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::add_expr | Rule::mul_expr => {
            let mut inner = pair.into_inner();
            let mut left = parse_expr(next_pair(&mut inner, "operand")?)?;

            while let Some(op_pair) = inner.next() {
                let op = parse_bin_op(op_pair.as_str())?;
                let right = parse_expr(next_pair(&mut inner, "right operand")?)?;
                left = Expr::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }

            Ok(left)
        }
        Rule::unary_expr => {
            let mut ops = Vec::new();
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::unary_op => ops.push(if p.as_str() == "!" { UnOp::Not } else { UnOp::Neg }),
                    _ => operand = Some(parse_expr(p)?),
                }
            }
            let mut expr = operand.ok_or_else(|| ParseError::Syntax("Missing operand".to_string()))?;
            for op in ops.into_iter().rev() {
                expr = Expr::UnaryOp {
                    op,
                    expr: Box::new(expr),
                };
            }
            Ok(expr)
        }
        Rule::primary => {
            let inner = next_pair(&mut pair.into_inner(), "primary")?;
            match inner.as_rule() {
                Rule::literal => parse_literal(inner),
                Rule::func_call => parse_func_call(inner),
                Rule::field_path => parse_field_path(inner),
                Rule::expr => parse_expr(inner),
                _ => Err(ParseError::Syntax(format!("Invalid primary: {:?}", inner.as_rule()))),
            }
        }
        Rule::literal => parse_literal(pair),
        Rule::field_path => parse_field_path(pair),
        Rule::func_call => parse_func_call(pair),
        _ => Err(ParseError::Syntax(format!("Cannot parse expr: {:?}", pair.as_rule()))),
    }
}

fn parse_bin_op(op: &str) -> Result<BinOp, ParseError> {
    Ok(match op {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "==" | "===" => BinOp::Eq,
        "!=" | "!==" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        _ => return Err(ParseError::Syntax(format!("Unknown operator: {}", op))),
    })
}

fn parse_literal(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let inner = next_pair(&mut pair.into_inner(), "literal")?;
    let literal = match inner.as_rule() {
        Rule::number => {
            let text = inner.as_str();
            let n = text
                .parse::<f64>()
                .map_err(|_| ParseError::Syntax(format!("Invalid number: {}", text)))?;
            Literal::Number(n)
        }
        Rule::string => {
            let body = inner.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Literal::String(unescape(body))
        }
        Rule::boolean => Literal::Bool(inner.as_str() == "true"),
        Rule::null => Literal::Null,
        _ => return Err(ParseError::Syntax("Invalid literal".to_string())),
    };
    Ok(Expr::Literal(literal))
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_field_path(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let segments: Vec<String> = pair
        .into_inner()
        .map(|p| match p.as_rule() {
            Rule::quoted => p.as_str().trim_matches('`').to_string(),
            _ => p.as_str().to_string(),
        })
        .collect();

    if segments.is_empty() {
        return Err(ParseError::Syntax("Empty field path".to_string()));
    }
    Ok(Expr::Field(segments))
}

fn parse_func_call(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "function name")?.as_str().to_string();

    let args = if let Some(arg_list) = inner.next() {
        arg_list
            .into_inner()
            .map(parse_expr)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![]
    };

    Ok(Expr::FuncCall(FuncCall { name, args }))
}
