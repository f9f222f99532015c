//! Declarative filter expression trees

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;
use crate::value::Value;

/// Leaf comparison operators.
///
/// Both authoring surfaces spelled these differently, so the wire names
/// accept either spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=", alias = "equals")]
    Eq,
    #[serde(rename = "<>", alias = "notEquals", alias = "!=")]
    Ne,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Ge,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Le,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "notContains", alias = "notcontains")]
    NotContains,
    #[serde(rename = "startsWith", alias = "startswith")]
    StartsWith,
    #[serde(rename = "endsWith", alias = "endswith")]
    EndsWith,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "anyOf", alias = "anyof", alias = "in")]
    AnyOf,
    #[serde(rename = "noneOf", alias = "noneof")]
    NoneOf,
    #[serde(rename = "isBlank", alias = "isblank")]
    IsBlank,
    #[serde(rename = "isNotBlank", alias = "isnotblank")]
    IsNotBlank,
}

impl FilterOp {
    /// `= <> > >= < <=`
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Contains => "contains",
            FilterOp::NotContains => "notContains",
            FilterOp::StartsWith => "startsWith",
            FilterOp::EndsWith => "endsWith",
            FilterOp::Between => "between",
            FilterOp::AnyOf => "anyOf",
            FilterOp::NoneOf => "noneOf",
            FilterOp::IsBlank => "isBlank",
            FilterOp::IsNotBlank => "isNotBlank",
        }
    }
}

/// Right-hand side of a predicate: a scalar or a list (ranges and sets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    List(Vec<Value>),
    Scalar(Value),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Scalar(Value::Null)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Scalar(value)
    }
}

impl From<Vec<Value>> for Operand {
    fn from(values: Vec<Value>) -> Self {
        Operand::List(values)
    }
}

/// How a group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Combinator {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
    #[serde(alias = "notand")]
    NotAnd,
    #[serde(alias = "notor")]
    NotOr,
}

impl Combinator {
    /// `true` for `and`/`notAnd`.
    pub fn is_conjunction(self) -> bool {
        matches!(self, Combinator::And | Combinator::NotAnd)
    }

    /// `true` for the negating forms.
    pub fn is_negated(self) -> bool {
        matches!(self, Combinator::NotAnd | Combinator::NotOr)
    }
}

/// Recursive boolean filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    Group {
        children: Vec<FilterExpr>,
        #[serde(default)]
        combinator: Combinator,
        #[serde(default)]
        negate: bool,
    },
    Predicate {
        field: FieldPath,
        #[serde(alias = "op")]
        operator: FilterOp,
        #[serde(default, alias = "value")]
        operand: Operand,
    },
}

impl FilterExpr {
    pub fn predicate(field: impl Into<FieldPath>, operator: FilterOp, operand: impl Into<Operand>) -> Self {
        FilterExpr::Predicate {
            field: field.into(),
            operator,
            operand: operand.into(),
        }
    }

    pub fn group(children: Vec<FilterExpr>, combinator: Combinator) -> Self {
        FilterExpr::Group {
            children,
            combinator,
            negate: false,
        }
    }

    pub fn and(children: Vec<FilterExpr>) -> Self {
        Self::group(children, Combinator::And)
    }

    pub fn or(children: Vec<FilterExpr>) -> Self {
        Self::group(children, Combinator::Or)
    }

    /// Flip the `negate` flag on a group, or wrap a leaf in a negated group.
    pub fn negated(self) -> Self {
        match self {
            FilterExpr::Group {
                children,
                combinator,
                negate,
            } => FilterExpr::Group {
                children,
                combinator,
                negate: !negate,
            },
            leaf => FilterExpr::Group {
                children: vec![leaf],
                combinator: Combinator::And,
                negate: true,
            },
        }
    }

    /// An empty group places no constraint.
    pub fn is_trivial(&self) -> bool {
        matches!(self, FilterExpr::Group { children, negate: false, combinator } if children.is_empty() && !combinator.is_negated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_json_aliases() {
        let expr: FilterExpr =
            serde_json::from_str(r#"{"field": "orders.status", "operator": "in", "operand": ["paid", "new"]}"#)
                .unwrap();
        match expr {
            FilterExpr::Predicate { field, operator, operand } => {
                assert_eq!(field.to_string(), "orders.status");
                assert_eq!(operator, FilterOp::AnyOf);
                assert_eq!(operand, Operand::List(vec![Value::from("paid"), Value::from("new")]));
            }
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_group_json_defaults() {
        let expr: FilterExpr = serde_json::from_str(
            r#"{"children": [{"field": "a", "operator": "isBlank"}], "combinator": "notOr"}"#,
        )
        .unwrap();
        match expr {
            FilterExpr::Group { children, combinator, negate } => {
                assert_eq!(children.len(), 1);
                assert_eq!(combinator, Combinator::NotOr);
                assert!(!negate);
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_group_is_trivial() {
        assert!(FilterExpr::and(vec![]).is_trivial());
        assert!(!FilterExpr::and(vec![]).negated().is_trivial());
    }
}
