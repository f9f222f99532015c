//! Type tags used by function signatures

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Number,
    String,
    Date,

    // Special
    Null,
    /// Polymorphic argument or result
    Any,
}

impl ValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
        }
    }

    /// Whether a value of type `actual` is acceptable where `self` is declared.
    pub fn accepts(self, actual: ValueType) -> bool {
        self == ValueType::Any || actual == ValueType::Null || self == actual
    }
}
