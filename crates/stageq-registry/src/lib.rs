//! Function registry for compute formulas
//!
//! Only functions registered here may be called from a `Compute` step.
//! Each entry carries its arity, declared types, a row-level evaluator and
//! the form it takes in rendered query text.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use stageq_ir::{parse_datetime, Value, ValueType};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Arity mismatch for function {func}: expected {expected}, got {actual}")]
    ArityMismatch {
        func: String,
        expected: String,
        actual: usize,
    },
}

/// Row-level evaluator. Bad input yields `Null`, never a panic.
pub type ScalarFn = fn(&[Value]) -> Value;

/// How a call is spelled in rendered query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlForm {
    /// `NAME(arg, ...)`
    Call(&'static str),
    /// Positional template, `{0}` is the first argument
    Template(&'static str),
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    /// Declared argument types; with `variadic` the last one repeats
    pub args: Vec<ValueType>,
    pub min_args: usize,
    pub variadic: bool,
    pub return_type: ValueType,
    pub sql: SqlForm,
    #[serde(skip)]
    pub eval: ScalarFn,
}

impl FunctionSignature {
    fn fixed(name: &str, args: Vec<ValueType>, return_type: ValueType, sql: SqlForm, eval: ScalarFn) -> Self {
        Self {
            name: name.to_string(),
            min_args: args.len(),
            args,
            variadic: false,
            return_type,
            sql,
            eval,
        }
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        if self.variadic {
            count >= self.min_args
        } else {
            (self.min_args..=self.args.len()).contains(&count)
        }
    }

    fn arity_text(&self) -> String {
        match (self.variadic, self.min_args, self.args.len()) {
            (true, min, _) => format!("at least {}", min),
            (false, min, max) if min == max => min.to_string(),
            (false, min, max) => format!("{} to {}", min, max),
        }
    }

    /// Declared type of the argument at `index`.
    pub fn arg_type(&self, index: usize) -> ValueType {
        match self.args.get(index) {
            Some(t) => *t,
            None if self.variadic => self.args.last().copied().unwrap_or(ValueType::Any),
            None => ValueType::Any,
        }
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.eval)(args)
    }

    /// Render a call from already-rendered argument text.
    pub fn render_sql(&self, args: &[String]) -> String {
        match self.sql {
            SqlForm::Call(name) => format!("{}({})", name, args.join(", ")),
            SqlForm::Template(template) => {
                let mut out = template.to_string();
                for (i, arg) in args.iter().enumerate() {
                    out = out.replace(&format!("{{{}}}", i), arg);
                }
                out
            }
        }
    }
}

pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSignature>,
    version: String, // Semver for formula compatibility
}

impl FunctionRegistry {
    pub fn new(version: impl Into<String>) -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            version: version.into(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        // Dates
        self.register(FunctionSignature::fixed(
            "parseDate",
            vec![ValueType::Any],
            ValueType::Date,
            SqlForm::Template("TRY_CONVERT(datetime2, {0})"),
            |args| to_date(arg(args, 0)).map(Value::Date).unwrap_or_default(),
        ));
        self.register(FunctionSignature::fixed("year", vec![ValueType::Any], ValueType::Number, SqlForm::Call("YEAR"), |args| {
            date_part(arg(args, 0), |d| d.year())
        }));
        self.register(FunctionSignature::fixed("month", vec![ValueType::Any], ValueType::Number, SqlForm::Call("MONTH"), |args| {
            date_part(arg(args, 0), |d| d.month() as i32)
        }));
        self.register(FunctionSignature::fixed("day", vec![ValueType::Any], ValueType::Number, SqlForm::Call("DAY"), |args| {
            date_part(arg(args, 0), |d| d.day() as i32)
        }));

        // Strings
        self.register(FunctionSignature::fixed("lower", vec![ValueType::Any], ValueType::String, SqlForm::Call("LOWER"), |args| {
            Value::String(arg(args, 0).display_string().to_lowercase())
        }));
        self.register(FunctionSignature::fixed("upper", vec![ValueType::Any], ValueType::String, SqlForm::Call("UPPER"), |args| {
            Value::String(arg(args, 0).display_string().to_uppercase())
        }));
        self.register(FunctionSignature::fixed("trim", vec![ValueType::Any], ValueType::String, SqlForm::Call("TRIM"), |args| {
            Value::String(arg(args, 0).display_string().trim().to_string())
        }));
        self.register(FunctionSignature::fixed("len", vec![ValueType::Any], ValueType::Number, SqlForm::Call("LEN"), |args| {
            match arg(args, 0) {
                Value::Null => Value::Number(0.0),
                other => Value::Number(other.display_string().chars().count() as f64),
            }
        }));
        self.register(FunctionSignature {
            variadic: true,
            min_args: 1,
            ..FunctionSignature::fixed("concat", vec![ValueType::Any], ValueType::String, SqlForm::Call("CONCAT"), |args| {
                Value::String(args.iter().map(Value::display_string).collect())
            })
        });

        // Null handling
        self.register(FunctionSignature {
            variadic: true,
            min_args: 1,
            ..FunctionSignature::fixed("coalesce", vec![ValueType::Any], ValueType::Any, SqlForm::Call("COALESCE"), |args| {
                args.iter().find(|v| !v.is_blank()).cloned().unwrap_or_default()
            })
        });

        // Numbers
        self.register(FunctionSignature {
            min_args: 1,
            ..FunctionSignature::fixed("round", vec![ValueType::Number, ValueType::Number], ValueType::Number, SqlForm::Call("ROUND"), |args| {
                let digits = match args.get(1) {
                    Some(d) => match d.as_number() {
                        Some(d) => d.trunc() as i32,
                        None => return Value::Null,
                    },
                    None => 0,
                };
                match arg(args, 0).as_number() {
                    Some(n) => Value::Number(round_to(n, digits)),
                    None => Value::Null,
                }
            })
        });
        self.register(FunctionSignature::fixed("abs", vec![ValueType::Number], ValueType::Number, SqlForm::Call("ABS"), |args| {
            arg(args, 0).as_number().map(|n| Value::Number(n.abs())).unwrap_or_default()
        }));
    }

    pub fn register(&mut self, sig: FunctionSignature) {
        self.functions.insert(sig.name.to_ascii_lowercase(), sig);
    }

    /// Resolve a function by name (case-insensitive) and check arity.
    pub fn lookup(&self, name: &str, arg_count: usize) -> Result<&FunctionSignature, RegistryError> {
        let sig = self
            .functions
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| RegistryError::FunctionNotFound(name.to_string()))?;

        if !sig.accepts_arity(arg_count) {
            return Err(RegistryError::ArityMismatch {
                func: sig.name.clone(),
                expected: sig.arity_text(),
                actual: arg_count,
            });
        }
        Ok(sig)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.values().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new("0.1.0")
    }
}

static NULL: Value = Value::Null;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

/// Dates, ISO-like strings and epoch-millisecond numbers.
fn to_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Date(d) => Some(*d),
        Value::String(s) => parse_datetime(s),
        Value::Number(n) if n.is_finite() => Utc.timestamp_millis_opt(*n as i64).single(),
        _ => None,
    }
}

fn date_part(value: &Value, part: fn(&DateTime<Utc>) -> i32) -> Value {
    to_date(value)
        .map(|d| Value::Number(f64::from(part(&d))))
        .unwrap_or_default()
}

/// Round half away from zero.
pub fn round_to(n: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = (n * factor).round() / factor;
    if scaled.is_finite() {
        scaled
    } else {
        n
    }
}
