//! Scalar values, rows and relations

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

use crate::path::FieldPath;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
}

static NULL: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Numeric coercion used by aggregates and numeric comparison.
    ///
    /// Numbers pass through, strings parse after trimming. Everything else
    /// (including non-finite parses) is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Epoch milliseconds for date values and ISO-date-like strings.
    pub fn as_epoch_millis(&self) -> Option<i64> {
        match self {
            Value::Date(d) => Some(d.timestamp_millis()),
            Value::String(s) if looks_like_iso_date(s) => parse_datetime(s).map(|d| d.timestamp_millis()),
            _ => None,
        }
    }

    /// String form used by text comparison and labels. Null is empty.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.to_rfc3339(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
        }
    }

    /// Hashable identity used for join indexes and group partitions.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            // -0.0 and 0.0 are the same key
            Value::Number(n) => ValueKey::Number(if *n == 0.0 { 0f64.to_bits() } else { n.to_bits() }),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Date(d) => ValueKey::Date(d.timestamp_millis()),
        }
    }

    /// Total order used by `Sort`: null < bool < number < date < string,
    /// values of the same kind compared naturally.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Date(_) => 3,
            Value::String(_) => 4,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.display_string()),
        }
    }
}

/// Structural identity of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    Date(i64),
}

/// Integral numbers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// `YYYY-MM-DD` prefix check.
pub fn looks_like_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

/// Parse the date/time shapes produced by the staging importers.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// A record: ordered mapping from field path to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: IndexMap<FieldPath, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// Build from `(column, value)` pairs; each column is one segment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (FieldPath::single(k), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn insert(&mut self, path: FieldPath, value: Value) {
        self.fields.insert(path, value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldPath> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Value)> {
        self.fields.iter()
    }

    /// Find the stored key a path refers to.
    ///
    /// Exact segments first, then an identical dotted display (a generated
    /// label like `sum_amt.paid` against `sum_amt` / `paid`), then for a bare
    /// name the first field whose last segment matches.
    pub fn locate(&self, path: &FieldPath) -> Option<&FieldPath> {
        if let Some((key, _)) = self.fields.get_key_value(path) {
            return Some(key);
        }
        let display = path.to_string();
        if let Some(key) = self.fields.keys().find(|k| k.to_string() == display) {
            return Some(key);
        }
        if path.segments().len() == 1 {
            return self.fields.keys().find(|k| k.leaf() == path.leaf());
        }
        None
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.locate(path).is_some()
    }

    /// Resolve a path, yielding `Null` when it does not resolve.
    pub fn resolve(&self, path: &FieldPath) -> &Value {
        self.locate(path)
            .and_then(|key| self.fields.get(key))
            .unwrap_or(&NULL)
    }

    /// Re-key every unqualified field under `relation`.
    pub fn qualify(&self, relation: &str) -> Row {
        Row {
            fields: self
                .fields
                .iter()
                .map(|(k, v)| (k.with_qualifier(relation), v.clone()))
                .collect(),
        }
    }

    /// Shallow merge; `other` wins on key collision.
    pub fn merged(&self, other: &Row) -> Row {
        let mut out = self.clone();
        for (k, v) in &other.fields {
            out.fields.insert(k.clone(), v.clone());
        }
        out
    }
}

impl FromIterator<(FieldPath, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (FieldPath, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(&k.to_string(), v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    /// Incoming keys are raw column names and are never split.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an object of field values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let mut row = Row::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    row.insert(FieldPath::single(key), value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// A named, schema-flexible sequence of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Relation {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Union of field names across rows, first-seen order.
    pub fn fields(&self) -> Vec<FieldPath> {
        column_order(&self.rows)
    }
}

/// First-seen order of keys across a row sequence.
pub fn column_order(rows: &[Row]) -> Vec<FieldPath> {
    let mut seen: IndexMap<&FieldPath, ()> = IndexMap::new();
    for row in rows {
        for key in row.keys() {
            seen.entry(key).or_insert(());
        }
    }
    seen.into_keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_qualified_and_bare() {
        let row = Row::from_pairs([("id", Value::from(1)), ("name", Value::from("A"))]).qualify("users");

        assert_eq!(row.resolve(&FieldPath::parse("users.name")), &Value::from("A"));
        assert_eq!(row.resolve(&FieldPath::parse("name")), &Value::from("A"));
        assert_eq!(row.resolve(&FieldPath::parse("orders.name")), &Value::Null);
        assert_eq!(row.resolve(&FieldPath::parse("missing")), &Value::Null);
    }

    #[test]
    fn test_resolve_dotted_label() {
        let mut row = Row::new();
        row.insert(FieldPath::single("sum_amt.paid"), Value::from(3));
        assert_eq!(row.resolve(&FieldPath::parse("sum_amt.paid")), &Value::from(3));
    }

    #[test]
    fn test_merge_right_wins() {
        let left = Row::from_pairs([("k", 1), ("a", 2)]);
        let right = Row::from_pairs([("k", 9)]);
        let merged = left.merged(&right);
        assert_eq!(merged.resolve(&FieldPath::single("k")), &Value::from(9));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(Value::from("abc").as_number(), None);
        assert_eq!(Value::Bool(true).as_number(), None);
        assert_eq!(Value::Null.as_number(), None);
    }

    #[test]
    fn test_iso_date_detection() {
        assert!(looks_like_iso_date("2024-05-01"));
        assert!(looks_like_iso_date("2024-05-01T10:00:00Z"));
        assert!(!looks_like_iso_date("05/01/2024"));
        assert_eq!(
            Value::from("2024-01-02").as_epoch_millis(),
            Some(1_704_153_600_000)
        );
    }

    #[test]
    fn test_row_json_keeps_raw_keys() {
        let row: Row = serde_json::from_str(r#"{"a.b": 1, "name": "x"}"#).unwrap();
        assert_eq!(row.keys().next().unwrap().segments().len(), 1);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"a.b":1.0,"name":"x"}"#);
    }

    #[test]
    fn test_column_order_first_seen() {
        let rows = vec![Row::from_pairs([("b", 1)]), Row::from_pairs([("a", 1), ("b", 2)])];
        let cols: Vec<String> = column_order(&rows).iter().map(|c| c.to_string()).collect();
        assert_eq!(cols, vec!["b", "a"]);
    }
}
