//! Typed field references

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("field path must have at least one segment")]
    Empty,
}

/// Dot-qualified reference to a field, e.g. `orders.amount`.
///
/// Segments are stored individually so a column whose name contains a dot
/// stays a single segment. The dotted string is only a display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "FieldPathRepr", into = "FieldPathRepr")]
pub struct FieldPath {
    segments: Vec<String>,
}

/// Wire form: a dotted string, or an explicit segment list when a segment
/// carries a dot of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FieldPathRepr {
    Dotted(String),
    Segments(Vec<String>),
}

impl FieldPath {
    /// Sentinel used by `count(*)`.
    pub const WILDCARD: &'static str = "*";

    /// Build a path from explicit segments. Empty segments are dropped.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::<String>::into)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// A single-segment path. The name is kept verbatim, dots included.
    pub fn single(name: impl Into<String>) -> Self {
        Self::new([name.into()])
    }

    /// `<relation>.<column>`
    pub fn qualified(relation: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new([relation.into(), column.into()])
    }

    /// Parse the dotted display form. This is the only place a dot is
    /// treated as a separator.
    pub fn parse(text: &str) -> Self {
        Self::new(text.trim().split('.').map(str::trim))
    }

    pub fn wildcard() -> Self {
        Self::single(Self::WILDCARD)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == Self::WILDCARD
    }

    /// Last segment (the column name).
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// First segment when the path has more than one.
    pub fn qualifier(&self) -> Option<&str> {
        if self.segments.len() > 1 {
            self.segments.first().map(String::as_str)
        } else {
            None
        }
    }

    /// Everything after the qualifier, dot-joined.
    pub fn unqualified(&self) -> String {
        match self.qualifier() {
            Some(_) => self.segments[1..].join("."),
            None => self.leaf().to_string(),
        }
    }

    /// Prefix this path with a relation name unless it already carries it.
    pub fn with_qualifier(&self, relation: &str) -> Self {
        if self.qualifier() == Some(relation) {
            return self.clone();
        }
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(relation.to_string());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// Segments joined with `_`, used for generated aliases.
    pub fn underscored(&self) -> String {
        self.segments.join("_")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl TryFrom<FieldPathRepr> for FieldPath {
    type Error = PathError;

    fn try_from(repr: FieldPathRepr) -> Result<Self, Self::Error> {
        let path = match repr {
            FieldPathRepr::Dotted(text) => Self::parse(&text),
            FieldPathRepr::Segments(segments) => Self::new(segments),
        };
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(path)
    }
}

/// Optional key fields arrive as `""` from form-driven authoring; treat
/// blank the same as absent.
pub fn deserialize_optional_path<'de, D>(deserializer: D) -> Result<Option<FieldPath>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr: Option<FieldPathRepr> = Option::deserialize(deserializer)?;
    Ok(repr
        .map(|r| match r {
            FieldPathRepr::Dotted(text) => FieldPath::parse(&text),
            FieldPathRepr::Segments(segments) => FieldPath::new(segments),
        })
        .filter(|p| !p.is_empty()))
}

impl From<FieldPath> for FieldPathRepr {
    fn from(path: FieldPath) -> Self {
        if path.segments.iter().any(|s| s.contains('.')) {
            FieldPathRepr::Segments(path.segments)
        } else {
            FieldPathRepr::Dotted(path.to_string())
        }
    }
}
