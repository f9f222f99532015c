//! StageQ Intermediate Representation (IR)
//!
//! Plain-data model shared by the executor and the query text renderer.
//! All types are deterministically serializable so a query document can be
//! fingerprinted for logging and caching.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod compute;
mod filter;
mod join;
mod path;
mod schema;
mod types;
mod value;

pub use compute::*;
pub use filter::*;
pub use join::*;
pub use path::*;
pub use schema::*;
pub use types::*;
pub use value::*;

/// A query document: base relation plus ordered steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub dataset: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(dataset: impl Into<String>, steps: Vec<PipelineStep>) -> Self {
        Self {
            dataset: dataset.into(),
            steps,
        }
    }

    /// Calculate fingerprint (SHA-256) of the canonical JSON form
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Pipeline steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineStep {
    Filter(FilterStep),
    Join(JoinStep),
    Group(GroupStep),
    Pivot(PivotStep),
    Compute(ComputeStep),
    Select(SelectStep),
    Sort(SortStep),
    Limit(LimitStep),
}

impl PipelineStep {
    /// Lower-case step name used in logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineStep::Filter(_) => "filter",
            PipelineStep::Join(_) => "join",
            PipelineStep::Group(_) => "group",
            PipelineStep::Pivot(_) => "pivot",
            PipelineStep::Compute(_) => "compute",
            PipelineStep::Select(_) => "select",
            PipelineStep::Sort(_) => "sort",
            PipelineStep::Limit(_) => "limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub condition: FilterExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    #[serde(alias = "dataset", alias = "right_relation")]
    pub right_relation: String,
    #[serde(
        default,
        alias = "left_key",
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub left_key: Option<FieldPath>,
    #[serde(
        default,
        alias = "right_key",
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub right_key: Option<FieldPath>,
    #[serde(default)]
    pub kind: JoinKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggOp {
    pub fn name(self) -> &'static str {
        match self {
            AggOp::Count => "count",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Min => "min",
            AggOp::Max => "max",
        }
    }

    /// `count` for `count(*)`, otherwise `<op>_<field segments>`.
    pub fn default_alias(self, field: &FieldPath) -> String {
        if field.is_wildcard() {
            self.name().to_string()
        } else {
            format!("{}_{}", self.name(), field.underscored())
        }
    }
}

fn wildcard() -> FieldPath {
    FieldPath::wildcard()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub op: AggOp,
    #[serde(default = "wildcard")]
    pub field: FieldPath,
    #[serde(default, alias = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateSpec {
    pub fn new(op: AggOp, field: impl Into<FieldPath>) -> Self {
        Self {
            op,
            field: field.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output field name
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(alias) if !alias.trim().is_empty() => alias.clone(),
            _ => self.op.default_alias(&self.field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStep {
    #[serde(alias = "group_keys", alias = "groupBy")]
    pub group_keys: Vec<FieldPath>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

/// Output names for group or pivot row keys: the last segment, or the full
/// path when two keys share a last segment.
pub fn output_key_names(keys: &[FieldPath]) -> Vec<FieldPath> {
    keys.iter()
        .map(|key| {
            let shared = keys.iter().filter(|k| k.leaf() == key.leaf()).count() > 1;
            if shared {
                key.clone()
            } else {
                FieldPath::single(key.leaf())
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotValue {
    pub op: AggOp,
    #[serde(default = "wildcard")]
    pub field: FieldPath,
}

impl PivotValue {
    pub fn new(op: AggOp, field: impl Into<FieldPath>) -> Self {
        Self {
            op,
            field: field.into(),
        }
    }

    pub fn label(&self) -> String {
        self.op.default_alias(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotStep {
    #[serde(default, alias = "row_keys", alias = "rows")]
    pub row_keys: Vec<FieldPath>,
    #[serde(default, alias = "col_keys", alias = "cols")]
    pub col_keys: Vec<FieldPath>,
    #[serde(default)]
    pub values: Vec<PivotValue>,
}

impl PivotStep {
    /// Value aggregates with the implicit `count(*)` when none are given.
    pub fn effective_values(&self) -> Vec<PivotValue> {
        if self.values.is_empty() {
            vec![PivotValue::new(AggOp::Count, FieldPath::wildcard())]
        } else {
            self.values.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeStep {
    #[serde(alias = "as")]
    pub alias: String,
    #[serde(alias = "expr")]
    pub expression: String,
}

/// One projected column: `from` renamed to `alias` when given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProjectionRepr")]
pub struct Projection {
    pub from: FieldPath,
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Projection {
    pub fn new(from: impl Into<FieldPath>) -> Self {
        Self {
            from: from.into(),
            alias: None,
        }
    }

    pub fn aliased(from: impl Into<FieldPath>, alias: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            alias: Some(alias.into()),
        }
    }

    /// Key of the projected field in the output row.
    pub fn output_path(&self) -> FieldPath {
        match &self.alias {
            Some(alias) => FieldPath::single(alias.clone()),
            None => self.from.clone(),
        }
    }

    /// `city as customerCity`
    pub fn parse(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        match lower.find(" as ") {
            Some(idx) => {
                let alias = text[idx + 4..].trim();
                let from = FieldPath::parse(&text[..idx]);
                if alias.is_empty() {
                    Self::new(from)
                } else {
                    Self::aliased(from, alias)
                }
            }
            None => Self::new(FieldPath::parse(text)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectionRepr {
    Text(String),
    Full {
        from: FieldPath,
        #[serde(default, rename = "as", alias = "alias")]
        alias: Option<String>,
    },
}

impl From<ProjectionRepr> for Projection {
    fn from(repr: ProjectionRepr) -> Self {
        match repr {
            ProjectionRepr::Text(text) => Projection::parse(&text),
            ProjectionRepr::Full { from, alias } => Projection {
                from,
                alias: alias.filter(|a| !a.trim().is_empty()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStep {
    #[serde(alias = "fields")]
    pub projections: Vec<Projection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SortKeyRepr")]
pub struct SortKey {
    pub field: FieldPath,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// `date desc`, `total`
    pub fn parse(text: &str) -> Self {
        let mut parts = text.split_whitespace();
        let field = FieldPath::parse(parts.next().unwrap_or(""));
        let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        Self { field, direction }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SortKeyRepr {
    Text(String),
    Full {
        field: FieldPath,
        #[serde(default)]
        direction: SortDirection,
    },
}

impl From<SortKeyRepr> for SortKey {
    fn from(repr: SortKeyRepr) -> Self {
        match repr {
            SortKeyRepr::Text(text) => SortKey::parse(&text),
            SortKeyRepr::Full { field, direction } => SortKey { field, direction },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub orders: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LimitStep {
    #[serde(default)]
    pub offset: i64,
    /// `<= 0` means no upper bound
    #[serde(default, alias = "limit")]
    pub count: i64,
}
