//! Run output: rows, column order and run annotations

use serde::{Serialize, Serializer};
use stageq_ir::{column_order, AggOp, FieldPath, JoinKind, Row};

/// Non-fatal annotation attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// No join key was given or inferable; every pair was emitted
    CartesianFallback {
        step: usize,
        left: String,
        right: String,
        join_kind: JoinKind,
    },
    /// Non-numeric values were left out of a numeric aggregate
    AggregationTypeMismatch {
        step: usize,
        op: AggOp,
        field: FieldPath,
        excluded: usize,
    },
    /// The run produced zero rows
    EmptyResult,
}

/// A step that failed under the skip policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStep {
    pub index: usize,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTable {
    #[serde(serialize_with = "dotted_columns")]
    pub columns: Vec<FieldPath>,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedStep>,
}

impl ResultTable {
    /// Column order is the first-seen key order across `rows`.
    pub fn new(rows: Vec<Row>, notices: Vec<Notice>, skipped: Vec<SkippedStep>) -> Self {
        Self {
            columns: column_order(&rows),
            rows,
            notices,
            skipped,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(FieldPath::to_string).collect()
    }
}

fn dotted_columns<S: Serializer>(columns: &[FieldPath], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(columns.iter().map(FieldPath::to_string))
}
