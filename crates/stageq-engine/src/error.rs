//! Step and pipeline errors

use stageq_ast::ParseError;
use stageq_registry::RegistryError;
use thiserror::Error;

use crate::result::ResultTable;

/// Why a single step could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("Malformed step: {0}")]
    MalformedStep(String),

    #[error("Unresolvable join key {key} on relation {relation}")]
    UnresolvableJoin { relation: String, key: String },

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),
}

impl StepError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        StepError::MalformedStep(reason.into())
    }
}

impl From<ParseError> for StepError {
    fn from(e: ParseError) -> Self {
        StepError::MalformedStep(format!("invalid formula: {}", e))
    }
}

impl From<RegistryError> for StepError {
    fn from(e: RegistryError) -> Self {
        StepError::MalformedStep(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown base relation: {0}")]
    UnknownRelation(String),

    /// Run aborted; `partial` holds the rows as of the last good step
    #[error("Step {index} ({kind}) failed: {source}")]
    StepFailed {
        index: usize,
        kind: &'static str,
        #[source]
        source: StepError,
        partial: Box<ResultTable>,
    },
}
