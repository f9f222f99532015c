//! StageQ Query Text Renderer
//!
//! Derives a SQL-like text from a [`Pipeline`] without executing it. Joins
//! are planned through [`stageq_ir::plan_join`], the same planner the
//! executor uses, so inferred keys and cartesian fallbacks appear in the
//! text exactly as they were computed.
//!
//! With the staging defaults (latest-batch filter left out here):
//!
//! ```text
//! SELECT JSON_VALUE(users.Content, '$.name') AS name, ROUND(SUM(JSON_VALUE(orders.Content, '$.amt')), 4) AS total
//! FROM DefaultStagingData orders
//! INNER JOIN DefaultStagingData users ON JSON_VALUE(orders.Content, '$.user') = JSON_VALUE(users.Content, '$.id')
//! GROUP BY JSON_VALUE(users.Content, '$.name')
//! ```

use serde::{Deserialize, Serialize};
use stageq_ir::{Pipeline, SchemaProvider};
use stageq_registry::FunctionRegistry;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod planner;
mod sql;

pub use sql::{quote_ident, quote_literal};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Step {index} ({kind}) cannot be rendered: {reason}")]
    InvalidStep {
        index: usize,
        kind: &'static str,
        reason: String,
    },
}

/// How a field reference is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldAccess {
    /// `JSON_VALUE(orders.Content, '$.amt')`
    #[default]
    Json,
    /// `orders.amt`
    Column,
}

impl FromStr for FieldAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(FieldAccess::Json),
            "column" => Ok(FieldAccess::Column),
            other => Err(format!("unknown field access form: {}", other)),
        }
    }
}

impl fmt::Display for FieldAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAccess::Json => write!(f, "json"),
            FieldAccess::Column => write!(f, "column"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub field_access: FieldAccess,
    /// Shared staging table every relation is read from, aliased by
    /// relation name. `None` reads each relation as its own table.
    pub source_table: Option<String>,
    /// JSON document column for [`FieldAccess::Json`]
    pub content_column: String,
    /// Restrict each staged relation to its latest import batch
    pub batch_filter: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            field_access: FieldAccess::Json,
            source_table: Some("DefaultStagingData".to_string()),
            content_column: "Content".to_string(),
            batch_filter: true,
        }
    }
}

impl RenderOptions {
    /// Plain column references over one table per relation.
    pub fn plain() -> Self {
        Self {
            field_access: FieldAccess::Column,
            source_table: None,
            content_column: "Content".to_string(),
            batch_filter: false,
        }
    }
}

/// Render with the default function registry.
pub fn render(
    pipeline: &Pipeline,
    schemas: &dyn SchemaProvider,
    options: &RenderOptions,
) -> Result<String, RenderError> {
    QueryRenderer::new(schemas, options).render(pipeline)
}

/// Renderer bound to a schema source and options
pub struct QueryRenderer<'a> {
    schemas: &'a dyn SchemaProvider,
    options: &'a RenderOptions,
    registry: FunctionRegistry,
}

impl<'a> QueryRenderer<'a> {
    pub fn new(schemas: &'a dyn SchemaProvider, options: &'a RenderOptions) -> Self {
        Self::with_registry(schemas, options, FunctionRegistry::default())
    }

    pub fn with_registry(schemas: &'a dyn SchemaProvider, options: &'a RenderOptions, registry: FunctionRegistry) -> Self {
        Self {
            schemas,
            options,
            registry,
        }
    }

    /// Render a pipeline. Identical pipelines and schemas always render
    /// identical text.
    pub fn render(&self, pipeline: &Pipeline) -> Result<String, RenderError> {
        let text = planner::Planner::new(self.schemas, self.options, &self.registry, &pipeline.dataset)
            .plan(&pipeline.steps)?;
        tracing::debug!("Rendered {} steps over {}", pipeline.steps.len(), pipeline.dataset);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_access_from_str() {
        assert_eq!("JSON".parse::<FieldAccess>().unwrap(), FieldAccess::Json);
        assert_eq!("column".parse::<FieldAccess>().unwrap(), FieldAccess::Column);
        assert!("xml".parse::<FieldAccess>().is_err());
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: RenderOptions = serde_json::from_str(r#"{"field_access": "column"}"#).unwrap();
        assert_eq!(options.field_access, FieldAccess::Column);
        assert_eq!(options.source_table.as_deref(), Some("DefaultStagingData"));
        assert!(options.batch_filter);
    }
}
