//! Input documents and result output for the stageq binary

use indexmap::IndexMap;
use serde_json::json;
use stageq_engine::{RelationStore, ResultTable};
use stageq_ir::{Pipeline, Relation, Row};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown preset '{name}' (available: {available})")]
    UnknownPreset { name: String, available: String },
}

/// Encoding of a query or presets document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yaml` and `.yml` are YAML, anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

fn read(path: &Path) -> Result<String, QueryError> {
    std::fs::read_to_string(path).map_err(|source| QueryError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_document<T: serde::de::DeserializeOwned>(text: &str, format: DocumentFormat) -> Result<T, QueryError> {
    Ok(match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    })
}

/// Parse a JSON object mapping relation name to an array of row objects.
/// Relations keep the order they appear in the document.
pub fn parse_relations(text: &str) -> Result<RelationStore, QueryError> {
    let relations: IndexMap<String, Vec<Row>> = serde_json::from_str(text)?;
    Ok(relations
        .into_iter()
        .map(|(name, rows)| Relation::new(name, rows))
        .collect())
}

pub fn load_relations(path: &Path) -> Result<RelationStore, QueryError> {
    let store = parse_relations(&read(path)?)?;
    tracing::debug!("Loaded {} relations from {}", store.len(), path.display());
    Ok(store)
}

pub fn parse_pipeline(text: &str, format: DocumentFormat) -> Result<Pipeline, QueryError> {
    parse_document(text, format)
}

pub fn load_pipeline(path: &Path) -> Result<Pipeline, QueryError> {
    parse_pipeline(&read(path)?, DocumentFormat::from_path(path))
}

/// Pick one query document out of a map of saved presets.
pub fn select_preset(text: &str, format: DocumentFormat, name: &str) -> Result<Pipeline, QueryError> {
    let mut presets: IndexMap<String, Pipeline> = parse_document(text, format)?;
    presets.shift_remove(name).ok_or_else(|| QueryError::UnknownPreset {
        name: name.to_string(),
        available: presets.keys().cloned().collect::<Vec<_>>().join(", "),
    })
}

pub fn load_preset(path: &Path, name: &str) -> Result<Pipeline, QueryError> {
    select_preset(&read(path)?, DocumentFormat::from_path(path), name)
}

/// Result document: `{columns, rows, row_count, notices, skipped}`
pub fn result_to_json(result: &ResultTable) -> Result<serde_json::Value, serde_json::Error> {
    Ok(json!({
        "columns": result.column_names(),
        "rows": serde_json::to_value(&result.rows)?,
        "row_count": result.row_count(),
        "notices": serde_json::to_value(&result.notices)?,
        "skipped": serde_json::to_value(&result.skipped)?,
    }))
}
