//! Relation field lookup used by join inference

use std::collections::HashMap;

use crate::path::FieldPath;
use crate::value::Relation;

/// Field set of one relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSchema {
    pub name: String,
    pub fields: Vec<FieldPath>,
}

impl RelationSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldPath>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Whether the relation has a column with this bare name.
    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.leaf() == column)
    }
}

impl From<&Relation> for RelationSchema {
    fn from(relation: &Relation) -> Self {
        Self::new(relation.name.clone(), relation.fields())
    }
}

/// Trait for resolving relation schemas without touching rows
pub trait SchemaProvider {
    /// Get schema for a relation by name
    fn relation_schema(&self, name: &str) -> Option<RelationSchema>;
}

/// Fixed schema provider for tests and offline rendering
#[derive(Debug, Default)]
pub struct StaticSchemaProvider {
    relations: HashMap<String, RelationSchema>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_relation(&mut self, schema: RelationSchema) {
        self.relations.insert(schema.name.clone(), schema);
    }

    /// Convenience for `add_relation` with bare column names.
    pub fn with_columns(mut self, name: &str, columns: &[&str]) -> Self {
        self.add_relation(RelationSchema::new(
            name,
            columns.iter().map(|c| FieldPath::single(*c)).collect(),
        ));
        self
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn relation_schema(&self, name: &str) -> Option<RelationSchema> {
        self.relations.get(name).cloned()
    }
}
