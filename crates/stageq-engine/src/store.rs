//! Relation Store
//!
//! Named relations held behind `Arc`s. Mutation is copy-on-write, so a
//! [`StoreSnapshot`] handed to a run never observes later inserts.

use indexmap::IndexMap;
use stageq_ir::{Relation, RelationSchema, Row, SchemaProvider};
use std::sync::Arc;

type RelationMap = IndexMap<String, Arc<Relation>>;

#[derive(Debug, Clone, Default)]
pub struct RelationStore {
    relations: Arc<RelationMap>,
}

impl RelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a relation, returning the previous one.
    pub fn insert(&mut self, relation: Relation) -> Option<Arc<Relation>> {
        let relations = Arc::make_mut(&mut self.relations);
        relations.insert(relation.name.clone(), Arc::new(relation))
    }

    pub fn insert_rows(&mut self, name: impl Into<String>, rows: Vec<Row>) -> Option<Arc<Relation>> {
        self.insert(Relation::new(name, rows))
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Relation>> {
        Arc::make_mut(&mut self.relations).shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Relation>> {
        self.relations.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Stable read-only view for one run.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            relations: Arc::clone(&self.relations),
        }
    }
}

impl FromIterator<Relation> for RelationStore {
    fn from_iter<T: IntoIterator<Item = Relation>>(iter: T) -> Self {
        let mut store = RelationStore::new();
        for relation in iter {
            store.insert(relation);
        }
        store
    }
}

impl SchemaProvider for RelationStore {
    fn relation_schema(&self, name: &str) -> Option<RelationSchema> {
        self.relations.get(name).map(|r| RelationSchema::from(r.as_ref()))
    }
}

/// Immutable view of the store at the moment it was taken.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    relations: Arc<RelationMap>,
}

impl StoreSnapshot {
    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}

impl SchemaProvider for StoreSnapshot {
    fn relation_schema(&self, name: &str) -> Option<RelationSchema> {
        self.get(name).map(RelationSchema::from)
    }
}
