//! In-memory [`SearchEngine`] for tests.
//!
//! Keeps indices, aliases and documents in `HashMap`s behind
//! `std::sync::RwLock` and records every bulk call so tests can assert on
//! chunk boundaries.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::{SearchEngine, SearchError};
use crate::models::Document;

#[derive(Default)]
struct StoredIndex {
    mapping: Value,
    docs: BTreeMap<i64, Document>,
}

/// In-memory search engine.
#[derive(Default)]
pub struct MemoryEngine {
    indices: RwLock<HashMap<String, StoredIndex>>,
    aliases: RwLock<HashMap<String, Vec<String>>>,
    bulk_calls: RwLock<Vec<Vec<i64>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indices.read().unwrap().contains_key(index)
    }

    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.indices.read().unwrap().get(index).map(|i| i.mapping.clone())
    }

    pub fn document(&self, index: &str, id: i64) -> Option<Document> {
        self.indices
            .read()
            .unwrap()
            .get(index)
            .and_then(|i| i.docs.get(&id).cloned())
    }

    /// Ids stored in an index, newest first.
    pub fn document_ids(&self, index: &str) -> Vec<i64> {
        self.indices
            .read()
            .unwrap()
            .get(index)
            .map(|i| i.docs.keys().rev().copied().collect())
            .unwrap_or_default()
    }

    /// Ids submitted by each bulk call, in call order.
    pub fn bulk_calls(&self) -> Vec<Vec<i64>> {
        self.bulk_calls.read().unwrap().clone()
    }

    /// Indices an alias points at.
    pub fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.aliases
            .read()
            .unwrap()
            .get(alias)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn create_index(
        &self,
        index: &str,
        mapping: &Value,
        _shards: u32,
        _replicas: u32,
    ) -> Result<(), SearchError> {
        let mut indices = self.indices.write().unwrap();
        if indices.contains_key(index) {
            return Err(SearchError::AlreadyExists(index.to_string()));
        }
        indices.insert(
            index.to_string(),
            StoredIndex {
                mapping: mapping.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, docs: &[(i64, Document)]) -> Result<(), SearchError> {
        let mut indices = self.indices.write().unwrap();
        // Bulk indexing auto-creates missing indices, as the HTTP API does.
        let stored = indices.entry(index.to_string()).or_default();
        for (id, doc) in docs {
            stored.docs.insert(*id, doc.clone());
        }
        self.bulk_calls
            .write()
            .unwrap()
            .push(docs.iter().map(|(id, _)| *id).collect());
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError> {
        let mut indices = self.indices.write().unwrap();
        let removed = indices.get_mut(index).and_then(|i| i.docs.remove(&id));
        match removed {
            Some(_) => Ok(()),
            None => Err(SearchError::NotFound(format!("{}/{}", index, id))),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        match self.indices.write().unwrap().remove(index) {
            Some(_) => {
                for targets in self.aliases.write().unwrap().values_mut() {
                    targets.retain(|t| t != index);
                }
                Ok(())
            }
            None => Err(SearchError::NotFound(index.to_string())),
        }
    }

    async fn add_alias(&self, index: &str, alias: &str) -> Result<(), SearchError> {
        if !self.has_index(index) {
            return Err(SearchError::NotFound(index.to_string()));
        }
        self.aliases
            .write()
            .unwrap()
            .insert(alias.to_string(), vec![index.to_string()]);
        Ok(())
    }

    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), SearchError> {
        let mut aliases = self.aliases.write().unwrap();
        let targets = aliases.entry(alias.to_string()).or_default();
        let before = targets.len();
        targets.retain(|t| t != index);
        if targets.len() == before {
            return Err(SearchError::NotFound(format!("{} -> {}", alias, index)));
        }
        Ok(())
    }
}
