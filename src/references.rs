//! Reference cache: transformed records of referenced bundles.
//!
//! Lives for one indexing run. Records are keyed by bundle and id and are
//! never overwritten by a merge: the first writer wins, so a record loaded
//! while resolving one chunk stays identical for every later chunk.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::models::Document;

/// Records of one bundle by id.
pub type BundleRecords = BTreeMap<i64, Document>;

#[derive(Debug, Default)]
pub struct ReferenceCache {
    bundles: HashMap<String, BundleRecords>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything was stored for the bundle, even an empty set.
    pub fn has(&self, bundle: &str) -> bool {
        self.bundles.contains_key(bundle)
    }

    pub fn get(&self, bundle: &str) -> Option<&BundleRecords> {
        self.bundles.get(bundle)
    }

    /// One record, restricted to `fields` when the allowlist is non-empty.
    pub fn get_item(&self, bundle: &str, id: i64, fields: &[String]) -> Option<Document> {
        let record = self.bundles.get(bundle)?.get(&id)?;
        if fields.is_empty() {
            return Some(record.clone());
        }
        Some(
            record
                .iter()
                .filter(|(key, _)| fields.iter().any(|f| f == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    /// Replace all records of a bundle.
    pub fn set(&mut self, bundle: &str, records: BundleRecords) {
        self.bundles.insert(bundle.to_string(), records);
    }

    /// Merge records into a bundle. Ids already cached keep their record.
    pub fn set_items(&mut self, bundle: &str, records: impl IntoIterator<Item = (i64, Document)>) {
        let stored = self.bundles.entry(bundle.to_string()).or_default();
        for (id, record) in records {
            stored.entry(id).or_insert(record);
        }
    }

    /// Ids not yet cached for a bundle, deduplicated, in first-seen order.
    pub fn get_not_loaded(&self, bundle: &str, ids: &[i64]) -> Vec<i64> {
        let stored = self.bundles.get(bundle);
        let mut missing: Vec<i64> = Vec::new();
        for id in ids {
            let cached = stored.is_some_and(|records| records.contains_key(id));
            if !cached && !missing.contains(id) {
                missing.push(*id);
            }
        }
        missing
    }

    /// Number of cached records of a bundle.
    pub fn len(&self, bundle: &str) -> usize {
        self.bundles.get(bundle).map_or(0, BTreeMap::len)
    }
}

/// Ids held by a packed reference column, whatever the scalar type.
pub fn reference_ids(value: &Value) -> Vec<i64> {
    match value {
        Value::Number(n) => n.as_i64().into_iter().collect(),
        Value::String(s) => crate::encoding::split_values(s)
            .into_iter()
            .filter_map(|v| v.trim().parse().ok())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> Document {
        json!({ "id": 1, "name": name, "code": "XX" })
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_set_items_first_writer_wins() {
        let mut cache = ReferenceCache::new();
        cache.set_items("country", [(1, record("France"))]);
        cache.set_items("country", [(1, record("Other")), (2, record("Spain"))]);
        assert_eq!(cache.get_item("country", 1, &[]).unwrap()["name"], json!("France"));
        assert_eq!(cache.len("country"), 2);
    }

    #[test]
    fn test_set_replaces() {
        let mut cache = ReferenceCache::new();
        cache.set_items("country", [(1, record("France"))]);
        cache.set("country", BundleRecords::from([(2, record("Spain"))]));
        assert!(cache.get_item("country", 1, &[]).is_none());
        assert!(cache.get("country").unwrap().contains_key(&2));
    }

    #[test]
    fn test_get_item_allowlist() {
        let mut cache = ReferenceCache::new();
        cache.set_items("country", [(1, record("France"))]);
        let item = cache
            .get_item("country", 1, &["id".to_string(), "name".to_string()])
            .unwrap();
        assert_eq!(item.len(), 2);
        assert!(!item.contains_key("code"));
        assert!(cache.get_item("country", 9, &[]).is_none());
        assert!(cache.get_item("source", 1, &[]).is_none());
    }

    #[test]
    fn test_get_not_loaded() {
        let mut cache = ReferenceCache::new();
        assert!(!cache.has("country"));
        assert_eq!(cache.get_not_loaded("country", &[3, 1, 3]), vec![3, 1]);
        cache.set_items("country", [(1, record("France"))]);
        assert!(cache.has("country"));
        assert_eq!(cache.get_not_loaded("country", &[3, 1, 2]), vec![3, 2]);
        assert!(cache.get_not_loaded("country", &[1]).is_empty());
    }

    #[test]
    fn test_reference_ids() {
        assert_eq!(reference_ids(&json!("12%%%45%%%x")), vec![12, 45]);
        assert_eq!(reference_ids(&json!(7)), vec![7]);
        assert!(reference_ids(&json!(null)).is_empty());
        assert!(reference_ids(&json!("")).is_empty());
    }
}
