// src/store.rs
//! Storage boundary
//!
//! The statistics core never talks to a database directly: it hands filter
//! documents (from `Constraint::to_filter`) and typed pipelines to a
//! `DocumentStore`. `MemoryStore` is the in-process implementation used by
//! tests and the CLI.
//!
//! ```text
//! DocumentStore trait
//!   ├── MemoryStore (collections in a RwLock<HashMap>)
//!   └── production stores plug in behind the same trait
//! ```

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::aggregation::{Pipeline, ProjectStage};
use crate::error::{Result, TaskboardError};
use crate::query::matches_filter;

/// Document collections addressed by name
///
/// Implementations must be shareable across the threads that run the two
/// statistics pipelines.
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection` matching `filter`
    fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>>;

    /// First match, reduced to `projection` fields (plus `_id`) when given
    fn find_one(
        &self,
        collection: &str,
        filter: &Value,
        projection: Option<&[&str]>,
    ) -> Result<Option<Value>>;

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>>;

    fn count(&self, collection: &str, filter: &Value) -> Result<u64>;

    /// Insert a document; it must carry a string `_id`
    fn insert_one(&self, collection: &str, doc: Value) -> Result<String>;

    /// Apply the `$set` map (a null value unsets the field) to every match;
    /// returns the number of documents updated
    fn update_many(&self, collection: &str, filter: &Value, set: &Map<String, Value>) -> Result<u64>;

    /// Delete the first match; returns the number deleted (0 or 1)
    fn delete_one(&self, collection: &str, filter: &Value) -> Result<u64>;
}

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a dump shaped `{"collection": [doc, ...], ...}`
    pub fn from_dump(dump: &Value) -> Result<Self> {
        let obj = dump.as_object().ok_or_else(|| TaskboardError::Storage {
            context: "loading dump".to_string(),
            message: "dump must be an object of collections".to_string(),
        })?;

        let store = MemoryStore::new();
        for (collection, docs) in obj {
            let docs = docs.as_array().ok_or_else(|| TaskboardError::Storage {
                context: "loading dump".to_string(),
                message: format!("collection '{}' must be an array", collection),
            })?;
            for doc in docs {
                store.insert_one(collection, doc.clone())?;
            }
        }
        Ok(store)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn matching(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for doc in docs {
            if matches_filter(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        self.matching(collection, filter)
    }

    fn find_one(
        &self,
        collection: &str,
        filter: &Value,
        projection: Option<&[&str]>,
    ) -> Result<Option<Value>> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(None);
        };
        for doc in docs {
            if matches_filter(doc, filter)? {
                let found = match projection {
                    Some(fields) => ProjectStage::include(fields).project_document(doc),
                    None => doc.clone(),
                };
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let docs = self
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        pipeline.execute(docs)
    }

    fn count(&self, collection: &str, filter: &Value) -> Result<u64> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(0);
        };
        let mut count = 0;
        for doc in docs {
            if matches_filter(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn insert_one(&self, collection: &str, doc: Value) -> Result<String> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaskboardError::Storage {
                context: format!("inserting into {}", collection),
                message: "document must be an object with a string _id".to_string(),
            })?;

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("_id").and_then(Value::as_str) == Some(id.as_str())) {
            return Err(TaskboardError::Storage {
                context: format!("inserting into {}", collection),
                message: format!("duplicate _id '{}'", id),
            });
        }
        docs.push(doc);
        Ok(id)
    }

    fn update_many(&self, collection: &str, filter: &Value, set: &Map<String, Value>) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut updated = 0;
        for doc in docs.iter_mut() {
            if !matches_filter(doc, filter)? {
                continue;
            }
            if let Value::Object(fields) = doc {
                for (key, value) in set {
                    if value.is_null() {
                        fields.remove(key);
                    } else {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn delete_one(&self, collection: &str, filter: &Value) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut position = None;
        for (i, doc) in docs.iter().enumerate() {
            if matches_filter(doc, filter)? {
                position = Some(i);
                break;
            }
        }
        match position {
            Some(i) => {
                docs.remove(i);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Constraint;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::from_dump(&json!({
            "tasks": [
                {"_id": "t1", "project": "p1", "status": "created"},
                {"_id": "t2", "project": "p1", "status": "failed"},
                {"_id": "t3", "project": "p2", "status": "failed"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_find_and_count() {
        let store = store();
        let filter = Constraint::eq("project", "p1").to_filter();
        assert_eq!(store.find("tasks", &filter).unwrap().len(), 2);
        assert_eq!(store.count("tasks", &filter).unwrap(), 2);
        assert_eq!(store.count("missing", &filter).unwrap(), 0);
    }

    #[test]
    fn test_find_one_projection() {
        let store = store();
        let found = store
            .find_one("tasks", &Constraint::eq("_id", "t2").to_filter(), Some(&["_id"]))
            .unwrap();
        assert_eq!(found, Some(json!({"_id": "t2"})));

        let none = store
            .find_one("tasks", &Constraint::eq("_id", "zz").to_filter(), None)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_insert_requires_unique_string_id() {
        let store = store();
        assert!(store.insert_one("tasks", json!({"name": "no id"})).is_err());
        assert!(store.insert_one("tasks", json!({"_id": "t1"})).is_err());
        assert_eq!(store.insert_one("tasks", json!({"_id": "t9"})).unwrap(), "t9");
    }

    #[test]
    fn test_update_many_sets_and_unsets() {
        let store = store();
        let mut set = Map::new();
        set.insert("project".to_string(), Value::Null);
        set.insert("comment".to_string(), json!("moved"));

        let updated = store
            .update_many("tasks", &Constraint::eq("project", "p1").to_filter(), &set)
            .unwrap();
        assert_eq!(updated, 2);

        let t1 = store
            .find_one("tasks", &Constraint::eq("_id", "t1").to_filter(), None)
            .unwrap()
            .unwrap();
        assert!(t1.get("project").is_none());
        assert_eq!(t1["comment"], "moved");
    }

    #[test]
    fn test_delete_one() {
        let store = store();
        let filter = Constraint::eq("status", "failed").to_filter();
        assert_eq!(store.delete_one("tasks", &filter).unwrap(), 1);
        assert_eq!(store.count("tasks", &filter).unwrap(), 1);
        assert_eq!(store.delete_one("nothing", &filter).unwrap(), 0);
    }

    #[test]
    fn test_aggregate_runs_pipeline() {
        let store = store();
        let pipeline = Pipeline::from_json(&json!([
            {"$group": {"_id": "$project", "n": {"$sum": 1}}}
        ]))
        .unwrap();
        let rows = store.aggregate("tasks", &pipeline).unwrap();
        assert_eq!(rows, vec![json!({"_id": "p1", "n": 2}), json!({"_id": "p2", "n": 1})]);
    }

    #[test]
    fn test_from_dump_rejects_bad_shapes() {
        assert!(MemoryStore::from_dump(&json!([])).is_err());
        assert!(MemoryStore::from_dump(&json!({"tasks": {}})).is_err());
    }
}
