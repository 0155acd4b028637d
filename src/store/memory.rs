use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::contract::{
    Document, DocumentStore, FieldFilter, StoreError, StoreResult, WriteOp, MAX_BATCH_OPS,
};

/// In-process document store backing the integration tests and the CLI's
/// snapshot mode. Collections are ID-ordered maps, which gives the
/// pagination contract for free.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load raw documents into a collection; each value must carry an `id`
    /// field, which becomes the document ID. Used to seed snapshots.
    pub async fn load(&self, collection: &str, docs: Vec<Value>) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        for doc in docs {
            let id = doc
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::Backend(format!("{collection} document without id")))?
                .to_string();
            coll.insert(id, doc);
        }
        Ok(())
    }

    /// Snapshot every collection as raw documents, in ID order. The inverse
    /// of `load`, used to write a mutated snapshot back out.
    pub async fn dump(&self) -> BTreeMap<String, Vec<Value>> {
        self.collections
            .read()
            .await
            .iter()
            .map(|(name, coll)| (name.clone(), coll.values().cloned().collect()))
            .collect()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn matches(doc: &Value, filter: &FieldFilter) -> bool {
        match filter {
            FieldFilter::Eq { field, value } => doc.get(field) == Some(value),
            FieldFilter::ArrayContains { field, value } => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }

    fn merge_fields(target: &mut Value, fields: &Value) {
        if let (Value::Object(target), Value::Object(fields)) = (target, fields) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|coll| coll.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn query(&self, collection: &str, filter: &FieldFilter) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(_, data)| Self::matches(data, filter))
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }

    async fn query_page(
        &self,
        collection: &str,
        filter: &FieldFilter,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(id, _)| start_after.is_none_or(|after| id.as_str() > after))
            .filter(|(_, data)| Self::matches(data, filter))
            .take(limit)
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }

    async fn list_page(
        &self,
        collection: &str,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(id, _)| start_after.is_none_or(|after| id.as_str() > after))
            .take(limit)
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .collect())
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::BatchTooLarge {
                got: ops.len(),
                limit: MAX_BATCH_OPS,
            });
        }
        // One write guard for the whole batch keeps it atomic.
        let mut guard = self.collections.write().await;
        for op in ops {
            match op {
                WriteOp::Set {
                    collection,
                    id,
                    data,
                } => {
                    guard.entry(collection).or_default().insert(id, data);
                }
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    let coll = guard.entry(collection).or_default();
                    match coll.get_mut(&id) {
                        Some(existing) => Self::merge_fields(existing, &fields),
                        None => {
                            coll.insert(id, fields);
                        }
                    }
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(coll) = guard.get_mut(&collection) {
                        coll.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
