use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Hard per-call ceiling the backing store enforces on batched writes.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("batch of {got} operations exceeds store limit of {limit}")]
    BatchTooLarge { got: usize, limit: usize },

    #[error("unsupported filter on {collection}.{field}")]
    UnsupportedFilter { collection: String, field: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A document as stored: client-chosen ID plus its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// The two filter shapes the engine needs: top-level field equality and
/// array membership (instructor/space reference scans, preset membership).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Eq { field: String, value: Value },
    ArrayContains { field: String, value: Value },
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter::ArrayContains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FieldFilter::Eq { field, .. } | FieldFilter::ArrayContains { field, .. } => field,
        }
    }
}

/// A single write in a batch. `Set` replaces the whole document, `Update`
/// merges top-level fields into an existing document.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        fields: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn set(collection: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        WriteOp::Set {
            collection: collection.into(),
            id: id.into(),
            data,
        }
    }

    pub fn update(collection: impl Into<String>, id: impl Into<String>, fields: Value) -> Self {
        WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Narrow contract over the external document store. The store offers no
/// multi-collection transaction; a single `apply` call is atomic and capped
/// at `max_batch_size` operations. Document IDs are client-chosen, which the
/// deterministic `sched_<key>` scheme depends on. Read-after-write
/// consistency is assumed within one caller's sequence of operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &str, filter: &FieldFilter) -> StoreResult<Vec<Document>>;

    /// ID-ordered page of matches strictly after `start_after` (when given).
    async fn query_page(
        &self,
        collection: &str,
        filter: &FieldFilter,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>>;

    /// Every document in a collection, ID-ordered, paginated the same way.
    async fn list_page(
        &self,
        collection: &str,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>>;

    /// Apply a batch of writes atomically. Fails with `BatchTooLarge` when
    /// the batch exceeds `max_batch_size`; nothing is applied in that case.
    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_OPS
    }
}
