use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum DedupeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("corrupt merge chain starting at {start}: {detail}")]
    CorruptMergeChain { start: String, detail: String },

    /// A merge failed after its commit point. The secondary has been marked
    /// `pending_cleanup`; the original failure is carried as the source.
    #[error("merge of {secondary_id} left pending cleanup during {stage}: {source}")]
    PartialMerge {
        stage: String,
        secondary_id: String,
        #[source]
        source: Box<DedupeError>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DedupeError>;
