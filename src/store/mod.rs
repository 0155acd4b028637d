pub mod batch;
pub mod contract;
pub mod memory;

pub use batch::{BatchWriter, BATCH_FLUSH_THRESHOLD};
pub use contract::{
    Document, DocumentStore, FieldFilter, StoreError, StoreResult, WriteOp, MAX_BATCH_OPS,
};
pub use memory::MemoryStore;
