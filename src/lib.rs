pub mod config;
pub mod dedupe;
pub mod store;

pub use config::{DetectionConfig, EngineConfig, MergeConfig};
pub use dedupe::error::{DedupeError, Result};

// Re-export the dedupe surface for convenience
pub use dedupe::{
    backfill_identity_keys, derive_schedule_identity, detect_cross_collection_issues,
    detect_people_duplicates, detect_room_duplicates, detect_schedule_duplicates,
    mark_not_duplicate, merge_people_data, merge_room_data, merge_schedule_data,
    resolve_import_row, revoke_decision, DuplicatePair, DuplicateSignal, EntityType,
    FieldChoices, IntegrityIssue, MergeEngine, Person, Room, Schedule, ScheduleIdentity,
    SuppressionSet,
};

// Re-export store types
pub use store::{
    BatchWriter, Document, DocumentStore, FieldFilter, MemoryStore, StoreError, StoreResult,
    WriteOp, MAX_BATCH_OPS,
};
