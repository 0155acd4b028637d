//! Identity resolution and deduplication for the scheduling directory:
//! value normalization, tiered schedule identity keys, duplicate detection
//! with confidence scoring, suppression of confirmed non-duplicates, the
//! resumable merge engine, and the cross-collection integrity scanner.

pub mod detector;
pub mod error;
pub mod identity;
pub mod integrity;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod suppression;

pub use detector::{
    detect_people_duplicates, detect_room_duplicates, detect_schedule_duplicates,
};
pub use error::{DedupeError, Result};
pub use identity::{
    backfill_identity_keys, derive_schedule_identity, resolve_import_row, BackfillReport,
    ImportResolution, ScheduleIdentity, ScheduleIdentityIndex,
};
pub use integrity::{detect_cross_collection_issues, IntegrityIssue, IssueKind, SuggestedFix};
pub use merge::{
    merge_people_data, merge_room_data, merge_schedule_data, FieldChoices, MergeEngine,
};
pub use models::{DuplicatePair, DuplicateSignal, EntityType, Person, Room, Schedule};
pub use suppression::{mark_not_duplicate, revoke_decision, NotDuplicateRequest, SuppressionSet};
