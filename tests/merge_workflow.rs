//! End-to-end merge protocol tests against the in-memory store, including
//! an injected mid-protocol failure and the subsequent resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use roster_dedupe::config::MergeConfig;
use roster_dedupe::dedupe::models::{
    collections, from_document, InstructorAssignment, MergeStatus, Person, Room, Schedule,
};
use roster_dedupe::dedupe::{DedupeError, FieldChoices, MergeEngine};
use roster_dedupe::store::{
    Document, DocumentStore, FieldFilter, MemoryStore, StoreError, StoreResult, WriteOp,
};

fn person(id: &str, first: &str, last: &str, email: &str) -> serde_json::Value {
    serde_json::to_value(Person {
        id: id.into(),
        first_name: first.into(),
        last_name: last.into(),
        email: email.into(),
        ..Person::default()
    })
    .unwrap()
}

fn schedule(id: &str, instructor: &str) -> serde_json::Value {
    serde_json::to_value(Schedule {
        id: id.into(),
        course_code: "ADM 1300".into(),
        term_code: "202610".into(),
        section: "01".into(),
        instructor_id: instructor.into(),
        instructor_ids: vec![instructor.into()],
        instructor_assignments: vec![InstructorAssignment {
            person_id: instructor.into(),
            is_primary: true,
            percentage: 100.0,
        }],
        ..Schedule::default()
    })
    .unwrap()
}

async fn seed_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .load(
            collections::PEOPLE,
            vec![
                person("p_keep", "Bob", "Smith", "bob_smith@baylor.edu"),
                person("p_dup", "Robert", "Smith", ""),
            ],
        )
        .await
        .unwrap();
    store
        .load(
            collections::SCHEDULES,
            vec![
                schedule("sched_a", "p_dup"),
                schedule("sched_b", "p_dup"),
                schedule("sched_c", "p_keep"),
            ],
        )
        .await
        .unwrap();
    store
        .load(
            collections::LIST_PRESETS,
            vec![json!({
                "id": "preset_1",
                "name": "My department",
                "personIds": ["p_dup", "p_keep", "p_other"],
            })],
        )
        .await
        .unwrap();
    store
}

async fn get_person(store: &MemoryStore, id: &str) -> Option<Person> {
    store
        .get(collections::PEOPLE, id)
        .await
        .unwrap()
        .map(|doc| from_document(&doc).unwrap())
}

async fn get_schedule(store: &MemoryStore, id: &str) -> Schedule {
    let doc = store
        .get(collections::SCHEDULES, id)
        .await
        .unwrap()
        .unwrap();
    from_document(&doc).unwrap()
}

#[tokio::test]
async fn people_merge_reassigns_everything_and_deletes_secondary() {
    let store = seed_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    let merged = engine
        .merge_people("p_keep", "p_dup", &FieldChoices::new())
        .await
        .unwrap();
    assert_eq!(merged.id, "p_keep");
    assert_eq!(merged.email, "bob_smith@baylor.edu");

    // Zero references remained, so the secondary is gone entirely.
    assert!(get_person(&store, "p_dup").await.is_none());

    for id in ["sched_a", "sched_b"] {
        let schedule = get_schedule(&store, id).await;
        assert_eq!(schedule.instructor_id, "p_keep", "{id}");
        assert_eq!(schedule.instructor_ids, vec!["p_keep"], "{id}");
        assert_eq!(schedule.instructor_name, "Bob Smith", "{id}");
    }
    // Untouched schedule keeps its reference as-is.
    assert_eq!(get_schedule(&store, "sched_c").await.instructor_id, "p_keep");

    // Preset membership rewritten and deduplicated.
    let preset = store
        .get(collections::LIST_PRESETS, "preset_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(preset.data["personIds"], json!(["p_keep", "p_other"]));
}

#[tokio::test]
async fn merge_resolves_primary_through_a_prior_merge_chain() {
    let store = seed_store().await;
    store
        .load(
            collections::PEOPLE,
            vec![json!({
                "id": "p_old",
                "firstName": "Bobby",
                "lastName": "Smith",
                "mergedInto": "p_keep",
                "mergeStatus": "in_progress",
            })],
        )
        .await
        .unwrap();

    let engine = MergeEngine::new(store.clone(), MergeConfig::default());
    // p_old is a tombstone pointing at p_keep; the merge lands there.
    let merged = engine
        .merge_people("p_old", "p_dup", &FieldChoices::new())
        .await
        .unwrap();
    assert_eq!(merged.id, "p_keep");
}

#[tokio::test]
async fn merge_chain_cycle_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    store
        .load(
            collections::PEOPLE,
            vec![
                json!({"id": "p_a", "mergedInto": "p_b"}),
                json!({"id": "p_b", "mergedInto": "p_a"}),
                person("p_dup", "Robert", "Smith", ""),
            ],
        )
        .await
        .unwrap();

    let engine = MergeEngine::new(store, MergeConfig::default());
    let err = engine
        .merge_people("p_a", "p_dup", &FieldChoices::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DedupeError::CorruptMergeChain { .. }), "{err}");
}

#[tokio::test]
async fn merging_a_record_into_itself_is_rejected() {
    let store = seed_store().await;
    let engine = MergeEngine::new(store, MergeConfig::default());
    let err = engine
        .merge_people("p_keep", "p_keep", &FieldChoices::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DedupeError::Validation(_)));
}

/// Delegating store that fails preset writes on demand, to drive the merge
/// protocol into its partial-failure path.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_preset_writes: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_preset_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: &str, filter: &FieldFilter) -> StoreResult<Vec<Document>> {
        self.inner.query(collection, filter).await
    }

    async fn query_page(
        &self,
        collection: &str,
        filter: &FieldFilter,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        self.inner
            .query_page(collection, filter, limit, start_after)
            .await
    }

    async fn list_page(
        &self,
        collection: &str,
        limit: usize,
        start_after: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        self.inner.list_page(collection, limit, start_after).await
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if self.fail_preset_writes.load(Ordering::SeqCst) {
            let touches_presets = ops.iter().any(|op| {
                let collection = match op {
                    WriteOp::Set { collection, .. }
                    | WriteOp::Update { collection, .. }
                    | WriteOp::Delete { collection, .. } => collection,
                };
                collection == collections::LIST_PRESETS
            });
            if touches_presets {
                return Err(StoreError::Backend("injected preset write failure".into()));
            }
        }
        self.inner.apply(ops).await
    }
}

#[tokio::test]
async fn interrupted_merge_marks_pending_cleanup_and_resumes() {
    let memory = seed_store().await;
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    flaky.fail_preset_writes.store(true, Ordering::SeqCst);

    let engine = MergeEngine::new(flaky.clone(), MergeConfig::default());
    let err = engine
        .merge_people("p_keep", "p_dup", &FieldChoices::new())
        .await
        .unwrap_err();
    match &err {
        DedupeError::PartialMerge {
            stage,
            secondary_id,
            ..
        } => {
            assert_eq!(stage, "preset reassignment");
            assert_eq!(secondary_id, "p_dup");
        }
        other => panic!("expected PartialMerge, got {other}"),
    }

    // Past the commit point: the secondary is a tombstone, not canonical,
    // and is flagged for cleanup.
    let secondary = get_person(&memory, "p_dup").await.unwrap();
    assert_eq!(secondary.merged_into.as_deref(), Some("p_keep"));
    assert_eq!(secondary.merge_status, MergeStatus::PendingCleanup);

    // Schedules were already repointed before the failing stage.
    assert_eq!(get_schedule(&memory, "sched_a").await.instructor_id, "p_keep");

    // Preset still holds the stale reference.
    let preset = memory
        .get(collections::LIST_PRESETS, "preset_1")
        .await
        .unwrap()
        .unwrap();
    assert!(preset.data["personIds"]
        .as_array()
        .unwrap()
        .contains(&json!("p_dup")));

    // Re-running the same merge finishes the job.
    flaky.fail_preset_writes.store(false, Ordering::SeqCst);
    let merged = engine
        .merge_people("p_keep", "p_dup", &FieldChoices::new())
        .await
        .unwrap();
    assert_eq!(merged.id, "p_keep");
    assert!(get_person(&memory, "p_dup").await.is_none());
    let preset = memory
        .get(collections::LIST_PRESETS, "preset_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(preset.data["personIds"], json!(["p_keep", "p_other"]));
}

#[tokio::test]
async fn merging_into_a_third_record_is_rejected_for_a_tombstone() {
    let store = seed_store().await;
    store
        .load(
            collections::PEOPLE,
            vec![json!({
                "id": "p_taken",
                "mergedInto": "p_other_target",
                "mergeStatus": "in_progress",
            })],
        )
        .await
        .unwrap();

    let engine = MergeEngine::new(store, MergeConfig::default());
    let err = engine
        .merge_people("p_keep", "p_taken", &FieldChoices::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DedupeError::Validation(_)), "{err}");
}

#[tokio::test]
async fn room_merge_rewrites_space_references() {
    let store = Arc::new(MemoryStore::new());
    store
        .load(
            collections::ROOMS,
            vec![
                serde_json::to_value(Room {
                    id: "room_keep".into(),
                    space_key: "CASHION:0303".into(),
                    building_code: "CASHION".into(),
                    space_number: "0303".into(),
                    display_name: "Cashion 303".into(),
                    ..Room::default()
                })
                .unwrap(),
                serde_json::to_value(Room {
                    id: "room_dup".into(),
                    display_name: "Cashion Academic Center 303".into(),
                    capacity: 40,
                    ..Room::default()
                })
                .unwrap(),
            ],
        )
        .await
        .unwrap();
    let mut sched: Schedule = serde_json::from_value(schedule("sched_a", "p1")).unwrap();
    sched.space_ids = vec!["room_dup".into(), "room_keep".into()];
    sched.space_display_names = vec![
        "Cashion Academic Center 303".into(),
        "Cashion 303".into(),
    ];
    store
        .load(
            collections::SCHEDULES,
            vec![serde_json::to_value(&sched).unwrap()],
        )
        .await
        .unwrap();

    let engine = MergeEngine::new(store.clone(), MergeConfig::default());
    let merged = engine.merge_rooms("room_keep", "room_dup").await.unwrap();
    assert_eq!(merged.capacity, 40);

    assert!(store
        .get(collections::ROOMS, "room_dup")
        .await
        .unwrap()
        .is_none());
    let sched = get_schedule(&store, "sched_a").await;
    // Duplicate reference collapses to the canonical room once.
    assert_eq!(sched.space_ids, vec!["room_keep"]);
    assert_eq!(sched.space_display_names, vec!["Cashion 303"]);
}

#[tokio::test]
async fn schedule_merge_writes_primary_and_deletes_duplicate_atomically() {
    let store = Arc::new(MemoryStore::new());
    let mut a: Schedule = serde_json::from_value(schedule("sched_a", "p1")).unwrap();
    a.enrollment = 18;
    let mut b: Schedule = serde_json::from_value(schedule("sched_b", "p1")).unwrap();
    b.enrollment = 21;
    b.crn = "39316".into();
    store
        .load(
            collections::SCHEDULES,
            vec![
                serde_json::to_value(&a).unwrap(),
                serde_json::to_value(&b).unwrap(),
            ],
        )
        .await
        .unwrap();

    let engine = MergeEngine::new(store.clone(), MergeConfig::default());
    let merged = engine.merge_schedules("sched_a", "sched_b").await.unwrap();
    assert_eq!(merged.enrollment, 21);
    assert_eq!(merged.crn, "39316");
    assert_eq!(merged.identity_key, "crn:202610:39316");

    assert!(store
        .get(collections::SCHEDULES, "sched_b")
        .await
        .unwrap()
        .is_none());
}
