//! Import-time identity resolution: repeated imports of the same section
//! must resolve to the same document, across all key tiers, and the
//! backfill pass must repair stored metadata in place.

use roster_dedupe::dedupe::identity::{build_schedule_doc_id, ScheduleIdentityIndex};
use roster_dedupe::dedupe::models::{collections, from_document, MeetingPattern, Schedule};
use roster_dedupe::dedupe::{
    backfill_identity_keys, derive_schedule_identity, resolve_import_row, ImportResolution,
};
use roster_dedupe::store::{DocumentStore, MemoryStore};

fn section_row(crn: &str, section: &str) -> Schedule {
    Schedule {
        id: String::new(),
        course_code: "adm1300".into(),
        term: "Spring 2026".into(),
        term_code: "202610".into(),
        section: section.into(),
        crn: crn.into(),
        meeting_patterns: vec![MeetingPattern {
            days: "MWF".into(),
            start_time: "9:05".into(),
            end_time: "9:55".into(),
        }],
        space_ids: vec!["room_cashion_0303".into()],
        ..Schedule::default()
    }
}

#[test]
fn first_import_creates_under_a_deterministic_id() {
    let row = section_row("39316", "01");
    let identity = derive_schedule_identity(&row);
    let index = ScheduleIdentityIndex::build(&[]);

    match resolve_import_row(&identity, &index) {
        ImportResolution::Create { doc_id } => {
            assert_eq!(doc_id, build_schedule_doc_id("crn:202610:39316"));
            assert_eq!(doc_id, "sched_crn_202610_39316");
        }
        other => panic!("expected create, got {other:?}"),
    }
}

#[test]
fn reimport_matches_the_existing_document() {
    let mut stored = section_row("39316", "01");
    stored.id = "sched_crn_202610_39316".into();
    let identity = derive_schedule_identity(&stored);
    stored.identity_key = identity.primary_key.clone().unwrap();
    stored.identity_keys = identity.keys.clone();

    let index = ScheduleIdentityIndex::build(std::slice::from_ref(&stored));
    let incoming = derive_schedule_identity(&section_row("39316", "01"));

    match resolve_import_row(&incoming, &index) {
        ImportResolution::Update {
            schedule_id,
            matched_key,
        } => {
            assert_eq!(schedule_id, "sched_crn_202610_39316");
            assert_eq!(matched_key, "crn:202610:39316");
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn reimport_without_crn_still_matches_via_weaker_tiers() {
    // The stored document was imported with a CRN; a later feed drops it.
    let mut stored = section_row("39316", "01");
    stored.id = "sched_crn_202610_39316".into();
    let identity = derive_schedule_identity(&stored);
    stored.identity_key = identity.primary_key.clone().unwrap();
    stored.identity_keys = identity.keys.clone();
    let index = ScheduleIdentityIndex::build(std::slice::from_ref(&stored));

    let incoming = derive_schedule_identity(&section_row("", "01"));
    match resolve_import_row(&incoming, &index) {
        ImportResolution::Update {
            schedule_id,
            matched_key,
        } => {
            assert_eq!(schedule_id, "sched_crn_202610_39316");
            assert_eq!(matched_key, "section:202610:ADM 1300:01");
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn rows_with_no_identity_evidence_do_not_collide() {
    let empty = Schedule::default();
    let identity = derive_schedule_identity(&empty);
    assert!(identity.primary_key.is_none());

    let index = ScheduleIdentityIndex::build(&[]);
    let first = resolve_import_row(&identity, &index);
    let second = resolve_import_row(&identity, &index);
    match (first, second) {
        (ImportResolution::Create { doc_id: a }, ImportResolution::Create { doc_id: b }) => {
            assert_ne!(a, b, "fallback IDs must be unique");
            assert!(a.starts_with("sched_"));
        }
        other => panic!("expected two creates, got {other:?}"),
    }
}

#[tokio::test]
async fn backfill_repairs_missing_identity_metadata() {
    let store = MemoryStore::new();
    let mut stale = section_row("39316", "01");
    stale.id = "sched_legacy_1".into();
    // Stored before identity keys existed.
    stale.identity_key = String::new();
    stale.identity_keys = Vec::new();

    let mut current = section_row("47110", "02");
    current.id = "sched_crn_202610_47110".into();
    let identity = derive_schedule_identity(&current);
    current.identity_key = identity.primary_key.clone().unwrap();
    current.identity_keys = identity.keys.clone();
    current.identity_source = identity.source;

    store
        .load(
            collections::SCHEDULES,
            vec![
                serde_json::to_value(&stale).unwrap(),
                serde_json::to_value(&current).unwrap(),
            ],
        )
        .await
        .unwrap();

    let report = backfill_identity_keys(&store, 50).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.repaired, 1);

    let doc = store
        .get(collections::SCHEDULES, "sched_legacy_1")
        .await
        .unwrap()
        .unwrap();
    let repaired: Schedule = from_document(&doc).unwrap();
    assert_eq!(repaired.identity_key, "crn:202610:39316");
    assert!(repaired
        .identity_keys
        .contains(&"section:202610:ADM 1300:01".to_string()));

    // A second pass finds nothing left to do.
    let report = backfill_identity_keys(&store, 50).await.unwrap();
    assert_eq!(report.repaired, 0);
}
