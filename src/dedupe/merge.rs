//! Canonical-record merging. The pure functions compute a merged record
//! from two inputs; `MergeEngine` orchestrates the non-atomic, multi-step
//! store protocol around them. The store has no transaction spanning the
//! person write, every referencing schedule write, and every preset write,
//! so the protocol is built to be resumed, never rolled back: partial
//! completion must not re-introduce a duplicate that other documents
//! already point away from.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use super::error::{DedupeError, Result};
use super::identity::derive_schedule_identity;
use super::models::{
    collections, from_document, to_value, InstructorAssignment, ListPreset, MergeStatus, Person,
    Room, Schedule,
};
use super::normalize::{normalize_digits, normalize_email, normalize_phone};
use crate::config::MergeConfig;
use crate::store::{BatchWriter, DocumentStore, FieldFilter, WriteOp};

/// Explicit operator overrides: field name to chosen value. Overrides win
/// over the fill-forward rule.
#[derive(Debug, Clone, Default)]
pub struct FieldChoices(BTreeMap<String, Value>);

impl FieldChoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choose(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

type TextGet = for<'a> fn(&'a Person) -> &'a str;
type TextSet = fn(&mut Person, String);

/// The fill-forward rule runs over this accessor table rather than
/// reflecting over dynamic keys.
const PERSON_TEXT_FIELDS: &[(&str, TextGet, TextSet)] = &[
    ("firstName", |p| &p.first_name, |p, v| p.first_name = v),
    ("lastName", |p| &p.last_name, |p, v| p.last_name = v),
    ("displayName", |p| &p.display_name, |p, v| p.display_name = v),
    ("email", |p| &p.email, |p, v| p.email = v),
    ("phone", |p| &p.phone, |p, v| p.phone = v),
    ("baylorId", |p| &p.baylor_id, |p, v| p.baylor_id = v),
    (
        "clssInstructorId",
        |p| &p.clss_instructor_id,
        |p, v| p.clss_instructor_id = v,
    ),
];

fn union_into<T: PartialEq + Clone>(target: &mut Vec<T>, source: &[T]) {
    for item in source {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Pure people merge: fill forward empty fields from the secondary, union
/// the list-valued fields, apply explicit choices, and return a fully
/// re-standardized record. Knows nothing about the store.
pub fn merge_people_data(primary: &Person, secondary: &Person, choices: &FieldChoices) -> Person {
    let mut merged = primary.clone();

    for (name, get, set) in PERSON_TEXT_FIELDS {
        if let Some(chosen) = choices.text(name) {
            set(&mut merged, chosen.to_string());
        } else if get(&merged).trim().is_empty() && !get(secondary).trim().is_empty() {
            set(&mut merged, get(secondary).to_string());
        }
    }

    union_into(&mut merged.roles, &secondary.roles);
    union_into(&mut merged.jobs, &secondary.jobs);
    union_into(&mut merged.buildings, &secondary.buildings);
    union_into(&mut merged.weekly_schedule, &secondary.weekly_schedule);
    for (key, value) in &secondary.external_ids {
        merged
            .external_ids
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    // Re-standardize so the canonical record is as clean as a fresh import.
    merged.email = normalize_email(&merged.email);
    merged.phone = normalize_phone(&merged.phone);
    merged.baylor_id = normalize_digits(&merged.baylor_id);
    if merged.display_name.trim().is_empty() {
        merged.display_name = merged.full_display_name();
    }

    merged.merged_into = None;
    merged.merge_status = MergeStatus::None;
    merged.created_at = match (primary.created_at, secondary.created_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    merged.updated_at = Some(Utc::now());
    merged
}

fn fill_text(target: &mut String, source: &str) {
    if target.trim().is_empty() && !source.trim().is_empty() {
        *target = source.to_string();
    }
}

/// Pure room merge: single-valued fill-forward only, nothing unioned.
pub fn merge_room_data(primary: &Room, secondary: &Room) -> Room {
    let mut merged = primary.clone();
    fill_text(&mut merged.space_key, &secondary.space_key);
    fill_text(&mut merged.building_code, &secondary.building_code);
    fill_text(&mut merged.space_number, &secondary.space_number);
    fill_text(&mut merged.display_name, &secondary.display_name);
    if merged.capacity <= 0 {
        merged.capacity = secondary.capacity;
    }
    merged.updated_at = Some(Utc::now());
    merged
}

/// Collapse duplicate assignments by person reference, OR-ing the primary
/// flag and keeping the larger percentage.
fn dedup_assignments(assignments: Vec<InstructorAssignment>) -> Vec<InstructorAssignment> {
    let mut out: Vec<InstructorAssignment> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        if assignment.person_id.is_empty() {
            continue;
        }
        match out.iter_mut().find(|a| a.person_id == assignment.person_id) {
            Some(existing) => {
                existing.is_primary |= assignment.is_primary;
                existing.percentage = existing.percentage.max(assignment.percentage);
            }
            None => out.push(assignment),
        }
    }
    out
}

/// Restore the schedule instructor invariant: exactly one primary
/// assignment when the list is non-empty, with `instructorId` equal to that
/// assignment's person and `instructorIds` mirroring the full list.
fn repair_instructor_invariant(schedule: &mut Schedule) {
    if schedule.instructor_assignments.is_empty() {
        return;
    }

    let preferred = schedule.instructor_id.clone();
    let primary_idx = schedule
        .instructor_assignments
        .iter()
        .position(|a| a.is_primary && a.person_id == preferred)
        .or_else(|| {
            schedule
                .instructor_assignments
                .iter()
                .position(|a| a.is_primary)
        })
        .unwrap_or(0);

    for (idx, assignment) in schedule.instructor_assignments.iter_mut().enumerate() {
        assignment.is_primary = idx == primary_idx;
    }
    schedule.instructor_id = schedule.instructor_assignments[primary_idx].person_id.clone();
    schedule.instructor_ids = schedule
        .instructor_assignments
        .iter()
        .map(|a| a.person_id.clone())
        .collect();
}

/// Pure schedule merge: fill forward scalars, max the enrollment counters,
/// union meeting patterns and instructor assignments, then re-derive the
/// identity metadata for the merged record.
pub fn merge_schedule_data(primary: &Schedule, secondary: &Schedule) -> Schedule {
    let mut merged = primary.clone();

    fill_text(&mut merged.course_code, &secondary.course_code);
    fill_text(&mut merged.course_title, &secondary.course_title);
    fill_text(&mut merged.section, &secondary.section);
    fill_text(&mut merged.crn, &secondary.crn);
    fill_text(&mut merged.clss_id, &secondary.clss_id);
    fill_text(&mut merged.term, &secondary.term);
    fill_text(&mut merged.term_code, &secondary.term_code);
    fill_text(&mut merged.instructor_id, &secondary.instructor_id);
    fill_text(&mut merged.instructor_name, &secondary.instructor_name);
    fill_text(&mut merged.location_type, &secondary.location_type);
    merged.enrollment = merged.enrollment.max(secondary.enrollment);
    merged.max_enrollment = merged.max_enrollment.max(secondary.max_enrollment);

    union_into(&mut merged.meeting_patterns, &secondary.meeting_patterns);

    let mut assignments = merged.instructor_assignments.clone();
    assignments.extend(secondary.instructor_assignments.iter().cloned());
    merged.instructor_assignments = dedup_assignments(assignments);
    union_into(&mut merged.instructor_ids, &secondary.instructor_ids);
    repair_instructor_invariant(&mut merged);

    for (idx, space_id) in secondary.space_ids.iter().enumerate() {
        if !merged.space_ids.contains(space_id) {
            merged.space_ids.push(space_id.clone());
            merged.space_display_names.push(
                secondary
                    .space_display_names
                    .get(idx)
                    .cloned()
                    .unwrap_or_default(),
            );
        }
    }

    let identity = derive_schedule_identity(&merged);
    merged.identity_key = identity.primary_key.unwrap_or_default();
    merged.identity_keys = identity.keys;
    merged.identity_source = identity.source;
    merged.updated_at = Some(Utc::now());
    merged
}

/// Replace one instructor reference with the canonical person across every
/// reference a schedule holds, recomputing the denormalized display name.
fn rewrite_schedule_instructor(schedule: &mut Schedule, from: &str, to: &Person) {
    if schedule.instructor_id == from {
        schedule.instructor_id = to.id.clone();
    }
    for id in &mut schedule.instructor_ids {
        if id == from {
            *id = to.id.clone();
        }
    }
    let mut deduped = Vec::new();
    for id in schedule.instructor_ids.drain(..) {
        if !deduped.contains(&id) {
            deduped.push(id);
        }
    }
    schedule.instructor_ids = deduped;

    for assignment in &mut schedule.instructor_assignments {
        if assignment.person_id == from {
            assignment.person_id = to.id.clone();
        }
    }
    schedule.instructor_assignments =
        dedup_assignments(std::mem::take(&mut schedule.instructor_assignments));
    repair_instructor_invariant(schedule);

    if schedule.instructor_id == to.id {
        schedule.instructor_name = to.full_display_name();
    }
    schedule.updated_at = Some(Utc::now());
}

fn rewrite_schedule_space(schedule: &mut Schedule, from: &str, to: &Room) {
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for (idx, space_id) in schedule.space_ids.iter().enumerate() {
        let (id, name) = if space_id == from {
            (to.id.clone(), to.display_name.clone())
        } else {
            (
                space_id.clone(),
                schedule
                    .space_display_names
                    .get(idx)
                    .cloned()
                    .unwrap_or_default(),
            )
        };
        if !ids.contains(&id) {
            ids.push(id);
            names.push(name);
        }
    }
    schedule.space_ids = ids;
    schedule.space_display_names = names;
    schedule.updated_at = Some(Utc::now());
}

/// Stateful merge orchestration over the document store.
pub struct MergeEngine {
    store: Arc<dyn DocumentStore>,
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn DocumentStore>, config: MergeConfig) -> Self {
        Self { store, config }
    }

    async fn load_person(&self, id: &str) -> Result<Person> {
        let doc = self
            .store
            .get(collections::PEOPLE, id)
            .await?
            .ok_or_else(|| DedupeError::NotFound {
                collection: collections::PEOPLE.into(),
                id: id.into(),
            })?;
        from_document(&doc)
    }

    /// Follow a `mergedInto` chain to the canonical person. Bounded with a
    /// visited set: a revisit or an over-long chain indicates corrupted
    /// prior merges and fails fast rather than looping.
    pub async fn resolve_canonical_person(&self, id: &str) -> Result<Person> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = id.to_string();

        for _ in 0..=self.config.max_chain_hops {
            if !visited.insert(current.clone()) {
                return Err(DedupeError::CorruptMergeChain {
                    start: id.into(),
                    detail: format!("mergedInto cycle revisits {current}"),
                });
            }
            let person = self.load_person(&current).await?;
            match person.merged_into.as_deref() {
                None | Some("") => return Ok(person),
                Some(next) => current = next.to_string(),
            }
        }

        Err(DedupeError::CorruptMergeChain {
            start: id.into(),
            detail: format!("chain exceeds {} hops", self.config.max_chain_hops),
        })
    }

    /// Merge a duplicate person into a canonical one. See the module docs
    /// for the protocol; the single batch writing the merged primary and
    /// the secondary tombstone is the commit point. Re-running the same
    /// call after a partial failure resumes reference reassignment.
    pub async fn merge_people(
        &self,
        primary_id: &str,
        duplicate_id: &str,
        choices: &FieldChoices,
    ) -> Result<Person> {
        if primary_id == duplicate_id {
            return Err(DedupeError::Validation(format!(
                "cannot merge {primary_id} into itself"
            )));
        }

        let primary = self.resolve_canonical_person(primary_id).await?;
        if primary.id == duplicate_id {
            return Err(DedupeError::Validation(format!(
                "primary {primary_id} resolves to the duplicate {duplicate_id}"
            )));
        }
        let secondary = self.load_person(duplicate_id).await?;

        let merged = if secondary.is_tombstone() {
            if secondary.merged_into.as_deref() != Some(primary.id.as_str()) {
                return Err(DedupeError::Validation(format!(
                    "{duplicate_id} is already merged into {}",
                    secondary.merged_into.as_deref().unwrap_or_default()
                )));
            }
            info!(
                primary = %primary.id,
                secondary = %secondary.id,
                "resuming interrupted merge past its commit point"
            );
            primary.clone()
        } else {
            let mut merged = merge_people_data(&primary, &secondary, choices);
            merged.id = primary.id.clone();

            // Commit point: once this batch lands the secondary is no
            // longer canonical regardless of what happens next.
            self.store
                .apply(vec![
                    WriteOp::set(collections::PEOPLE, &merged.id, to_value(&merged)?),
                    WriteOp::update(
                        collections::PEOPLE,
                        &secondary.id,
                        serde_json::json!({
                            "mergedInto": merged.id,
                            "mergeStatus": MergeStatus::InProgress,
                        }),
                    ),
                ])
                .await?;
            merged
        };

        if let Err(err) = self.reassign_schedule_instructors(&secondary.id, &merged).await {
            return self
                .fail_pending_cleanup("schedule reassignment", &secondary.id, err)
                .await;
        }
        if let Err(err) = self.reassign_list_presets(&secondary.id, &merged.id).await {
            return self
                .fail_pending_cleanup("preset reassignment", &secondary.id, err)
                .await;
        }

        // Only a verified zero-reference secondary is hard-deleted; anything
        // else stays behind as a tombstone for a follow-up sweep.
        let remaining = self.count_schedule_refs(&secondary.id).await?;
        if remaining == 0 {
            self.store
                .apply(vec![WriteOp::delete(collections::PEOPLE, &secondary.id)])
                .await?;
            info!(primary = %merged.id, secondary = %secondary.id, "merge complete, secondary deleted");
        } else {
            self.store
                .apply(vec![WriteOp::update(
                    collections::PEOPLE,
                    &secondary.id,
                    serde_json::json!({ "mergeStatus": MergeStatus::PendingCleanup }),
                )])
                .await?;
            warn!(
                secondary = %secondary.id,
                remaining,
                "schedule references remain after reassignment, secondary left pending cleanup"
            );
        }

        Ok(merged)
    }

    /// Durably mark the secondary so a failed merge is distinguishable from
    /// a fresh one, then re-raise the original error.
    async fn fail_pending_cleanup(
        &self,
        stage: &str,
        secondary_id: &str,
        err: DedupeError,
    ) -> Result<Person> {
        if let Err(mark_err) = self
            .store
            .apply(vec![WriteOp::update(
                collections::PEOPLE,
                secondary_id,
                serde_json::json!({ "mergeStatus": MergeStatus::PendingCleanup }),
            )])
            .await
        {
            error!(
                secondary = %secondary_id,
                error = %mark_err,
                "failed to mark secondary pending_cleanup"
            );
        }
        Err(DedupeError::PartialMerge {
            stage: stage.into(),
            secondary_id: secondary_id.into(),
            source: Box::new(err),
        })
    }

    /// Repoint every schedule referencing the secondary, in bounded pages.
    /// Each page is flushed before re-querying so the scan converges.
    async fn reassign_schedule_instructors(&self, from: &str, to: &Person) -> Result<u64> {
        let mut total = 0u64;
        let filters = [
            FieldFilter::eq("instructorId", from),
            FieldFilter::array_contains("instructorIds", from),
        ];

        for filter in &filters {
            loop {
                let page = self
                    .store
                    .query_page(collections::SCHEDULES, filter, self.config.page_size, None)
                    .await?;
                if page.is_empty() {
                    break;
                }
                let mut writer = BatchWriter::new(self.store.as_ref());
                for doc in &page {
                    let mut schedule: Schedule = from_document(doc)?;
                    rewrite_schedule_instructor(&mut schedule, from, to);
                    writer
                        .push(WriteOp::set(
                            collections::SCHEDULES,
                            &schedule.id,
                            to_value(&schedule)?,
                        ))
                        .await?;
                    total += 1;
                }
                writer.flush().await?;
            }
        }

        info!(from, to = %to.id, total, "reassigned schedule instructor references");
        Ok(total)
    }

    async fn reassign_list_presets(&self, from: &str, to: &str) -> Result<u64> {
        let mut total = 0u64;
        let filter = FieldFilter::array_contains("personIds", from);

        loop {
            let page = self
                .store
                .query_page(collections::LIST_PRESETS, &filter, self.config.page_size, None)
                .await?;
            if page.is_empty() {
                break;
            }
            let mut writer = BatchWriter::new(self.store.as_ref());
            for doc in &page {
                let mut preset: ListPreset = from_document(doc)?;
                let mut ids = Vec::with_capacity(preset.person_ids.len());
                for id in preset.person_ids.drain(..) {
                    let id = if id == from { to.to_string() } else { id };
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                preset.person_ids = ids;
                writer
                    .push(WriteOp::set(
                        collections::LIST_PRESETS,
                        &preset.id,
                        to_value(&preset)?,
                    ))
                    .await?;
                total += 1;
            }
            writer.flush().await?;
        }

        Ok(total)
    }

    async fn count_schedule_refs(&self, person_id: &str) -> Result<usize> {
        let mut ids: HashSet<String> = HashSet::new();
        for filter in [
            FieldFilter::eq("instructorId", person_id),
            FieldFilter::array_contains("instructorIds", person_id),
        ] {
            for doc in self.store.query(collections::SCHEDULES, &filter).await? {
                ids.insert(doc.id);
            }
        }
        Ok(ids.len())
    }

    async fn load_room(&self, id: &str) -> Result<Room> {
        let doc = self
            .store
            .get(collections::ROOMS, id)
            .await?
            .ok_or_else(|| DedupeError::NotFound {
                collection: collections::ROOMS.into(),
                id: id.into(),
            })?;
        from_document(&doc)
    }

    /// Merge a duplicate room: fill forward, rewrite every schedule's space
    /// reference arrays, then delete the secondary.
    pub async fn merge_rooms(&self, primary_id: &str, duplicate_id: &str) -> Result<Room> {
        if primary_id == duplicate_id {
            return Err(DedupeError::Validation(format!(
                "cannot merge {primary_id} into itself"
            )));
        }
        let primary = self.load_room(primary_id).await?;
        let secondary = self.load_room(duplicate_id).await?;
        let merged = merge_room_data(&primary, &secondary);

        self.store
            .apply(vec![WriteOp::set(
                collections::ROOMS,
                &merged.id,
                to_value(&merged)?,
            )])
            .await?;

        let filter = FieldFilter::array_contains("spaceIds", duplicate_id);
        loop {
            let page = self
                .store
                .query_page(collections::SCHEDULES, &filter, self.config.page_size, None)
                .await?;
            if page.is_empty() {
                break;
            }
            let mut writer = BatchWriter::new(self.store.as_ref());
            for doc in &page {
                let mut schedule: Schedule = from_document(doc)?;
                rewrite_schedule_space(&mut schedule, duplicate_id, &merged);
                writer
                    .push(WriteOp::set(
                        collections::SCHEDULES,
                        &schedule.id,
                        to_value(&schedule)?,
                    ))
                    .await?;
            }
            writer.flush().await?;
        }

        self.store
            .apply(vec![WriteOp::delete(collections::ROOMS, duplicate_id)])
            .await?;
        info!(primary = %merged.id, secondary = duplicate_id, "room merge complete");
        Ok(merged)
    }

    async fn load_schedule(&self, id: &str) -> Result<Schedule> {
        let doc = self
            .store
            .get(collections::SCHEDULES, id)
            .await?
            .ok_or_else(|| DedupeError::NotFound {
                collection: collections::SCHEDULES.into(),
                id: id.into(),
            })?;
        from_document(&doc)
    }

    /// Merge two schedule rows for the same section. No other collection
    /// references schedules, so write-then-delete in one batch suffices.
    pub async fn merge_schedules(&self, primary_id: &str, duplicate_id: &str) -> Result<Schedule> {
        if primary_id == duplicate_id {
            return Err(DedupeError::Validation(format!(
                "cannot merge {primary_id} into itself"
            )));
        }
        let primary = self.load_schedule(primary_id).await?;
        let secondary = self.load_schedule(duplicate_id).await?;
        let merged = merge_schedule_data(&primary, &secondary);

        self.store
            .apply(vec![
                WriteOp::set(collections::SCHEDULES, &merged.id, to_value(&merged)?),
                WriteOp::delete(collections::SCHEDULES, duplicate_id),
            ])
            .await?;
        info!(primary = %merged.id, secondary = duplicate_id, "schedule merge complete");
        Ok(merged)
    }
}
