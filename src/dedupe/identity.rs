//! Tiered identity keys for schedule records. Keys are derived from
//! normalized fields only, so re-importing a cosmetically reformatted row
//! resolves to the same canonical document instead of inserting a duplicate.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::Result;
use super::models::{collections, from_document, IdentitySource, Schedule};
use super::normalize::{
    extract_crn, normalize_course_code, normalize_section, normalize_space_label, normalize_term,
    TermInfo,
};
use crate::store::{BatchWriter, DocumentStore, WriteOp};

/// Normalized building blocks the key tiers are assembled from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityComponents {
    pub course_code: Option<String>,
    pub term_label: Option<String>,
    pub term_code: Option<String>,
    pub section: Option<String>,
    pub crn: Option<String>,
    pub clss_id: Option<String>,
    pub meeting_pattern_key: Option<String>,
    pub room_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleIdentity {
    /// Strongest available tier, or `None` when the row carries no usable
    /// identity evidence at all.
    pub primary_key: Option<String>,
    /// All non-empty candidates, strongest first; matching uses every one
    /// so a record missing a CLSS ID can still be found by CRN.
    pub keys: Vec<String>,
    pub source: IdentitySource,
    pub components: IdentityComponents,
}

fn normalize_time(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn meeting_pattern_key(schedule: &Schedule) -> Option<String> {
    let mut encodings: Vec<String> = schedule
        .meeting_patterns
        .iter()
        .filter(|p| !p.days.trim().is_empty())
        .map(|p| {
            let mut days: Vec<char> = p.days.trim().to_ascii_uppercase().chars().collect();
            days.sort_unstable();
            format!(
                "{}@{}-{}",
                days.into_iter().collect::<String>(),
                normalize_time(&p.start_time),
                normalize_time(&p.end_time),
            )
        })
        .collect();
    if encodings.is_empty() {
        return None;
    }
    encodings.sort_unstable();
    Some(encodings.join(","))
}

fn room_key(schedule: &Schedule) -> Option<String> {
    let mut keys: Vec<String> = if schedule.space_ids.iter().any(|id| !id.is_empty()) {
        schedule
            .space_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    } else {
        schedule
            .space_display_names
            .iter()
            .filter_map(|name| normalize_space_label(name))
            .map(|space| space.space_key)
            .collect()
    };
    if keys.is_empty() {
        return None;
    }
    keys.sort_unstable();
    keys.dedup();
    Some(keys.join("+"))
}

fn term_info(schedule: &Schedule) -> Option<TermInfo> {
    normalize_term(&schedule.term_code).or_else(|| normalize_term(&schedule.term))
}

/// Derive the ordered candidate identity keys for a schedule, strongest
/// tier first. Idempotent: deriving from an already-normalized record
/// yields the same primary key.
pub fn derive_schedule_identity(schedule: &Schedule) -> ScheduleIdentity {
    let term = term_info(schedule);
    let term_code = term.as_ref().map(|t| t.code.clone());

    let course = {
        let normalized = normalize_course_code(&schedule.course_code);
        (!normalized.is_empty()).then_some(normalized)
    };
    let section = {
        let normalized = normalize_section(&schedule.section);
        (!normalized.is_empty()).then_some(normalized)
    };
    let clss_id = {
        let trimmed = schedule.clss_id.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };
    let crn = extract_crn(&schedule.crn).or_else(|| extract_crn(&schedule.section));
    let pattern_key = meeting_pattern_key(schedule);
    let space_key = room_key(schedule);

    let mut keys = Vec::new();
    let mut source = IdentitySource::Unknown;

    if let (Some(term_code), Some(clss_id)) = (&term_code, &clss_id) {
        keys.push(format!("clss:{term_code}:{clss_id}"));
        source = IdentitySource::Clss;
    }
    if let (Some(term_code), Some(crn)) = (&term_code, &crn) {
        keys.push(format!("crn:{term_code}:{crn}"));
        if source == IdentitySource::Unknown {
            source = IdentitySource::Crn;
        }
    }
    if let (Some(term_code), Some(course), Some(section)) = (&term_code, &course, &section) {
        keys.push(format!("section:{term_code}:{course}:{section}"));
        if source == IdentitySource::Unknown {
            source = IdentitySource::Section;
        }
    }
    if let (Some(course), Some(term_code), Some(pattern), Some(room)) =
        (&course, &term_code, &pattern_key, &space_key)
    {
        keys.push(format!("composite:{course}:{term_code}:{pattern}:{room}"));
        if source == IdentitySource::Unknown {
            source = IdentitySource::Composite;
            // Room moves change composite keys; a composite-only identity
            // can surface a mid-semester room change as a "new" record.
            debug!(schedule = %schedule.id, "schedule identified by composite key only");
        }
    }

    ScheduleIdentity {
        primary_key: keys.first().cloned(),
        keys,
        source,
        components: IdentityComponents {
            course_code: course,
            term_label: term.as_ref().map(|t| t.label.clone()),
            term_code,
            section,
            crn,
            clss_id,
            meeting_pattern_key: pattern_key,
            room_key: space_key,
        },
    }
}

/// Deterministic document ID for a schedule created from its primary key:
/// `clss:202610:2962` becomes `sched_clss_202610_2962`. Re-importing an
/// unchanged row is therefore a no-op and a corrected row an update.
pub fn build_schedule_doc_id(primary_key: &str) -> String {
    let sanitized: String = primary_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sched_{sanitized}")
}

/// A stored key claimed by two schedules; possible when legacy data
/// predates the identity scheme. The loser is surfaced for operator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCollision {
    pub key: String,
    pub kept_id: String,
    pub displaced_id: String,
}

pub struct ScheduleIdentityIndex {
    index: HashMap<String, Schedule>,
    pub collisions: Vec<IdentityCollision>,
}

#[derive(Debug, Clone)]
pub struct IdentityMatch {
    pub schedule: Schedule,
    pub matched_key: String,
}

/// Tier rank of a schedule's persisted identity key.
fn stored_key_rank(schedule: &Schedule) -> u8 {
    if schedule.identity_key.starts_with("clss:") {
        3
    } else if schedule.identity_key.starts_with("crn:") {
        2
    } else if !schedule.identity_key.is_empty() {
        1
    } else {
        0
    }
}

/// Deterministic collision tie-break: keep the schedule with the strongest
/// identity evidence.
fn stronger(a: &Schedule, b: &Schedule) -> Ordering {
    stored_key_rank(a)
        .cmp(&stored_key_rank(b))
        .then_with(|| a.identity_keys.len().cmp(&b.identity_keys.len()))
        .then_with(|| a.id.starts_with("sched_").cmp(&b.id.starts_with("sched_")))
        .then_with(|| b.id.cmp(&a.id))
}

impl ScheduleIdentityIndex {
    /// Map every derived-or-stored key to its owning schedule.
    pub fn build(schedules: &[Schedule]) -> Self {
        let mut index: HashMap<String, Schedule> = HashMap::new();
        let mut collisions = Vec::new();

        for schedule in schedules {
            let mut keys = derive_schedule_identity(schedule).keys;
            if !schedule.identity_key.is_empty() && !keys.contains(&schedule.identity_key) {
                keys.push(schedule.identity_key.clone());
            }
            for stored in &schedule.identity_keys {
                if !stored.is_empty() && !keys.contains(stored) {
                    keys.push(stored.clone());
                }
            }

            for key in keys {
                match index.get(&key) {
                    None => {
                        index.insert(key, schedule.clone());
                    }
                    Some(existing) if existing.id == schedule.id => {}
                    Some(existing) => {
                        let (kept, displaced) = if stronger(schedule, existing) == Ordering::Greater
                        {
                            (schedule.clone(), existing.id.clone())
                        } else {
                            (existing.clone(), schedule.id.clone())
                        };
                        collisions.push(IdentityCollision {
                            key: key.clone(),
                            kept_id: kept.id.clone(),
                            displaced_id: displaced,
                        });
                        index.insert(key, kept);
                    }
                }
            }
        }

        if !collisions.is_empty() {
            info!(count = collisions.len(), "identity index recorded key collisions");
        }
        Self { index, collisions }
    }

    pub fn get(&self, key: &str) -> Option<&Schedule> {
        self.index.get(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// First index hit across the candidate keys, preserving tier order.
pub fn resolve_schedule_identity_match(
    keys: &[String],
    index: &ScheduleIdentityIndex,
) -> Option<IdentityMatch> {
    keys.iter().find_map(|key| {
        index.get(key).map(|schedule| IdentityMatch {
            schedule: schedule.clone(),
            matched_key: key.clone(),
        })
    })
}

/// Outcome of resolving one incoming import row against the live store.
#[derive(Debug, Clone)]
pub enum ImportResolution {
    /// The row matched an existing canonical document: update it in place.
    Update {
        schedule_id: String,
        matched_key: String,
    },
    /// No match: create a new document under a deterministic ID.
    Create { doc_id: String },
}

pub fn resolve_import_row(
    identity: &ScheduleIdentity,
    index: &ScheduleIdentityIndex,
) -> ImportResolution {
    if let Some(found) = resolve_schedule_identity_match(&identity.keys, index) {
        return ImportResolution::Update {
            schedule_id: found.schedule.id,
            matched_key: found.matched_key,
        };
    }
    let doc_id = match &identity.primary_key {
        Some(key) => build_schedule_doc_id(key),
        // No identity evidence at all; fall back to a random document ID.
        None => format!("sched_{}", Uuid::new_v4().simple()),
    };
    ImportResolution::Create { doc_id }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub scanned: u64,
    pub repaired: u64,
}

/// Audit-time repair: re-derive identity keys for every stored schedule and
/// rewrite the persisted identity metadata where it is missing or stale.
pub async fn backfill_identity_keys(
    store: &dyn DocumentStore,
    page_size: usize,
) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    let mut writer = BatchWriter::new(store);
    let mut cursor: Option<String> = None;

    loop {
        let page = store
            .list_page(collections::SCHEDULES, page_size, cursor.as_deref())
            .await?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|doc| doc.id.clone());

        for doc in &page {
            let schedule: Schedule = from_document(doc)?;
            report.scanned += 1;

            let identity = derive_schedule_identity(&schedule);
            let primary = identity.primary_key.clone().unwrap_or_default();
            if schedule.identity_key == primary
                && schedule.identity_keys == identity.keys
                && schedule.identity_source == identity.source
            {
                continue;
            }

            writer
                .push(WriteOp::update(
                    collections::SCHEDULES,
                    &schedule.id,
                    serde_json::json!({
                        "identityKey": primary,
                        "identityKeys": identity.keys,
                        "identitySource": identity.source,
                    }),
                ))
                .await?;
            report.repaired += 1;
        }
    }

    writer.flush().await?;
    info!(
        scanned = report.scanned,
        repaired = report.repaired,
        "identity key backfill complete"
    );
    Ok(report)
}
