use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{DedupeError, Result};
use crate::store::Document;

pub mod collections {
    pub const PEOPLE: &str = "people";
    pub const SCHEDULES: &str = "schedules";
    pub const ROOMS: &str = "rooms";
    pub const LIST_PRESETS: &str = "listPresets";
    pub const DEDUPE_DECISIONS: &str = "dedupeDecisions";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Schedule,
    Room,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Schedule => "schedule",
            EntityType::Room => "room",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" | "people" => Ok(EntityType::Person),
            "schedule" | "schedules" => Ok(EntityType::Schedule),
            "room" | "rooms" => Ok(EntityType::Room),
            _ => Err(format!("Invalid entity type: {s}")),
        }
    }
}

/// Merge lifecycle of a Person document. A non-`None` status always comes
/// with `mergedInto` set; such a record is a tombstone and never canonical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    #[default]
    None,
    InProgress,
    PendingCleanup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeeklyBlock {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Person {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub baylor_id: String,
    pub clss_instructor_id: String,
    pub external_ids: BTreeMap<String, String>,
    pub roles: Vec<String>,
    pub jobs: Vec<String>,
    pub buildings: Vec<String>,
    pub weekly_schedule: Vec<WeeklyBlock>,
    pub merged_into: Option<String>,
    pub merge_status: MergeStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Person {
    pub fn is_tombstone(&self) -> bool {
        self.merged_into.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Count of non-empty informative fields, used to elect the primary of
    /// a duplicate pair: the record that would lose the least is kept.
    pub fn completeness_score(&self) -> usize {
        let texts = [
            &self.first_name,
            &self.last_name,
            &self.display_name,
            &self.email,
            &self.phone,
            &self.baylor_id,
            &self.clss_instructor_id,
        ];
        texts.iter().filter(|v| !v.trim().is_empty()).count()
            + usize::from(!self.external_ids.is_empty())
            + usize::from(!self.roles.is_empty())
            + usize::from(!self.jobs.is_empty())
            + usize::from(!self.buildings.is_empty())
            + usize::from(!self.weekly_schedule.is_empty())
    }

    pub fn full_display_name(&self) -> String {
        if !self.display_name.trim().is_empty() {
            return self.display_name.trim().to_string();
        }
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeetingPattern {
    /// Day letters as imported, e.g. "MWF" or "TR".
    pub days: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstructorAssignment {
    pub person_id: String,
    pub is_primary: bool,
    pub percentage: f64,
}

/// Which identity tier produced a schedule's persisted primary key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Clss,
    Crn,
    Section,
    Composite,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Schedule {
    pub id: String,
    pub course_code: String,
    pub course_title: String,
    pub section: String,
    pub crn: String,
    pub clss_id: String,
    pub term: String,
    pub term_code: String,
    /// Primary instructor reference; always equals the `isPrimary`
    /// assignment's person when `instructorAssignments` is non-empty.
    pub instructor_id: String,
    /// Denormalized display name of the primary instructor.
    pub instructor_name: String,
    /// Mirror of every assignment's person reference; maintained by the
    /// importer and by merge reassignment so reference scans can use a
    /// single array-contains query.
    pub instructor_ids: Vec<String>,
    pub instructor_assignments: Vec<InstructorAssignment>,
    pub space_ids: Vec<String>,
    pub space_display_names: Vec<String>,
    pub location_type: String,
    pub meeting_patterns: Vec<MeetingPattern>,
    pub enrollment: i64,
    pub max_enrollment: i64,
    pub identity_key: String,
    pub identity_keys: Vec<String>,
    pub identity_source: IdentitySource,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Union of every instructor reference this schedule holds.
    pub fn instructor_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        if !self.instructor_id.is_empty() {
            refs.push(self.instructor_id.clone());
        }
        for id in &self.instructor_ids {
            if !id.is_empty() && !refs.contains(id) {
                refs.push(id.clone());
            }
        }
        for assignment in &self.instructor_assignments {
            if !assignment.person_id.is_empty() && !refs.contains(&assignment.person_id) {
                refs.push(assignment.person_id.clone());
            }
        }
        refs
    }

    pub fn has_room(&self) -> bool {
        self.location_type != "no_room"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Room {
    pub id: String,
    /// Canonical building-code + zero-padded-number key. Unique: two rooms
    /// must never share a `spaceKey`.
    pub space_key: String,
    pub building_code: String,
    pub space_number: String,
    pub display_name: String,
    pub capacity: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListPreset {
    pub id: String,
    pub name: String,
    pub person_ids: Vec<String>,
}

/// Operator decision persisted when a detected pair is marked "not a
/// duplicate"; consulted as a suppression list by every future pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeDecision {
    pub id: String,
    pub entity_type: EntityType,
    /// Unordered pair key: the two document IDs sorted and joined.
    pub pair_key: String,
    pub decision: String,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

/// Which detection pass produced a duplicate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateSignal {
    BaylorId,
    ClssInstructorId,
    Email,
    Phone,
    ExactName,
    FuzzyName,
    CrnTerm,
    SectionIdentity,
    CompositeIdentity,
    DisplayName,
    SpaceKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Fill-forward plus list unions (people, schedules).
    FillForward,
    /// Single-valued fill-forward only (rooms).
    KeepPrimary,
}

/// An in-memory detection finding; never persisted as a first-class entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatePair {
    pub kind: EntityType,
    pub confidence: f64,
    pub primary_id: String,
    pub secondary_id: String,
    pub signal: DuplicateSignal,
    pub reason: String,
    pub merge_strategy: MergeStrategy,
}

impl DuplicatePair {
    /// Unordered key identifying the pair regardless of member order.
    pub fn pair_key(&self) -> String {
        unordered_pair_key(&self.primary_id, &self.secondary_id)
    }
}

pub fn unordered_pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

/// Decode a stored document into a typed model, carrying the document ID.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.data.clone()).map_err(DedupeError::from)
}

/// Encode a typed model for storage.
pub fn to_value<T: Serialize>(model: &T) -> Result<serde_json::Value> {
    serde_json::to_value(model).map_err(DedupeError::from)
}
