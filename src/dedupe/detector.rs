//! Tiered duplicate detection over normalized entities. Each signal pass
//! keeps its own map from a normalized signal value to the best-seen record
//! and emits a pair the moment a second record shares that signal. Malformed
//! or missing fields are never errors; they are simply no signal.

use std::collections::HashMap;

use strsim::normalized_levenshtein;
use tracing::debug;

use super::identity::derive_schedule_identity;
use super::models::{
    DuplicatePair, DuplicateSignal, EntityType, MergeStrategy, Person, Room, Schedule,
};
use super::normalize::{
    canonical_first_name, normalize_digits, normalize_email, normalize_person_name,
    normalize_phone, normalize_space_label,
};
use super::suppression::SuppressionSet;
use crate::config::DetectionConfig;

/// Deduplicates findings by unordered pair key, keeping only the
/// highest-confidence signal for any two records.
struct PairCollector {
    best: HashMap<String, DuplicatePair>,
}

impl PairCollector {
    fn new() -> Self {
        Self {
            best: HashMap::new(),
        }
    }

    fn consider(&mut self, pair: DuplicatePair) {
        let key = pair.pair_key();
        match self.best.get(&key) {
            Some(existing) if existing.confidence >= pair.confidence => {}
            _ => {
                self.best.insert(key, pair);
            }
        }
    }

    fn finish(self, kind: EntityType, suppressions: &SuppressionSet) -> Vec<DuplicatePair> {
        let mut pairs: Vec<DuplicatePair> = self
            .best
            .into_values()
            .filter(|pair| !suppressions.contains(kind, &pair.primary_id, &pair.secondary_id))
            .collect();
        pairs.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pair_key().cmp(&b.pair_key()))
        });
        pairs
    }
}

/// Elect primary/secondary for a pair: the more complete record wins, a
/// more recent update breaks ties, and the smaller ID settles the rest so
/// detection output is independent of input order.
fn order_people<'a>(a: &'a Person, b: &'a Person) -> (&'a Person, &'a Person) {
    let rank = |p: &Person| (p.completeness_score(), p.updated_at);
    match rank(a).cmp(&rank(b)) {
        std::cmp::Ordering::Greater => (a, b),
        std::cmp::Ordering::Less => (b, a),
        std::cmp::Ordering::Equal => {
            if a.id <= b.id {
                (a, b)
            } else {
                (b, a)
            }
        }
    }
}

fn person_pair(
    a: &Person,
    b: &Person,
    confidence: f64,
    signal: DuplicateSignal,
    reason: String,
) -> DuplicatePair {
    let (primary, secondary) = order_people(a, b);
    DuplicatePair {
        kind: EntityType::Person,
        confidence,
        primary_id: primary.id.clone(),
        secondary_id: secondary.id.clone(),
        signal,
        reason,
        merge_strategy: MergeStrategy::FillForward,
    }
}

/// One exact-signal pass: map normalized value to the best-seen person and
/// flag every later holder of the same value.
fn exact_person_pass<F>(
    people: &[&Person],
    collector: &mut PairCollector,
    confidence: f64,
    signal: DuplicateSignal,
    label: &str,
    extract: F,
) where
    F: Fn(&Person) -> Option<String>,
{
    let mut seen: HashMap<String, &Person> = HashMap::new();
    for person in people {
        let Some(value) = extract(person) else {
            continue;
        };
        match seen.get(&value) {
            Some(existing) => {
                collector.consider(person_pair(
                    existing,
                    person,
                    confidence,
                    signal,
                    format!("{label} match: {value}"),
                ));
                if person.completeness_score() > existing.completeness_score() {
                    seen.insert(value, person);
                }
            }
            None => {
                seen.insert(value, person);
            }
        }
    }
}

/// Combined first/last fuzzy score. Last names are the stronger signal: a
/// last-name similarity under the floor zeroes the whole score so a lucky
/// first-name match cannot carry a pair.
fn fuzzy_name_score(a: &Person, b: &Person, config: &DetectionConfig) -> Option<f64> {
    let last_a = normalize_person_name(&a.last_name);
    let last_b = normalize_person_name(&b.last_name);
    if last_a.is_empty() || last_b.is_empty() {
        return None;
    }
    let last_sim = normalized_levenshtein(&last_a, &last_b);
    if last_sim < config.last_name_floor {
        return None;
    }

    let first_a = normalize_person_name(&a.first_name);
    let first_b = normalize_person_name(&b.first_name);
    if first_a.is_empty() || first_b.is_empty() {
        return None;
    }
    let first_sim = if first_a == first_b {
        1.0
    } else if canonical_first_name(&first_a) == canonical_first_name(&first_b) {
        config.nickname_first_name_score
    } else {
        normalized_levenshtein(&first_a, &first_b)
    };

    Some(0.6 * last_sim + 0.4 * first_sim)
}

/// Run the five people signal passes (Baylor ID, CLSS instructor ID, email,
/// phone, name) and return confidence-scored pairs, suppressed pairs
/// removed.
pub fn detect_people_duplicates(
    people: &[Person],
    suppressions: &SuppressionSet,
    config: &DetectionConfig,
) -> Vec<DuplicatePair> {
    // Tombstones are never canonical; they never participate in detection.
    let live: Vec<&Person> = people.iter().filter(|p| !p.is_tombstone()).collect();
    let mut collector = PairCollector::new();

    exact_person_pass(
        &live,
        &mut collector,
        1.0,
        DuplicateSignal::BaylorId,
        "Baylor ID",
        |p| {
            let digits = normalize_digits(&p.baylor_id);
            (digits.len() >= config.baylor_id_min_digits).then_some(digits)
        },
    );
    exact_person_pass(
        &live,
        &mut collector,
        1.0,
        DuplicateSignal::ClssInstructorId,
        "CLSS instructor ID",
        |p| {
            let trimmed = p.clss_instructor_id.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        },
    );
    exact_person_pass(
        &live,
        &mut collector,
        1.0,
        DuplicateSignal::Email,
        "email",
        |p| {
            let email = normalize_email(&p.email);
            (!email.is_empty()).then_some(email)
        },
    );
    exact_person_pass(
        &live,
        &mut collector,
        0.9,
        DuplicateSignal::Phone,
        "phone",
        |p| {
            let digits = normalize_phone(&p.phone);
            (digits.len() >= config.phone_min_digits).then_some(digits)
        },
    );
    exact_person_pass(
        &live,
        &mut collector,
        1.0,
        DuplicateSignal::ExactName,
        "name",
        |p| {
            let first = normalize_person_name(&p.first_name);
            let last = normalize_person_name(&p.last_name);
            (!first.is_empty() && !last.is_empty()).then(|| format!("{first} {last}"))
        },
    );

    // Fuzzy name pass: pairwise over the bounded person set. Records whose
    // normalized names are identical were already flagged above.
    for (i, a) in live.iter().enumerate() {
        for b in live.iter().skip(i + 1) {
            let full = |p: &Person| {
                format!(
                    "{} {}",
                    normalize_person_name(&p.first_name),
                    normalize_person_name(&p.last_name)
                )
            };
            if full(a) == full(b) {
                continue;
            }
            if let Some(score) = fuzzy_name_score(a, b, config) {
                if score >= config.fuzzy_name_threshold {
                    collector.consider(person_pair(
                        a,
                        b,
                        score,
                        DuplicateSignal::FuzzyName,
                        format!(
                            "similar names: {} {} ~ {} {}",
                            a.first_name, a.last_name, b.first_name, b.last_name
                        ),
                    ));
                }
            }
        }
    }

    let pairs = collector.finish(EntityType::Person, suppressions);
    debug!(candidates = live.len(), pairs = pairs.len(), "people duplicate scan complete");
    pairs
}

fn order_schedules<'a>(a: &'a Schedule, b: &'a Schedule) -> (&'a Schedule, &'a Schedule) {
    let rank = |s: &Schedule| (s.identity_keys.len(), s.updated_at);
    match rank(a).cmp(&rank(b)) {
        std::cmp::Ordering::Greater => (a, b),
        std::cmp::Ordering::Less => (b, a),
        std::cmp::Ordering::Equal => {
            if a.id <= b.id {
                (a, b)
            } else {
                (b, a)
            }
        }
    }
}

fn schedule_pair(
    a: &Schedule,
    b: &Schedule,
    confidence: f64,
    signal: DuplicateSignal,
    reason: String,
) -> DuplicatePair {
    let (primary, secondary) = order_schedules(a, b);
    DuplicatePair {
        kind: EntityType::Schedule,
        confidence,
        primary_id: primary.id.clone(),
        secondary_id: secondary.id.clone(),
        signal,
        reason,
        merge_strategy: MergeStrategy::FillForward,
    }
}

/// Schedule duplicate passes: CRN+term (1.0), section identity ignoring
/// instructor (1.0), and composite course+term+pattern+room (0.9, catches
/// section-number typos). The passes reuse the derived identity key tiers.
pub fn detect_schedule_duplicates(
    schedules: &[Schedule],
    suppressions: &SuppressionSet,
) -> Vec<DuplicatePair> {
    let mut collector = PairCollector::new();
    let identities: Vec<_> = schedules
        .iter()
        .map(|s| (s, derive_schedule_identity(s)))
        .collect();

    let passes: &[(&str, f64, DuplicateSignal, &str)] = &[
        ("crn:", 1.0, DuplicateSignal::CrnTerm, "same CRN and term"),
        (
            "section:",
            1.0,
            DuplicateSignal::SectionIdentity,
            "same course, section, and term",
        ),
        (
            "composite:",
            0.9,
            DuplicateSignal::CompositeIdentity,
            "same course, term, meeting pattern, and room",
        ),
    ];

    for (prefix, confidence, signal, label) in passes {
        let mut seen: HashMap<&str, &Schedule> = HashMap::new();
        for (schedule, identity) in &identities {
            let Some(key) = identity.keys.iter().find(|k| k.starts_with(prefix)) else {
                continue;
            };
            match seen.get(key.as_str()) {
                Some(existing) if existing.id != schedule.id => {
                    collector.consider(schedule_pair(
                        existing,
                        schedule,
                        *confidence,
                        *signal,
                        format!("{label}: {key}"),
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(key, schedule);
                }
            }
        }
    }

    let pairs = collector.finish(EntityType::Schedule, suppressions);
    debug!(candidates = schedules.len(), pairs = pairs.len(), "schedule duplicate scan complete");
    pairs
}

fn order_rooms<'a>(a: &'a Room, b: &'a Room) -> (&'a Room, &'a Room) {
    let completeness = |r: &Room| {
        usize::from(!r.display_name.trim().is_empty())
            + usize::from(!r.space_key.trim().is_empty())
            + usize::from(r.capacity > 0)
    };
    let rank = |r: &Room| (completeness(r), r.updated_at);
    match rank(a).cmp(&rank(b)) {
        std::cmp::Ordering::Greater => (a, b),
        std::cmp::Ordering::Less => (b, a),
        std::cmp::Ordering::Equal => {
            if a.id <= b.id {
                (a, b)
            } else {
                (b, a)
            }
        }
    }
}

fn room_space_key(room: &Room) -> Option<String> {
    if !room.space_key.trim().is_empty() {
        return Some(room.space_key.trim().to_ascii_uppercase());
    }
    normalize_space_label(&room.display_name).map(|space| space.space_key)
}

/// Room duplicate passes: exact display name (1.0) and same
/// building + room number (0.95).
pub fn detect_room_duplicates(
    rooms: &[Room],
    suppressions: &SuppressionSet,
) -> Vec<DuplicatePair> {
    let mut collector = PairCollector::new();

    let passes: &[(f64, DuplicateSignal, &str, fn(&Room) -> Option<String>)] = &[
        (1.0, DuplicateSignal::DisplayName, "same display name", |r| {
            let name = r.display_name.trim().to_ascii_lowercase();
            (!name.is_empty()).then_some(name)
        }),
        (0.95, DuplicateSignal::SpaceKey, "same building and room number", room_space_key),
    ];

    for (confidence, signal, label, extract) in passes {
        let mut seen: HashMap<String, &Room> = HashMap::new();
        for room in rooms {
            let Some(value) = extract(room) else {
                continue;
            };
            match seen.get(&value) {
                Some(existing) if existing.id != room.id => {
                    let (primary, secondary) = order_rooms(existing, room);
                    collector.consider(DuplicatePair {
                        kind: EntityType::Room,
                        confidence: *confidence,
                        primary_id: primary.id.clone(),
                        secondary_id: secondary.id.clone(),
                        signal: *signal,
                        reason: format!("{label}: {value}"),
                        merge_strategy: MergeStrategy::KeepPrimary,
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(value, room);
                }
            }
        }
    }

    collector.finish(EntityType::Room, suppressions)
}
