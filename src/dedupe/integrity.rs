//! Cross-collection reference checks. The scanner is a pure function over
//! in-memory snapshots so it can run against a live export or a test
//! fixture identically; it reports problems and, where the repair is
//! unambiguous, a typed suggested fix. It never writes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::models::{Person, Room, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NoInstructor,
    UnknownInstructor,
    StaleTombstoneRef,
    UnknownSpace,
    InstructorNameDrift,
    InstructorIdsMismatch,
}

/// A repair the scanner is confident enough to propose. Anything requiring
/// judgment (which person a schedule should really point at) is reported
/// without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SuggestedFix {
    ReassignInstructor { to: String },
    UpdateInstructorName { name: String },
    RebuildInstructorIds { ids: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    pub schedule_id: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<SuggestedFix>,
}

impl IntegrityIssue {
    fn new(kind: IssueKind, schedule: &Schedule, detail: String) -> Self {
        Self {
            kind,
            schedule_id: schedule.id.clone(),
            detail,
            suggested_fix: None,
        }
    }

    fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.suggested_fix = Some(fix);
        self
    }
}

/// Follow a tombstone's `mergedInto` pointer to a live person within the
/// snapshot. Bounded by the snapshot size; a cycle or dangling pointer
/// yields no suggestion rather than a bad one.
fn canonical_target<'a>(
    people: &'a HashMap<&str, &Person>,
    start: &'a Person,
) -> Option<&'a Person> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = start;
    while let Some(next_id) = current.merged_into.as_deref().filter(|s| !s.is_empty()) {
        if !visited.insert(next_id) {
            return None;
        }
        current = people.get(next_id)?;
        if !current.is_tombstone() {
            return Some(current);
        }
    }
    None
}

/// Scan every schedule against the people and rooms snapshots.
pub fn detect_cross_collection_issues(
    people: &[Person],
    schedules: &[Schedule],
    rooms: &[Room],
) -> Vec<IntegrityIssue> {
    let people_by_id: HashMap<&str, &Person> =
        people.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut people_by_name: HashMap<String, Vec<&Person>> = HashMap::new();
    for person in people.iter().filter(|p| !p.is_tombstone()) {
        let name = person.full_display_name();
        if !name.is_empty() {
            people_by_name.entry(name).or_default().push(person);
        }
    }
    let room_ids: HashSet<&str> = rooms.iter().map(|r| r.id.as_str()).collect();

    let mut issues = Vec::new();

    for schedule in schedules {
        let refs = schedule.instructor_refs();
        if refs.is_empty() {
            issues.push(IntegrityIssue::new(
                IssueKind::NoInstructor,
                schedule,
                "schedule has no instructor reference".into(),
            ));
        }

        for person_id in refs {
            match people_by_id.get(person_id.as_str()) {
                None => {
                    let mut issue = IntegrityIssue::new(
                        IssueKind::UnknownInstructor,
                        schedule,
                        format!("references unknown person {person_id}"),
                    );
                    // A single live person carrying the schedule's exact
                    // denormalized name is an unambiguous repair target.
                    if person_id == schedule.instructor_id {
                        if let Some([only]) = people_by_name
                            .get(schedule.instructor_name.trim())
                            .map(Vec::as_slice)
                        {
                            issue = issue.with_fix(SuggestedFix::ReassignInstructor {
                                to: only.id.clone(),
                            });
                        }
                    }
                    issues.push(issue);
                }
                Some(person) if person.is_tombstone() => {
                    let mut issue = IntegrityIssue::new(
                        IssueKind::StaleTombstoneRef,
                        schedule,
                        format!("references merged-away person {person_id}"),
                    );
                    if let Some(canonical) = canonical_target(&people_by_id, person) {
                        issue = issue.with_fix(SuggestedFix::ReassignInstructor {
                            to: canonical.id.clone(),
                        });
                    }
                    issues.push(issue);
                }
                Some(person) => {
                    if person_id == schedule.instructor_id
                        && !schedule.instructor_name.trim().is_empty()
                    {
                        let expected = person.full_display_name();
                        if !expected.is_empty() && schedule.instructor_name != expected {
                            issues.push(
                                IntegrityIssue::new(
                                    IssueKind::InstructorNameDrift,
                                    schedule,
                                    format!(
                                        "instructorName {:?} does not match person record {:?}",
                                        schedule.instructor_name, expected
                                    ),
                                )
                                .with_fix(SuggestedFix::UpdateInstructorName { name: expected }),
                            );
                        }
                    }
                }
            }
        }

        if !schedule.instructor_assignments.is_empty() {
            let expected: Vec<String> = schedule
                .instructor_assignments
                .iter()
                .map(|a| a.person_id.clone())
                .collect();
            let actual: HashSet<&str> =
                schedule.instructor_ids.iter().map(String::as_str).collect();
            let wanted: HashSet<&str> = expected.iter().map(String::as_str).collect();
            if actual != wanted {
                issues.push(
                    IntegrityIssue::new(
                        IssueKind::InstructorIdsMismatch,
                        schedule,
                        "instructorIds does not mirror instructor assignments".into(),
                    )
                    .with_fix(SuggestedFix::RebuildInstructorIds { ids: expected }),
                );
            }
        }

        if schedule.has_room() {
            for space_id in &schedule.space_ids {
                if !room_ids.contains(space_id.as_str()) {
                    issues.push(IntegrityIssue::new(
                        IssueKind::UnknownSpace,
                        schedule,
                        format!("references unknown room {space_id}"),
                    ));
                }
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::models::{InstructorAssignment, MergeStatus};

    fn person(id: &str, first: &str, last: &str) -> Person {
        Person {
            id: id.into(),
            first_name: first.into(),
            last_name: last.into(),
            ..Person::default()
        }
    }

    fn schedule_for(instructor_id: &str) -> Schedule {
        Schedule {
            id: format!("sched_{instructor_id}"),
            instructor_id: instructor_id.into(),
            instructor_ids: vec![instructor_id.into()],
            instructor_assignments: vec![InstructorAssignment {
                person_id: instructor_id.into(),
                is_primary: true,
                percentage: 100.0,
            }],
            ..Schedule::default()
        }
    }

    #[test]
    fn clean_snapshot_yields_no_issues() {
        let mut schedule = schedule_for("p1");
        schedule.instructor_name = "Bob Smith".into();
        let issues =
            detect_cross_collection_issues(&[person("p1", "Bob", "Smith")], &[schedule], &[]);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn mirror_only_references_still_count_as_having_an_instructor() {
        // Legacy rows carry only the instructorIds mirror.
        let schedule = Schedule {
            id: "sched_legacy".into(),
            instructor_ids: vec!["p1".into()],
            ..Schedule::default()
        };
        let issues =
            detect_cross_collection_issues(&[person("p1", "Bob", "Smith")], &[schedule], &[]);
        assert!(
            !issues.iter().any(|i| i.kind == IssueKind::NoInstructor),
            "unexpected issues: {issues:?}"
        );
    }

    #[test]
    fn schedule_with_no_references_at_all_is_flagged() {
        let issues = detect_cross_collection_issues(&[], &[Schedule::default()], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::NoInstructor);
    }

    #[test]
    fn unknown_instructor_is_reported_without_a_fix() {
        let issues = detect_cross_collection_issues(&[], &[schedule_for("ghost")], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnknownInstructor);
        assert!(issues[0].suggested_fix.is_none());
    }

    #[test]
    fn unknown_instructor_with_a_unique_name_match_suggests_reassignment() {
        let mut schedule = schedule_for("ghost");
        schedule.instructor_name = "Bob Smith".into();
        let issues =
            detect_cross_collection_issues(&[person("p1", "Bob", "Smith")], &[schedule], &[]);
        assert_eq!(issues[0].kind, IssueKind::UnknownInstructor);
        assert_eq!(
            issues[0].suggested_fix,
            Some(SuggestedFix::ReassignInstructor { to: "p1".into() })
        );
    }

    #[test]
    fn ambiguous_name_matches_suggest_nothing() {
        let mut schedule = schedule_for("ghost");
        schedule.instructor_name = "Bob Smith".into();
        let issues = detect_cross_collection_issues(
            &[person("p1", "Bob", "Smith"), person("p2", "Bob", "Smith")],
            &[schedule],
            &[],
        );
        assert_eq!(issues[0].kind, IssueKind::UnknownInstructor);
        assert!(issues[0].suggested_fix.is_none());
    }

    #[test]
    fn tombstone_ref_suggests_the_canonical_person() {
        let mut stale = person("p_old", "Bob", "Smith");
        stale.merged_into = Some("p_new".into());
        stale.merge_status = MergeStatus::PendingCleanup;
        let canonical = person("p_new", "Robert", "Smith");

        let mut schedule = schedule_for("p_old");
        schedule.instructor_name = "Bob Smith".into();
        let issues = detect_cross_collection_issues(&[stale, canonical], &[schedule], &[]);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::StaleTombstoneRef);
        assert_eq!(
            issues[0].suggested_fix,
            Some(SuggestedFix::ReassignInstructor { to: "p_new".into() })
        );
    }

    #[test]
    fn tombstone_cycle_yields_no_suggestion() {
        let mut a = person("p_a", "A", "One");
        a.merged_into = Some("p_b".into());
        let mut b = person("p_b", "B", "Two");
        b.merged_into = Some("p_a".into());

        let issues = detect_cross_collection_issues(&[a, b], &[schedule_for("p_a")], &[]);
        assert_eq!(issues[0].kind, IssueKind::StaleTombstoneRef);
        assert!(issues[0].suggested_fix.is_none());
    }

    #[test]
    fn name_drift_suggests_the_person_record_name() {
        let mut schedule = schedule_for("p1");
        schedule.instructor_name = "Smith, Bob".into();
        let issues =
            detect_cross_collection_issues(&[person("p1", "Bob", "Smith")], &[schedule], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::InstructorNameDrift);
        assert_eq!(
            issues[0].suggested_fix,
            Some(SuggestedFix::UpdateInstructorName {
                name: "Bob Smith".into()
            })
        );
    }

    #[test]
    fn mirror_mismatch_suggests_rebuild() {
        let mut schedule = schedule_for("p1");
        schedule.instructor_ids = vec!["p1".into(), "p2".into()];
        schedule.instructor_name = "Bob Smith".into();
        let issues =
            detect_cross_collection_issues(&[person("p1", "Bob", "Smith")], &[schedule], &[]);

        // p2 is both an unknown reference and a mirror violation.
        assert!(issues
            .iter()
            .any(|i| i.kind == IssueKind::UnknownInstructor));
        let mismatch = issues
            .iter()
            .find(|i| i.kind == IssueKind::InstructorIdsMismatch)
            .unwrap();
        assert_eq!(
            mismatch.suggested_fix,
            Some(SuggestedFix::RebuildInstructorIds {
                ids: vec!["p1".into()]
            })
        );
    }

    #[test]
    fn room_refs_only_checked_for_scheduled_locations() {
        let mut with_room = schedule_for("p1");
        with_room.instructor_name = "Bob Smith".into();
        with_room.location_type = "scheduled".into();
        with_room.space_ids = vec!["room_missing".into()];

        let mut no_room = with_room.clone();
        no_room.id = "sched_online".into();
        no_room.location_type = "no_room".into();

        let issues = detect_cross_collection_issues(
            &[person("p1", "Bob", "Smith")],
            &[with_room, no_room],
            &[],
        );
        let space_issues: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::UnknownSpace)
            .collect();
        assert_eq!(space_issues.len(), 1);
        assert_eq!(space_issues[0].schedule_id, "sched_p1");
    }
}
