//! Enrollment and completion integration tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use npsp_core::allocator::enrollment_request;
use npsp_core::models::{Site, StageStatus};
use npsp_core::{ErrorKind, NpspCore};
use proptest::prelude::*;
use serde_json::json;

fn ids(subjects: &[npsp_core::Subject]) -> Vec<&str> {
    subjects.iter().map(|s| s.subject_id.as_str()).collect()
}

#[test]
fn test_ottawa_enrollment_scenario() {
    let core = NpspCore::open_in_memory().unwrap();

    let first = core
        .enroll(&enrollment_request("Ottawa", 2, 1, "2024-01-10", "2024-01-03"))
        .unwrap();
    assert_eq!(
        ids(&first),
        vec!["NPSP-C1-S01-M001", "NPSP-C1-S01-M002", "NPSP-C1-S01-M003"]
    );
    assert!(first.iter().all(|s| s.study_number == 1));

    // Same date joins the existing cohort
    let second = core
        .enroll(&enrollment_request("Ottawa", 1, 0, "2024-01-10", "2024-01-03"))
        .unwrap();
    assert_eq!(ids(&second), vec!["NPSP-C1-S01-M004"]);

    // New date starts a new cohort, sequence carries on
    let third = core
        .enroll(&enrollment_request("Ottawa", 1, 1, "2024-02-01", "2024-01-25"))
        .unwrap();
    assert_eq!(ids(&third), vec!["NPSP-C1-S02-M005", "NPSP-C1-S02-M006"]);

    assert_eq!(core.list_subjects().unwrap().len(), 6);
}

#[test]
fn test_rfc3339_dates_use_date_part() {
    let core = NpspCore::open_in_memory().unwrap();
    core.enroll(&enrollment_request("Western", 1, 0, "2024-01-10", "2024-01-03"))
        .unwrap();

    let subjects = core
        .enroll(&enrollment_request(
            "western",
            1,
            0,
            "2024-01-10T09:30:00Z",
            "2024-01-03T00:00:00-05:00",
        ))
        .unwrap();
    assert_eq!(ids(&subjects), vec!["NPSP-C3-S01-M002"]);
}

#[test]
fn test_unknown_site_suggests_closest() {
    let core = NpspCore::open_in_memory().unwrap();
    let err = core
        .enroll(&enrollment_request("Otawa", 1, 0, "2024-01-10", "2024-01-03"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("Ottawa"), "{}", err);
}

#[test]
fn test_completion_survives_form_updates() {
    let core = NpspCore::open_in_memory().unwrap();
    let subjects = core
        .enroll(&enrollment_request("McMaster", 1, 0, "2024-01-10", "2024-01-03"))
        .unwrap();
    let id = &subjects[0].subject_id;

    core.mark_complete(id, "SyringePrep T minus 1").unwrap();
    core.update_form(
        npsp_core::FormKind::Intake,
        id,
        json!({"cage_id": "B-7", "number_of_mice_in_cage": 4})
            .as_object()
            .unwrap(),
    )
    .unwrap();
    core.mark_complete(id, "SyringePrep T 3").unwrap();

    let view = core.get_completion(id).unwrap();
    let expected: BTreeMap<String, StageStatus> = [
        ("SyringePrep", StageStatus::Completed),
        ("SyringePrep T 3", StageStatus::Completed),
        ("SyringePrep T minus 1", StageStatus::Completed),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(view.form_completion, expected);
    assert_eq!(view.form_data.intake.get("number_of_mice_in_cage"), Some(&json!(4)));
    assert_eq!(view.form_data.site, Site::McMaster);
}

#[derive(Debug, Clone)]
struct Batch {
    site: Site,
    males: u32,
    females: u32,
    day: u32,
}

fn batch_strategy() -> impl Strategy<Value = Batch> {
    (0usize..6, 0u32..4, 0u32..4, 1u32..6)
        .prop_filter("at least one subject", |(_, m, f, _)| m + f > 0)
        .prop_map(|(site, males, females, day)| Batch {
            site: Site::ALL[site],
            males,
            females,
            day,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_allocation_matches_model(batches in prop::collection::vec(batch_strategy(), 1..10)) {
        let core = NpspCore::open_in_memory().unwrap();

        let mut max_sequence: HashMap<Site, u32> = HashMap::new();
        let mut max_study: HashMap<Site, u32> = HashMap::new();
        let mut cohort: HashMap<(Site, u32), u32> = HashMap::new();
        let mut seen_ids = HashSet::new();

        for batch in &batches {
            let date = format!("2024-03-{:02}", batch.day);
            let subjects = core
                .enroll(&enrollment_request(batch.site.name(), batch.males, batch.females, &date, "2024-02-20"))
                .unwrap();

            prop_assert_eq!(subjects.len() as u32, batch.males + batch.females);

            let expected_study = *cohort.entry((batch.site, batch.day)).or_insert_with(|| {
                let next = max_study.get(&batch.site).copied().unwrap_or(0) + 1;
                max_study.insert(batch.site, next);
                next
            });
            let start = max_sequence.get(&batch.site).copied().unwrap_or(0) + 1;

            for (offset, subject) in subjects.iter().enumerate() {
                prop_assert_eq!(subject.study_number, expected_study);
                prop_assert_eq!(subject.sequence_number, start + offset as u32);
                prop_assert!(seen_ids.insert(subject.subject_id.clone()), "duplicate {}", subject.subject_id);
            }
            max_sequence.insert(batch.site, start + subjects.len() as u32 - 1);
        }
    }

    #[test]
    fn prop_mark_complete_idempotent(stages in prop::collection::vec("[A-Za-z][A-Za-z0-9 .-]{0,20}", 1..6)) {
        let core = NpspCore::open_in_memory().unwrap();
        let subjects = core
            .enroll(&enrollment_request("Calgary", 1, 0, "2024-01-10", "2024-01-03"))
            .unwrap();
        let id = &subjects[0].subject_id;

        let mut once = None;
        for stage in &stages {
            once = Some(core.mark_complete(id, stage).unwrap());
        }
        let mut twice = None;
        for stage in &stages {
            twice = Some(core.mark_complete(id, stage).unwrap());
        }
        prop_assert_eq!(once, twice);
    }
}
