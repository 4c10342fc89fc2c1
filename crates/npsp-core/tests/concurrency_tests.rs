//! Concurrent allocation against one database file.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use npsp_core::allocator::enrollment_request;
use npsp_core::db::{Database, JournalMode, StoreOptions};
use npsp_core::models::Site;
use npsp_core::{Allocator, NpspCore, Subject};

const THREADS: usize = 8;
const BATCHES_PER_THREAD: usize = 3;

fn options() -> StoreOptions {
    StoreOptions {
        busy_timeout: Duration::from_secs(10),
        journal_mode: JournalMode::Wal,
    }
}

fn assert_contiguous(subjects: &[Subject], expected: u32) {
    let ids: HashSet<&str> = subjects.iter().map(|s| s.subject_id.as_str()).collect();
    assert_eq!(ids.len(), subjects.len(), "duplicate subject ids");

    let mut sequences: Vec<u32> = subjects.iter().map(|s| s.sequence_number).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=expected).collect::<Vec<_>>());
}

#[test]
fn test_separate_connections_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("npsp.db");
    // Create schema and switch to WAL before the writers start
    drop(Database::open_with(&path, &options()).unwrap());

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = Database::open_with(&path, &options()).unwrap();
                let allocator = Allocator::new(&db);
                barrier.wait();

                let mut minted = Vec::new();
                for _ in 0..BATCHES_PER_THREAD {
                    let males = (i % 3) as u32 + 1;
                    minted.extend(
                        allocator
                            .enroll(&enrollment_request("Ottawa", males, 1, "2024-01-10", "2024-01-03"))
                            .unwrap(),
                    );
                }
                minted
            })
        })
        .collect();

    let minted: Vec<Subject> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let db = Database::open_with(&path, &options()).unwrap();
    let stored = db.list_subjects_by_site(Site::Ottawa).unwrap();
    assert_eq!(stored.len(), minted.len());
    assert_contiguous(&stored, minted.len() as u32);
    assert!(stored.iter().all(|s| s.study_number == 1));
}

#[test]
fn test_shared_handle_across_threads() {
    let core = NpspCore::open_in_memory().unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let core = core.clone();
            thread::spawn(move || {
                let date = if i % 2 == 0 { "2024-01-10" } else { "2024-02-01" };
                core.enroll(&enrollment_request("Manitoba", 1, 1, date, "2024-01-03"))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let subjects = core.list_subjects().unwrap();
    assert_contiguous(&subjects, (THREADS * 2) as u32);

    // Each date maps to exactly one study number, and the two dates differ
    let jan: HashSet<u32> = subjects
        .iter()
        .filter(|s| s.planned_study_date.to_string() == "2024-01-10")
        .map(|s| s.study_number)
        .collect();
    let feb: HashSet<u32> = subjects
        .iter()
        .filter(|s| s.planned_study_date.to_string() == "2024-02-01")
        .map(|s| s.study_number)
        .collect();
    assert_eq!(jan.len(), 1);
    assert_eq!(feb.len(), 1);
    assert_ne!(jan, feb);
}

#[test]
fn test_concurrent_stage_marks_are_all_kept() {
    let core = NpspCore::open_in_memory().unwrap();
    let subject_id = core
        .enroll(&enrollment_request("Alberta", 1, 0, "2024-01-10", "2024-01-03"))
        .unwrap()
        .remove(0)
        .subject_id;

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let core = core.clone();
            let subject_id = subject_id.clone();
            thread::spawn(move || {
                core.mark_complete(&subject_id, &format!("Stage {}", i)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let completion = core.get_completion(&subject_id).unwrap().form_completion;
    assert_eq!(completion.len(), THREADS);
}
