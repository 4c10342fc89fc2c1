//! Identifier allocation for batch enrollment.
//!
//! Pipeline: Validate → BEGIN IMMEDIATE → read per-site maxima → mint → insert → COMMIT
//!
//! The write lock is held from the first read to the last insert, so two enrollments at
//! the same site (from any thread or process sharing the file) can never mint the same
//! identifier. The `(site, sequence_number)` and `subject_id` uniqueness constraints are
//! the backstop; a violation is retried once with fresh reads.

use std::time::Instant;

use chrono::Utc;
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::db::{Database, DbError, DbResult};
use crate::models::{format_subject_id, EnrollmentRequest, FormCompletion, Subject, ValidEnrollment};
use crate::{NpspError, NpspResult};

/// Per-site numbers chosen for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchNumbers {
    study_number: u32,
    /// Sequence number of the first subject in the batch
    first_sequence: u32,
}

/// Mints and persists subject records.
pub struct Allocator<'a> {
    db: &'a Database,
    deadline: Option<Instant>,
}

impl<'a> Allocator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, deadline: None }
    }

    /// Roll back instead of committing once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Enroll a batch: one record per requested subject, males first.
    pub fn enroll(&self, request: &EnrollmentRequest) -> NpspResult<Vec<Subject>> {
        let enrollment = request.validate().map_err(|reason| {
            warn!(site = %request.site, %reason, "Rejected enrollment request");
            NpspError::Validation(reason)
        })?;

        let subjects = match self.allocate(&enrollment) {
            Err(e) if e.is_constraint_violation() => {
                warn!(site = %enrollment.site, error = %e, "Identifier collision, retrying allocation");
                self.allocate(&enrollment).map_err(|e| {
                    if e.is_constraint_violation() {
                        NpspError::Conflict(format!(
                            "identifier collision at site {} persisted after retry",
                            enrollment.site
                        ))
                    } else {
                        e.into()
                    }
                })?
            }
            other => other?,
        };

        info!(
            site = %enrollment.site,
            study_number = ?subjects.first().map(|s| s.study_number),
            count = subjects.len(),
            first = ?subjects.first().map(|s| &s.subject_id),
            last = ?subjects.last().map(|s| &s.subject_id),
            "Enrolled subjects"
        );
        Ok(subjects)
    }

    fn allocate(&self, enrollment: &ValidEnrollment) -> DbResult<Vec<Subject>> {
        let tx = self.db.immediate_transaction()?;

        let numbers = self.next_numbers(enrollment)?;
        debug!(site = %enrollment.site, ?numbers, "Allocating batch");

        let subjects = mint(enrollment, numbers)?;
        for subject in &subjects {
            self.db.insert_subject(subject)?;
        }

        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            // Dropping the transaction rolls the batch back
            return Err(DbError::DeadlineExceeded(format!(
                "enrollment at site {} not committed",
                enrollment.site
            )));
        }
        tx.commit()?;
        Ok(subjects)
    }

    fn next_numbers(&self, enrollment: &ValidEnrollment) -> DbResult<BatchNumbers> {
        let site = enrollment.site;
        let study_number = match self
            .db
            .study_number_for_date(site, enrollment.planned_study_date)?
        {
            Some(existing) => existing,
            None => next_number(self.db.max_study_number(site)?)?,
        };
        let first_sequence = next_number(self.db.max_sequence_number(site)?)?;

        Ok(BatchNumbers {
            study_number,
            first_sequence,
        })
    }
}

/// Build the batch records from chosen numbers. Sequence numbers are contiguous.
fn mint(enrollment: &ValidEnrollment, numbers: BatchNumbers) -> DbResult<Vec<Subject>> {
    let now = Utc::now().to_rfc3339();
    let mut subjects = Vec::with_capacity(enrollment.total() as usize);

    for (offset, sex) in enrollment.sexes().enumerate() {
        let sequence_number = u32::try_from(offset)
            .ok()
            .and_then(|o| numbers.first_sequence.checked_add(o))
            .ok_or_else(|| DbError::Constraint("sequence number overflow".into()))?;

        subjects.push(Subject {
            subject_id: format_subject_id(enrollment.site, numbers.study_number, sequence_number),
            site: enrollment.site,
            study_number: numbers.study_number,
            sequence_number,
            sex,
            planned_study_date: enrollment.planned_study_date,
            delivery_date: enrollment.delivery_date,
            metadata: enrollment.metadata.clone(),
            form_completion: FormCompletion::new(),
            created_at: now.clone(),
            updated_at: now.clone(),
        });
    }
    Ok(subjects)
}

fn next_number(max: u32) -> DbResult<u32> {
    max.checked_add(1)
        .ok_or_else(|| DbError::Constraint("number space exhausted".into()))
}

/// Build a request programmatically (for tests and tooling).
pub fn enrollment_request(
    site: &str,
    male_count: u32,
    female_count: u32,
    planned_study_date: &str,
    delivery_date: &str,
) -> EnrollmentRequest {
    EnrollmentRequest {
        site: site.to_string(),
        male_count,
        female_count,
        planned_study_date: planned_study_date.to_string(),
        delivery_date: delivery_date.to_string(),
        metadata: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sex, Site};
    use serde_json::json;

    fn ids(subjects: &[Subject]) -> Vec<&str> {
        subjects.iter().map(|s| s.subject_id.as_str()).collect()
    }

    #[test]
    fn test_first_enrollment_at_site() {
        let db = Database::open_in_memory().unwrap();
        let allocator = Allocator::new(&db);

        let subjects = allocator
            .enroll(&enrollment_request("Ottawa", 2, 1, "2024-01-10", "2024-01-03"))
            .unwrap();

        assert_eq!(
            ids(&subjects),
            vec!["NPSP-C1-S01-M001", "NPSP-C1-S01-M002", "NPSP-C1-S01-M003"]
        );
        assert_eq!(subjects[0].sex, Sex::Male);
        assert_eq!(subjects[1].sex, Sex::Male);
        assert_eq!(subjects[2].sex, Sex::Female);
        assert!(subjects.iter().all(|s| s.study_number == 1));
        assert_eq!(db.list_subjects_by_site(Site::Ottawa).unwrap().len(), 3);
    }

    #[test]
    fn test_sites_are_numbered_independently() {
        let db = Database::open_in_memory().unwrap();
        let allocator = Allocator::new(&db);

        allocator
            .enroll(&enrollment_request("Ottawa", 3, 0, "2024-01-10", "2024-01-03"))
            .unwrap();
        let calgary = allocator
            .enroll(&enrollment_request("calgary", 0, 1, "2024-03-01", "2024-02-20"))
            .unwrap();

        assert_eq!(ids(&calgary), vec!["NPSP-C6-S01-M001"]);
        assert_eq!(calgary[0].site, Site::Calgary);
    }

    #[test]
    fn test_reenrolling_older_date_reuses_its_cohort() {
        let db = Database::open_in_memory().unwrap();
        let allocator = Allocator::new(&db);

        allocator
            .enroll(&enrollment_request("Western", 1, 0, "2024-01-10", "2024-01-03"))
            .unwrap();
        allocator
            .enroll(&enrollment_request("Western", 1, 0, "2024-02-01", "2024-01-25"))
            .unwrap();
        let late = allocator
            .enroll(&enrollment_request("Western", 0, 1, "2024-01-10", "2024-01-03"))
            .unwrap();

        assert_eq!(ids(&late), vec!["NPSP-C3-S01-M003"]);
    }

    #[test]
    fn test_metadata_is_attached_verbatim() {
        let db = Database::open_in_memory().unwrap();
        let mut request = enrollment_request("McMaster", 1, 1, "2024-01-10", "2024-01-03");
        request.metadata.insert("strain".into(), json!("C57BL/6"));
        request.metadata.insert("cageCount".into(), json!(2));

        let subjects = Allocator::new(&db).enroll(&request).unwrap();
        let stored = db.get_subject(&subjects[1].subject_id).unwrap().unwrap();
        assert_eq!(stored.metadata.get("strain"), Some(&json!("C57BL/6")));
        assert_eq!(stored.metadata.get("cageCount"), Some(&json!(2)));
    }

    #[test]
    fn test_validation_failures_write_nothing() {
        let db = Database::open_in_memory().unwrap();
        let allocator = Allocator::new(&db);

        for request in [
            enrollment_request("Toronto", 1, 0, "2024-01-10", "2024-01-03"),
            enrollment_request("Ottawa", 1, 0, "2024-13-10", "2024-01-03"),
            enrollment_request("Ottawa", 1, 0, "2024-01-10", "yesterday"),
            enrollment_request("Ottawa", 0, 0, "2024-01-10", "2024-01-03"),
        ] {
            let err = allocator.enroll(&request).unwrap_err();
            assert!(matches!(err, NpspError::Validation(_)), "{:?}", err);
        }
        assert!(db.list_subjects().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_batch_is_rejected_before_minting() {
        let db = Database::open_in_memory().unwrap();
        let allocator = Allocator::new(&db);

        for request in [
            enrollment_request("Ottawa", u32::MAX, 0, "2024-01-10", "2024-01-03"),
            enrollment_request("Ottawa", 300, 201, "2024-01-10", "2024-01-03"),
        ] {
            let err = allocator.enroll(&request).unwrap_err();
            assert!(matches!(err, NpspError::Validation(_)), "{:?}", err);
        }
        assert!(db.list_subjects().unwrap().is_empty());

        let subjects = allocator
            .enroll(&enrollment_request("Ottawa", 300, 200, "2024-01-10", "2024-01-03"))
            .unwrap();
        assert_eq!(subjects.len(), 500);
        assert_eq!(subjects[499].subject_id, "NPSP-C1-S01-M500");
    }

    #[test]
    fn test_expired_deadline_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let err = Allocator::new(&db)
            .with_deadline(Instant::now())
            .enroll(&enrollment_request("Alberta", 2, 0, "2024-01-10", "2024-01-03"))
            .unwrap_err();
        assert!(matches!(err, NpspError::Timeout(_)), "{:?}", err);
        assert!(db.list_subjects().unwrap().is_empty());

        let later = Instant::now() + std::time::Duration::from_secs(60);
        let subjects = Allocator::new(&db)
            .with_deadline(later)
            .enroll(&enrollment_request("Alberta", 2, 0, "2024-01-10", "2024-01-03"))
            .unwrap();
        assert_eq!(subjects[0].subject_id, "NPSP-C5-S01-M001");
    }

    #[test]
    fn test_failed_insert_rolls_back_whole_batch() {
        let db = Database::open_in_memory().unwrap();
        // A row the allocator does not know about occupies sequence 2 under a foreign id
        db.conn()
            .execute(
                "INSERT INTO subjects (subject_id, site, center_code, study_number, sequence_number, sex, planned_study_date, delivery_date) VALUES ('legacy-2', 'Alberta', '5', 1, 2, 'male', '2023-12-01', '2023-11-20')",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO subjects (subject_id, site, center_code, study_number, sequence_number, sex, planned_study_date, delivery_date) VALUES ('NPSP-C5-S02-M003', 'Alberta', '5', 2, 1, 'male', '2023-12-02', '2023-11-20')",
                [],
            )
            .unwrap();

        // Joining the 2023-12-02 cohort starts at sequence 3 and collides with the existing
        // id on both attempts
        let err = Allocator::new(&db)
            .enroll(&enrollment_request("Alberta", 2, 0, "2023-12-02", "2023-11-20"))
            .unwrap_err();
        assert!(matches!(err, NpspError::Conflict(_)), "{:?}", err);
        assert_eq!(db.list_subjects_by_site(Site::Alberta).unwrap().len(), 2);
    }
}
