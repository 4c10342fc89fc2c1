//! Subject database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{FormCompletion, Sex, Site, Subject};

const SUBJECT_COLUMNS: &str = r#"
    subject_id, site, study_number, sequence_number, sex,
    planned_study_date, delivery_date, metadata, form_completion,
    created_at, updated_at
"#;

impl Database {
    /// Highest study number assigned at a site (0 if none).
    pub fn max_study_number(&self, site: Site) -> DbResult<u32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(study_number), 0) FROM subjects WHERE site = ?",
                [site.name()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Study number of the cohort already enrolled at `site` for `date`, if any.
    pub fn study_number_for_date(&self, site: Site, date: NaiveDate) -> DbResult<Option<u32>> {
        self.conn
            .query_row(
                r#"
                SELECT MAX(study_number)
                FROM subjects
                WHERE site = ? AND planned_study_date = ?
                "#,
                params![site.name(), date.to_string()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Highest sequence number assigned at a site (0 if none).
    pub fn max_sequence_number(&self, site: Site) -> DbResult<u32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) FROM subjects WHERE site = ?",
                [site.name()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Insert a newly minted subject.
    pub fn insert_subject(&self, subject: &Subject) -> DbResult<()> {
        let metadata_json = serde_json::to_string(&subject.metadata)?;
        let completion_json = serde_json::to_string(&subject.form_completion)?;

        self.conn.execute(
            r#"
            INSERT INTO subjects (
                subject_id, site, center_code, study_number, sequence_number, sex,
                planned_study_date, delivery_date, metadata, form_completion,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                subject.subject_id,
                subject.site.name(),
                subject.site.center_code().to_string(),
                subject.study_number,
                subject.sequence_number,
                subject.sex.as_str(),
                subject.planned_study_date.to_string(),
                subject.delivery_date.to_string(),
                metadata_json,
                completion_json,
                subject.created_at,
                subject.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Whether a subject exists.
    pub fn subject_exists(&self, subject_id: &str) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM subjects WHERE subject_id = ?",
                [subject_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Correct a subject's recorded sex. Returns false if the subject does not exist.
    pub fn set_subject_sex(&self, subject_id: &str, sex: Sex) -> DbResult<bool> {
        let rows = self.conn.execute(
            "UPDATE subjects SET sex = ?1, updated_at = datetime('now') WHERE subject_id = ?2",
            params![sex.as_str(), subject_id],
        )?;
        Ok(rows > 0)
    }

    /// Get a subject by identifier.
    pub fn get_subject(&self, subject_id: &str) -> DbResult<Option<Subject>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM subjects WHERE subject_id = ?", SUBJECT_COLUMNS),
                [subject_id],
                SubjectRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all subjects ordered by identifier.
    pub fn list_subjects(&self) -> DbResult<Vec<Subject>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM subjects ORDER BY subject_id",
            SUBJECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], SubjectRow::from_row)?;

        let mut subjects = Vec::new();
        for row in rows {
            subjects.push(row?.try_into()?);
        }
        Ok(subjects)
    }

    /// List subjects at one site in sequence order.
    pub fn list_subjects_by_site(&self, site: Site) -> DbResult<Vec<Subject>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM subjects WHERE site = ? ORDER BY sequence_number",
            SUBJECT_COLUMNS
        ))?;
        let rows = stmt.query_map([site.name()], SubjectRow::from_row)?;

        let mut subjects = Vec::new();
        for row in rows {
            subjects.push(row?.try_into()?);
        }
        Ok(subjects)
    }
}

/// Intermediate row struct for database mapping.
struct SubjectRow {
    subject_id: String,
    site: String,
    study_number: u32,
    sequence_number: u32,
    sex: String,
    planned_study_date: String,
    delivery_date: String,
    metadata: String,
    form_completion: String,
    created_at: String,
    updated_at: String,
}

impl SubjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SubjectRow {
            subject_id: row.get(0)?,
            site: row.get(1)?,
            study_number: row.get(2)?,
            sequence_number: row.get(3)?,
            sex: row.get(4)?,
            planned_study_date: row.get(5)?,
            delivery_date: row.get(6)?,
            metadata: row.get(7)?,
            form_completion: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl TryFrom<SubjectRow> for Subject {
    type Error = DbError;

    fn try_from(row: SubjectRow) -> Result<Self, Self::Error> {
        let site = row
            .site
            .parse::<Site>()
            .map_err(|e| DbError::Constraint(e.to_string()))?;
        let sex = Sex::parse(&row.sex)
            .ok_or_else(|| DbError::Constraint(format!("Unknown sex: {}", row.sex)))?;
        let form_completion: FormCompletion = serde_json::from_str(&row.form_completion)?;

        Ok(Subject {
            subject_id: row.subject_id,
            site,
            study_number: row.study_number,
            sequence_number: row.sequence_number,
            sex,
            planned_study_date: parse_stored_date(&row.planned_study_date)?,
            delivery_date: parse_stored_date(&row.delivery_date)?,
            metadata: serde_json::from_str(&row.metadata)?,
            form_completion,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_stored_date(s: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| DbError::Constraint(format!("Invalid stored date: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format_subject_id;
    use serde_json::{json, Map};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_subject(site: Site, study: u32, sequence: u32, planned: &str) -> Subject {
        let now = chrono::Utc::now().to_rfc3339();
        let mut metadata = Map::new();
        metadata.insert("strain".into(), json!("C57BL/6"));
        Subject {
            subject_id: format_subject_id(site, study, sequence),
            site,
            study_number: study,
            sequence_number: sequence,
            sex: Sex::Female,
            planned_study_date: date(planned),
            delivery_date: date("2024-01-03"),
            metadata,
            form_completion: FormCompletion::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let subject = make_subject(Site::Ottawa, 1, 1, "2024-01-10");
        db.insert_subject(&subject).unwrap();

        let retrieved = db.get_subject("NPSP-C1-S01-M001").unwrap().unwrap();
        assert_eq!(retrieved, subject);
        assert!(db.subject_exists("NPSP-C1-S01-M001").unwrap());
        assert!(!db.subject_exists("NPSP-C1-S01-M002").unwrap());
        assert!(db.get_subject("NPSP-C1-S01-M002").unwrap().is_none());
    }

    #[test]
    fn test_maxima_are_per_site() {
        let db = setup_db();
        assert_eq!(db.max_study_number(Site::Ottawa).unwrap(), 0);
        assert_eq!(db.max_sequence_number(Site::Ottawa).unwrap(), 0);

        db.insert_subject(&make_subject(Site::Ottawa, 1, 1, "2024-01-10"))
            .unwrap();
        db.insert_subject(&make_subject(Site::Ottawa, 2, 2, "2024-02-01"))
            .unwrap();
        db.insert_subject(&make_subject(Site::Calgary, 1, 1, "2024-02-01"))
            .unwrap();

        assert_eq!(db.max_study_number(Site::Ottawa).unwrap(), 2);
        assert_eq!(db.max_sequence_number(Site::Ottawa).unwrap(), 2);
        assert_eq!(db.max_study_number(Site::Calgary).unwrap(), 1);
        assert_eq!(db.max_sequence_number(Site::Western).unwrap(), 0);
    }

    #[test]
    fn test_study_number_for_date() {
        let db = setup_db();
        db.insert_subject(&make_subject(Site::Ottawa, 1, 1, "2024-01-10"))
            .unwrap();

        assert_eq!(
            db.study_number_for_date(Site::Ottawa, date("2024-01-10"))
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            db.study_number_for_date(Site::Ottawa, date("2024-02-01"))
                .unwrap(),
            None
        );
        assert_eq!(
            db.study_number_for_date(Site::McMaster, date("2024-01-10"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_list_subjects_ordering() {
        let db = setup_db();
        db.insert_subject(&make_subject(Site::McMaster, 1, 1, "2024-01-10"))
            .unwrap();
        db.insert_subject(&make_subject(Site::Ottawa, 1, 2, "2024-01-10"))
            .unwrap();
        db.insert_subject(&make_subject(Site::Ottawa, 1, 1, "2024-01-10"))
            .unwrap();

        let all: Vec<String> = db
            .list_subjects()
            .unwrap()
            .into_iter()
            .map(|s| s.subject_id)
            .collect();
        assert_eq!(
            all,
            vec!["NPSP-C1-S01-M001", "NPSP-C1-S01-M002", "NPSP-C2-S01-M001"]
        );

        let ottawa = db.list_subjects_by_site(Site::Ottawa).unwrap();
        assert_eq!(ottawa.len(), 2);
        assert_eq!(ottawa[0].sequence_number, 1);
    }

    #[test]
    fn test_set_subject_sex_keeps_identity() {
        let db = setup_db();
        let subject = make_subject(Site::Western, 1, 1, "2024-01-10");
        db.insert_subject(&subject).unwrap();

        assert!(db.set_subject_sex(&subject.subject_id, Sex::Male).unwrap());
        let stored = db.get_subject(&subject.subject_id).unwrap().unwrap();
        assert_eq!(stored.sex, Sex::Male);
        assert_eq!(stored.subject_id, subject.subject_id);
        assert_eq!(stored.sequence_number, 1);

        assert!(!db.set_subject_sex("NPSP-C3-S01-M999", Sex::Male).unwrap());
    }

    #[test]
    fn test_duplicate_insert_is_constraint_violation() {
        let db = setup_db();
        let subject = make_subject(Site::Ottawa, 1, 1, "2024-01-10");
        db.insert_subject(&subject).unwrap();

        let err = db.insert_subject(&subject).unwrap_err();
        assert!(err.is_constraint_violation());
    }
}
