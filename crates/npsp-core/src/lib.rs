//! NPSP Core Library
//!
//! Enrollment, identifier allocation and form tracking for a multi-site preclinical
//! animal-study workflow.
//!
//! # Architecture
//!
//! ```text
//! Enrollment request (site, male/female counts, planned study date, metadata)
//!                                  │
//!                          Validate site + dates
//!                                  │
//!                 ┌────────────────▼────────────────┐
//!                 │        BEGIN IMMEDIATE          │
//!                 │  study number   ← date cohort   │
//!                 │                   or max + 1    │
//!                 │  sequence start ← max + 1       │
//!                 │  mint NPSP-C{c}-S{ss}-M{sss}    │
//!                 │  insert batch, COMMIT           │
//!                 └────────────────┬────────────────┘
//!                                  │
//!             ┌────────────────────┼────────────────────┐
//!             │                    │                    │
//!             ▼                    ▼                    ▼
//!       Form entries        Stage completion      Researcher
//!      (allow-listed)      + combined stages       accounts
//! ```
//!
//! # Core Principle
//!
//! **Identifiers are minted under the store's write lock.** Reading the per-site maxima
//! and inserting the batch happen in one `BEGIN IMMEDIATE` transaction, backed by
//! uniqueness constraints.
//!
//! # Modules
//!
//! - [`db`]: SQLite store
//! - [`models`]: Domain types (Site, Subject, FormKind, Researcher, etc.)
//! - [`allocator`]: Identifier allocation for batch enrollment
//! - [`tracker`]: Form-completion tracking with combined stages

pub mod allocator;
pub mod db;
pub mod models;
pub mod tracker;

// Re-export commonly used types
pub use allocator::Allocator;
pub use db::{Database, JournalMode, StoreOptions};
pub use models::{
    EnrollmentRequest, FormCompletion, FormKind, FormSubmission, Registration, Researcher,
    Sex, Site, StageStatus, Subject,
};
pub use tracker::{CompletionView, LifecycleData, Tracker};

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

use db::StoredCredentials;

// =========================================================================
// Error Type
// =========================================================================

/// Stable, machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Persistence,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NpspError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl NpspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NpspError::Validation(_) => ErrorKind::Validation,
            NpspError::NotFound(_) => ErrorKind::NotFound,
            NpspError::Conflict(_) => ErrorKind::Conflict,
            NpspError::Persistence(_) => ErrorKind::Persistence,
            NpspError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

pub type NpspResult<T> = Result<T, NpspError>;

impl From<db::DbError> for NpspError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => NpspError::NotFound(what),
            db::DbError::DeadlineExceeded(what) => NpspError::Timeout(what),
            e if e.is_constraint_violation() => NpspError::Conflict(e.to_string()),
            e if e.is_busy() => NpspError::Timeout(format!("store is busy: {}", e)),
            e => NpspError::Persistence(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for NpspError {
    fn from(e: rusqlite::Error) -> Self {
        db::DbError::from(e).into()
    }
}

impl From<serde_json::Error> for NpspError {
    fn from(e: serde_json::Error) -> Self {
        NpspError::Persistence(format!("Serialization error: {}", e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for NpspError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        NpspError::Persistence(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe handle over one store. Cheap to clone.
#[derive(Clone)]
pub struct NpspCore {
    db: Arc<Mutex<Database>>,
}

impl NpspCore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions) -> NpspResult<Self> {
        let db = Database::open_with(path, options)?;
        Ok(Self::from_database(db))
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> NpspResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    /// Enroll a batch of subjects at one site.
    pub fn enroll(&self, request: &EnrollmentRequest) -> NpspResult<Vec<Subject>> {
        let db = self.db.lock()?;
        Allocator::new(&db).enroll(request)
    }

    /// Enroll a batch, committing only if `deadline` has not passed.
    ///
    /// A `Timeout` error from this call means nothing was written.
    pub fn enroll_before(
        &self,
        request: &EnrollmentRequest,
        deadline: Instant,
    ) -> NpspResult<Vec<Subject>> {
        let db = self.db.lock()?;
        Allocator::new(&db).with_deadline(deadline).enroll(request)
    }

    /// All subjects ordered by identifier.
    pub fn list_subjects(&self) -> NpspResult<Vec<Subject>> {
        let db = self.db.lock()?;
        Ok(db.list_subjects()?)
    }

    /// Subjects at one site in sequence order.
    pub fn list_subjects_by_site(&self, site: Site) -> NpspResult<Vec<Subject>> {
        let db = self.db.lock()?;
        Ok(db.list_subjects_by_site(site)?)
    }

    pub fn get_subject(&self, subject_id: &str) -> NpspResult<Subject> {
        let db = self.db.lock()?;
        db.get_subject(subject_id)?
            .ok_or_else(|| NpspError::NotFound(format!("subject {}", subject_id)))
    }

    // =========================================================================
    // Form Completion
    // =========================================================================

    /// Mark a stage completed; returns the updated completion map.
    pub fn mark_complete(&self, subject_id: &str, stage: &str) -> NpspResult<FormCompletion> {
        let db = self.db.lock()?;
        Tracker::new(&db).mark_complete(subject_id, stage)
    }

    pub fn get_completion(&self, subject_id: &str) -> NpspResult<CompletionView> {
        let db = self.db.lock()?;
        Tracker::new(&db).get_completion(subject_id)
    }

    // =========================================================================
    // Form Data
    // =========================================================================

    /// Write allow-listed fields of one form for one subject.
    pub fn update_form(
        &self,
        form: FormKind,
        subject_id: &str,
        fields: &Map<String, Value>,
    ) -> NpspResult<()> {
        form.validate_fields(fields).map_err(|reason| {
            warn!(%form, subject_id, %reason, "Rejected form update");
            NpspError::Validation(reason)
        })?;

        let db = self.db.lock()?;
        let tx = db.immediate_transaction()?;
        if !db.subject_exists(subject_id)? {
            return Err(NpspError::NotFound(format!("subject {}", subject_id)));
        }
        db.upsert_form_fields(subject_id, form, fields)?;
        tx.commit()?;

        info!(%form, subject_id, fields = fields.len(), "Form updated");
        Ok(())
    }

    /// Write one form for many subjects, all or nothing. Returns the number of subjects updated.
    pub fn update_form_batch(
        &self,
        form: FormKind,
        entries: &[FormSubmission],
    ) -> NpspResult<usize> {
        if entries.is_empty() {
            return Err(NpspError::Validation(format!(
                "no entries submitted for form '{}'",
                form
            )));
        }
        for entry in entries {
            form.validate_fields(&entry.fields).map_err(|reason| {
                NpspError::Validation(format!("{}: {}", entry.subject_id, reason))
            })?;
        }

        let db = self.db.lock()?;
        let tx = db.immediate_transaction()?;
        for entry in entries {
            if !db.subject_exists(&entry.subject_id)? {
                return Err(NpspError::NotFound(format!("subject {}", entry.subject_id)));
            }
            db.upsert_form_fields(&entry.subject_id, form, &entry.fields)?;
        }
        tx.commit()?;

        info!(%form, subjects = entries.len(), "Form batch updated");
        Ok(entries.len())
    }

    /// Stored fields of one form for one subject.
    pub fn get_form(&self, form: FormKind, subject_id: &str) -> NpspResult<Map<String, Value>> {
        let db = self.db.lock()?;
        if !db.subject_exists(subject_id)? {
            return Err(NpspError::NotFound(format!("subject {}", subject_id)));
        }
        Ok(db.get_form_fields(subject_id, form)?)
    }

    // =========================================================================
    // Researchers
    // =========================================================================

    /// Register an account and assign the next HQP serial number.
    pub fn register(&self, registration: &Registration) -> NpspResult<Researcher> {
        registration.validate().map_err(NpspError::Validation)?;
        let email = registration.email.trim();

        let db = self.db.lock()?;
        let tx = db.immediate_transaction()?;

        if db.get_researcher_by_email(email)?.is_some() {
            return Err(NpspError::Conflict(format!(
                "an account already exists for {}",
                email
            )));
        }

        let serial_number = db.max_serial_number()? + 1;
        let now = chrono::Utc::now().to_rfc3339();
        let researcher = Researcher {
            researcher_id: uuid::Uuid::new_v4().to_string(),
            hqp_id: models::format_hqp_id(
                &registration.first_name,
                &registration.last_name,
                serial_number,
            ),
            serial_number,
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            email: email.to_string(),
            occupation: registration.occupation.clone(),
            site: registration.site.clone(),
            profile: registration.profile.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        let salt = models::new_salt();
        let credentials = StoredCredentials {
            password_hash: models::hash_password(&registration.password, &salt),
            password_salt: salt,
        };
        db.insert_researcher(&researcher, &credentials)?;
        tx.commit()?;

        info!(hqp_id = %researcher.hqp_id, "Researcher registered");
        Ok(researcher)
    }

    /// Check credentials and return the account.
    pub fn login(&self, email: &str, password: &str) -> NpspResult<Researcher> {
        let db = self.db.lock()?;
        let credentials = db
            .get_credentials(email)?
            .ok_or_else(|| NpspError::NotFound(format!("no account for {}", email.trim())))?;

        if models::hash_password(password, &credentials.password_salt) != credentials.password_hash
        {
            warn!(email = email.trim(), "Failed login");
            return Err(NpspError::Validation("incorrect password".into()));
        }
        db.get_researcher_by_email(email)?
            .ok_or_else(|| NpspError::NotFound(format!("no account for {}", email.trim())))
    }

    pub fn get_researcher(&self, email: &str) -> NpspResult<Researcher> {
        let db = self.db.lock()?;
        db.get_researcher_by_email(email)?
            .ok_or_else(|| NpspError::NotFound(format!("no account for {}", email.trim())))
    }

    pub fn list_researchers(&self) -> NpspResult<Vec<Researcher>> {
        let db = self.db.lock()?;
        Ok(db.list_researchers()?)
    }

    /// Serial number the next registration would receive.
    pub fn next_serial_number(&self) -> NpspResult<u32> {
        let db = self.db.lock()?;
        Ok(db.max_serial_number()? + 1)
    }

    /// Apply an allow-listed profile update and return the updated account.
    pub fn update_profile(&self, email: &str, fields: &Map<String, Value>) -> NpspResult<Researcher> {
        models::validate_profile_update(fields).map_err(NpspError::Validation)?;

        let db = self.db.lock()?;
        let tx = db.immediate_transaction()?;
        if !db.update_researcher_profile(email, fields)? {
            return Err(NpspError::NotFound(format!("no account for {}", email.trim())));
        }
        let researcher = db
            .get_researcher_by_email(email)?
            .ok_or_else(|| NpspError::NotFound(format!("no account for {}", email.trim())))?;
        tx.commit()?;
        Ok(researcher)
    }
}
