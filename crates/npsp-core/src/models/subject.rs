//! Subject (study animal) models and enrollment requests.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::completion::FormCompletion;
use super::site::Site;

/// Prefix shared by every subject identifier.
pub const SUBJECT_ID_PREFIX: &str = "NPSP";

/// Most subjects a single enrollment request may mint.
pub const MAX_BATCH_SIZE: u32 = 500;

/// Biological sex recorded at enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Option<Sex> {
        match s {
            "male" => Some(Sex::Male),
            "female" => Some(Sex::Female),
            _ => None,
        }
    }
}

/// Compose a subject identifier: `NPSP-C{code}-S{study:02}-M{sequence:03}`.
///
/// Padding is a minimum width, so sequence 1000 renders as `M1000`.
pub fn format_subject_id(site: Site, study_number: u32, sequence_number: u32) -> String {
    format!(
        "{}-C{}-S{:02}-M{:03}",
        SUBJECT_ID_PREFIX,
        site.center_code(),
        study_number,
        sequence_number
    )
}

/// An enrolled animal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Human-readable identifier, immutable once assigned
    pub subject_id: String,
    /// Enrolling site
    pub site: Site,
    /// Per-site cohort ordinal tied to the planned study date
    pub study_number: u32,
    /// Per-site running count embedded in the identifier
    pub sequence_number: u32,
    pub sex: Sex,
    pub planned_study_date: NaiveDate,
    pub delivery_date: NaiveDate,
    /// Enrollment metadata attached verbatim (housing, strain, dosing plan, ...)
    pub metadata: Map<String, Value>,
    /// Stage name → status
    pub form_completion: FormCompletion,
    pub created_at: String,
    pub updated_at: String,
}

/// A batch enrollment request as submitted by a client.
///
/// Dates are kept as raw strings here; [`EnrollmentRequest::validate`] parses them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub site: String,
    pub male_count: u32,
    pub female_count: u32,
    pub planned_study_date: String,
    pub delivery_date: String,
    /// Everything else in the request body
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// An enrollment request whose site and dates have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEnrollment {
    pub site: Site,
    pub male_count: u32,
    pub female_count: u32,
    pub planned_study_date: NaiveDate,
    pub delivery_date: NaiveDate,
    pub metadata: Map<String, Value>,
}

impl ValidEnrollment {
    /// Total number of subjects to mint.
    pub fn total(&self) -> u32 {
        self.male_count + self.female_count
    }

    /// Sex of each subject in minting order: all males, then all females.
    pub fn sexes(&self) -> impl Iterator<Item = Sex> {
        std::iter::repeat(Sex::Male)
            .take(self.male_count as usize)
            .chain(std::iter::repeat(Sex::Female).take(self.female_count as usize))
    }
}

impl EnrollmentRequest {
    /// Check site, dates and counts. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<ValidEnrollment, String> {
        let site = self.site.parse::<Site>().map_err(|e| e.to_string())?;

        let planned_study_date = parse_date(&self.planned_study_date)
            .ok_or_else(|| format!("invalid planned study date '{}'", self.planned_study_date))?;
        let delivery_date = parse_date(&self.delivery_date)
            .ok_or_else(|| format!("invalid delivery date '{}'", self.delivery_date))?;

        let total = self
            .male_count
            .checked_add(self.female_count)
            .ok_or_else(|| "subject count overflow".to_string())?;
        if total == 0 {
            return Err("at least one male or female subject is required".into());
        }
        if total > MAX_BATCH_SIZE {
            return Err(format!(
                "batch of {} subjects exceeds the limit of {} per request",
                total, MAX_BATCH_SIZE
            ));
        }

        Ok(ValidEnrollment {
            site,
            male_count: self.male_count,
            female_count: self.female_count,
            planned_study_date,
            delivery_date,
            metadata: self.metadata.clone(),
        })
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp (date part).
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.date_naive()))
}
