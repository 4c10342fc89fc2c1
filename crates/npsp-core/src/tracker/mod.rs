//! Form-completion tracking.
//!
//! Stages move `absent → completed` only. After every mark the combined-stage rules are
//! re-evaluated in the same transaction, so a parent stage completes as soon as its last
//! prerequisite does.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::db::Database;
use crate::models::{
    validate_stage_name, FormCompletion, FormKind, Sex, Site, COMBINED_STAGES,
};
use crate::{NpspError, NpspResult};

/// Lifecycle-relevant fields returned alongside the completion map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleData {
    pub subject_id: String,
    pub site: Site,
    pub study_number: u32,
    pub sex: Sex,
    pub planned_study_date: NaiveDate,
    pub delivery_date: NaiveDate,
    /// Intake and housing-check entries recorded so far
    pub intake: Map<String, Value>,
}

/// Result of a completion lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionView {
    pub form_completion: FormCompletion,
    pub form_data: LifecycleData,
}

/// Records stage completion for enrolled subjects.
pub struct Tracker<'a> {
    db: &'a Database,
}

impl<'a> Tracker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Mark `stage` completed and derive any combined stages. Idempotent.
    ///
    /// Returns the subject's full completion map after the update.
    pub fn mark_complete(&self, subject_id: &str, stage: &str) -> NpspResult<FormCompletion> {
        validate_stage_name(stage).map_err(NpspError::Validation)?;

        let tx = self.db.immediate_transaction()?;

        if !self.db.set_stage_completed(subject_id, stage)? {
            return Err(NpspError::NotFound(format!("subject {}", subject_id)));
        }
        for rule in COMBINED_STAGES {
            if self.db.derive_combined_stage(subject_id, rule)? {
                info!(subject_id, stage = rule.stage, "Combined stage completed");
            }
        }
        let completion = self
            .db
            .get_form_completion(subject_id)?
            .ok_or_else(|| NpspError::NotFound(format!("subject {}", subject_id)))?;

        tx.commit()?;
        debug!(subject_id, stage, stages = completion.len(), "Stage marked complete");
        Ok(completion)
    }

    /// Completion map plus the subject's lifecycle fields.
    pub fn get_completion(&self, subject_id: &str) -> NpspResult<CompletionView> {
        let subject = self
            .db
            .get_subject(subject_id)?
            .ok_or_else(|| NpspError::NotFound(format!("subject {}", subject_id)))?;
        let intake = self.db.get_form_fields(subject_id, FormKind::Intake)?;

        Ok(CompletionView {
            form_completion: subject.form_completion,
            form_data: LifecycleData {
                subject_id: subject.subject_id,
                site: subject.site,
                study_number: subject.study_number,
                sex: subject.sex,
                planned_study_date: subject.planned_study_date,
                delivery_date: subject.delivery_date,
                intake,
            },
        })
    }
}
