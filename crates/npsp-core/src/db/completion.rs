//! Form-completion map operations.
//!
//! All writes are in-store JSON merges on a single row, so concurrent updates of
//! different stages never overwrite each other.

use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{Database, DbResult};
use crate::models::{json_key_path, CombinedStage, FormCompletion, StageStatus};

impl Database {
    /// Set `stage` to completed. Returns false if the subject does not exist.
    ///
    /// The stage name must already be validated.
    pub fn set_stage_completed(&self, subject_id: &str, stage: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE subjects SET
                form_completion = json_set(COALESCE(form_completion, '{}'), ?2, ?3),
                updated_at = datetime('now')
            WHERE subject_id = ?1
            "#,
            params![
                subject_id,
                json_key_path(stage),
                StageStatus::Completed.as_str()
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Complete a combined stage if all its prerequisites are complete and it is not yet.
    ///
    /// Returns true when the combined stage transitioned in this call.
    pub fn derive_combined_stage(&self, subject_id: &str, rule: &CombinedStage) -> DbResult<bool> {
        // ?1 subject, ?2 status, ?3 combined stage path, ?4.. prerequisite paths
        let prerequisite_checks: Vec<String> = (0..rule.prerequisites.len())
            .map(|i| format!("json_extract(form_completion, ?{}) = ?2", i + 4))
            .collect();
        let sql = format!(
            r#"
            UPDATE subjects SET
                form_completion = json_set(form_completion, ?3, ?2),
                updated_at = datetime('now')
            WHERE subject_id = ?1
              AND json_extract(form_completion, ?3) IS NOT ?2
              AND {}
            "#,
            prerequisite_checks.join(" AND ")
        );

        let mut values = vec![
            subject_id.to_string(),
            StageStatus::Completed.as_str().to_string(),
            json_key_path(rule.stage),
        ];
        values.extend(rule.prerequisites.iter().map(|p| json_key_path(p)));

        let rows_affected = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(rows_affected > 0)
    }

    /// Get the completion map of a subject (None if the subject does not exist).
    pub fn get_form_completion(&self, subject_id: &str) -> DbResult<Option<FormCompletion>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT form_completion FROM subjects WHERE subject_id = ?",
                [subject_id],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(None) => Ok(Some(FormCompletion::new())),
            Some(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }
}
