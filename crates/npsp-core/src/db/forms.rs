//! Form entry operations.
//!
//! Each submitted field is its own row, so two clients writing different fields of the
//! same form never clobber each other.

use rusqlite::params;
use serde_json::{Map, Value};

use super::{Database, DbError, DbResult};
use crate::models::{sex_correction, FormKind, SEX_FIELD};

impl Database {
    /// Upsert the given fields of one form for one subject.
    ///
    /// Field names must already be checked against the form's allow-list. An intake
    /// `sex_of_mouse` is written to the subject row itself and never stored as an entry.
    pub fn upsert_form_fields(
        &self,
        subject_id: &str,
        form: FormKind,
        fields: &Map<String, Value>,
    ) -> DbResult<usize> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO form_entries (subject_id, form, field, value, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT (subject_id, form, field) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )?;

        let mut written = 0;
        for (field, value) in fields {
            if form == FormKind::Intake && field == SEX_FIELD {
                let sex = sex_correction(value).ok_or_else(|| {
                    DbError::Constraint(format!("invalid {} value: {}", SEX_FIELD, value))
                })?;
                if !self.set_subject_sex(subject_id, sex)? {
                    return Err(DbError::NotFound(format!("subject {}", subject_id)));
                }
                written += 1;
                continue;
            }
            let value_json = serde_json::to_string(value)?;
            written += stmt.execute(params![subject_id, form.slug(), field, value_json])?;
        }

        self.conn.execute(
            "UPDATE subjects SET updated_at = datetime('now') WHERE subject_id = ?",
            [subject_id],
        )?;
        Ok(written)
    }

    /// All stored fields of one form for one subject (empty if nothing recorded).
    pub fn get_form_fields(&self, subject_id: &str, form: FormKind) -> DbResult<Map<String, Value>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT field, value FROM form_entries
            WHERE subject_id = ? AND form = ?
            ORDER BY field
            "#,
        )?;
        let rows = stmt.query_map(params![subject_id, form.slug()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = Map::new();
        for row in rows {
            let (field, value_json) = row?;
            fields.insert(field, serde_json::from_str(&value_json)?);
        }
        Ok(fields)
    }
}
