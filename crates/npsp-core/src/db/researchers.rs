//! Researcher (HQP) account operations.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::{Database, DbError, DbResult};
use crate::models::{json_key_path, Researcher};

const RESEARCHER_COLUMNS: &str = r#"
    researcher_id, hqp_id, serial_number, first_name, last_name, email,
    occupation, site, profile, created_at, updated_at
"#;

/// Stored password material for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub password_hash: String,
    pub password_salt: String,
}

impl Database {
    /// Highest serial number issued so far (0 if none).
    pub fn max_serial_number(&self) -> DbResult<u32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(serial_number), 0) FROM researchers",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Insert a new account.
    pub fn insert_researcher(
        &self,
        researcher: &Researcher,
        credentials: &StoredCredentials,
    ) -> DbResult<()> {
        let profile_json = serde_json::to_string(&researcher.profile)?;

        self.conn.execute(
            r#"
            INSERT INTO researchers (
                researcher_id, hqp_id, serial_number, first_name, last_name, email,
                password_hash, password_salt, occupation, site, profile,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                researcher.researcher_id,
                researcher.hqp_id,
                researcher.serial_number,
                researcher.first_name,
                researcher.last_name,
                researcher.email,
                credentials.password_hash,
                credentials.password_salt,
                researcher.occupation,
                researcher.site,
                profile_json,
                researcher.created_at,
                researcher.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an account by email (case-insensitive).
    pub fn get_researcher_by_email(&self, email: &str) -> DbResult<Option<Researcher>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM researchers WHERE email = ?", RESEARCHER_COLUMNS),
                [email.trim()],
                ResearcherRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Password material for an account, if the email is registered.
    pub fn get_credentials(&self, email: &str) -> DbResult<Option<StoredCredentials>> {
        self.conn
            .query_row(
                "SELECT password_hash, password_salt FROM researchers WHERE email = ?",
                [email.trim()],
                |row| {
                    Ok(StoredCredentials {
                        password_hash: row.get(0)?,
                        password_salt: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all accounts in serial order.
    pub fn list_researchers(&self) -> DbResult<Vec<Researcher>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM researchers ORDER BY serial_number",
            RESEARCHER_COLUMNS
        ))?;
        let rows = stmt.query_map([], ResearcherRow::from_row)?;

        let mut researchers = Vec::new();
        for row in rows {
            researchers.push(row?.try_into()?);
        }
        Ok(researchers)
    }

    /// Apply an allow-listed profile update. Returns false if the email is unknown.
    ///
    /// Name, occupation and site go to their columns; every other key is merged into
    /// the profile object.
    pub fn update_researcher_profile(
        &self,
        email: &str,
        fields: &Map<String, Value>,
    ) -> DbResult<bool> {
        let email = email.trim();
        let mut touched = 0;

        for (key, value) in fields {
            touched += match core_column(key) {
                Some(column) => self.conn.execute(
                    &format!(
                        "UPDATE researchers SET {} = ?1, updated_at = datetime('now') WHERE email = ?2",
                        column
                    ),
                    params![value_as_text(value), email],
                )?,
                None => self.conn.execute(
                    r#"
                    UPDATE researchers SET
                        profile = json_set(profile, ?1, json(?2)),
                        updated_at = datetime('now')
                    WHERE email = ?3
                    "#,
                    params![json_key_path(key), serde_json::to_string(value)?, email],
                )?,
            };
        }
        Ok(touched > 0)
    }
}

/// Profile keys stored in their own column.
fn core_column(key: &str) -> Option<&'static str> {
    match key {
        "first_name" => Some("first_name"),
        "last_name" => Some("last_name"),
        "occupation" => Some("occupation"),
        "site" => Some("site"),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Intermediate row struct for database mapping.
struct ResearcherRow {
    researcher_id: String,
    hqp_id: String,
    serial_number: u32,
    first_name: String,
    last_name: String,
    email: String,
    occupation: Option<String>,
    site: Option<String>,
    profile: String,
    created_at: String,
    updated_at: String,
}

impl ResearcherRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ResearcherRow {
            researcher_id: row.get(0)?,
            hqp_id: row.get(1)?,
            serial_number: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            email: row.get(5)?,
            occupation: row.get(6)?,
            site: row.get(7)?,
            profile: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl TryFrom<ResearcherRow> for Researcher {
    type Error = DbError;

    fn try_from(row: ResearcherRow) -> Result<Self, Self::Error> {
        Ok(Researcher {
            researcher_id: row.researcher_id,
            hqp_id: row.hqp_id,
            serial_number: row.serial_number,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            occupation: row.occupation,
            site: row.site,
            profile: serde_json::from_str(&row.profile)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
