//! Researcher (HQP) accounts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Profile keys a researcher may change after registration.
pub const PROFILE_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "occupation",
    "site",
    "study_involved_in",
    "lead_hqp",
    "tasks_completed",
    "sops_trainings_completed",
];

/// A registered researcher, without credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Researcher {
    /// Local UUID
    pub researcher_id: String,
    /// Human-readable id: initials + 3-digit serial (e.g. "JD001")
    pub hqp_id: String,
    pub serial_number: u32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub occupation: Option<String>,
    pub site: Option<String>,
    /// Free-form profile data (studies, SOP trainings, tasks)
    pub profile: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// A registration request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub profile: Map<String, Value>,
}

impl Registration {
    pub fn validate(&self) -> Result<(), String> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err("first and last name are required".into());
        }
        if !looks_like_email(&self.email) {
            return Err(format!("invalid email address '{}'", self.email));
        }
        if self.password.is_empty() {
            return Err("password must not be empty".into());
        }
        Ok(())
    }
}

/// Minimal shape check: one '@' with a non-empty local part and a dotted domain.
pub fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// HQP identifier from first letters of first and last name plus a 3-digit serial.
pub fn format_hqp_id(first_name: &str, last_name: &str, serial: u32) -> String {
    let initial = |s: &str| {
        s.trim()
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect::<String>())
            .unwrap_or_default()
    };
    format!("{}{}{:03}", initial(first_name), initial(last_name), serial)
}

/// Salted SHA-256 digest of a password, hex-encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fresh random salt.
pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reject profile updates that touch anything outside [`PROFILE_FIELDS`].
pub fn validate_profile_update(fields: &Map<String, Value>) -> Result<(), String> {
    if fields.is_empty() {
        return Err("no profile fields submitted".into());
    }
    let mut rejected: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|key| !PROFILE_FIELDS.contains(key))
        .collect();
    if !rejected.is_empty() {
        rejected.sort_unstable();
        return Err(format!("profile field(s) not allowed: {}", rejected.join(", ")));
    }
    for name_field in ["first_name", "last_name"] {
        match fields.get(name_field) {
            None => {}
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => return Err(format!("{} must be a non-empty string", name_field)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_hqp_id() {
        assert_eq!(format_hqp_id("jane", "Doe", 1), "JD001");
        assert_eq!(format_hqp_id("Émile", "roy", 42), "ÉR042");
    }

    #[test]
    fn test_hash_password_is_salted() {
        let a = hash_password("secret", "salt-a");
        let b = hash_password("secret", "salt-b");
        assert_ne!(a, b);
        assert_eq!(a, hash_password("secret", "salt-a"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("jane.doe@uottawa.ca"));
        assert!(!looks_like_email("jane.doe"));
        assert!(!looks_like_email("@uottawa.ca"));
        assert!(!looks_like_email("jane@localhost"));
        assert!(!looks_like_email("jane doe@uottawa.ca"));
    }

    #[test]
    fn test_profile_update_allow_list() {
        let mut fields = Map::new();
        fields.insert("occupation".into(), json!("Technician"));
        assert!(validate_profile_update(&fields).is_ok());

        fields.insert("password_hash".into(), json!("x"));
        assert!(validate_profile_update(&fields)
            .unwrap_err()
            .contains("password_hash"));

        let mut blank_name = Map::new();
        blank_name.insert("last_name".into(), json!(" "));
        assert!(validate_profile_update(&blank_name).is_err());
    }
}
