//! Form-completion stages and combined-stage rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest stage name accepted.
pub const MAX_STAGE_NAME_LEN: usize = 128;

/// Status of one stage. A stage that was never marked is simply absent from the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
        }
    }
}

/// Per-subject completion map, keyed by stage name.
pub type FormCompletion = BTreeMap<String, StageStatus>;

/// A derived stage that completes once all of its prerequisite stages complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedStage {
    pub stage: &'static str,
    pub prerequisites: &'static [&'static str],
}

/// The fixed combined-stage rule table.
pub const COMBINED_STAGES: &[CombinedStage] = &[CombinedStage {
    stage: "SyringePrep",
    prerequisites: &["SyringePrep T minus 1", "SyringePrep T 3"],
}];

/// Check a stage name before it is used as a JSON object key in the store.
pub fn validate_stage_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("stage name must not be empty".into());
    }
    if name.chars().count() > MAX_STAGE_NAME_LEN {
        return Err(format!(
            "stage name exceeds {} characters",
            MAX_STAGE_NAME_LEN
        ));
    }
    if name.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(format!("stage name '{}' contains invalid characters", name.escape_default()));
    }
    Ok(())
}

/// SQLite JSON path addressing a top-level key. The key must already be validated.
pub(crate) fn json_key_path(name: &str) -> String {
    format!("$.\"{}\"", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_stage_name() {
        assert!(validate_stage_name("SyringePrep T minus 1").is_ok());
        assert!(validate_stage_name("").is_err());
        assert!(validate_stage_name("   ").is_err());
        assert!(validate_stage_name("bad\"name").is_err());
        assert!(validate_stage_name("line\nbreak").is_err());
        assert!(validate_stage_name(&"x".repeat(MAX_STAGE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let mut completion = FormCompletion::new();
        completion.insert("Housing".into(), StageStatus::Completed);
        assert_eq!(
            serde_json::to_string(&completion).unwrap(),
            r#"{"Housing":"completed"}"#
        );
    }
}
