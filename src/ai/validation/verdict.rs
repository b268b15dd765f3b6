//! Validation verdicts produced by the judging tasks.

use serde::Serialize;
use serde_json::Value;

use super::ExpectedShape;
use crate::constants::rework::VALIDATION_UNAVAILABLE;
use crate::types::{json_flag, json_string};

/// Two-tier judgement of one generation attempt.
///
/// Validity implies acceptability; the constructor normalizes the pair so
/// callers never see `is_valid && !is_acceptable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    is_valid: bool,
    is_acceptable: bool,
    feedback: String,
}

impl ValidationVerdict {
    pub fn new(is_valid: bool, is_acceptable: bool, feedback: impl Into<String>) -> Self {
        Self {
            is_valid,
            is_acceptable: is_acceptable || is_valid,
            feedback: feedback.into(),
        }
    }

    /// Synthetic verdict used when the judging call failed or was unreadable
    pub fn unavailable() -> Self {
        Self::new(false, false, VALIDATION_UNAVAILABLE)
    }

    /// Shape the judging tasks are parsed against
    pub fn shape() -> ExpectedShape {
        ExpectedShape::single_object(["is_valid", "is_acceptable", "feedback"])
    }

    /// Read a verdict from parsed judge output. At least one of the two
    /// flags must be present; a missing flag counts as false.
    pub fn from_value(value: &Value) -> Option<Self> {
        let is_valid = json_flag(value, "is_valid");
        let is_acceptable = json_flag(value, "is_acceptable");
        if is_valid.is_none() && is_acceptable.is_none() {
            return None;
        }

        let feedback = ["feedback", "issues", "reason", "comments"]
            .iter()
            .find_map(|key| json_string(value, key))
            .unwrap_or_default();

        Some(Self::new(
            is_valid.unwrap_or(false),
            is_acceptable.unwrap_or(false),
            feedback.trim(),
        ))
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_acceptable(&self) -> bool {
        self.is_acceptable
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_implies_acceptable() {
        let verdict = ValidationVerdict::new(true, false, "");
        assert!(verdict.is_valid());
        assert!(verdict.is_acceptable());

        let parsed =
            ValidationVerdict::from_value(&json!({"is_valid": true, "is_acceptable": false}))
                .unwrap();
        assert!(parsed.is_acceptable());
    }

    #[test]
    fn test_from_value_lenient_types() {
        let verdict = ValidationVerdict::from_value(&json!({
            "is_valid": "false",
            "is_acceptable": "yes",
            "feedback": ["too long", "missing citation"]
        }))
        .unwrap();
        assert!(!verdict.is_valid());
        assert!(verdict.is_acceptable());
        assert_eq!(verdict.feedback(), "too long\nmissing citation");
    }

    #[test]
    fn test_from_value_requires_a_flag() {
        assert!(ValidationVerdict::from_value(&json!({"feedback": "hm"})).is_none());
    }

    #[test]
    fn test_unavailable() {
        let verdict = ValidationVerdict::unavailable();
        assert!(!verdict.is_valid());
        assert!(!verdict.is_acceptable());
        assert_eq!(verdict.feedback(), "validation could not be obtained");
    }
}
