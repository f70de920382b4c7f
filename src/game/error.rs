//! Action errors.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::store::StoreError;
use crate::core::rng::RngError;

/// Why an action was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    /// Malformed action or payload.
    #[error("schema error: {0}")]
    Schema(String),

    /// Sender may not act for the claimed player, or it is not their turn.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Well-formed and authorized, but illegal in the current state.
    #[error("rule violation: {}", .reasons.join("; "))]
    RuleViolation {
        /// Every failed check.
        reasons: Vec<String>,
    },

    /// Peers disagree about the state.
    #[error("desync: {0}")]
    Desync(String),

    /// The peer link is down or the session is gone.
    #[error("connection error: {0}")]
    Connection(String),

    /// Processing failed after validation; nothing was applied.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Rule violation with a single reason.
    pub fn rule(reason: impl Into<String>) -> Self {
        ActionError::RuleViolation { reasons: vec![reason.into()] }
    }

    /// Whether the same action may succeed later without changes.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ActionError::RuleViolation { .. } | ActionError::Connection(_))
    }
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Gap { .. } => ActionError::Desync(err.to_string()),
            other => ActionError::Internal(other.to_string()),
        }
    }
}

impl From<RngError> for ActionError {
    fn from(err: RngError) -> Self {
        match err {
            RngError::NotAuthority => ActionError::Authorization(err.to_string()),
            other => ActionError::Desync(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_violation_lists_reasons() {
        let err = ActionError::RuleViolation {
            reasons: vec!["unit has moved".into(), "target out of range".into()],
        };
        assert_eq!(err.to_string(), "rule violation: unit has moved; target out of range");
    }

    #[test]
    fn test_wire_shape() {
        let err = ActionError::rule("no");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rule_violation");
        assert_eq!(json["detail"]["reasons"][0], "no");
        let back: ActionError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_conversions() {
        let gap: ActionError = StoreError::Gap { expected: 2, got: 4 }.into();
        assert!(matches!(gap, ActionError::Desync(_)));

        let rng: ActionError = RngError::NotAuthority.into();
        assert!(matches!(rng, ActionError::Authorization(_)));
    }
}
