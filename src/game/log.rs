//! Action log.
//!
//! Accepted actions in commit order, with the seed each one consumed. The
//! wall-clock timestamp is for humans only and never enters a checksum.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use super::action::Action;

/// One accepted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Batch the action committed as.
    pub batch_seq: u64,
    /// The action, with its minted context attached.
    pub action: Action,
    /// When it was accepted.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only list of accepted actions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionLog {
    entries: Vec<LogEntry>,
}

impl ActionLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted action.
    pub fn record(&mut self, batch_seq: u64, action: Action) {
        self.entries.push(LogEntry { batch_seq, action, recorded_at: Utc::now() });
    }

    /// Entries in commit order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Actions in commit order, for replay.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter().map(|e| &e.action)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::action::ActionType;
    use crate::game::state::PlayerId;

    #[test]
    fn test_record_and_roundtrip() {
        let mut log = ActionLog::new();
        assert!(log.is_empty());
        log.record(1, Action::new(ActionType::EndPhase, PlayerId::ONE, 1));
        log.record(2, Action::new(ActionType::Concede, PlayerId::TWO, 1));

        let json = log.to_json().unwrap();
        let back = ActionLog::from_json(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.entries()[1].batch_seq, 2);
        assert_eq!(back.actions().next().map(|a| a.action_type), Some(ActionType::EndPhase));
    }
}
