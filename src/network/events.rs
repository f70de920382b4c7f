//! Coordinator notifications.
//!
//! Delivered on a broadcast channel in commit order. Every state change a
//! peer applies, whether computed locally or received from the authority,
//! is described by the same events.

use tokio::sync::broadcast;
use tracing::debug;

use crate::game::state::{GameOutcome, GameState, PhaseKind, PlayerId};

/// What the coordinator tells its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// The peer holding a seat came up.
    PeerConnected {
        /// Seat.
        player: PlayerId,
    },
    /// The peer holding a seat went away.
    PeerDisconnected {
        /// Seat.
        player: PlayerId,
    },
    /// A batch was committed locally.
    BatchApplied {
        /// Batch number.
        batch_seq: u64,
    },
    /// The phase changed.
    PhaseChanged {
        /// Phase before.
        from: PhaseKind,
        /// Phase after.
        to: PhaseKind,
    },
    /// The active player changed.
    TurnChanged {
        /// Turn number after the change.
        turn_number: u32,
        /// New active player.
        active_player: PlayerId,
    },
    /// Play is suspended.
    Paused {
        /// Why.
        reason: String,
    },
    /// Play continues.
    Resumed,
    /// Local state disagrees with the authority.
    Divergence {
        /// Local batch number when detected.
        batch_seq: u64,
        /// What disagreed.
        reason: String,
    },
    /// Local state was replaced by the authority's.
    Resynced {
        /// Batch number after the resync.
        batch_seq: u64,
    },
    /// Resync retries ran out.
    DesyncFatal {
        /// Last divergence reason.
        reason: String,
    },
    /// The authority turned this peer away.
    Refused {
        /// Why.
        reason: String,
    },
    /// The link to the authority is gone for good. No further batches
    /// will arrive and submits fail with a connection error.
    ConnectionLost {
        /// Why.
        reason: String,
    },
    /// The game ended.
    GameOver {
        /// Result.
        outcome: GameOutcome,
    },
}

/// The parts of a state that notifications are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateMark {
    phase: PhaseKind,
    turn_number: u32,
    active_player: PlayerId,
    outcome: Option<GameOutcome>,
}

impl StateMark {
    pub(crate) fn of(state: &GameState) -> Self {
        Self {
            phase: state.current_phase,
            turn_number: state.turn_number,
            active_player: state.active_player,
            outcome: state.outcome,
        }
    }

    /// Events describing the move from `self` to `after`.
    pub(crate) fn changes(self, after: &GameState, batch_seq: u64) -> Vec<CoordinatorEvent> {
        let after = Self::of(after);
        let mut events = vec![CoordinatorEvent::BatchApplied { batch_seq }];
        if after.phase != self.phase {
            events.push(CoordinatorEvent::PhaseChanged { from: self.phase, to: after.phase });
        }
        if after.active_player != self.active_player || after.turn_number != self.turn_number {
            events.push(CoordinatorEvent::TurnChanged {
                turn_number: after.turn_number,
                active_player: after.active_player,
            });
        }
        if let (None, Some(outcome)) = (self.outcome, after.outcome) {
            events.push(CoordinatorEvent::GameOver { outcome });
        }
        events
    }
}

/// Send events in order. Nobody listening is fine.
pub(crate) fn publish(tx: &broadcast::Sender<CoordinatorEvent>, events: impl IntoIterator<Item = CoordinatorEvent>) {
    for event in events {
        debug!(?event, "Coordinator event");
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::diff::{apply_diffs, Diff};
    use crate::game::setup::demo_state;

    #[test]
    fn test_changes_detects_phase_and_turn() {
        let before = demo_state();
        let mark = StateMark::of(&before);
        let after = apply_diffs(&before, &[
            Diff::set("current_phase", "command"),
            Diff::set("active_player", 2),
        ])
        .unwrap();

        let events = mark.changes(&after, 4);
        assert_eq!(events[0], CoordinatorEvent::BatchApplied { batch_seq: 4 });
        assert!(events.contains(&CoordinatorEvent::PhaseChanged { from: PhaseKind::Deployment, to: PhaseKind::Command }));
        assert!(events.contains(&CoordinatorEvent::TurnChanged { turn_number: before.turn_number, active_player: PlayerId::TWO }));
    }

    #[test]
    fn test_no_change_only_reports_batch() {
        let state = demo_state();
        assert_eq!(StateMark::of(&state).changes(&state, 1), vec![CoordinatorEvent::BatchApplied { batch_seq: 1 }]);
    }
}
