//! Game Events
//!
//! Side effects reported by phase processing. They describe what happened
//! (rolls, results) for logs and UI; state changes themselves travel as diffs.

use serde::{Serialize, Deserialize};

use super::state::{GameOutcome, PhaseKind, PlayerId, Position, UnitId};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// Unit placed on the board
    UnitDeployed {
        unit: UnitId,
        at: Position,
    },

    /// Unit moved
    UnitMoved {
        unit: UnitId,
        to: Position,
        /// Advance roll, when advancing
        advance_roll: Option<u32>,
    },

    /// One weapon's attacks resolved
    AttackResolved {
        attacker: UnitId,
        target: UnitId,
        weapon: String,
        hits: u32,
        wounds: u32,
        unsaved: u32,
    },

    /// Defender's models took damage
    WoundsAllocated {
        target: UnitId,
        damage: u32,
        models_slain: u32,
    },

    /// Every model in the unit is dead
    UnitDestroyed {
        unit: UnitId,
    },

    /// Charge roll
    ChargeDeclared {
        unit: UnitId,
        target: UnitId,
        roll: u32,
        needed: u32,
        success: bool,
    },

    /// Fighter picked during alternating activation
    FighterSelected {
        unit: UnitId,
        player: PlayerId,
    },

    /// Battle-shock roll
    BattleShockTested {
        unit: UnitId,
        roll: u32,
        passed: bool,
    },

    /// Objective scored
    ObjectiveScored {
        player: PlayerId,
        objective: u32,
        points: u32,
    },

    /// Phase changed
    PhaseChanged {
        from: PhaseKind,
        to: PhaseKind,
    },

    /// Active player changed
    TurnChanged {
        turn_number: u32,
        battle_round: u32,
        active_player: PlayerId,
    },

    /// Game ended
    GameEnded {
        outcome: GameOutcome,
    },
}

impl GameEvent {
    /// Player primarily involved, if the event names one.
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            GameEvent::FighterSelected { player, .. } => Some(*player),
            GameEvent::ObjectiveScored { player, .. } => Some(*player),
            GameEvent::TurnChanged { active_player, .. } => Some(*active_player),
            GameEvent::GameEnded { outcome } => outcome.winner,
            _ => None,
        }
    }
}
