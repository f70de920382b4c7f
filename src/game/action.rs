//! Player Actions
//!
//! An `Action` is what a peer submits: a type, the claimed player, a per-player
//! sequence number and an untyped JSON payload. Before anything else looks at
//! it, the payload is parsed into a typed [`Command`].

use serde::{Serialize, Deserialize};
use serde_json::Value;

use super::error::ActionError;
use super::state::{PlayerId, Position, UnitId};

// =============================================================================
// ACTION TYPE
// =============================================================================

/// Who may submit an action type relative to the active player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnRule {
    /// Only the active player.
    ActiveOnly,
    /// Response to the opponent's action (e.g. wound allocation).
    Reactive,
    /// Part of a sub-phase where control alternates (fight activations).
    CrossTurn,
    /// Either player at any time.
    AnyTime,
}

/// Action type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Place a unit during deployment.
    DeployUnit,
    /// End the current phase.
    EndPhase,
    /// Move a unit.
    MoveUnit,
    /// Open a shooting sequence.
    SelectShooter,
    /// Resolve the next step of the open sequence.
    ContinueSequence,
    /// Defender orders which models take wounds.
    AllocateWounds,
    /// Close the open shooting sequence.
    CompleteSequence,
    /// Declare a charge.
    DeclareCharge,
    /// Pick the next unit to fight.
    SelectFighter,
    /// Resolve the selected fighter's attacks.
    ResolveMelee,
    /// Finish the selected fighter's activation.
    CompleteActivation,
    /// Take a battle-shock test.
    BattleShockTest,
    /// Score a controlled objective.
    ScoreObjective,
    /// Concede the game.
    Concede,
}

impl ActionType {
    /// Turn-ownership capability of this action type.
    pub fn turn_rule(self) -> TurnRule {
        match self {
            ActionType::AllocateWounds => TurnRule::Reactive,
            ActionType::SelectFighter
            | ActionType::ResolveMelee
            | ActionType::CompleteActivation => TurnRule::CrossTurn,
            ActionType::Concede => TurnRule::AnyTime,
            _ => TurnRule::ActiveOnly,
        }
    }

    /// Whether the active-player check is skipped for this type.
    #[inline]
    pub fn is_turn_exempt(self) -> bool {
        self.turn_rule() != TurnRule::ActiveOnly
    }

    /// Whether `actor_unit_id` must be present.
    pub fn requires_actor(self) -> bool {
        matches!(
            self,
            ActionType::DeployUnit
                | ActionType::MoveUnit
                | ActionType::SelectShooter
                | ActionType::DeclareCharge
                | ActionType::SelectFighter
                | ActionType::ResolveMelee
                | ActionType::BattleShockTest
        )
    }
}

// =============================================================================
// ACTION
// =============================================================================

/// Seed attached by the authority to a randomness-consuming action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    /// Derived seed for this action's dice.
    pub seed: u64,
    /// Counter value the seed was minted from.
    pub rng_counter: u64,
}

/// A submitted player command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Type tag.
    pub action_type: ActionType,
    /// Acting unit, when the type needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_unit_id: Option<UnitId>,
    /// Claimed player.
    pub player: PlayerId,
    /// Per-player strictly increasing sequence number.
    pub sequence_id: u64,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: Value,
    /// Authority-minted randomness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ActionContext>,
}

impl Action {
    /// Create an action with an empty payload.
    pub fn new(action_type: ActionType, player: PlayerId, sequence_id: u64) -> Self {
        Self {
            action_type,
            actor_unit_id: None,
            player,
            sequence_id,
            payload: Value::Null,
            context: None,
        }
    }

    /// Set the acting unit.
    pub fn with_actor(mut self, unit_id: impl Into<UnitId>) -> Self {
        self.actor_unit_id = Some(unit_id.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Parse into a typed command.
    pub fn parse(&self) -> Result<Command, ActionError> {
        if !self.player.is_valid() {
            return Err(ActionError::Schema(format!("unknown player {}", self.player.0)));
        }

        let actor = match (&self.actor_unit_id, self.action_type.requires_actor()) {
            (Some(id), _) => {
                validate_unit_id(id)?;
                Some(id.clone())
            }
            (None, true) => {
                return Err(ActionError::Schema(format!(
                    "{:?} requires actor_unit_id",
                    self.action_type
                )))
            }
            (None, false) => None,
        };
        // Present whenever requires_actor() holds
        let unit = || actor.clone().unwrap_or_default();

        let command = match self.action_type {
            ActionType::DeployUnit => {
                let p: PointPayload = self.payload_as()?;
                Command::DeployUnit { unit: unit(), at: Position::new(p.x, p.y) }
            }
            ActionType::EndPhase => Command::EndPhase,
            ActionType::MoveUnit => {
                let p: MovePayload = self.payload_as()?;
                Command::MoveUnit { unit: unit(), to: Position::new(p.x, p.y), advance: p.advance }
            }
            ActionType::SelectShooter => {
                let p: TargetPayload = self.payload_as()?;
                validate_unit_id(&p.target)?;
                Command::SelectShooter { unit: unit(), target: p.target }
            }
            ActionType::ContinueSequence => Command::ContinueSequence,
            ActionType::AllocateWounds => {
                let p: AllocatePayload = self.payload_as()?;
                Command::AllocateWounds { models: p.models }
            }
            ActionType::CompleteSequence => Command::CompleteSequence,
            ActionType::DeclareCharge => {
                let p: TargetPayload = self.payload_as()?;
                validate_unit_id(&p.target)?;
                Command::DeclareCharge { unit: unit(), target: p.target }
            }
            ActionType::SelectFighter => Command::SelectFighter { unit: unit() },
            ActionType::ResolveMelee => {
                let p: TargetPayload = self.payload_as()?;
                validate_unit_id(&p.target)?;
                Command::ResolveMelee { unit: unit(), target: p.target }
            }
            ActionType::CompleteActivation => Command::CompleteActivation,
            ActionType::BattleShockTest => Command::BattleShockTest { unit: unit() },
            ActionType::ScoreObjective => {
                let p: ObjectivePayload = self.payload_as()?;
                Command::ScoreObjective { objective: p.objective }
            }
            ActionType::Concede => Command::Concede,
        };
        Ok(command)
    }

    fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ActionError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ActionError::Schema(format!("{:?} payload: {}", self.action_type, e))
        })
    }
}

/// Unit ids are used as diff path segments.
pub fn validate_unit_id(id: &str) -> Result<(), ActionError> {
    if id.is_empty() {
        return Err(ActionError::Schema("empty unit id".to_string()));
    }
    if id.contains('.') {
        return Err(ActionError::Schema(format!("unit id '{}' contains '.'", id)));
    }
    Ok(())
}

#[derive(Deserialize)]
struct PointPayload {
    x: i32,
    y: i32,
}

#[derive(Deserialize)]
struct MovePayload {
    x: i32,
    y: i32,
    #[serde(default)]
    advance: bool,
}

#[derive(Deserialize)]
struct TargetPayload {
    target: UnitId,
}

#[derive(Deserialize)]
struct AllocatePayload {
    models: Vec<String>,
}

#[derive(Deserialize)]
struct ObjectivePayload {
    objective: u32,
}

// =============================================================================
// COMMAND
// =============================================================================

/// Typed, schema-checked command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Place a unit with its first model at `at`.
    DeployUnit {
        /// Unit to place.
        unit: UnitId,
        /// Where its first model goes.
        at: Position,
    },
    /// End the current phase.
    EndPhase,
    /// Move a unit so its first model ends at `to`.
    MoveUnit {
        /// Unit to move.
        unit: UnitId,
        /// Destination of its first model.
        to: Position,
        /// Roll to move further, giving up shooting and charging.
        advance: bool,
    },
    /// Open a shooting sequence.
    SelectShooter {
        /// Shooting unit.
        unit: UnitId,
        /// Enemy unit shot at.
        target: UnitId,
    },
    /// Resolve the next weapon.
    ContinueSequence,
    /// Order in which the defender's models take wounds.
    AllocateWounds {
        /// Model ids, first to take wounds first. Unlisted models follow in roster order.
        models: Vec<String>,
    },
    /// Close the shooting sequence.
    CompleteSequence,
    /// Declare a charge.
    DeclareCharge {
        /// Charging unit.
        unit: UnitId,
        /// Enemy unit charged.
        target: UnitId,
    },
    /// Select a fighter.
    SelectFighter {
        /// Unit to activate.
        unit: UnitId,
    },
    /// Resolve the fighter's melee attacks.
    ResolveMelee {
        /// Activated unit.
        unit: UnitId,
        /// Enemy unit in engagement range.
        target: UnitId,
    },
    /// Finish the current activation.
    CompleteActivation,
    /// Take a battle-shock test.
    BattleShockTest {
        /// Unit tested.
        unit: UnitId,
    },
    /// Score an objective.
    ScoreObjective {
        /// Objective number on the board.
        objective: u32,
    },
    /// Concede.
    Concede,
}

impl Command {
    /// Whether processing this command draws dice.
    pub fn consumes_randomness(&self) -> bool {
        match self {
            Command::MoveUnit { advance, .. } => *advance,
            Command::ContinueSequence
            | Command::DeclareCharge { .. }
            | Command::ResolveMelee { .. }
            | Command::BattleShockTest { .. } => true,
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
