//! Turn Phases
//!
//! A state machine over the phases of a turn. Each phase is a struct
//! implementing [`Phase`]; [`PhaseInstance`] dispatches to the one matching
//! the current [`PhaseKind`]. Phase structs hold only transient, phase-local
//! working state. Anything that must outlive the phase is written to
//! `GameState` through diffs.
//!
//! ## Module Structure
//!
//! - `deployment`, `command`, `movement`, `shooting`, `charge`, `fight`,
//!   `morale`, `scoring`: one phase each
//! - `activation`: fight tiers and alternating selection
//! - `resolution`: attack sequences and wound allocation shared by
//!   shooting and fighting

pub mod activation;
pub mod charge;
pub mod command;
pub mod deployment;
pub mod fight;
pub mod morale;
pub mod movement;
pub mod resolution;
pub mod scoring;
pub mod shooting;

use serde::{Serialize, Deserialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GameConfig;
use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::{apply_diffs, model_field, Diff};
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{GameOutcome, GameState, OpenSequence, OutcomeReason, PhaseKind, PlayerId, Position, Unit};
use crate::rules::RuleEvaluator;

pub use activation::{ActivationOrder, FightTier};
pub use charge::ChargePhase;
pub use command::CommandPhase;
pub use deployment::DeploymentPhase;
pub use fight::FightPhase;
pub use morale::MoralePhase;
pub use movement::MovementPhase;
pub use scoring::ScoringPhase;
pub use shooting::ShootingPhase;

// =============================================================================
// PHASE INTERFACE
// =============================================================================

/// Read-only inputs every phase operation sees.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    /// Current committed state.
    pub state: &'a GameState,
    /// Rule content.
    pub rules: &'a dyn RuleEvaluator,
    /// Game settings.
    pub config: &'a GameConfig,
}

/// What the next step of an open sequence is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    /// Attacker resolves the next weapon.
    ContinueSequence,
    /// Defender orders wound allocation.
    WoundAllocation,
    /// Attacker closes the shooting sequence.
    CompleteSequence,
    /// Selected fighter resolves its attacks.
    ResolveMelee,
    /// Selected fighter closes its activation.
    CompleteActivation,
}

/// Whether an action closed its sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    /// Nothing left open.
    #[default]
    Complete,
    /// Diffs applied, but the sequence needs another action.
    Paused {
        /// Expected next step.
        awaiting: Awaiting,
        /// Player expected to send it.
        player: PlayerId,
    },
}

impl Completion {
    /// Pause awaiting `awaiting` from `player`.
    pub fn paused(awaiting: Awaiting, player: PlayerId) -> Self {
        Completion::Paused { awaiting, player }
    }

    /// Whether this is a pause.
    pub fn is_paused(&self) -> bool {
        matches!(self, Completion::Paused { .. })
    }
}

/// Result of phase processing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseOutput {
    /// State changes to apply atomically.
    pub diffs: Vec<Diff>,
    /// What happened, for logs and UI.
    pub side_effects: Vec<GameEvent>,
    /// Open-sequence status.
    pub completion: Completion,
}

impl PhaseOutput {
    /// Completed output with the given diffs and events.
    pub fn complete(diffs: Vec<Diff>, side_effects: Vec<GameEvent>) -> Self {
        Self { diffs, side_effects, completion: Completion::Complete }
    }
}

/// Validation verdict. Carries every failed check, not just the first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    /// Whether the action may be processed.
    pub valid: bool,
    /// Reasons it may not.
    pub errors: Vec<String>,
}

impl Validation {
    /// Valid.
    pub fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    /// Valid iff `errors` is empty.
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors }
    }

    /// Invalid for one reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::from_errors(vec![reason.into()])
    }

    /// Convert to a `RuleViolation` on failure.
    pub fn into_result(self) -> Result<(), ActionError> {
        if self.valid {
            Ok(())
        } else {
            Err(ActionError::RuleViolation { reasons: self.errors })
        }
    }
}

/// A turn phase.
pub trait Phase {
    /// Which phase this is.
    fn kind(&self) -> PhaseKind;

    /// Entry effects. `ctx.state` already reflects the transition into this phase.
    fn enter(&mut self, _ctx: &PhaseContext<'_>) -> PhaseOutput {
        PhaseOutput::default()
    }

    /// Exit effects, produced as part of the `end_phase` batch.
    fn exit(&mut self, _ctx: &PhaseContext<'_>) -> Vec<Diff> {
        Vec::new()
    }

    /// Rebuild phase-local state from a restored snapshot, without side effects.
    fn resume(&mut self, _ctx: &PhaseContext<'_>) {}

    /// Check a command against the current state.
    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation;

    /// Produce the effects of a validated command.
    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        player: PlayerId,
        command: &Command,
        dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError>;

    /// Whether `end_phase` is allowed.
    fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool;
}

// =============================================================================
// SHARED CHECKS
// =============================================================================

/// Rejection for a command the phase does not handle.
pub(crate) fn not_in_phase(kind: PhaseKind, command: &Command) -> Validation {
    Validation::fail(format!("{} is not allowed in the {} phase", command_name(command), kind))
}

/// Failure for a target point outside the board.
pub(crate) fn off_board(ctx: &PhaseContext<'_>, at: Position) -> Option<Validation> {
    if ctx.state.board.contains(at) {
        return None;
    }
    Some(Validation::fail(format!(
        "({}, {}) is off the board ({}x{})",
        at.x, at.y, ctx.state.board.width, ctx.state.board.height
    )))
}

pub(crate) fn command_name(command: &Command) -> &'static str {
    match command {
        Command::DeployUnit { .. } => "deploy_unit",
        Command::EndPhase => "end_phase",
        Command::MoveUnit { .. } => "move_unit",
        Command::SelectShooter { .. } => "select_shooter",
        Command::ContinueSequence => "continue_sequence",
        Command::AllocateWounds { .. } => "allocate_wounds",
        Command::CompleteSequence => "complete_sequence",
        Command::DeclareCharge { .. } => "declare_charge",
        Command::SelectFighter { .. } => "select_fighter",
        Command::ResolveMelee { .. } => "resolve_melee",
        Command::CompleteActivation => "complete_activation",
        Command::BattleShockTest { .. } => "battle_shock_test",
        Command::ScoreObjective { .. } => "score_objective",
        Command::Concede => "concede",
    }
}

/// Look up a unit `player` owns that can still act, recording failures.
pub(crate) fn own_unit<'a>(
    state: &'a GameState,
    player: PlayerId,
    unit_id: &str,
    errors: &mut Vec<String>,
) -> Option<&'a Unit> {
    let Some(unit) = state.unit(unit_id) else {
        errors.push(format!("unknown unit '{}'", unit_id));
        return None;
    };
    if unit.owner != player {
        errors.push(format!("unit '{}' is not owned by {}", unit_id, player));
    }
    if !unit.is_active() {
        errors.push(format!("unit '{}' is destroyed", unit_id));
    }
    Some(unit)
}

/// Look up an enemy of `player` that can still be targeted, recording failures.
pub(crate) fn enemy_unit<'a>(
    state: &'a GameState,
    player: PlayerId,
    unit_id: &str,
    errors: &mut Vec<String>,
) -> Option<&'a Unit> {
    let Some(unit) = state.unit(unit_id) else {
        errors.push(format!("unknown target '{}'", unit_id));
        return None;
    };
    if unit.owner == player {
        errors.push(format!("target '{}' is a friendly unit", unit_id));
    }
    if !unit.is_active() {
        errors.push(format!("target '{}' is destroyed", unit_id));
    }
    Some(unit)
}

/// Whether `unit` is within engagement range of any living enemy.
pub(crate) fn near_enemy(ctx: &PhaseContext<'_>, unit: &Unit) -> bool {
    ctx.state
        .units_of(unit.owner.opponent())
        .filter(|e| e.is_active())
        .any(|e| ctx.rules.in_engagement(unit, e))
}

/// Diffs placing a unit's living models at `positions`, in roster order.
pub(crate) fn placement_diffs(unit: &Unit, positions: &[Position]) -> Vec<Diff> {
    unit.models
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_alive())
        .zip(positions)
        .map(|((idx, _), pos)| {
            Diff::set(model_field(&unit.id, idx, "position"), json!({ "x": pos.x, "y": pos.y }))
        })
        .collect()
}

/// Rejection for a command reaching `process` without passing `validate`.
pub(crate) fn unsupported(kind: PhaseKind, command: &Command) -> ActionError {
    ActionError::RuleViolation { reasons: not_in_phase(kind, command).errors }
}

/// Dice are attached by the processor for randomness-consuming commands.
pub(crate) fn require_dice(dice: Option<&mut DiceStream>) -> Result<&mut DiceStream, ActionError> {
    dice.ok_or_else(|| ActionError::Internal("command needs dice but no seed was attached".into()))
}

/// Diff that opens, advances or (with `None`) closes the open sequence.
pub(crate) fn sequence_diff(open: Option<OpenSequence>) -> Result<Diff, ActionError> {
    Diff::set_serialized("open_sequence", &open).map_err(|e| ActionError::Internal(e.to_string()))
}

/// Diff that records the game result.
pub fn outcome_diff(outcome: &GameOutcome) -> Result<Diff, ActionError> {
    Diff::set_serialized("outcome", outcome).map_err(|e| ActionError::Internal(e.to_string()))
}

// =============================================================================
// PHASE INSTANCE
// =============================================================================

/// Enum dispatch over the concrete phases.
#[derive(Clone, Debug)]
pub enum PhaseInstance {
    /// Deployment.
    Deployment(DeploymentPhase),
    /// Command.
    Command(CommandPhase),
    /// Movement.
    Movement(MovementPhase),
    /// Shooting.
    Shooting(ShootingPhase),
    /// Charge.
    Charge(ChargePhase),
    /// Fight.
    Fight(FightPhase),
    /// Morale.
    Morale(MoralePhase),
    /// Scoring.
    Scoring(ScoringPhase),
}

impl PhaseInstance {
    /// Fresh phase object for a kind.
    pub fn for_kind(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Deployment => PhaseInstance::Deployment(DeploymentPhase),
            PhaseKind::Command => PhaseInstance::Command(CommandPhase),
            PhaseKind::Movement => PhaseInstance::Movement(MovementPhase),
            PhaseKind::Shooting => PhaseInstance::Shooting(ShootingPhase),
            PhaseKind::Charge => PhaseInstance::Charge(ChargePhase),
            PhaseKind::Fight => PhaseInstance::Fight(FightPhase::default()),
            PhaseKind::Morale => PhaseInstance::Morale(MoralePhase),
            PhaseKind::Scoring => PhaseInstance::Scoring(ScoringPhase::default()),
        }
    }

    /// Borrow as a trait object.
    pub fn phase(&self) -> &dyn Phase {
        match self {
            PhaseInstance::Deployment(p) => p,
            PhaseInstance::Command(p) => p,
            PhaseInstance::Movement(p) => p,
            PhaseInstance::Shooting(p) => p,
            PhaseInstance::Charge(p) => p,
            PhaseInstance::Fight(p) => p,
            PhaseInstance::Morale(p) => p,
            PhaseInstance::Scoring(p) => p,
        }
    }

    /// Mutably borrow as a trait object.
    pub fn phase_mut(&mut self) -> &mut dyn Phase {
        match self {
            PhaseInstance::Deployment(p) => p,
            PhaseInstance::Command(p) => p,
            PhaseInstance::Movement(p) => p,
            PhaseInstance::Shooting(p) => p,
            PhaseInstance::Charge(p) => p,
            PhaseInstance::Fight(p) => p,
            PhaseInstance::Morale(p) => p,
            PhaseInstance::Scoring(p) => p,
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Owns the current phase object and sequences phase transitions.
#[derive(Clone, Debug)]
pub struct PhaseController {
    current: PhaseInstance,
}

impl PhaseController {
    /// Controller for the phase recorded in `ctx.state`.
    ///
    /// Used at start-up and after a restore; phase-local state is rebuilt
    /// from what the state records.
    pub fn resume(ctx: &PhaseContext<'_>) -> Self {
        let mut current = PhaseInstance::for_kind(ctx.state.current_phase);
        current.phase_mut().resume(ctx);
        Self { current }
    }

    /// Current phase kind.
    pub fn kind(&self) -> PhaseKind {
        self.current.phase().kind()
    }

    /// Current phase object.
    pub fn current(&self) -> &PhaseInstance {
        &self.current
    }

    /// Whether the current phase may end.
    pub fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool {
        self.current.phase().is_complete(ctx)
    }

    /// Validate a command.
    pub fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        if ctx.state.is_over() {
            return Validation::fail("the game is over");
        }
        match command {
            Command::Concede => Validation::ok(),
            Command::EndPhase => {
                if self.is_complete(ctx) {
                    Validation::ok()
                } else {
                    Validation::fail(format!("the {} phase is not complete", self.kind()))
                }
            }
            other => self.current.phase().validate(ctx, player, other),
        }
    }

    /// Process a validated command.
    pub fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        player: PlayerId,
        command: &Command,
        dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        match command {
            Command::Concede => {
                let outcome = GameOutcome { winner: Some(player.opponent()), reason: OutcomeReason::Concession };
                Ok(PhaseOutput::complete(
                    vec![outcome_diff(&outcome)?],
                    vec![GameEvent::GameEnded { outcome }],
                ))
            }
            Command::EndPhase => self.end_phase(ctx),
            other => self.current.phase_mut().process(ctx, player, other, dice),
        }
    }

    /// Exit the current phase, transition, and enter the next one, as one batch.
    fn end_phase(&mut self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, ActionError> {
        let mut diffs = self.current.phase_mut().exit(ctx);
        let transition = plan_transition(ctx.state, ctx.config)?;
        diffs.extend(transition.diffs);
        let mut side_effects = transition.events;

        if let Some(next_kind) = transition.next {
            let scratch = apply_diffs(ctx.state, &diffs)
                .map_err(|e| ActionError::Internal(e.to_string()))?;
            let next_ctx = PhaseContext { state: &scratch, ..*ctx };

            let mut next = PhaseInstance::for_kind(next_kind);
            let entry = next.phase_mut().enter(&next_ctx);
            debug!(from = %ctx.state.current_phase, to = %next_kind, entry_diffs = entry.diffs.len(), "Phase transition");

            diffs.extend(entry.diffs);
            side_effects.extend(entry.side_effects);
            self.current = next;
        }

        Ok(PhaseOutput::complete(diffs, side_effects))
    }
}

struct Transition {
    next: Option<PhaseKind>,
    diffs: Vec<Diff>,
    events: Vec<GameEvent>,
}

fn phase_diff(kind: PhaseKind) -> Diff {
    Diff::set("current_phase", kind.as_str())
}

fn plan_transition(state: &GameState, config: &GameConfig) -> Result<Transition, ActionError> {
    let from = state.current_phase;
    match from {
        PhaseKind::Deployment => {
            let other = state.active_player.opponent();
            if state.units_of(other).any(|u| !u.is_deployed()) {
                // Hand deployment over
                return Ok(Transition {
                    next: Some(PhaseKind::Deployment),
                    diffs: vec![Diff::set("active_player", other.0), phase_diff(PhaseKind::Deployment)],
                    events: vec![GameEvent::TurnChanged {
                        turn_number: state.turn_number,
                        battle_round: state.battle_round,
                        active_player: other,
                    }],
                });
            }
            Ok(Transition {
                next: Some(PhaseKind::Command),
                diffs: vec![
                    Diff::set("turn_number", 1),
                    Diff::set("battle_round", 1),
                    Diff::set("active_player", state.first_player.0),
                    phase_diff(PhaseKind::Command),
                ],
                events: vec![
                    GameEvent::PhaseChanged { from, to: PhaseKind::Command },
                    GameEvent::TurnChanged { turn_number: 1, battle_round: 1, active_player: state.first_player },
                ],
            })
        }
        PhaseKind::Scoring => {
            let next_player = state.active_player.opponent();
            let round_over = next_player == state.first_player;

            if round_over && state.battle_round >= config.max_battle_rounds {
                let outcome = points_outcome(state);
                return Ok(Transition {
                    next: None,
                    diffs: vec![outcome_diff(&outcome)?],
                    events: vec![GameEvent::GameEnded { outcome }],
                });
            }

            let turn_number = state.turn_number + 1;
            let battle_round = if round_over { state.battle_round + 1 } else { state.battle_round };
            Ok(Transition {
                next: Some(PhaseKind::Command),
                diffs: vec![
                    Diff::set("active_player", next_player.0),
                    Diff::set("turn_number", turn_number),
                    Diff::set("battle_round", battle_round),
                    phase_diff(PhaseKind::Command),
                ],
                events: vec![
                    GameEvent::PhaseChanged { from, to: PhaseKind::Command },
                    GameEvent::TurnChanged { turn_number, battle_round, active_player: next_player },
                ],
            })
        }
        other => {
            let to = other.next();
            Ok(Transition {
                next: Some(to),
                diffs: vec![phase_diff(to)],
                events: vec![GameEvent::PhaseChanged { from, to }],
            })
        }
    }
}

/// Winner on victory points; equal points is a draw.
pub fn points_outcome(state: &GameState) -> GameOutcome {
    let vp = |p: PlayerId| state.player(p).map_or(0, |r| r.victory_points);
    let (one, two) = (vp(PlayerId::ONE), vp(PlayerId::TWO));
    let winner = match one.cmp(&two) {
        std::cmp::Ordering::Greater => Some(PlayerId::ONE),
        std::cmp::Ordering::Less => Some(PlayerId::TWO),
        std::cmp::Ordering::Equal => None,
    };
    GameOutcome { winner, reason: OutcomeReason::VictoryPoints }
}

/// `null` or the player number, for `selecting_player` diffs.
pub(crate) fn player_value(player: Option<PlayerId>) -> Value {
    player.map_or(Value::Null, |p| Value::from(p.0))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::setup::{demo_state, line_profile, GameSetup, UnitSpec};
    use crate::rules::StandardRules;

    pub(crate) const RULES: StandardRules = StandardRules;

    /// Validate, process and apply one command; panics on rejection.
    pub(crate) fn run(
        controller: &mut PhaseController,
        state: &mut GameState,
        config: &GameConfig,
        player: PlayerId,
        command: Command,
        seed: u64,
    ) -> PhaseOutput {
        let ctx = PhaseContext { state, rules: &RULES, config };
        controller.validate(&ctx, player, &command).into_result().unwrap();
        let mut dice = DiceStream::new(seed);
        let output = controller.process(&ctx, player, &command, Some(&mut dice)).unwrap();
        *state = apply_diffs(state, &output.diffs).unwrap();
        output
    }

    pub(crate) fn check(
        controller: &PhaseController,
        state: &GameState,
        config: &GameConfig,
        player: PlayerId,
        command: &Command,
    ) -> Validation {
        let ctx = PhaseContext { state, rules: &RULES, config };
        controller.validate(&ctx, player, command)
    }

    fn controller_for(state: &GameState, config: &GameConfig) -> PhaseController {
        PhaseController::resume(&PhaseContext { state, rules: &RULES, config })
    }

    #[test]
    fn test_full_turn_cycle() {
        let config = GameConfig::default();
        let mut state = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 1).at(Position::new(5, 5)))
            .unit(UnitSpec::new("b", PlayerId::TWO, line_profile(), 1).at(Position::new(5, 50)))
            .start_in(PhaseKind::Command, PlayerId::ONE)
            .build()
            .unwrap();
        let mut controller = controller_for(&state, &config);

        let mut seen = vec![state.current_phase];
        for _ in 0..7 {
            run(&mut controller, &mut state, &config, PlayerId::ONE, Command::EndPhase, 0);
            seen.push(state.current_phase);
            assert_eq!(controller.kind(), state.current_phase);
        }
        assert_eq!(seen, vec![
            PhaseKind::Command, PhaseKind::Movement, PhaseKind::Shooting, PhaseKind::Charge,
            PhaseKind::Fight, PhaseKind::Morale, PhaseKind::Scoring, PhaseKind::Command,
        ]);
        assert_eq!(state.active_player, PlayerId::TWO);
        assert_eq!(state.turn_number, 2);
        assert_eq!(state.battle_round, 1);
    }

    #[test]
    fn test_round_advances_after_second_player() {
        let config = GameConfig::default();
        let mut state = GameSetup::new()
            .start_in(PhaseKind::Scoring, PlayerId::TWO)
            .build()
            .unwrap();
        let mut controller = controller_for(&state, &config);

        run(&mut controller, &mut state, &config, PlayerId::TWO, Command::EndPhase, 0);
        assert_eq!(state.active_player, PlayerId::ONE);
        assert_eq!(state.battle_round, 2);
        assert_eq!(state.current_phase, PhaseKind::Command);
    }

    #[test]
    fn test_game_ends_after_last_round() {
        let config = GameConfig { max_battle_rounds: 1, ..GameConfig::default() };
        let mut state = GameSetup::new()
            .start_in(PhaseKind::Scoring, PlayerId::TWO)
            .build()
            .unwrap();
        state.players.get_mut(&PlayerId::TWO).unwrap().victory_points = 10;
        let mut controller = controller_for(&state, &config);

        let output = run(&mut controller, &mut state, &config, PlayerId::TWO, Command::EndPhase, 0);
        let outcome = state.outcome.unwrap();
        assert_eq!(outcome.winner, Some(PlayerId::TWO));
        assert_eq!(outcome.reason, OutcomeReason::VictoryPoints);
        assert!(output.side_effects.iter().any(|e| matches!(e, GameEvent::GameEnded { .. })));

        let v = check(&controller, &state, &config, PlayerId::ONE, &Command::EndPhase);
        assert!(!v.valid);
    }

    #[test]
    fn test_concede_any_phase() {
        let config = GameConfig::default();
        let mut state = demo_state();
        let mut controller = controller_for(&state, &config);
        run(&mut controller, &mut state, &config, PlayerId::TWO, Command::Concede, 0);
        assert_eq!(
            state.outcome,
            Some(GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::Concession })
        );
    }

    #[test]
    fn test_command_outside_its_phase_rejected() {
        let config = GameConfig::default();
        let state = demo_state();
        let controller = controller_for(&state, &config);
        let v = check(&controller, &state, &config, PlayerId::ONE, &Command::ContinueSequence);
        assert!(!v.valid);
        assert!(v.errors[0].contains("deployment"));
    }

    #[test]
    fn test_points_outcome_draw() {
        let state = demo_state();
        assert_eq!(points_outcome(&state).winner, None);
    }

    #[test]
    fn test_validation_into_result() {
        assert!(Validation::ok().into_result().is_ok());
        let err = Validation::from_errors(vec!["a".into(), "b".into()]).into_result().unwrap_err();
        assert_eq!(err, ActionError::RuleViolation { reasons: vec!["a".into(), "b".into()] });
    }
}
