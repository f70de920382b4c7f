//! Action Processor
//!
//! The single entry point for commands. An action passes, in order:
//!
//! 1. schema (payload parses into a [`Command`])
//! 2. ordering (`sequence_id` beats the player's last accepted id)
//! 3. turn ownership (unless the action type is exempt)
//! 4. phase rules
//!
//! and is then processed on a staged copy of the phase controller. The
//! resulting diffs, plus one recording the player's `sequence_id`, are
//! committed as one numbered batch; only then does the staged controller
//! replace the live one. Any failure leaves no trace.

use std::sync::Arc;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::core::hash::{short_hex, Checksum};
use crate::core::rng::{DeterministicRandomService, RngSeedRecord};
use crate::phase::{command_name, outcome_diff, Completion, PhaseContext, PhaseController};
use crate::rules::{RuleEvaluator, StandardRules};

use super::action::{Action, ActionContext, Command};
use super::diff::{Diff, DiffBatch};
use super::error::ActionError;
use super::events::GameEvent;
use super::log::ActionLog;
use super::state::{GameOutcome, GameState, OutcomeReason, PhaseKind, PlayerId};
use super::store::{ApplyStatus, StateSnapshot, StateStore};

// =============================================================================
// RESULT
// =============================================================================

/// Phase transition caused by an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    /// Phase before.
    pub from: PhaseKind,
    /// Phase after.
    pub to: PhaseKind,
}

/// Bookkeeping attached to every accepted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    /// Batch the diffs were committed as.
    pub batch_seq: u64,
    /// Whether the sequence is closed or waiting on another action.
    pub completion: Completion,
    /// Seed consumed, if any.
    pub context: Option<ActionContext>,
    /// Random service record after the action.
    pub rng: RngSeedRecord,
    /// Phase transition, if the action caused one.
    pub phase_change: Option<PhaseChange>,
    /// Player whose turn it is after the action.
    pub active_player: PlayerId,
    /// Set when the action ended the game.
    pub game_over: Option<GameOutcome>,
}

/// Outcome of an accepted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Always `true`; rejections are returned as `ActionError`.
    pub success: bool,
    /// Committed diffs.
    pub diffs: Vec<Diff>,
    /// Human-readable summary.
    pub message: String,
    /// What happened.
    pub events: Vec<GameEvent>,
    /// Bookkeeping.
    pub metadata: ActionMetadata,
}

impl ActionResult {
    /// The committed batch, as broadcast to replicas.
    pub fn batch(&self) -> DiffBatch {
        DiffBatch { batch_seq: self.metadata.batch_seq, diffs: self.diffs.clone() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SeedSource {
    /// Authority mints a fresh seed.
    Mint,
    /// Use the seed recorded in the action.
    Recorded,
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Validates, processes and commits actions against one game.
#[derive(Debug)]
pub struct ActionProcessor {
    store: StateStore,
    controller: PhaseController,
    rules: Arc<dyn RuleEvaluator>,
    rng: DeterministicRandomService,
    config: GameConfig,
    log: ActionLog,
}

impl ActionProcessor {
    /// Processor over an initial state.
    pub fn new(
        state: GameState,
        rules: Arc<dyn RuleEvaluator>,
        rng: DeterministicRandomService,
        config: GameConfig,
    ) -> Self {
        let controller = PhaseController::resume(&PhaseContext {
            state: &state,
            rules: rules.as_ref(),
            config: &config,
        });
        Self {
            store: StateStore::new(state),
            controller,
            rules,
            rng,
            config,
            log: ActionLog::new(),
        }
    }

    /// Authority processor with the standard rules and default settings.
    pub fn offline(state: GameState, session_seed: u64) -> Self {
        Self::new(
            state,
            Arc::new(StandardRules),
            DeterministicRandomService::authority(session_seed),
            GameConfig::default(),
        )
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> &GameState {
        self.store.state()
    }

    /// Last committed batch number.
    #[inline]
    pub fn batch_seq(&self) -> u64 {
        self.store.batch_seq()
    }

    /// Checksum of the current state.
    pub fn checksum(&self) -> Checksum {
        self.store.state().checksum()
    }

    /// Random service record.
    pub fn rng_record(&self) -> RngSeedRecord {
        self.rng.record()
    }

    /// Whether this processor computes diffs.
    pub fn is_authority(&self) -> bool {
        self.rng.is_authority()
    }

    /// Phase controller.
    pub fn controller(&self) -> &PhaseController {
        &self.controller
    }

    /// Accepted actions.
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Game settings.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Rule content.
    pub fn rules(&self) -> Arc<dyn RuleEvaluator> {
        Arc::clone(&self.rules)
    }

    /// Last accepted `sequence_id` for a player.
    pub fn last_sequence(&self, player: PlayerId) -> Option<u64> {
        self.store.state().last_sequence.get(&player).copied()
    }

    /// Whether the current phase may end.
    pub fn phase_complete(&self) -> bool {
        self.controller.is_complete(&PhaseContext {
            state: self.store.state(),
            rules: self.rules.as_ref(),
            config: &self.config,
        })
    }

    /// Reject actions from a player whose turn it is not, unless the action
    /// type is exempt.
    pub fn check_turn(&self, action: &Action) -> Result<(), ActionError> {
        let active = self.store.state().active_player;
        if action.action_type.is_turn_exempt() || action.player == active {
            return Ok(());
        }
        Err(ActionError::Authorization(format!(
            "{:?} by {} during {}'s turn",
            action.action_type, action.player, active
        )))
    }

    /// Validate and execute an action, minting a seed if it needs one.
    ///
    /// Only an authority computes diffs; a replica gets `Authorization`.
    pub fn submit(&mut self, action: Action) -> Result<ActionResult, ActionError> {
        if !self.rng.is_authority() {
            return Err(ActionError::Authorization("only the authority executes actions".into()));
        }
        self.execute(action, SeedSource::Mint)
    }

    /// Re-execute a logged action with the seed it originally consumed.
    pub fn replay(&mut self, action: Action) -> Result<ActionResult, ActionError> {
        self.execute(action, SeedSource::Recorded)
    }

    fn execute(&mut self, mut action: Action, source: SeedSource) -> Result<ActionResult, ActionError> {
        let result = self.try_execute(&mut action, source);
        match &result {
            Ok(res) => {
                info!(
                    player = %action.player,
                    action = ?action.action_type,
                    batch_seq = res.metadata.batch_seq,
                    diffs = res.diffs.len(),
                    "Action applied"
                );
                self.log.record(res.metadata.batch_seq, action);
            }
            Err(err) => {
                debug!(player = %action.player, action = ?action.action_type, error = %err, "Action rejected");
            }
        }
        result
    }

    fn try_execute(&mut self, action: &mut Action, source: SeedSource) -> Result<ActionResult, ActionError> {
        // 1. Schema
        let command = action.parse()?;
        let player = action.player;

        // 2. Ordering
        if let Some(last) = self.last_sequence(player) {
            if action.sequence_id <= last {
                return Err(ActionError::Schema(format!(
                    "sequence_id {} is not after {} for {}",
                    action.sequence_id, last, player
                )));
            }
        }

        // 3. Turn ownership
        self.check_turn(action)?;

        let state = self.store.state();
        let ctx = PhaseContext { state, rules: self.rules.as_ref(), config: &self.config };

        // 4. Phase rules
        self.controller.validate(&ctx, player, &command).into_result()?;

        // 5. Randomness
        let context = if command.consumes_randomness() {
            Some(match source {
                SeedSource::Mint => {
                    let rng_counter = self.rng.record().counter;
                    let seed = self.rng.next_seed(state.turn_number)?;
                    ActionContext { seed, rng_counter }
                }
                SeedSource::Recorded => {
                    let recorded = action
                        .context
                        .ok_or_else(|| ActionError::Schema("replayed action carries no seed".into()))?;
                    let session_seed = self.rng.record().session_seed;
                    self.rng.observe(RngSeedRecord { session_seed, counter: recorded.rng_counter + 1 })?;
                    recorded
                }
            })
        } else {
            None
        };
        let mut dice = context.map(|c| self.rng.draw(c.seed));

        // 6. Process on a staged copy
        let mut staged = self.controller.clone();
        let mut output = staged.process(&ctx, player, &command, dice.as_mut())?;
        output.diffs.push(Diff::set(format!("last_sequence.{}", player.0), action.sequence_id));

        // 7. Game-ending checks against the would-be state
        let preview = self.store.preview(&output.diffs)?;
        if let Some(outcome) = annihilation(&preview) {
            output.diffs.push(outcome_diff(&outcome)?);
            output.side_effects.push(GameEvent::GameEnded { outcome });
        }

        let from = state.current_phase;

        // 8. Commit
        let batch = self.store.commit(output.diffs)?;
        self.controller = staged;
        action.context = context;

        #[cfg(feature = "debug-tracing")]
        for diff in &batch.diffs {
            tracing::trace!(batch_seq = batch.batch_seq, op = ?diff.op, path = %diff.path, value = %diff.value, "Diff");
        }

        let after = self.store.state();
        let phase_change = (after.current_phase != from).then_some(PhaseChange { from, to: after.current_phase });
        let message = match output.completion {
            Completion::Complete => format!("{} applied", command_name(&command)),
            Completion::Paused { awaiting, player } => {
                format!("{} applied, awaiting {:?} from {}", command_name(&command), awaiting, player)
            }
        };

        Ok(ActionResult {
            success: true,
            diffs: batch.diffs,
            message,
            events: output.side_effects,
            metadata: ActionMetadata {
                batch_seq: batch.batch_seq,
                completion: output.completion,
                context,
                rng: self.rng.record(),
                phase_change,
                active_player: after.active_player,
                game_over: after.outcome,
            },
        })
    }

    /// Apply an authority batch verbatim, without recomputation.
    pub fn apply_remote(&mut self, batch: &DiffBatch, rng: RngSeedRecord) -> Result<ApplyStatus, ActionError> {
        let status = self.store.apply_batch(batch)?;
        if status == ApplyStatus::Applied {
            self.rng.observe(rng)?;
            self.resume_controller();
        }
        Ok(status)
    }

    /// Commit authority-originated diffs that no player action produced
    /// (forfeit, turn timeout).
    pub fn apply_system(&mut self, diffs: Vec<Diff>) -> Result<DiffBatch, ActionError> {
        if !self.rng.is_authority() {
            return Err(ActionError::Authorization("only the authority commits system batches".into()));
        }
        let from = self.store.state().current_phase;
        let batch = self.store.commit(diffs)?;
        if self.store.state().current_phase != from {
            self.resume_controller();
        }
        info!(batch_seq = batch.batch_seq, diffs = batch.diffs.len(), "System batch applied");
        Ok(batch)
    }

    /// Record the game result once. Returns `None` if the game already ended.
    pub fn end_game(&mut self, outcome: GameOutcome) -> Result<Option<DiffBatch>, ActionError> {
        if self.store.state().is_over() {
            return Ok(None);
        }
        self.apply_system(vec![outcome_diff(&outcome)?]).map(Some)
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.store.snapshot()
    }

    /// Replace the state with a snapshot and rebuild the phase object.
    pub fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), ActionError> {
        self.store.restore(snapshot)?;
        self.resume_controller();
        info!(
            batch_seq = self.store.batch_seq(),
            checksum = %short_hex(&self.checksum()),
            "State restored"
        );
        Ok(())
    }

    /// Restore a snapshot and adopt the authority's random record.
    pub fn resync(&mut self, snapshot: StateSnapshot, rng: RngSeedRecord) -> Result<(), ActionError> {
        self.restore(snapshot)?;
        self.rng.reset(rng);
        Ok(())
    }

    fn resume_controller(&mut self) {
        self.controller = PhaseController::resume(&PhaseContext {
            state: self.store.state(),
            rules: self.rules.as_ref(),
            config: &self.config,
        });
    }
}

/// Outcome when a player has nothing left on the table.
fn annihilation(state: &GameState) -> Option<GameOutcome> {
    if state.is_over() || state.battle_round == 0 {
        return None;
    }
    let wiped = |p: PlayerId| !state.units_of(p).any(|u| u.is_active());
    let winner = match (wiped(PlayerId::ONE), wiped(PlayerId::TWO)) {
        (false, false) => return None,
        (true, true) => None,
        (true, false) => Some(PlayerId::TWO),
        (false, true) => Some(PlayerId::ONE),
    };
    Some(GameOutcome { winner, reason: OutcomeReason::Annihilation })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    use crate::game::action::ActionType;
    use crate::game::setup::{demo_state, horde_profile, line_profile, GameSetup, UnitSpec};
    use crate::game::state::{flags, Position};
    use crate::phase::Awaiting;

    /// Submits actions with per-player sequence numbers.
    struct Script {
        processor: ActionProcessor,
        next: BTreeMap<PlayerId, u64>,
    }

    impl Script {
        fn new(processor: ActionProcessor) -> Self {
            Self { processor, next: BTreeMap::new() }
        }

        fn action(&mut self, action_type: ActionType, player: PlayerId) -> Action {
            let seq = self.next.entry(player).or_insert(0);
            *seq += 1;
            Action::new(action_type, player, *seq)
        }

        fn send(&mut self, action: Action) -> Result<ActionResult, ActionError> {
            self.processor.submit(action)
        }

        fn end_phase(&mut self, player: PlayerId) -> Result<ActionResult, ActionError> {
            let a = self.action(ActionType::EndPhase, player);
            self.send(a)
        }

        fn allocate_if_asked(&mut self, result: &Result<ActionResult, ActionError>) {
            if let Ok(res) = result {
                if let Completion::Paused { awaiting: Awaiting::WoundAllocation, player } = res.metadata.completion {
                    let a = self.action(ActionType::AllocateWounds, player).with_payload(json!({ "models": [] }));
                    let _ = self.send(a);
                }
            }
        }
    }

    fn battle_state() -> GameState {
        GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 5).at(Position::new(10, 20)))
            .unit(UnitSpec::new("b", PlayerId::TWO, horde_profile(), 10).at(Position::new(10, 34)))
            .start_in(PhaseKind::Movement, PlayerId::ONE)
            .build()
            .unwrap()
    }

    /// Movement through scoring for player one, reacting to pauses.
    fn play_turn(s: &mut Script) -> Vec<bool> {
        let mut accepted = Vec::new();
        let one = PlayerId::ONE;

        let a = s.action(ActionType::MoveUnit, one).with_actor("a").with_payload(json!({ "x": 10, "y": 26 }));
        accepted.push(s.send(a).is_ok());
        accepted.push(s.end_phase(one).is_ok());

        let a = s.action(ActionType::SelectShooter, one).with_actor("a").with_payload(json!({ "target": "b" }));
        accepted.push(s.send(a).is_ok());
        let a = s.action(ActionType::ContinueSequence, one);
        let res = s.send(a);
        accepted.push(res.is_ok());
        s.allocate_if_asked(&res);
        let a = s.action(ActionType::CompleteSequence, one);
        accepted.push(s.send(a).is_ok());
        accepted.push(s.end_phase(one).is_ok());

        let a = s.action(ActionType::DeclareCharge, one).with_actor("a").with_payload(json!({ "target": "b" }));
        accepted.push(s.send(a).is_ok());
        accepted.push(s.end_phase(one).is_ok());

        for _ in 0..4 {
            let (unit, target) = match s.processor.state().selecting_player {
                Some(PlayerId::ONE) => ("a", "b"),
                Some(_) => ("b", "a"),
                None => break,
            };
            let selector = s.processor.state().selecting_player.unwrap_or(one);
            let a = s.action(ActionType::SelectFighter, selector).with_actor(unit);
            accepted.push(s.send(a).is_ok());
            let a = s.action(ActionType::ResolveMelee, selector).with_actor(unit).with_payload(json!({ "target": target }));
            let res = s.send(a);
            accepted.push(res.is_ok());
            s.allocate_if_asked(&res);
            let a = s.action(ActionType::CompleteActivation, selector);
            accepted.push(s.send(a).is_ok());
        }

        accepted.push(s.end_phase(one).is_ok());
        accepted.push(s.end_phase(one).is_ok());
        accepted
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let mut first = Script::new(ActionProcessor::offline(battle_state(), 42));
        let mut second = Script::new(ActionProcessor::offline(battle_state(), 42));

        let a = play_turn(&mut first);
        let b = play_turn(&mut second);
        assert_eq!(a, b);
        assert_eq!(first.processor.checksum(), second.processor.checksum());
        assert_eq!(first.processor.rng_record(), second.processor.rng_record());
        assert_eq!(first.processor.batch_seq(), second.processor.batch_seq());
        assert!(first.processor.rng_record().counter > 0);
    }

    #[test]
    fn test_replay_reproduces_state() {
        let mut authority = Script::new(ActionProcessor::offline(battle_state(), 7));
        play_turn(&mut authority);

        let mut replica = ActionProcessor::new(
            battle_state(),
            Arc::new(StandardRules),
            DeterministicRandomService::replica(7),
            GameConfig::default(),
        );
        for action in authority.processor.log().actions() {
            replica.replay(action.clone()).unwrap();
        }
        assert_eq!(replica.checksum(), authority.processor.checksum());
        assert_eq!(replica.rng_record(), authority.processor.rng_record());
    }

    #[test]
    fn test_remote_batches_track_authority() {
        let mut authority = ActionProcessor::offline(battle_state(), 3);
        let mut replica = ActionProcessor::new(
            battle_state(),
            Arc::new(StandardRules),
            DeterministicRandomService::replica(3),
            GameConfig::default(),
        );

        let move_a = Action::new(ActionType::MoveUnit, PlayerId::ONE, 1)
            .with_actor("a")
            .with_payload(json!({ "x": 10, "y": 24, "advance": true }));
        let result = authority.submit(move_a).unwrap();
        assert!(result.metadata.context.is_some());

        let batch = result.batch();
        assert_eq!(replica.apply_remote(&batch, result.metadata.rng).unwrap(), ApplyStatus::Applied);
        assert_eq!(replica.apply_remote(&batch, result.metadata.rng).unwrap(), ApplyStatus::Duplicate);
        assert_eq!(replica.checksum(), authority.checksum());
        assert_eq!(replica.rng_record(), authority.rng_record());
        assert_eq!(replica.last_sequence(PlayerId::ONE), Some(1));

        // Phase change on the authority moves the replica's controller along
        let end = Action::new(ActionType::EndPhase, PlayerId::ONE, 2);
        let result = authority.submit(end).unwrap();
        replica.apply_remote(&result.batch(), result.metadata.rng).unwrap();
        assert_eq!(replica.controller().kind(), PhaseKind::Shooting);
    }

    #[test]
    fn test_replica_cannot_submit() {
        let mut replica = ActionProcessor::new(
            battle_state(),
            Arc::new(StandardRules),
            DeterministicRandomService::replica(3),
            GameConfig::default(),
        );
        let err = replica.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).unwrap_err();
        assert!(matches!(err, ActionError::Authorization(_)));
        assert_eq!(replica.batch_seq(), 0);
    }

    #[test]
    fn test_schema_error_does_not_mutate() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let before = p.checksum();
        let bad = Action::new(ActionType::MoveUnit, PlayerId::ONE, 1)
            .with_actor("a")
            .with_payload(json!({ "x": "ten" }));
        assert!(matches!(p.submit(bad), Err(ActionError::Schema(_))));
        assert_eq!(p.checksum(), before);
        assert_eq!(p.batch_seq(), 0);
        assert_eq!(p.last_sequence(PlayerId::ONE), None);
    }

    #[test]
    fn test_extreme_move_coordinates_are_rule_violations() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let before = p.checksum();
        for (seq, (x, y)) in [(i32::MIN, 0), (0, i32::MIN), (i32::MAX, i32::MAX)].into_iter().enumerate() {
            let action = Action::new(ActionType::MoveUnit, PlayerId::ONE, seq as u64 + 1)
                .with_actor("a")
                .with_payload(json!({ "x": x, "y": y, "advance": true }));
            let err = p.submit(action).unwrap_err();
            assert!(matches!(err, ActionError::RuleViolation { .. }), "{:?}", err);
        }
        assert_eq!(p.checksum(), before);
        assert_eq!(p.batch_seq(), 0);
    }

    #[test]
    fn test_sequence_ids_must_increase() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 5)).unwrap();
        let err = p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 5)).unwrap_err();
        assert!(matches!(err, ActionError::Schema(_)));
        let err = p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 4)).unwrap_err();
        assert!(matches!(err, ActionError::Schema(_)));
        // Independent per player
        assert!(p.submit(Action::new(ActionType::Concede, PlayerId::TWO, 1)).is_ok());
    }

    #[test]
    fn test_turn_ownership() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let err = p.submit(Action::new(ActionType::EndPhase, PlayerId::TWO, 1)).unwrap_err();
        assert!(matches!(err, ActionError::Authorization(_)));
        assert_eq!(p.state().current_phase, PhaseKind::Movement);

        let result = p.submit(Action::new(ActionType::Concede, PlayerId::TWO, 2)).unwrap();
        assert_eq!(
            result.metadata.game_over,
            Some(GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::Concession })
        );
    }

    #[test]
    fn test_rule_violation_reports_every_reason() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let err = p
            .submit(
                Action::new(ActionType::MoveUnit, PlayerId::ONE, 1)
                    .with_actor("b")
                    .with_payload(json!({ "x": 40, "y": 0 })),
            )
            .unwrap_err();
        match err {
            ActionError::RuleViolation { reasons } => assert!(reasons.len() >= 2, "{:?}", reasons),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.batch_seq(), 0);
    }

    #[test]
    fn test_pause_and_explicit_completion() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).unwrap();
        let r = p
            .submit(Action::new(ActionType::SelectShooter, PlayerId::ONE, 2).with_actor("a").with_payload(json!({ "target": "b" })))
            .unwrap();
        assert_eq!(r.metadata.completion, Completion::paused(Awaiting::ContinueSequence, PlayerId::ONE));
        assert!(r.message.contains("awaiting"));

        let r = p.submit(Action::new(ActionType::ContinueSequence, PlayerId::ONE, 3)).unwrap();
        assert!(r.metadata.completion.is_paused());
        assert!(!p.phase_complete());
        assert!(p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 4)).is_err());
    }

    #[test]
    fn test_failed_system_batch_is_atomic() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let before = p.checksum();
        let err = p.apply_system(vec![Diff::set("turn_number", 9), Diff::set("units.ghost.name", "x")]);
        assert!(err.is_err());
        assert_eq!(p.checksum(), before);
        assert_eq!(p.state().turn_number, 1);
        assert_eq!(p.batch_seq(), 0);
    }

    #[test]
    fn test_end_game_sets_outcome_once() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let forfeit = GameOutcome { winner: Some(PlayerId::TWO), reason: OutcomeReason::Forfeit };
        assert!(p.end_game(forfeit).unwrap().is_some());
        let timeout = GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::TurnTimeout };
        assert!(p.end_game(timeout).unwrap().is_none());
        assert_eq!(p.state().outcome, Some(forfeit));
        assert!(p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).is_err());
    }

    #[test]
    fn test_annihilation_ends_game() {
        for session_seed in 0..200u64 {
            let state = GameSetup::new()
                .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 5).at(Position::new(10, 20)))
                .unit(UnitSpec::new("b", PlayerId::TWO, horde_profile(), 1).at(Position::new(10, 34)))
                .start_in(PhaseKind::Shooting, PlayerId::ONE)
                .build()
                .unwrap();
            let mut p = ActionProcessor::offline(state, session_seed);
            p.submit(Action::new(ActionType::SelectShooter, PlayerId::ONE, 1).with_actor("a").with_payload(json!({ "target": "b" })))
                .unwrap();
            let r = p.submit(Action::new(ActionType::ContinueSequence, PlayerId::ONE, 2)).unwrap();
            if r.metadata.completion != Completion::paused(Awaiting::WoundAllocation, PlayerId::TWO) {
                continue;
            }
            let r = p
                .submit(Action::new(ActionType::AllocateWounds, PlayerId::TWO, 1).with_payload(json!({ "models": [] })))
                .unwrap();
            assert_eq!(
                r.metadata.game_over,
                Some(GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::Annihilation })
            );
            assert!(p.state().units["b"].has_flag(flags::DESTROYED));
            return;
        }
        panic!("no seed produced an unsaved wound");
    }

    #[test]
    fn test_snapshot_restore_rebuilds_phase() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        let snap = p.snapshot();
        p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).unwrap();
        assert_eq!(p.controller().kind(), PhaseKind::Shooting);

        p.restore(snap).unwrap();
        assert_eq!(p.controller().kind(), PhaseKind::Movement);
        assert_eq!(p.state().current_phase, PhaseKind::Movement);
    }

    #[test]
    fn test_restore_mid_shooting_sequence() {
        let mut s = Script::new(ActionProcessor::offline(battle_state(), 1));
        let one = PlayerId::ONE;
        let a = s.action(ActionType::MoveUnit, one).with_actor("a").with_payload(json!({ "x": 10, "y": 26 }));
        s.send(a).unwrap();
        s.end_phase(one).unwrap();
        let a = s.action(ActionType::SelectShooter, one).with_actor("a").with_payload(json!({ "target": "b" }));
        s.send(a).unwrap();

        // Snapshot through JSON into a fresh authority
        let json = s.processor.snapshot().to_json().unwrap();
        let mut restored = ActionProcessor::offline(battle_state(), 1);
        restored.restore(StateSnapshot::from_json(&json).unwrap()).unwrap();
        s.processor = restored;
        assert_eq!(s.processor.state().shooting_sequence().map(|q| q.attacker.as_str()), Some("a"));

        let again = s.action(ActionType::SelectShooter, one).with_actor("a").with_payload(json!({ "target": "b" }));
        assert!(matches!(s.send(again), Err(ActionError::RuleViolation { .. })));
        assert!(s.end_phase(one).is_err());

        let a = s.action(ActionType::ContinueSequence, one);
        let res = s.send(a);
        assert!(res.is_ok());
        s.allocate_if_asked(&res);
        let a = s.action(ActionType::CompleteSequence, one);
        s.send(a).unwrap();
        assert!(s.processor.state().units["a"].has_flag(flags::HAS_SHOT));
        assert!(s.processor.state().open_sequence.is_none());
        assert!(s.end_phase(one).is_ok());
    }

    #[test]
    fn test_restored_authority_rejects_replayed_sequence_ids() {
        let mut p = ActionProcessor::offline(battle_state(), 1);
        p.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 5)).unwrap();
        let snap = p.snapshot();

        let mut q = ActionProcessor::offline(battle_state(), 1);
        q.restore(snap).unwrap();
        assert_eq!(q.last_sequence(PlayerId::ONE), Some(5));
        let err = q.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 5)).unwrap_err();
        assert!(matches!(err, ActionError::Schema(_)));
        assert!(q.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 6)).is_ok());
    }

    #[test]
    fn test_deployment_through_processor() {
        let mut p = ActionProcessor::offline(demo_state(), 1);
        let r = p
            .submit(Action::new(ActionType::DeployUnit, PlayerId::ONE, 1).with_actor("p1_captain").with_payload(json!({ "x": 20, "y": 2 })))
            .unwrap();
        assert_eq!(r.events.len(), 1);
        // Deployment never triggers annihilation
        assert_eq!(r.metadata.game_over, None);
    }

    /// Random, seeded action streams keep two authorities in lockstep.
    #[test]
    fn test_random_streams_stay_in_lockstep() {
        let types = [
            ActionType::EndPhase, ActionType::MoveUnit, ActionType::SelectShooter, ActionType::ContinueSequence,
            ActionType::AllocateWounds, ActionType::CompleteSequence, ActionType::DeclareCharge,
            ActionType::SelectFighter, ActionType::ResolveMelee, ActionType::CompleteActivation,
            ActionType::BattleShockTest, ActionType::ScoreObjective,
        ];
        let units = ["a", "b", "ghost"];

        for stream in 0..5u64 {
            let mut gen = StdRng::seed_from_u64(stream);
            let mut left = ActionProcessor::offline(battle_state(), stream);
            let mut right = ActionProcessor::offline(battle_state(), stream);
            let mut seq = [0u64; 2];

            for _ in 0..200 {
                let player = PlayerId(gen.gen_range(1..=2));
                seq[(player.0 - 1) as usize] += 1;
                let mut action = Action::new(types[gen.gen_range(0..types.len())], player, seq[(player.0 - 1) as usize])
                    .with_payload(json!({
                        "x": gen.gen_range(0..44), "y": gen.gen_range(0..60),
                        "target": units[gen.gen_range(0..units.len())],
                        "models": [], "objective": gen.gen_range(1..=4),
                    }));
                if action.action_type.requires_actor() {
                    action = action.with_actor(units[gen.gen_range(0..units.len())]);
                }

                let before = left.checksum();
                let l = left.submit(action.clone());
                let r = right.submit(action);
                assert_eq!(l, r);
                if l.is_err() {
                    assert_eq!(left.checksum(), before);
                }
                assert_eq!(left.checksum(), right.checksum());
            }
        }
    }
}
