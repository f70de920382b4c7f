//! Scoring phase: victory points for controlled objectives.

use std::collections::BTreeSet;

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::{player_field, Diff};
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{PhaseKind, PlayerId};

use super::{not_in_phase, unsupported, Phase, PhaseContext, PhaseOutput, Validation};

/// Scoring phase. Each objective scores at most once per turn.
#[derive(Clone, Debug, Default)]
pub struct ScoringPhase {
    scored: BTreeSet<u32>,
}

impl ScoringPhase {
    /// Objectives scored so far this phase.
    pub fn scored(&self) -> &BTreeSet<u32> {
        &self.scored
    }
}

impl Phase for ScoringPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Scoring
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let Command::ScoreObjective { objective } = command else {
            return not_in_phase(self.kind(), command);
        };

        let Some(marker) = ctx.state.board.objective(*objective) else {
            return Validation::fail(format!("unknown objective {}", objective));
        };
        let mut errors = Vec::new();
        if self.scored.contains(objective) {
            errors.push(format!("objective {} has already been scored this turn", objective));
        }
        if !ctx.rules.controls_objective(ctx.state, player, marker) {
            errors.push(format!("{} does not control objective {}", player, objective));
        }
        Validation::from_errors(errors)
    }

    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        player: PlayerId,
        command: &Command,
        _dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        let Command::ScoreObjective { objective } = command else {
            return Err(unsupported(self.kind(), command));
        };
        let record = ctx
            .state
            .player(player)
            .ok_or_else(|| ActionError::Internal(format!("no record for {}", player)))?;

        let points = ctx.config.objective_vp;
        self.scored.insert(*objective);
        Ok(PhaseOutput::complete(
            vec![Diff::set(player_field(player, "victory_points"), record.victory_points + points)],
            vec![GameEvent::ObjectiveScored { player, objective: *objective, points }],
        ))
    }

    fn is_complete(&self, _ctx: &PhaseContext<'_>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::setup::{line_profile, GameSetup, UnitSpec};
    use crate::game::state::{flags, Position};
    use crate::phase::tests::{check, run, RULES};
    use crate::phase::PhaseController;

    #[test]
    fn test_score_controlled_objective_once() {
        let config = GameConfig::default();
        let mut state = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 2).at(Position::new(22, 29)))
            .unit(UnitSpec::new("b", PlayerId::TWO, line_profile(), 1).at(Position::new(8, 31)))
            .start_in(PhaseKind::Scoring, PlayerId::ONE)
            .build()
            .unwrap();
        let mut controller = PhaseController::resume(&PhaseContext { state: &state, rules: &RULES, config: &config });

        run(&mut controller, &mut state, &config, PlayerId::ONE, Command::ScoreObjective { objective: 1 }, 0);
        assert_eq!(state.players[&PlayerId::ONE].victory_points, 5);

        let again = check(&controller, &state, &config, PlayerId::ONE, &Command::ScoreObjective { objective: 1 });
        assert!(!again.valid);
        // Held by the other player
        assert!(!check(&controller, &state, &config, PlayerId::ONE, &Command::ScoreObjective { objective: 2 }).valid);
        assert!(!check(&controller, &state, &config, PlayerId::ONE, &Command::ScoreObjective { objective: 9 }).valid);
    }

    #[test]
    fn test_battle_shocked_units_do_not_control() {
        let config = GameConfig::default();
        let state = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 2).at(Position::new(22, 29)).flag(flags::BATTLE_SHOCKED))
            .start_in(PhaseKind::Scoring, PlayerId::ONE)
            .build()
            .unwrap();
        let controller = PhaseController::resume(&PhaseContext { state: &state, rules: &RULES, config: &config });
        assert!(!check(&controller, &state, &config, PlayerId::ONE, &Command::ScoreObjective { objective: 1 }).valid);
    }
}
