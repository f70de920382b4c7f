//! Deployment phase: players place their units inside their own zone.

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{PhaseKind, PlayerId};

use super::{not_in_phase, off_board, own_unit, placement_diffs, unsupported, Phase, PhaseContext, PhaseOutput, Validation};

/// Deployment phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeploymentPhase;

impl Phase for DeploymentPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Deployment
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let Command::DeployUnit { unit, at } = command else {
            return not_in_phase(self.kind(), command);
        };
        if let Some(off_board) = off_board(ctx, *at) {
            return off_board;
        }

        let mut errors = Vec::new();
        let Some(unit) = own_unit(ctx.state, player, unit, &mut errors) else {
            return Validation::from_errors(errors);
        };
        if unit.is_deployed() {
            errors.push(format!("unit '{}' is already deployed", unit.id));
        }

        match ctx.state.board.deployment_zones.get(&player) {
            None => errors.push(format!("{} has no deployment zone", player)),
            Some(zone) => {
                let formation = ctx.rules.formation(*at, unit.alive_count());
                if formation.iter().any(|p| !zone.contains(*p) || !ctx.state.board.contains(*p)) {
                    errors.push(format!(
                        "unit '{}' at ({}, {}) does not fit inside {}'s deployment zone",
                        unit.id, at.x, at.y, player
                    ));
                }
            }
        }

        Validation::from_errors(errors)
    }

    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        _player: PlayerId,
        command: &Command,
        _dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        let Command::DeployUnit { unit, at } = command else {
            return Err(unsupported(self.kind(), command));
        };
        let unit = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;

        let formation = ctx.rules.formation(*at, unit.alive_count());
        Ok(PhaseOutput::complete(
            placement_diffs(unit, &formation),
            vec![GameEvent::UnitDeployed { unit: unit.id.clone(), at: *at }],
        ))
    }

    fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool {
        ctx.state.units_of(ctx.state.active_player).all(|u| u.is_deployed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::setup::demo_state;
    use crate::game::state::Position;
    use crate::phase::tests::{check, run, RULES};
    use crate::phase::PhaseController;

    fn deploy(unit: &str, x: i32, y: i32) -> Command {
        Command::DeployUnit { unit: unit.into(), at: Position::new(x, y) }
    }

    #[test]
    fn test_deploy_and_hand_over() {
        let config = GameConfig::default();
        let mut state = demo_state();
        let mut controller = PhaseController::resume(&PhaseContext { state: &state, rules: &RULES, config: &config });

        assert!(!check(&controller, &state, &config, PlayerId::ONE, &Command::EndPhase).valid);

        run(&mut controller, &mut state, &config, PlayerId::ONE, deploy("p1_captain", 20, 2), 0);
        run(&mut controller, &mut state, &config, PlayerId::ONE, deploy("p1_squad", 10, 4), 0);
        assert!(state.units["p1_squad"].is_deployed());
        assert_eq!(state.units["p1_squad"].models[4].position, Some(Position::new(14, 4)));

        run(&mut controller, &mut state, &config, PlayerId::ONE, Command::EndPhase, 0);
        assert_eq!(state.current_phase, PhaseKind::Deployment);
        assert_eq!(state.active_player, PlayerId::TWO);

        run(&mut controller, &mut state, &config, PlayerId::TWO, deploy("p2_boss", 20, 58), 0);
        run(&mut controller, &mut state, &config, PlayerId::TWO, deploy("p2_mob", 10, 50), 0);
        run(&mut controller, &mut state, &config, PlayerId::TWO, Command::EndPhase, 0);

        assert_eq!(state.current_phase, PhaseKind::Command);
        assert_eq!(state.active_player, PlayerId::ONE);
        assert_eq!(state.turn_number, 1);
        assert_eq!(state.battle_round, 1);
        assert_eq!(state.players[&PlayerId::ONE].command_points, 1);
    }

    #[test]
    fn test_deploy_outside_zone_rejected() {
        let config = GameConfig::default();
        let state = demo_state();
        let controller = PhaseController::resume(&PhaseContext { state: &state, rules: &RULES, config: &config });

        let v = check(&controller, &state, &config, PlayerId::ONE, &deploy("p1_squad", 10, 30));
        assert!(!v.valid);
        // Formation spills past the zone edge
        let v = check(&controller, &state, &config, PlayerId::ONE, &deploy("p1_squad", 42, 2));
        assert!(!v.valid);
        let v = check(&controller, &state, &config, PlayerId::ONE, &deploy("p2_mob", 10, 2));
        assert!(!v.valid);
    }

    #[test]
    fn test_redeploy_rejected() {
        let config = GameConfig::default();
        let mut state = demo_state();
        let mut controller = PhaseController::resume(&PhaseContext { state: &state, rules: &RULES, config: &config });
        run(&mut controller, &mut state, &config, PlayerId::ONE, deploy("p1_captain", 20, 2), 0);
        assert!(!check(&controller, &state, &config, PlayerId::ONE, &deploy("p1_captain", 22, 2)).valid);
    }
}
