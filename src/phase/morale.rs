//! Morale phase: battle-shock tests for depleted units.

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::Diff;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{flags, GameState, PhaseKind, PlayerId, Unit};

use super::{not_in_phase, own_unit, require_dice, unsupported, Phase, PhaseContext, PhaseOutput, Validation};

/// Morale phase. Ends once every depleted unit of the active player has tested.
#[derive(Clone, Copy, Debug, Default)]
pub struct MoralePhase;

fn needs_test(unit: &Unit) -> bool {
    unit.is_active() && unit.below_half_strength() && !unit.has_flag(flags::SHOCK_TESTED)
}

/// Active player's units still owing a battle-shock test.
pub fn pending_tests(state: &GameState) -> impl Iterator<Item = &Unit> {
    state.units_of(state.active_player).filter(|u| needs_test(u))
}

impl Phase for MoralePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Morale
    }

    fn exit(&mut self, ctx: &PhaseContext<'_>) -> Vec<Diff> {
        ctx.state
            .units
            .values()
            .filter(|u| u.has_flag(flags::SHOCK_TESTED))
            .map(|u| Diff::clear_flag(&u.id, flags::SHOCK_TESTED))
            .collect()
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let Command::BattleShockTest { unit } = command else {
            return not_in_phase(self.kind(), command);
        };

        let mut errors = Vec::new();
        if let Some(unit) = own_unit(ctx.state, player, unit, &mut errors) {
            if unit.has_flag(flags::SHOCK_TESTED) {
                errors.push(format!("unit '{}' has already tested", unit.id));
            } else if !unit.below_half_strength() {
                errors.push(format!("unit '{}' is not below half strength", unit.id));
            }
        }
        Validation::from_errors(errors)
    }

    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        _player: PlayerId,
        command: &Command,
        dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        let Command::BattleShockTest { unit } = command else {
            return Err(unsupported(self.kind(), command));
        };
        let unit = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;

        let roll = require_dice(dice)?.d6_sum(2);
        let passed = roll >= unit.profile.leadership;

        let mut diffs = vec![Diff::add_flag(&unit.id, flags::SHOCK_TESTED)];
        if !passed {
            diffs.push(Diff::add_flag(&unit.id, flags::BATTLE_SHOCKED));
        }
        Ok(PhaseOutput::complete(
            diffs,
            vec![GameEvent::BattleShockTested { unit: unit.id.clone(), roll, passed }],
        ))
    }

    fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool {
        pending_tests(ctx.state).next().is_none()
    }
}
