//! Charge phase: 2D6 charges into engagement range.

use tracing::debug;

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::Diff;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{flags, BoardData, PhaseKind, PlayerId, Position, Unit};
use crate::rules::RuleEvaluator;

use super::{
    enemy_unit, near_enemy, not_in_phase, own_unit, placement_diffs, require_dice, unsupported, Phase,
    PhaseContext, PhaseOutput, Validation,
};

/// Charge phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChargePhase;

/// Where a successful charger's first model ends up: next to the closest
/// target model, approaching along the dominant axis.
fn charge_anchor(rules: &dyn RuleEvaluator, board: &BoardData, charger: &Unit, target: &Unit) -> Option<Position> {
    let from = charger.anchor()?;
    let closest = target
        .alive_models()
        .filter_map(|m| m.position)
        .min_by_key(|p| rules.distance(from, *p))?;

    let dx = i64::from(from.x) - i64::from(closest.x);
    let dy = i64::from(from.y) - i64::from(closest.y);
    let step = if dx.abs() >= dy.abs() {
        closest.offset(dx.signum() as i32, 0)
    } else {
        closest.offset(0, dy.signum() as i32)
    };
    Some(Position::new(step.x.clamp(0, board.width), step.y.clamp(0, board.height)))
}

impl Phase for ChargePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Charge
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let Command::DeclareCharge { unit, target } = command else {
            return not_in_phase(self.kind(), command);
        };

        let mut errors = Vec::new();
        let charger = own_unit(ctx.state, player, unit, &mut errors);
        let target = enemy_unit(ctx.state, player, target, &mut errors);
        let (Some(charger), Some(target)) = (charger, target) else {
            return Validation::from_errors(errors);
        };

        if !charger.is_deployed() {
            errors.push(format!("unit '{}' is not on the board", charger.id));
        }
        if !target.is_deployed() {
            errors.push(format!("target '{}' is not on the board", target.id));
        }
        if charger.has_flag(flags::ADVANCED) {
            errors.push(format!("unit '{}' advanced this turn", charger.id));
        }
        if charger.has_flag(flags::CHARGE_DECLARED) {
            errors.push(format!("unit '{}' has already declared a charge", charger.id));
        }
        if near_enemy(ctx, charger) {
            errors.push(format!("unit '{}' is already engaged", charger.id));
        }

        match ctx.rules.charge_needed(charger, target) {
            Some(needed) if needed > ctx.rules.max_charge() => errors.push(format!(
                "target '{}' needs a {} to reach, more than the maximum of {}",
                target.id, needed, ctx.rules.max_charge()
            )),
            _ => {}
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
        let Command::DeclareCharge { unit, target } = command else {
            return Err(unsupported(self.kind(), command));
        };
        let charger = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;
        let target = ctx.state.unit(target).ok_or_else(|| ActionError::rule(format!("unknown target '{}'", target)))?;
        let needed = ctx
            .rules
            .charge_needed(charger, target)
            .ok_or_else(|| ActionError::rule(format!("no distance between '{}' and '{}'", charger.id, target.id)))?;

        let roll = require_dice(dice)?.d6_sum(2);
        let success = roll >= needed;
        debug!(unit = %charger.id, target = %target.id, roll, needed, success, "Charge roll");

        let mut diffs = vec![Diff::add_flag(&charger.id, flags::CHARGE_DECLARED)];
        if success {
            if let Some(anchor) = charge_anchor(ctx.rules, &ctx.state.board, charger, target) {
                diffs.extend(placement_diffs(charger, &ctx.rules.formation(anchor, charger.alive_count())));
            }
            diffs.push(Diff::add_flag(&charger.id, flags::CHARGED));
            diffs.push(Diff::add_flag(&charger.id, flags::ENGAGED));
            if !target.has_flag(flags::ENGAGED) {
                diffs.push(Diff::add_flag(&target.id, flags::ENGAGED));
            }
        }

        Ok(PhaseOutput::complete(
            diffs,
            vec![GameEvent::ChargeDeclared {
                unit: charger.id.clone(),
                target: target.id.clone(),
                roll,
                needed,
                success,
            }],
        ))
    }

    fn is_complete(&self, _ctx: &PhaseContext<'_>) -> bool {
        true
    }
}
