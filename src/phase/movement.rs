//! Movement phase: normal moves and advances.

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::Diff;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{flags, PhaseKind, PlayerId, Position, Unit};

use super::{
    near_enemy, not_in_phase, off_board, own_unit, placement_diffs, require_dice, unsupported, Phase,
    PhaseContext, PhaseOutput, Validation,
};

/// Highest possible advance roll.
const MAX_ADVANCE: u32 = 6;

/// Movement phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct MovementPhase;

impl MovementPhase {
    fn destination_errors(ctx: &PhaseContext<'_>, unit: &Unit, to: Position) -> Vec<String> {
        let mut errors = Vec::new();
        let formation = ctx.rules.formation(to, unit.alive_count());
        if formation.iter().any(|p| !ctx.state.board.contains(*p)) {
            errors.push(format!("unit '{}' would leave the board", unit.id));
        }

        let engage = ctx.rules.engagement_range();
        for enemy in ctx.state.units_of(unit.owner.opponent()).filter(|e| e.is_active()) {
            let close = enemy.alive_models().filter_map(|m| m.position).any(|ep| {
                formation.iter().any(|p| ctx.rules.distance(*p, ep) <= engage)
            });
            if close {
                errors.push(format!("destination is within engagement range of '{}'", enemy.id));
            }
        }
        errors
    }
}

impl Phase for MovementPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Movement
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let Command::MoveUnit { unit, to, advance } = command else {
            return not_in_phase(self.kind(), command);
        };
        if let Some(off_board) = off_board(ctx, *to) {
            return off_board;
        }

        let mut errors = Vec::new();
        let Some(unit) = own_unit(ctx.state, player, unit, &mut errors) else {
            return Validation::from_errors(errors);
        };
        let Some(from) = unit.anchor().filter(|_| unit.is_deployed()) else {
            errors.push(format!("unit '{}' is not on the board", unit.id));
            return Validation::from_errors(errors);
        };

        if unit.has_flag(flags::MOVED) {
            errors.push(format!("unit '{}' has already moved", unit.id));
        }
        if near_enemy(ctx, unit) {
            errors.push(format!("unit '{}' is engaged", unit.id));
        }

        let distance = ctx.rules.distance(from, *to);
        let limit = unit.profile.movement + if *advance { MAX_ADVANCE } else { 0 };
        if distance > limit {
            errors.push(format!("destination is {}\" away, unit '{}' moves at most {}\"", distance, unit.id, limit));
        }

        errors.extend(Self::destination_errors(ctx, unit, *to));
        Validation::from_errors(errors)
    }

    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        _player: PlayerId,
        command: &Command,
        dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        let Command::MoveUnit { unit, to, advance } = command else {
            return Err(unsupported(self.kind(), command));
        };
        let unit = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;
        let from = unit.anchor().ok_or_else(|| ActionError::rule(format!("unit '{}' is not on the board", unit.id)))?;

        let mut diffs = vec![Diff::add_flag(&unit.id, flags::MOVED)];
        let mut limit = unit.profile.movement;
        let mut advance_roll = None;
        if *advance {
            let roll = require_dice(dice)?.d6();
            limit += roll;
            advance_roll = Some(roll);
            diffs.push(Diff::add_flag(&unit.id, flags::ADVANCED));
        }

        // A short advance roll leaves the unit where it was
        let end = if ctx.rules.distance(from, *to) <= limit { *to } else { from };
        if end != from {
            diffs.extend(placement_diffs(unit, &ctx.rules.formation(end, unit.alive_count())));
        }

        Ok(PhaseOutput::complete(
            diffs,
            vec![GameEvent::UnitMoved { unit: unit.id.clone(), to: end, advance_roll }],
        ))
    }

    fn is_complete(&self, _ctx: &PhaseContext<'_>) -> bool {
        true
    }
}
