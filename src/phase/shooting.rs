//! Shooting phase.
//!
//! A shooting sequence is `select_shooter` → `continue_sequence` per weapon
//! (each possibly followed by the defender's `allocate_wounds`) →
//! `complete_sequence`. Only one sequence is open at a time; the phase cannot
//! end while one is. The sequence lives in `GameState::open_sequence`, so
//! every step commits its progress as a diff.

use std::collections::VecDeque;

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::Diff;
use crate::game::error::ActionError;
use crate::game::state::{
    flags, OpenSequence, PendingAllocation, PhaseKind, PlayerId, ShootingSequence, Unit, Weapon,
};
use crate::rules::RuleEvaluator;

use super::resolution::{allocate, resolve_weapon, validate_allocation, wound_list};
use super::{
    enemy_unit, near_enemy, not_in_phase, own_unit, require_dice, sequence_diff, unsupported, Awaiting, Completion,
    Phase, PhaseContext, PhaseOutput, Validation,
};

fn next_step(sequence: &ShootingSequence) -> Completion {
    if sequence.remaining.is_empty() {
        Completion::paused(Awaiting::CompleteSequence, sequence.player)
    } else {
        Completion::paused(Awaiting::ContinueSequence, sequence.player)
    }
}

/// Shooting phase. Holds no state of its own.
#[derive(Clone, Debug, Default)]
pub struct ShootingPhase;

/// Ranged weapons of `attacker` that reach `target`.
fn weapons_in_range(rules: &dyn RuleEvaluator, attacker: &Unit, target: &Unit) -> VecDeque<Weapon> {
    let Some(distance) = rules.unit_distance(attacker, target) else {
        return VecDeque::new();
    };
    attacker
        .profile
        .ranged
        .iter()
        .filter(|w| w.range >= distance)
        .cloned()
        .collect()
}

fn open_sequence(ctx: &PhaseContext<'_>) -> Result<ShootingSequence, ActionError> {
    ctx.state
        .shooting_sequence()
        .cloned()
        .ok_or_else(|| ActionError::rule("no shooting sequence is open"))
}

impl ShootingPhase {
    fn validate_select(&self, ctx: &PhaseContext<'_>, player: PlayerId, unit_id: &str, target_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(open) = ctx.state.shooting_sequence() {
            errors.push(format!("unit '{}' is still shooting", open.attacker));
            return errors;
        }

        let shooter = own_unit(ctx.state, player, unit_id, &mut errors);
        let target = enemy_unit(ctx.state, player, target_id, &mut errors);
        let (Some(shooter), Some(target)) = (shooter, target) else {
            return errors;
        };

        if shooter.has_flag(flags::HAS_SHOT) {
            errors.push(format!("unit '{}' has already shot", shooter.id));
        }
        if shooter.has_flag(flags::ADVANCED) {
            errors.push(format!("unit '{}' advanced this turn", shooter.id));
        }
        if near_enemy(ctx, shooter) {
            errors.push(format!("unit '{}' is engaged", shooter.id));
        }
        if weapons_in_range(ctx.rules, shooter, target).is_empty() {
            errors.push(format!("target '{}' is out of range of every weapon", target.id));
        }
        errors
    }

    fn open_for<'a>(&self, ctx: &PhaseContext<'a>, player: PlayerId) -> Result<&'a ShootingSequence, String> {
        match ctx.state.shooting_sequence() {
            None => Err("no shooting sequence is open".to_string()),
            Some(open) if open.player != player => Err(format!("only {} may drive this sequence", open.player)),
            Some(open) if open.pending.is_some() => {
                Err(format!("wounds on '{}' are waiting to be allocated", open.target))
            }
            Some(open) => Ok(open),
        }
    }
}

impl Phase for ShootingPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Shooting
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let errors = match command {
            Command::SelectShooter { unit, target } => self.validate_select(ctx, player, unit, target),
            Command::ContinueSequence => match self.open_for(ctx, player) {
                Err(reason) => vec![reason],
                Ok(open) if open.remaining.is_empty() => {
                    vec![format!("unit '{}' has no weapons left to fire", open.attacker)]
                }
                Ok(_) => Vec::new(),
            },
            Command::AllocateWounds { models } => {
                match ctx.state.shooting_sequence().and_then(|s| s.pending.as_ref()) {
                    None => vec!["no wounds are waiting to be allocated".to_string()],
                    Some(pending) if pending.defender != player => {
                        vec![format!("only {} may allocate these wounds", pending.defender)]
                    }
                    Some(pending) => match ctx.state.unit(&pending.target) {
                        Some(target) => validate_allocation(target, models),
                        None => vec![format!("unknown unit '{}'", pending.target)],
                    },
                }
            }
            Command::CompleteSequence => self.open_for(ctx, player).err().into_iter().collect(),
            other => return not_in_phase(self.kind(), other),
        };
        Validation::from_errors(errors)
    }

    fn process(
        &mut self,
        ctx: &PhaseContext<'_>,
        player: PlayerId,
        command: &Command,
        dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        match command {
            Command::SelectShooter { unit, target } => {
                let shooter = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;
                let defender = ctx.state.unit(target).ok_or_else(|| ActionError::rule(format!("unknown target '{}'", target)))?;
                let sequence = ShootingSequence {
                    attacker: unit.clone(),
                    target: target.clone(),
                    player,
                    remaining: weapons_in_range(ctx.rules, shooter, defender),
                    pending: None,
                };
                let completion = next_step(&sequence);
                let diffs = vec![sequence_diff(Some(OpenSequence::Shooting(sequence)))?];
                Ok(PhaseOutput { diffs, side_effects: Vec::new(), completion })
            }
            Command::ContinueSequence => {
                let dice = require_dice(dice)?;
                let mut open = open_sequence(ctx)?;
                let shooter = ctx.state.unit(&open.attacker).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", open.attacker)))?;
                let defender = ctx.state.unit(&open.target).ok_or_else(|| ActionError::rule(format!("unknown target '{}'", open.target)))?;
                let weapon = open
                    .remaining
                    .pop_front()
                    .ok_or_else(|| ActionError::rule(format!("unit '{}' has no weapons left to fire", open.attacker)))?;

                let (outcome, event) = resolve_weapon(ctx.rules, shooter, &weapon, defender, dice);
                let wounds = wound_list(&outcome);
                let completion = if wounds.is_empty() {
                    next_step(&open)
                } else {
                    open.pending = Some(PendingAllocation {
                        target: defender.id.clone(),
                        defender: defender.owner,
                        wounds,
                    });
                    Completion::paused(Awaiting::WoundAllocation, defender.owner)
                };
                let diffs = vec![sequence_diff(Some(OpenSequence::Shooting(open)))?];
                Ok(PhaseOutput { diffs, side_effects: vec![event], completion })
            }
            Command::AllocateWounds { models } => {
                let mut open = open_sequence(ctx)?;
                let pending = open.pending.take().ok_or_else(|| ActionError::rule("no wounds are waiting to be allocated"))?;
                let target = ctx.state.unit(&pending.target).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", pending.target)))?;

                let mut allocation = allocate(target, models, &pending.wounds);
                if allocation.destroyed {
                    // Nothing left to shoot at
                    open.remaining.clear();
                }
                let completion = next_step(&open);
                allocation.diffs.push(sequence_diff(Some(OpenSequence::Shooting(open)))?);
                Ok(PhaseOutput { diffs: allocation.diffs, side_effects: allocation.events, completion })
            }
            Command::CompleteSequence => {
                let open = open_sequence(ctx)?;
                Ok(PhaseOutput::complete(
                    vec![Diff::add_flag(&open.attacker, flags::HAS_SHOT), sequence_diff(None)?],
                    Vec::new(),
                ))
            }
            other => Err(unsupported(self.kind(), other)),
        }
    }

    fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool {
        ctx.state.shooting_sequence().is_none()
    }
}
