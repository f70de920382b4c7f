//! Fight phase: alternating activation of engaged units.
//!
//! An activation is `select_fighter` → `resolve_melee` → (defender's
//! `allocate_wounds`) → `complete_activation`. Only the selecting player may
//! drive it, except allocation, which belongs to the defender. The activation
//! in progress lives in `GameState::open_sequence`; the selection order is
//! rebuilt from unit flags and `selecting_player`.

use tracing::debug;

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::Diff;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::state::{flags, Activation, OpenSequence, PendingAllocation, PhaseKind, PlayerId};

use super::activation::ActivationOrder;
use super::resolution::{allocate, resolve_weapon, validate_allocation, wound_list};
use super::{
    enemy_unit, not_in_phase, own_unit, player_value, require_dice, sequence_diff, unsupported, Awaiting, Completion,
    Phase, PhaseContext, PhaseOutput, Validation,
};

/// Fight phase state.
#[derive(Clone, Debug, Default)]
pub struct FightPhase {
    order: Option<ActivationOrder>,
}

fn current_activation(ctx: &PhaseContext<'_>) -> Result<Activation, ActionError> {
    ctx.state
        .activation()
        .cloned()
        .ok_or_else(|| ActionError::rule("no unit is activating"))
}

impl FightPhase {
    /// Selection order, once entered.
    pub fn order(&self) -> Option<&ActivationOrder> {
        self.order.as_ref()
    }

    fn validate_select(&self, ctx: &PhaseContext<'_>, player: PlayerId, unit_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(current) = ctx.state.activation() {
            errors.push(format!("unit '{}' is still activating", current.unit));
            return errors;
        }
        own_unit(ctx.state, player, unit_id, &mut errors);
        match &self.order {
            Some(order) => errors.extend(order.check_selection(player, unit_id)),
            None => errors.push("no fight activations remain".to_string()),
        }
        errors
    }

    fn validate_resolve(&self, ctx: &PhaseContext<'_>, player: PlayerId, unit_id: &str, target_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(current) = ctx.state.activation() else {
            return vec!["no unit has been selected to fight".to_string()];
        };
        if current.unit != unit_id {
            errors.push(format!("unit '{}' is activating, not '{}'", current.unit, unit_id));
        }
        if current.player != player {
            errors.push(format!("only {} may resolve this activation", current.player));
        }
        if current.resolved {
            errors.push(format!("unit '{}' has already made its attacks", current.unit));
        }
        let fighter = ctx.state.unit(&current.unit);
        let target = enemy_unit(ctx.state, player, target_id, &mut errors);
        if let (Some(fighter), Some(target)) = (fighter, target) {
            if !ctx.rules.in_engagement(fighter, target) {
                errors.push(format!("target '{}' is not within engagement range", target_id));
            }
        }
        errors
    }
}

impl Phase for FightPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Fight
    }

    fn enter(&mut self, ctx: &PhaseContext<'_>) -> PhaseOutput {
        let order = ActivationOrder::build(ctx.state, ctx.rules);
        debug!(planned = ?order.planned_order(), selecting = ?order.selecting_player(), "Fight order");
        let diffs = vec![Diff::set("selecting_player", player_value(order.selecting_player()))];
        self.order = Some(order);
        PhaseOutput::complete(diffs, Vec::new())
    }

    fn exit(&mut self, ctx: &PhaseContext<'_>) -> Vec<Diff> {
        let mut diffs = vec![Diff::set("selecting_player", player_value(None))];
        for unit in ctx.state.units.values().filter(|u| u.has_flag(flags::ENGAGED)) {
            diffs.push(Diff::clear_flag(&unit.id, flags::ENGAGED));
        }
        diffs
    }

    fn resume(&mut self, ctx: &PhaseContext<'_>) {
        self.order = Some(ActivationOrder::resume(ctx.state, ctx.rules));
    }

    fn validate(&self, ctx: &PhaseContext<'_>, player: PlayerId, command: &Command) -> Validation {
        let errors = match command {
            Command::SelectFighter { unit } => self.validate_select(ctx, player, unit),
            Command::ResolveMelee { unit, target } => self.validate_resolve(ctx, player, unit, target),
            Command::AllocateWounds { models } => {
                match ctx.state.activation().and_then(|a| a.pending.as_ref()) {
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
            Command::CompleteActivation => match ctx.state.activation() {
                None => vec!["no unit is activating".to_string()],
                Some(current) if current.player != player => {
                    vec![format!("only {} may complete this activation", current.player)]
                }
                Some(current) if current.pending.is_some() => {
                    vec![format!("wounds from '{}' are waiting to be allocated", current.unit)]
                }
                Some(_) => Vec::new(),
            },
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
            Command::SelectFighter { unit } => {
                let activation = Activation { unit: unit.clone(), player, resolved: false, pending: None };
                Ok(PhaseOutput {
                    diffs: vec![sequence_diff(Some(OpenSequence::Fight(activation)))?],
                    side_effects: vec![GameEvent::FighterSelected { unit: unit.clone(), player }],
                    completion: Completion::paused(Awaiting::ResolveMelee, player),
                })
            }
            Command::ResolveMelee { unit, target } => {
                let dice = require_dice(dice)?;
                let fighter = ctx.state.unit(unit).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", unit)))?;
                let defender = ctx.state.unit(target).ok_or_else(|| ActionError::rule(format!("unknown target '{}'", target)))?;
                let mut current = current_activation(ctx)?;

                let mut side_effects = Vec::new();
                let mut wounds = Vec::new();
                for weapon in &fighter.profile.melee {
                    let (outcome, event) = resolve_weapon(ctx.rules, fighter, weapon, defender, dice);
                    side_effects.push(event);
                    wounds.extend(wound_list(&outcome));
                }
                current.resolved = true;

                let completion = if wounds.is_empty() {
                    Completion::paused(Awaiting::CompleteActivation, player)
                } else {
                    current.pending = Some(PendingAllocation {
                        target: target.clone(),
                        defender: defender.owner,
                        wounds,
                    });
                    Completion::paused(Awaiting::WoundAllocation, defender.owner)
                };
                let diffs = vec![sequence_diff(Some(OpenSequence::Fight(current)))?];
                Ok(PhaseOutput { diffs, side_effects, completion })
            }
            Command::AllocateWounds { models } => {
                let mut current = current_activation(ctx)?;
                let pending = current.pending.take().ok_or_else(|| ActionError::rule("no wounds are waiting to be allocated"))?;
                let target = ctx.state.unit(&pending.target).ok_or_else(|| ActionError::rule(format!("unknown unit '{}'", pending.target)))?;

                let mut allocation = allocate(target, models, &pending.wounds);
                let completion = Completion::paused(Awaiting::CompleteActivation, current.player);
                allocation.diffs.push(sequence_diff(Some(OpenSequence::Fight(current)))?);
                Ok(PhaseOutput { diffs: allocation.diffs, side_effects: allocation.events, completion })
            }
            Command::CompleteActivation => {
                let current = current_activation(ctx)?;
                let order = self.order.as_mut().ok_or_else(|| ActionError::Internal("fight order missing".into()))?;
                order.complete(&current.unit, ctx.state);

                let diffs = vec![
                    Diff::add_flag(&current.unit, flags::FOUGHT),
                    Diff::set("selecting_player", player_value(order.selecting_player())),
                    sequence_diff(None)?,
                ];
                Ok(PhaseOutput::complete(diffs, Vec::new()))
            }
            other => Err(unsupported(self.kind(), other)),
        }
    }

    fn is_complete(&self, ctx: &PhaseContext<'_>) -> bool {
        ctx.state.activation().is_none() && self.order.as_ref().map_or(true, ActivationOrder::is_complete)
    }
}

// =============================================================================
// TESTS
// =============================================================================
