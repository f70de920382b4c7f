//! Attack resolution and wound allocation, shared by shooting and fighting.

use std::collections::BTreeSet;
use serde_json::Value;

use crate::core::rng::DiceStream;
use crate::game::diff::{model_field, Diff};
use crate::game::events::GameEvent;
use crate::game::state::{flags, Unit, Weapon};
use crate::rules::{AttackOutcome, RuleEvaluator};

/// Diffs and events produced by allocating wounds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Allocation {
    /// Model wound/position changes.
    pub diffs: Vec<Diff>,
    /// What happened.
    pub events: Vec<GameEvent>,
    /// Whether the target was wiped out.
    pub destroyed: bool,
}

/// Resolve one weapon and describe it.
pub fn resolve_weapon(
    rules: &dyn RuleEvaluator,
    attacker: &Unit,
    weapon: &Weapon,
    target: &Unit,
    dice: &mut DiceStream,
) -> (AttackOutcome, GameEvent) {
    let outcome = rules.resolve_attacks(weapon, attacker.alive_count() as u32, &target.profile, dice);
    let event = GameEvent::AttackResolved {
        attacker: attacker.id.clone(),
        target: target.id.clone(),
        weapon: weapon.name.clone(),
        hits: outcome.hits,
        wounds: outcome.wounds,
        unsaved: outcome.unsaved,
    };
    (outcome, event)
}

/// One entry per unsaved wound, each carrying the weapon's damage.
pub fn wound_list(outcome: &AttackOutcome) -> Vec<u32> {
    vec![outcome.damage; outcome.unsaved as usize]
}

/// Check a defender's allocation order.
///
/// Every listed id must name a distinct, living model of the target. Models
/// left out follow in roster order.
pub fn validate_allocation(target: &Unit, order: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    for id in order {
        if !seen.insert(id.as_str()) {
            errors.push(format!("model '{}' listed twice", id));
            continue;
        }
        match target.models.iter().find(|m| &m.id == id) {
            None => errors.push(format!("unit '{}' has no model '{}'", target.id, id)),
            Some(m) if !m.is_alive() => errors.push(format!("model '{}' is already dead", id)),
            Some(_) => {}
        }
    }
    errors
}

/// Apply wounds to models in allocation order.
///
/// Each wound damages the first living model in the order; damage does not
/// spill over to the next model.
pub fn allocate(target: &Unit, order: &[String], wounds: &[u32]) -> Allocation {
    let mut sequence: Vec<usize> = order
        .iter()
        .filter_map(|id| target.models.iter().position(|m| &m.id == id))
        .collect();
    for (idx, model) in target.models.iter().enumerate() {
        if model.is_alive() && !sequence.contains(&idx) {
            sequence.push(idx);
        }
    }

    let mut remaining: Vec<u32> = target.models.iter().map(|m| m.wounds).collect();
    let mut total = 0;
    for &damage in wounds {
        let Some(&idx) = sequence.iter().find(|&&i| remaining[i] > 0) else {
            break;
        };
        let dealt = damage.min(remaining[idx]);
        remaining[idx] -= dealt;
        total += dealt;
    }

    let mut allocation = Allocation::default();
    let mut slain = 0;
    for (idx, model) in target.models.iter().enumerate() {
        if remaining[idx] == model.wounds {
            continue;
        }
        allocation.diffs.push(Diff::set(model_field(&target.id, idx, "wounds"), remaining[idx]));
        if remaining[idx] == 0 {
            // Dead models leave the board
            allocation.diffs.push(Diff::set(model_field(&target.id, idx, "position"), Value::Null));
            slain += 1;
        }
    }

    allocation.events.push(GameEvent::WoundsAllocated {
        target: target.id.clone(),
        damage: total,
        models_slain: slain,
    });

    if remaining.iter().all(|&w| w == 0) && !target.is_destroyed() {
        allocation.destroyed = true;
        allocation.diffs.push(Diff::add_flag(&target.id, flags::DESTROYED));
        allocation.events.push(GameEvent::UnitDestroyed { unit: target.id.clone() });
    }

    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::diff::apply_diffs;
    use crate::game::setup::{line_profile, GameSetup, UnitSpec};
    use crate::game::state::{PhaseKind, PlayerId, Position};

    fn squad() -> crate::game::state::GameState {
        GameSetup::new()
            .unit(UnitSpec::new("t", PlayerId::TWO, line_profile(), 3).wounds(2).at(Position::new(5, 50)))
            .start_in(PhaseKind::Shooting, PlayerId::ONE)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_order_fills_first_model() {
        let state = squad();
        let unit = &state.units["t"];
        let result = allocate(unit, &[], &[1, 1, 1]);
        let next = apply_diffs(&state, &result.diffs).unwrap();
        let wounds: Vec<u32> = next.units["t"].models.iter().map(|m| m.wounds).collect();
        assert_eq!(wounds, vec![0, 1, 2]);
        assert_eq!(next.units["t"].models[0].position, None);
        assert!(!result.destroyed);
    }

    #[test]
    fn test_custom_order() {
        let state = squad();
        let unit = &state.units["t"];
        let result = allocate(unit, &["m2".into()], &[2]);
        let next = apply_diffs(&state, &result.diffs).unwrap();
        assert_eq!(next.units["t"].models[2].wounds, 0);
        assert_eq!(next.units["t"].models[0].wounds, 2);
    }

    #[test]
    fn test_damage_does_not_spill() {
        let state = squad();
        let unit = &state.units["t"];
        let result = allocate(unit, &[], &[5]);
        let next = apply_diffs(&state, &result.diffs).unwrap();
        assert_eq!(next.units["t"].alive_count(), 2);
        assert!(matches!(result.events[0], GameEvent::WoundsAllocated { damage: 2, models_slain: 1, .. }));
    }

    #[test]
    fn test_wipe_out_flags_destroyed() {
        let state = squad();
        let unit = &state.units["t"];
        let result = allocate(unit, &[], &[2, 2, 2, 2]);
        assert!(result.destroyed);
        let next = apply_diffs(&state, &result.diffs).unwrap();
        assert!(next.units["t"].is_destroyed());
        assert!(!next.units["t"].is_active());
    }

    #[test]
    fn test_validate_allocation() {
        let mut state = squad();
        state.units.get_mut("t").unwrap().models[1].wounds = 0;
        let unit = &state.units["t"];
        assert!(validate_allocation(unit, &["m0".into(), "m2".into()]).is_empty());
        assert_eq!(validate_allocation(unit, &["m1".into()]).len(), 1);
        assert_eq!(validate_allocation(unit, &["m0".into(), "m0".into()]).len(), 1);
        assert_eq!(validate_allocation(unit, &["zz".into()]).len(), 1);
    }
}
