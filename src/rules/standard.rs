//! Default rule content: integer geometry and a classic hit/wound/save chain.

use crate::core::rng::DiceStream;
use crate::game::state::{flags, GameState, Objective, PlayerId, Position, UnitProfile, Weapon};

use super::{AttackOutcome, RuleEvaluator};

/// Models within this many inches of an objective contest it.
pub const OBJECTIVE_RANGE: u32 = 3;

/// Models per formation row.
const FORMATION_WIDTH: usize = 5;

/// Small, deterministic default rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRules;

impl StandardRules {
    /// Create the default rules.
    pub fn new() -> Self {
        Self
    }

    /// D6 needed to wound, from strength against toughness.
    pub fn wound_threshold(strength: u32, toughness: u32) -> u32 {
        if strength >= toughness * 2 {
            2
        } else if strength > toughness {
            3
        } else if strength == toughness {
            4
        } else if strength * 2 <= toughness {
            6
        } else {
            5
        }
    }
}

/// Smallest root whose square reaches `i64::MAX`.
const MAX_ROOT: i64 = 3_037_000_500;

/// Integer square root, rounded up.
pub fn ceil_sqrt(n: i64) -> u32 {
    if n <= 0 {
        return 0;
    }
    let (mut lo, mut hi) = (1i64, MAX_ROOT);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if mid.checked_mul(mid).map_or(true, |sq| sq >= n) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo as u32
}

/// A natural 1 always fails, a natural 6 always succeeds.
#[inline]
fn passes(roll: u32, needed: u32) -> bool {
    roll != 1 && (roll == 6 || roll >= needed)
}

impl RuleEvaluator for StandardRules {
    fn distance(&self, a: Position, b: Position) -> u32 {
        ceil_sqrt(a.distance_sq(b))
    }

    fn engagement_range(&self) -> u32 {
        1
    }

    fn formation(&self, anchor: Position, model_count: usize) -> Vec<Position> {
        (0..model_count)
            .map(|i| anchor.offset((i % FORMATION_WIDTH) as i32, (i / FORMATION_WIDTH) as i32))
            .collect()
    }

    fn resolve_attacks(
        &self,
        weapon: &Weapon,
        attacking_models: u32,
        defender: &UnitProfile,
        dice: &mut DiceStream,
    ) -> AttackOutcome {
        let attacks = weapon.attacks * attacking_models;

        let hits = dice
            .d6_pool(attacks)
            .into_iter()
            .filter(|&r| passes(r, weapon.skill))
            .count() as u32;

        let to_wound = Self::wound_threshold(weapon.strength, defender.toughness);
        let wounds = dice
            .d6_pool(hits)
            .into_iter()
            .filter(|&r| passes(r, to_wound))
            .count() as u32;

        // AP worsens the save; a 1 always fails
        let unsaved = dice
            .d6_pool(wounds)
            .into_iter()
            .filter(|&r| r == 1 || r.saturating_sub(weapon.ap) < defender.save)
            .count() as u32;

        AttackOutcome { hits, wounds, unsaved, damage: weapon.damage }
    }

    fn objective_control(&self, state: &GameState, player: PlayerId, objective: &Objective) -> u32 {
        state
            .units_of(player)
            .filter(|u| u.is_active() && !u.has_flag(flags::BATTLE_SHOCKED))
            .map(|u| {
                let in_range = u
                    .alive_models()
                    .filter_map(|m| m.position)
                    .filter(|&p| self.distance(p, objective.position) <= OBJECTIVE_RANGE)
                    .count() as u32;
                in_range * u.profile.objective_control
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::setup::{demo_state, line_profile};

    fn bolter() -> Weapon {
        Weapon { name: "bolter".into(), range: 24, attacks: 2, skill: 3, strength: 4, ap: 0, damage: 1 }
    }

    #[test]
    fn test_ceil_sqrt() {
        assert_eq!(ceil_sqrt(0), 0);
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(16), 4);
        assert_eq!(ceil_sqrt(17), 5);
        assert_eq!(ceil_sqrt(10_000), 100);
        assert_eq!(ceil_sqrt(i64::MAX), MAX_ROOT as u32);
    }

    #[test]
    fn test_distance_across_full_coordinate_range() {
        let rules = StandardRules::new();
        let far = rules.distance(Position::new(i32::MIN, i32::MIN), Position::new(i32::MAX, i32::MAX));
        assert_eq!(far, MAX_ROOT as u32);
        assert_eq!(rules.distance(Position::new(i32::MIN, 0), Position::new(0, 0)), 1u32 << 31);
    }

    #[test]
    fn test_formation_clamps_at_coordinate_edge() {
        let rules = StandardRules::new();
        let models = rules.formation(Position::new(i32::MAX, i32::MAX), 7);
        assert_eq!(models.len(), 7);
        assert!(models.iter().all(|p| *p == Position::new(i32::MAX, i32::MAX)));
    }

    #[test]
    fn test_distance() {
        let rules = StandardRules::new();
        assert_eq!(rules.distance(Position::new(0, 0), Position::new(3, 4)), 5);
        assert_eq!(rules.distance(Position::new(0, 0), Position::new(1, 1)), 2);
    }

    #[test]
    fn test_wound_threshold() {
        assert_eq!(StandardRules::wound_threshold(8, 4), 2);
        assert_eq!(StandardRules::wound_threshold(5, 4), 3);
        assert_eq!(StandardRules::wound_threshold(4, 4), 4);
        assert_eq!(StandardRules::wound_threshold(3, 4), 5);
        assert_eq!(StandardRules::wound_threshold(2, 4), 6);
    }

    #[test]
    fn test_formation_rows() {
        let rules = StandardRules::new();
        let positions = rules.formation(Position::new(10, 10), 7);
        assert_eq!(positions.len(), 7);
        assert_eq!(positions[0], Position::new(10, 10));
        assert_eq!(positions[4], Position::new(14, 10));
        assert_eq!(positions[5], Position::new(10, 11));
    }

    #[test]
    fn test_attack_chain_is_monotonic_and_deterministic() {
        let rules = StandardRules::new();
        let defender = line_profile();
        for seed in 0..50u64 {
            let a = rules.resolve_attacks(&bolter(), 5, &defender, &mut DiceStream::new(seed));
            let b = rules.resolve_attacks(&bolter(), 5, &defender, &mut DiceStream::new(seed));
            assert_eq!(a, b);
            assert!(a.hits <= 10);
            assert!(a.wounds <= a.hits);
            assert!(a.unsaved <= a.wounds);
        }
    }

    #[test]
    fn test_impossible_save_lets_everything_through() {
        let rules = StandardRules::new();
        let mut defender = line_profile();
        defender.save = 7;
        let outcome = rules.resolve_attacks(&bolter(), 10, &defender, &mut DiceStream::new(9));
        assert_eq!(outcome.unsaved, outcome.wounds);
    }

    #[test]
    fn test_zero_attacks() {
        let rules = StandardRules::new();
        let outcome = rules.resolve_attacks(&bolter(), 0, &line_profile(), &mut DiceStream::new(1));
        assert_eq!(outcome, AttackOutcome { damage: 1, ..Default::default() });
    }

    #[test]
    fn test_objective_control_counts_models_in_range() {
        let rules = StandardRules::new();
        let mut state = demo_state();
        let objective = state.board.objectives[0];
        let unit_id = state.units_of(PlayerId::ONE).next().unwrap().id.clone();

        assert!(!rules.controls_objective(&state, PlayerId::ONE, &objective));

        let unit = state.units.get_mut(&unit_id).unwrap();
        for (model, pos) in unit.models.iter_mut().zip(rules.formation(objective.position, 10)) {
            model.position = Some(pos);
        }
        assert!(rules.objective_control(&state, PlayerId::ONE, &objective) > 0);
        assert!(rules.controls_objective(&state, PlayerId::ONE, &objective));

        state.units.get_mut(&unit_id).unwrap().flags.insert(flags::BATTLE_SHOCKED.into());
        assert_eq!(rules.objective_control(&state, PlayerId::ONE, &objective), 0);
    }
}
