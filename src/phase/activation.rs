//! Alternating Activation
//!
//! Fight-phase unit selection. Eligible units are split into three tiers
//! that resolve in order. Within a tier the players take turns picking one
//! of their own units; the right to pick (the *selecting player*) is tracked
//! separately from the active player.
//!
//! ```text
//! tier start ──> active player selects (or the other, if active has none)
//!      │
//!      ▼
//! unit completes ──> other player has units left in tier? ──yes──> other selects
//!      │                                    │
//!      │                                    no
//!      │                                    ▼
//!      │                     same player has units left? ──yes──> same selects
//!      │                                    │
//!      │                                    no
//!      ▼                                    ▼
//!  next non-empty tier <────────────────────┘   (none left: phase complete)
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::state::{flags, GameState, PlayerId, Unit, UnitId};
use crate::rules::RuleEvaluator;

/// Fight ordering tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FightTier {
    /// Charged this turn, or has a fights-first ability.
    FightsFirst,
    /// Everyone else.
    Normal,
    /// Has a fights-last ability.
    FightsLast,
}

impl FightTier {
    /// Resolution order.
    pub const ORDER: [FightTier; 3] = [FightTier::FightsFirst, FightTier::Normal, FightTier::FightsLast];

    /// Tier for a unit. First and last together cancel out.
    pub fn of(unit: &Unit) -> FightTier {
        let first = unit.has_flag(flags::CHARGED) || unit.has_flag(flags::FIGHTS_FIRST);
        let last = unit.has_flag(flags::FIGHTS_LAST);
        match (first, last) {
            (true, false) => FightTier::FightsFirst,
            (false, true) => FightTier::FightsLast,
            _ => FightTier::Normal,
        }
    }
}

impl fmt::Display for FightTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FightTier::FightsFirst => "fights-first",
            FightTier::Normal => "normal",
            FightTier::FightsLast => "fights-last",
        };
        f.write_str(name)
    }
}

/// Whether a unit takes part in the fight phase.
pub fn is_eligible(state: &GameState, rules: &dyn RuleEvaluator, unit: &Unit) -> bool {
    if !unit.is_active() || !unit.is_deployed() {
        return false;
    }
    unit.has_flag(flags::ENGAGED)
        || state
            .units_of(unit.owner.opponent())
            .filter(|e| e.is_active())
            .any(|e| rules.in_engagement(unit, e))
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TierQueue {
    tier: FightTier,
    /// Units yet to activate, per owner, in id order.
    remaining: BTreeMap<PlayerId, Vec<UnitId>>,
}

impl TierQueue {
    fn has(&self, player: PlayerId) -> bool {
        self.remaining.get(&player).map_or(false, |units| !units.is_empty())
    }

    fn is_empty(&self) -> bool {
        self.remaining.values().all(Vec::is_empty)
    }

    fn contains(&self, unit_id: &str) -> bool {
        self.remaining.values().any(|units| units.iter().any(|u| u == unit_id))
    }

    fn remove(&mut self, unit_id: &str) {
        for units in self.remaining.values_mut() {
            units.retain(|u| u != unit_id);
        }
    }
}

/// Alternating-activation sub-state for one fight phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationOrder {
    active_player: PlayerId,
    /// Non-empty tiers in resolution order.
    tiers: Vec<TierQueue>,
    current: usize,
    selecting: Option<PlayerId>,
    completed: BTreeSet<UnitId>,
    owners: BTreeMap<UnitId, PlayerId>,
}

impl ActivationOrder {
    /// Partition the eligible units of `state` into tiers.
    ///
    /// Units already flagged `fought` count as completed.
    pub fn build(state: &GameState, rules: &dyn RuleEvaluator) -> Self {
        let mut owners = BTreeMap::new();
        let mut completed = BTreeSet::new();
        let mut by_tier: BTreeMap<FightTier, BTreeMap<PlayerId, Vec<UnitId>>> = BTreeMap::new();

        for unit in state.units.values().filter(|u| is_eligible(state, rules, u)) {
            owners.insert(unit.id.clone(), unit.owner);
            if unit.has_flag(flags::FOUGHT) {
                completed.insert(unit.id.clone());
                continue;
            }
            by_tier
                .entry(FightTier::of(unit))
                .or_default()
                .entry(unit.owner)
                .or_default()
                .push(unit.id.clone());
        }

        let tiers = FightTier::ORDER
            .iter()
            .filter_map(|tier| {
                by_tier.remove(tier).map(|remaining| TierQueue { tier: *tier, remaining })
            })
            .collect();

        let mut order = Self {
            active_player: state.active_player,
            tiers,
            current: 0,
            selecting: None,
            completed,
            owners,
        };
        order.selecting = order.start_tier();
        order
    }

    /// Rebuild mid-phase from a restored state, honouring its selecting player.
    pub fn resume(state: &GameState, rules: &dyn RuleEvaluator) -> Self {
        let mut order = Self::build(state, rules);
        if let (Some(player), Some(tier)) = (state.selecting_player, order.tiers.get(order.current)) {
            if tier.has(player) {
                order.selecting = Some(player);
            }
        }
        order
    }

    /// Player allowed to select next, `None` once every unit has fought.
    #[inline]
    pub fn selecting_player(&self) -> Option<PlayerId> {
        self.selecting
    }

    /// Tier currently resolving.
    pub fn current_tier(&self) -> Option<FightTier> {
        self.selecting.and(self.tiers.get(self.current).map(|t| t.tier))
    }

    /// Every eligible unit has completed its activation.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.selecting.is_none()
    }

    /// Whether a unit has completed its activation.
    pub fn has_completed(&self, unit_id: &str) -> bool {
        self.completed.contains(unit_id)
    }

    /// Remaining activations, interleaved by owner within each tier.
    pub fn planned_order(&self) -> Vec<UnitId> {
        let mut order = Vec::new();
        for (idx, tier) in self.tiers.iter().enumerate().skip(self.current) {
            let mut queues: BTreeMap<PlayerId, VecDeque<&UnitId>> = tier
                .remaining
                .iter()
                .map(|(p, units)| (*p, units.iter().collect()))
                .collect();

            let mut next = if idx == self.current {
                self.selecting
            } else {
                Some(self.starter(tier))
            };
            while let Some(player) = next {
                let Some(unit) = queues.get_mut(&player).and_then(|q| q.pop_front()) else {
                    break;
                };
                order.push(unit.clone());
                let has = |p: PlayerId| queues.get(&p).map_or(false, |q| !q.is_empty());
                next = if has(player.opponent()) {
                    Some(player.opponent())
                } else if has(player) {
                    Some(player)
                } else {
                    None
                };
            }
        }
        order
    }

    /// Reasons `player` may not select `unit_id` now; empty if allowed.
    pub fn check_selection(&self, player: PlayerId, unit_id: &str) -> Vec<String> {
        let Some(selecting) = self.selecting else {
            return vec!["no fight activations remain".to_string()];
        };
        if selecting != player {
            return vec![format!("it is {}'s selection", selecting)];
        }
        if self.completed.contains(unit_id) {
            return vec![format!("unit '{}' has already fought this phase", unit_id)];
        }

        let mut errors = Vec::new();
        match self.owners.get(unit_id) {
            None => errors.push(format!("unit '{}' is not eligible to fight", unit_id)),
            Some(owner) if *owner != player => {
                errors.push(format!("unit '{}' is not owned by {}", unit_id, player));
            }
            Some(_) => {
                if let Some(tier) = self.tiers.get(self.current) {
                    if !tier.contains(unit_id) {
                        errors.push(format!(
                            "unit '{}' does not fight in the current {} tier",
                            unit_id, tier.tier
                        ));
                    }
                }
            }
        }
        errors
    }

    /// Mark a unit's activation complete and pass selection on.
    ///
    /// Units that are no longer active in `state` are dropped from the queues.
    pub fn complete(&mut self, unit_id: &str, state: &GameState) {
        let owner = match self.owners.get(unit_id) {
            Some(owner) => *owner,
            None => return,
        };
        self.completed.insert(unit_id.to_string());
        for tier in &mut self.tiers {
            tier.remove(unit_id);
            for units in tier.remaining.values_mut() {
                units.retain(|u| state.unit(u).map_or(false, |unit| unit.is_active()));
            }
        }

        if let Some(tier) = self.tiers.get(self.current) {
            if tier.has(owner.opponent()) {
                self.selecting = Some(owner.opponent());
                return;
            }
            if tier.has(owner) {
                self.selecting = Some(owner);
                return;
            }
        }
        self.current += 1;
        self.selecting = self.start_tier();
    }

    /// Skip to the first non-empty tier at or after `current` and pick its starter.
    fn start_tier(&mut self) -> Option<PlayerId> {
        while let Some(tier) = self.tiers.get(self.current) {
            if !tier.is_empty() {
                return Some(self.starter(tier));
            }
            self.current += 1;
        }
        None
    }

    fn starter(&self, tier: &TierQueue) -> PlayerId {
        if tier.has(self.active_player) {
            self.active_player
        } else {
            self.active_player.opponent()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::game::setup::{line_profile, GameSetup, UnitSpec};
    use crate::game::state::{PhaseKind, Position};
    use crate::rules::StandardRules;

    const RULES: StandardRules = StandardRules;

    fn engaged(id: &str, owner: PlayerId, x: i32) -> UnitSpec {
        UnitSpec::new(id, owner, line_profile(), 1)
            .at(Position::new(x, if owner == PlayerId::ONE { 20 } else { 21 }))
            .flag(flags::ENGAGED)
    }

    #[test]
    fn test_tier_of() {
        let state = GameSetup::new()
            .unit(engaged("c", PlayerId::ONE, 0).flag(flags::CHARGED))
            .unit(engaged("f", PlayerId::ONE, 4).flag(flags::FIGHTS_FIRST))
            .unit(engaged("l", PlayerId::ONE, 8).flag(flags::FIGHTS_LAST))
            .unit(engaged("b", PlayerId::ONE, 12).flag(flags::FIGHTS_FIRST).flag(flags::FIGHTS_LAST))
            .unit(engaged("n", PlayerId::ONE, 16))
            .build()
            .unwrap();
        assert_eq!(FightTier::of(&state.units["c"]), FightTier::FightsFirst);
        assert_eq!(FightTier::of(&state.units["f"]), FightTier::FightsFirst);
        assert_eq!(FightTier::of(&state.units["l"]), FightTier::FightsLast);
        assert_eq!(FightTier::of(&state.units["b"]), FightTier::Normal);
        assert_eq!(FightTier::of(&state.units["n"]), FightTier::Normal);
    }

    #[test]
    fn test_two_unit_scenario() {
        let state = GameSetup::new()
            .unit(engaged("A", PlayerId::ONE, 10).flag(flags::CHARGED))
            .unit(engaged("B", PlayerId::TWO, 10))
            .start_in(PhaseKind::Fight, PlayerId::ONE)
            .build()
            .unwrap();

        let mut order = ActivationOrder::build(&state, &RULES);
        assert_eq!(order.planned_order(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(order.selecting_player(), Some(PlayerId::ONE));
        assert_eq!(order.current_tier(), Some(FightTier::FightsFirst));

        assert!(order.check_selection(PlayerId::ONE, "A").is_empty());
        assert!(!order.check_selection(PlayerId::ONE, "B").is_empty());
        order.complete("A", &state);
        assert_eq!(order.selecting_player(), Some(PlayerId::TWO));
        assert!(!order.check_selection(PlayerId::TWO, "A").is_empty());

        order.complete("B", &state);
        assert!(order.is_complete());
        assert_eq!(order.planned_order(), Vec::<UnitId>::new());
    }

    #[test]
    fn test_falls_back_when_active_has_none() {
        let state = GameSetup::new()
            .unit(engaged("x", PlayerId::TWO, 10))
            .unit(engaged("y", PlayerId::TWO, 14))
            .unit(UnitSpec::new("z", PlayerId::ONE, line_profile(), 1).at(Position::new(40, 0)))
            .start_in(PhaseKind::Fight, PlayerId::ONE)
            .build()
            .unwrap();
        let mut order = ActivationOrder::build(&state, &RULES);
        assert_eq!(order.selecting_player(), Some(PlayerId::TWO));
        order.complete("x", &state);
        // Player one has nothing in the tier, so selection stays
        assert_eq!(order.selecting_player(), Some(PlayerId::TWO));
        order.complete("y", &state);
        assert!(order.is_complete());
    }

    #[test]
    fn test_interleaved_plan() {
        let state = GameSetup::new()
            .unit(engaged("a1", PlayerId::ONE, 0))
            .unit(engaged("a2", PlayerId::ONE, 4))
            .unit(engaged("a3", PlayerId::ONE, 8))
            .unit(engaged("b1", PlayerId::TWO, 12))
            .start_in(PhaseKind::Fight, PlayerId::TWO)
            .build()
            .unwrap();
        let order = ActivationOrder::build(&state, &RULES);
        assert_eq!(order.planned_order(), vec!["b1", "a1", "a2", "a3"]);
    }

    #[test]
    fn test_empty_is_complete() {
        let state = GameSetup::new().start_in(PhaseKind::Fight, PlayerId::ONE).build().unwrap();
        let order = ActivationOrder::build(&state, &RULES);
        assert!(order.is_complete());
        assert_eq!(order.current_tier(), None);
        assert_eq!(order.check_selection(PlayerId::ONE, "x").len(), 1);
    }

    #[test]
    fn test_destroyed_units_are_pruned() {
        let mut state = GameSetup::new()
            .unit(engaged("a", PlayerId::ONE, 0))
            .unit(engaged("b", PlayerId::TWO, 0))
            .start_in(PhaseKind::Fight, PlayerId::ONE)
            .build()
            .unwrap();
        let mut order = ActivationOrder::build(&state, &RULES);
        let b = state.units.get_mut("b").unwrap();
        b.models[0].wounds = 0;
        b.flags.insert(flags::DESTROYED.into());
        order.complete("a", &state);
        assert!(order.is_complete());
    }

    #[test]
    fn test_resume_keeps_selecting_player() {
        let mut state = GameSetup::new()
            .unit(engaged("a1", PlayerId::ONE, 0).flag(flags::FOUGHT))
            .unit(engaged("a2", PlayerId::ONE, 4))
            .unit(engaged("b1", PlayerId::TWO, 8))
            .start_in(PhaseKind::Fight, PlayerId::ONE)
            .build()
            .unwrap();
        state.selecting_player = Some(PlayerId::TWO);
        let order = ActivationOrder::resume(&state, &RULES);
        assert!(order.has_completed("a1"));
        assert_eq!(order.selecting_player(), Some(PlayerId::TWO));
    }

    fn arb_units() -> impl Strategy<Value = Vec<(bool, u8)>> {
        // (owned by player one, tier selector)
        prop::collection::vec((any::<bool>(), 0u8..4), 0..12)
    }

    proptest! {
        #[test]
        fn test_selection_alternates(units in arb_units(), active_one in any::<bool>(), picks in prop::collection::vec(any::<usize>(), 12)) {
            let active = if active_one { PlayerId::ONE } else { PlayerId::TWO };
            let mut setup = GameSetup::new().start_in(PhaseKind::Fight, active);
            for (i, (one, tier)) in units.iter().enumerate() {
                let owner = if *one { PlayerId::ONE } else { PlayerId::TWO };
                let mut spec = engaged(&format!("u{:02}", i), owner, (i as i32) * 3);
                spec = match tier {
                    0 => spec.flag(flags::CHARGED),
                    1 => spec.flag(flags::FIGHTS_LAST),
                    2 => spec.flag(flags::FIGHTS_FIRST).flag(flags::FIGHTS_LAST),
                    _ => spec,
                };
                setup = setup.unit(spec);
            }
            let state = setup.build().unwrap();
            let mut order = ActivationOrder::build(&state, &RULES);

            let mut last: Option<(FightTier, PlayerId)> = None;
            let mut steps = 0;
            while let Some(player) = order.selecting_player() {
                let tier_idx = order.current;
                let tier = order.tiers[tier_idx].tier;
                let mine: Vec<UnitId> = order.tiers[tier_idx].remaining.get(&player).cloned().unwrap_or_default();
                prop_assert!(!mine.is_empty());

                // Strict alternation while the previous selector's opponent still had units
                if let Some((last_tier, last_player)) = last {
                    if last_tier == tier && order.tiers[tier_idx].has(last_player.opponent()) {
                        prop_assert_eq!(player, last_player.opponent());
                    }
                }

                let unit = mine[picks[steps % picks.len()] % mine.len()].clone();
                prop_assert!(order.check_selection(player, &unit).is_empty());
                prop_assert_eq!(state.units[&unit].owner, player);
                prop_assert!(!order.check_selection(player.opponent(), &unit).is_empty());

                last = Some((tier, player));
                order.complete(&unit, &state);
                steps += 1;
            }
            prop_assert_eq!(steps, units.len());
        }
    }
}
