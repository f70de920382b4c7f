//! Rule Evaluation
//!
//! Geometry and dice maths live behind [`RuleEvaluator`] so phases only deal
//! with sequencing and state. Implementations must be pure functions of their
//! inputs and the provided `DiceStream`; both peers run them on replay.

pub mod standard;

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::rng::DiceStream;
use crate::game::state::{GameState, Objective, PlayerId, Position, Unit, UnitProfile, Weapon};

pub use standard::StandardRules;

/// Result of one weapon's attacks against one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    /// Successful hit rolls.
    pub hits: u32,
    /// Successful wound rolls.
    pub wounds: u32,
    /// Wounds the target failed to save.
    pub unsaved: u32,
    /// Damage per unsaved wound.
    pub damage: u32,
}

impl AttackOutcome {
    /// Total damage to allocate.
    pub fn total_damage(&self) -> u32 {
        self.unsaved * self.damage
    }
}

/// Pluggable rule content.
pub trait RuleEvaluator: Send + Sync + fmt::Debug {
    /// Distance in whole inches, rounded up.
    fn distance(&self, a: Position, b: Position) -> u32;

    /// Engagement range in inches.
    fn engagement_range(&self) -> u32;

    /// Maximum charge roll.
    fn max_charge(&self) -> u32 {
        12
    }

    /// Model positions for a unit whose first model stands at `anchor`.
    fn formation(&self, anchor: Position, model_count: usize) -> Vec<Position>;

    /// Resolve one weapon profile fired by `attacking_models` models.
    fn resolve_attacks(
        &self,
        weapon: &Weapon,
        attacking_models: u32,
        defender: &UnitProfile,
        dice: &mut DiceStream,
    ) -> AttackOutcome;

    /// Objective control a player exerts over an objective.
    fn objective_control(&self, state: &GameState, player: PlayerId, objective: &Objective) -> u32;

    /// Closest distance between living, positioned models of two units.
    fn unit_distance(&self, a: &Unit, b: &Unit) -> Option<u32> {
        let mut best: Option<u32> = None;
        for ma in a.alive_models() {
            for mb in b.alive_models() {
                if let (Some(pa), Some(pb)) = (ma.position, mb.position) {
                    let d = self.distance(pa, pb);
                    best = Some(best.map_or(d, |cur| cur.min(d)));
                }
            }
        }
        best
    }

    /// Whether two units are within engagement range.
    fn in_engagement(&self, a: &Unit, b: &Unit) -> bool {
        self.unit_distance(a, b)
            .map_or(false, |d| d <= self.engagement_range())
    }

    /// 2D6 result needed to end a charge in engagement range.
    fn charge_needed(&self, charger: &Unit, target: &Unit) -> Option<u32> {
        self.unit_distance(charger, target)
            .map(|d| d.saturating_sub(self.engagement_range()))
    }

    /// Whether `player` controls the objective outright.
    fn controls_objective(&self, state: &GameState, player: PlayerId, objective: &Objective) -> bool {
        let mine = self.objective_control(state, player, objective);
        let theirs = self.objective_control(state, player.opponent(), objective);
        mine > 0 && mine > theirs
    }
}
