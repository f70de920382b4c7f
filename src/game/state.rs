//! Game State Definitions
//!
//! The canonical game state both peers hold.
//! Uses BTreeMap/BTreeSet for deterministic iteration and serialization order,
//! which both the checksum and the dot-path diffs rely on.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::hash::{Checksum, StateHasher, compute_state_checksum};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Game-level player number (1 or 2).
///
/// Transparent so it serializes as a bare integer, including as a map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// First player.
    pub const ONE: PlayerId = PlayerId(1);
    /// Second player.
    pub const TWO: PlayerId = PlayerId(2);

    /// The other player.
    pub fn opponent(self) -> PlayerId {
        if self == Self::ONE { Self::TWO } else { Self::ONE }
    }

    /// Whether this is one of the two seats.
    pub fn is_valid(self) -> bool {
        self == Self::ONE || self == Self::TWO
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Unit identifier. Must be non-empty and must not contain `.`,
/// since it is used as a segment in diff paths.
pub type UnitId = String;

// =============================================================================
// UNIT FLAGS
// =============================================================================

/// Well-known unit flags.
pub mod flags {
    /// Every model in the unit is dead.
    pub const DESTROYED: &str = "destroyed";
    /// Moved this turn.
    pub const MOVED: &str = "moved";
    /// Advanced this turn.
    pub const ADVANCED: &str = "advanced";
    /// Shot this turn.
    pub const HAS_SHOT: &str = "has_shot";
    /// Declared a charge this turn, successful or not.
    pub const CHARGE_DECLARED: &str = "charge_declared";
    /// Made a successful charge this turn.
    pub const CHARGED: &str = "charged";
    /// In engagement range of an enemy.
    pub const ENGAGED: &str = "engaged";
    /// Completed its fight activation this phase.
    pub const FOUGHT: &str = "fought";
    /// Failed a battle-shock test.
    pub const BATTLE_SHOCKED: &str = "battle_shocked";
    /// Took its battle-shock test this morale phase.
    pub const SHOCK_TESTED: &str = "shock_tested";
    /// Ability: fights in the first tier.
    pub const FIGHTS_FIRST: &str = "fights_first";
    /// Ability: fights in the last tier.
    pub const FIGHTS_LAST: &str = "fights_last";

    /// Flags cleared at the start of every turn.
    pub const PER_TURN: [&str; 6] = [MOVED, ADVANCED, HAS_SHOT, CHARGE_DECLARED, CHARGED, FOUGHT];
}

// =============================================================================
// BOARD
// =============================================================================

/// Board position in whole inches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Position {
    /// Create a position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance, saturating at `i64::MAX`.
    pub fn distance_sq(self, other: Position) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Offset by a delta, clamped to the coordinate range.
    pub fn offset(self, dx: i32, dy: i32) -> Position {
        Position::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

/// Axis-aligned rectangle (inclusive bounds).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Minimum x.
    pub min_x: i32,
    /// Minimum y.
    pub min_y: i32,
    /// Maximum x.
    pub max_x: i32,
    /// Maximum y.
    pub max_y: i32,
}

impl Zone {
    /// Whether a position is inside the zone.
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.y >= self.min_y && pos.y <= self.max_y
    }
}

/// Scoring objective marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    /// Objective number.
    pub id: u32,
    /// Marker position.
    pub position: Position,
}

/// Static board description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardData {
    /// Width in inches.
    pub width: i32,
    /// Height in inches.
    pub height: i32,
    /// Objective markers.
    pub objectives: Vec<Objective>,
    /// Deployment zone per player.
    pub deployment_zones: BTreeMap<PlayerId, Zone>,
}

impl BoardData {
    /// Whether a position is on the board.
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x <= self.width && pos.y <= self.height
    }

    /// Look up an objective.
    pub fn objective(&self, id: u32) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id == id)
    }
}

// =============================================================================
// UNITS
// =============================================================================

/// Weapon profile (loaded content, carried verbatim).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weapon {
    /// Display name.
    pub name: String,
    /// Range in inches (0 for melee).
    pub range: u32,
    /// Attacks per model.
    pub attacks: u32,
    /// Hit roll needed (e.g. 3 for 3+).
    pub skill: u32,
    /// Strength.
    pub strength: u32,
    /// Armour penetration (subtracted from the save roll).
    pub ap: u32,
    /// Damage per unsaved wound.
    pub damage: u32,
}

/// Unit statistics (loaded content, carried verbatim).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProfile {
    /// Move characteristic in inches.
    pub movement: u32,
    /// Toughness.
    pub toughness: u32,
    /// Armour save needed.
    pub save: u32,
    /// Leadership: 2D6 needed to pass battle-shock.
    pub leadership: u32,
    /// Objective control per model.
    pub objective_control: u32,
    /// Ranged weapons (one of each per model).
    pub ranged: Vec<Weapon>,
    /// Melee weapons (one of each per model).
    pub melee: Vec<Weapon>,
}

/// A single model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier, unique within its unit.
    pub id: String,
    /// Wounds remaining.
    pub wounds: u32,
    /// Starting wounds.
    pub max_wounds: u32,
    /// Board position, `None` until deployed.
    pub position: Option<Position>,
}

impl Model {
    /// Whether the model is still alive.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.wounds > 0
    }
}

/// A unit of models.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit identifier.
    pub id: UnitId,
    /// Owning player.
    pub owner: PlayerId,
    /// Display name.
    pub name: String,
    /// Statistics.
    pub profile: UnitProfile,
    /// Models, in roster order.
    pub models: Vec<Model>,
    /// State flags.
    pub flags: BTreeSet<String>,
}

impl Unit {
    /// Whether the unit carries a flag.
    #[inline]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Whether the unit has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.has_flag(flags::DESTROYED)
    }

    /// Living models.
    pub fn alive_models(&self) -> impl Iterator<Item = &Model> {
        self.models.iter().filter(|m| m.is_alive())
    }

    /// Number of living models.
    pub fn alive_count(&self) -> usize {
        self.alive_models().count()
    }

    /// Whether every living model has a position.
    pub fn is_deployed(&self) -> bool {
        self.alive_count() > 0 && self.alive_models().all(|m| m.position.is_some())
    }

    /// Below half of starting strength (models), but not destroyed.
    pub fn below_half_strength(&self) -> bool {
        let alive = self.alive_count();
        alive > 0 && alive * 2 < self.models.len()
    }

    /// Position of the first living model.
    pub fn anchor(&self) -> Option<Position> {
        self.alive_models().find_map(|m| m.position)
    }

    /// Whether the unit can still act at all.
    pub fn is_active(&self) -> bool {
        !self.is_destroyed() && self.alive_count() > 0
    }
}

// =============================================================================
// PLAYERS / PHASES / OUTCOME
// =============================================================================

/// Per-player record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Player number.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Command points banked.
    pub command_points: u32,
    /// Victory points scored.
    pub victory_points: u32,
}

/// Turn phases, in play order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PhaseKind {
    /// Units are placed on the board.
    Deployment = 0,
    /// Command points, start-of-turn upkeep.
    Command = 1,
    /// Normal moves and advances.
    Movement = 2,
    /// Ranged attacks.
    Shooting = 3,
    /// Charge declarations.
    Charge = 4,
    /// Melee, with alternating activation.
    Fight = 5,
    /// Battle-shock tests.
    Morale = 6,
    /// Objective scoring, then the turn passes.
    Scoring = 7,
}

impl PhaseKind {
    /// All phases in order.
    pub const ALL: [PhaseKind; 8] = [
        PhaseKind::Deployment,
        PhaseKind::Command,
        PhaseKind::Movement,
        PhaseKind::Shooting,
        PhaseKind::Charge,
        PhaseKind::Fight,
        PhaseKind::Morale,
        PhaseKind::Scoring,
    ];

    /// The following phase within a turn. Scoring wraps to Command;
    /// Deployment only ever leads to Command.
    pub fn next(self) -> PhaseKind {
        match self {
            PhaseKind::Deployment => PhaseKind::Command,
            PhaseKind::Command => PhaseKind::Movement,
            PhaseKind::Movement => PhaseKind::Shooting,
            PhaseKind::Shooting => PhaseKind::Charge,
            PhaseKind::Charge => PhaseKind::Fight,
            PhaseKind::Fight => PhaseKind::Morale,
            PhaseKind::Morale => PhaseKind::Scoring,
            PhaseKind::Scoring => PhaseKind::Command,
        }
    }

    /// Name used in logs and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Deployment => "deployment",
            PhaseKind::Command => "command",
            PhaseKind::Movement => "movement",
            PhaseKind::Shooting => "shooting",
            PhaseKind::Charge => "charge",
            PhaseKind::Fight => "fight",
            PhaseKind::Morale => "morale",
            PhaseKind::Scoring => "scoring",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OutcomeReason {
    /// Battle rounds ran out; most victory points wins.
    VictoryPoints = 0,
    /// A player conceded.
    Concession = 1,
    /// A player stayed disconnected past the reconnection window.
    Forfeit = 2,
    /// The active player ran out of turn time.
    TurnTimeout = 3,
    /// A player has no units left.
    Annihilation = 4,
}

/// Final result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Winner, `None` on a draw.
    pub winner: Option<PlayerId>,
    /// Why the game ended.
    pub reason: OutcomeReason,
}

// =============================================================================
// OPEN SEQUENCES
// =============================================================================

/// Unsaved wounds waiting for the defender to order allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAllocation {
    /// Unit taking the wounds.
    pub target: UnitId,
    /// Its owner, who chooses the order.
    pub defender: PlayerId,
    /// Damage of each unsaved wound, in resolution order.
    pub wounds: Vec<u32>,
}

/// A shooting sequence between `select_shooter` and `complete_sequence`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShootingSequence {
    /// Shooting unit.
    pub attacker: UnitId,
    /// Target unit.
    pub target: UnitId,
    /// Attacking player.
    pub player: PlayerId,
    /// Weapons still to resolve.
    pub remaining: VecDeque<Weapon>,
    /// Wounds waiting for the defender.
    pub pending: Option<PendingAllocation>,
}

/// A fight activation between `select_fighter` and `complete_activation`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Fighting unit.
    pub unit: UnitId,
    /// Its owner (the selecting player).
    pub player: PlayerId,
    /// Whether its attacks have been resolved.
    pub resolved: bool,
    /// Wounds waiting for the defender.
    pub pending: Option<PendingAllocation>,
}

/// An attack sequence that spans several actions.
///
/// Kept in the state so snapshots, restores and replicas see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenSequence {
    /// Shooting phase.
    Shooting(ShootingSequence),
    /// Fight phase.
    Fight(Activation),
}

impl OpenSequence {
    /// Wounds waiting for the defender, if any.
    pub fn pending(&self) -> Option<&PendingAllocation> {
        match self {
            OpenSequence::Shooting(s) => s.pending.as_ref(),
            OpenSequence::Fight(a) => a.pending.as_ref(),
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete state of a game.
///
/// Mutated only by applying diffs through the `StateStore`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Turn counter, starting at 1 once battle begins.
    pub turn_number: u32,
    /// Current phase.
    pub current_phase: PhaseKind,
    /// The player whose turn it is.
    pub active_player: PlayerId,
    /// Player who takes the first turn of every battle round.
    pub first_player: PlayerId,
    /// Battle round (0 during deployment).
    pub battle_round: u32,
    /// Player allowed to select the next fight activation, while one is pending.
    pub selecting_player: Option<PlayerId>,
    /// Players.
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    /// Units.
    pub units: BTreeMap<UnitId, Unit>,
    /// Board.
    pub board: BoardData,
    /// Set once when the game ends.
    pub outcome: Option<GameOutcome>,
    /// Attack sequence left open between actions.
    #[serde(default)]
    pub open_sequence: Option<OpenSequence>,
    /// Last accepted `sequence_id` of each player.
    #[serde(default)]
    pub last_sequence: BTreeMap<PlayerId, u64>,
}

impl GameState {
    /// Get a unit by id.
    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.get(id)
    }

    /// Get a player by id.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerRecord> {
        self.players.get(&id)
    }

    /// Units owned by a player, in id order.
    pub fn units_of(&self, player: PlayerId) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.owner == player)
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    /// Open shooting sequence.
    pub fn shooting_sequence(&self) -> Option<&ShootingSequence> {
        match &self.open_sequence {
            Some(OpenSequence::Shooting(s)) => Some(s),
            _ => None,
        }
    }

    /// Fight activation in progress.
    pub fn activation(&self) -> Option<&Activation> {
        match &self.open_sequence {
            Some(OpenSequence::Fight(a)) => Some(a),
            _ => None,
        }
    }

    /// Checksum over the deterministic subset of the state.
    ///
    /// Covers turn, phase, active/selecting player, player scores, the open
    /// sequence, accepted sequence ids and per-unit positions, wounds and
    /// flags. Names, profiles and the board are static and left out.
    pub fn checksum(&self) -> Checksum {
        compute_state_checksum(self.turn_number, self.battle_round, |hasher| {
            hasher.update_u8(self.current_phase as u8);
            hasher.update_u8(self.active_player.0);
            hasher.update_u8(self.first_player.0);
            hasher.update_opt_u8(self.selecting_player.map(|p| p.0));

            match self.outcome {
                Some(outcome) => {
                    hasher.update_u8(1);
                    hasher.update_opt_u8(outcome.winner.map(|p| p.0));
                    hasher.update_u8(outcome.reason as u8);
                }
                None => hasher.update_u8(0),
            }

            for player in self.players.values() {
                hasher.update_u8(player.id.0);
                hasher.update_u32(player.command_points);
                hasher.update_u32(player.victory_points);
            }

            for (player, seq) in &self.last_sequence {
                hasher.update_u8(player.0);
                hasher.update_u64(*seq);
            }

            match &self.open_sequence {
                Some(open) => {
                    hasher.update_u8(1);
                    hash_sequence(open, hasher);
                }
                None => hasher.update_u8(0),
            }

            for unit in self.units.values() {
                hash_unit(unit, hasher);
            }
        })
    }
}

fn hash_sequence(open: &OpenSequence, hasher: &mut StateHasher) {
    match open {
        OpenSequence::Shooting(s) => {
            hasher.update_u8(0);
            hasher.update_str(&s.attacker);
            hasher.update_str(&s.target);
            hasher.update_u8(s.player.0);
            hasher.update_u32(s.remaining.len() as u32);
            for weapon in &s.remaining {
                hasher.update_str(&weapon.name);
            }
        }
        OpenSequence::Fight(a) => {
            hasher.update_u8(1);
            hasher.update_str(&a.unit);
            hasher.update_u8(a.player.0);
            hasher.update_bool(a.resolved);
        }
    }
    match open.pending() {
        Some(pending) => {
            hasher.update_bool(true);
            hasher.update_str(&pending.target);
            hasher.update_u8(pending.defender.0);
            hasher.update_u32(pending.wounds.len() as u32);
            for &damage in &pending.wounds {
                hasher.update_u32(damage);
            }
        }
        None => hasher.update_bool(false),
    }
}

fn hash_unit(unit: &Unit, hasher: &mut StateHasher) {
    hasher.update_str(&unit.id);
    hasher.update_u8(unit.owner.0);
    hasher.update_u32(unit.flags.len() as u32);
    for flag in &unit.flags {
        hasher.update_str(flag);
    }
    hasher.update_u32(unit.models.len() as u32);
    for model in &unit.models {
        hasher.update_str(&model.id);
        hasher.update_u32(model.wounds);
        match model.position {
            Some(pos) => {
                hasher.update_bool(true);
                hasher.update_i32(pos.x);
                hasher.update_i32(pos.y);
            }
            None => hasher.update_bool(false),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
