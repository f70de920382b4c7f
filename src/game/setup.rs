//! Game setup.
//!
//! Builds initial `GameState`s from rosters. Army/roster loading is external;
//! callers hand over already-resolved profiles.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::action::validate_unit_id;
use super::state::{
    BoardData, GameState, Model, Objective, PhaseKind, PlayerId, PlayerRecord, Position, Unit,
    UnitProfile, Weapon, Zone,
};

/// Setup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Unit id unusable as a path segment.
    #[error("invalid unit id '{0}'")]
    InvalidUnitId(String),

    /// Two units share an id.
    #[error("duplicate unit id '{0}'")]
    DuplicateUnit(String),

    /// Owner is not player 1 or 2.
    #[error("unit '{0}' has an invalid owner")]
    InvalidOwner(String),

    /// Unit with no models.
    #[error("unit '{0}' has no models")]
    EmptyUnit(String),
}

/// Roster entry.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    id: String,
    owner: PlayerId,
    name: String,
    profile: UnitProfile,
    models: usize,
    wounds: u32,
    at: Option<Position>,
    flags: BTreeSet<String>,
}

impl UnitSpec {
    /// A unit of `models` single-wound models.
    pub fn new(id: &str, owner: PlayerId, profile: UnitProfile, models: usize) -> Self {
        Self {
            id: id.to_string(),
            owner,
            name: id.to_string(),
            profile,
            models,
            wounds: 1,
            at: None,
            flags: BTreeSet::new(),
        }
    }

    /// Display name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Wounds per model.
    pub fn wounds(mut self, wounds: u32) -> Self {
        self.wounds = wounds;
        self
    }

    /// Start deployed, models in rows of five from `anchor`.
    pub fn at(mut self, anchor: Position) -> Self {
        self.at = Some(anchor);
        self
    }

    /// Start with a flag set.
    pub fn flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    fn build(self) -> Result<Unit, SetupError> {
        if validate_unit_id(&self.id).is_err() {
            return Err(SetupError::InvalidUnitId(self.id));
        }
        if !self.owner.is_valid() {
            return Err(SetupError::InvalidOwner(self.id));
        }
        if self.models == 0 {
            return Err(SetupError::EmptyUnit(self.id));
        }

        let models = (0..self.models)
            .map(|i| Model {
                id: format!("m{}", i),
                wounds: self.wounds,
                max_wounds: self.wounds,
                position: self.at.map(|a| a.offset((i % 5) as i32, (i / 5) as i32)),
            })
            .collect();

        Ok(Unit {
            id: self.id,
            owner: self.owner,
            name: self.name,
            profile: self.profile,
            models,
            flags: self.flags,
        })
    }
}

/// Builder for an initial game state.
#[derive(Debug, Clone)]
pub struct GameSetup {
    board: BoardData,
    names: [String; 2],
    first_player: PlayerId,
    units: Vec<UnitSpec>,
    start: Option<(PhaseKind, PlayerId)>,
}

impl Default for GameSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSetup {
    /// Empty roster on the standard board, starting in deployment.
    pub fn new() -> Self {
        Self {
            board: standard_board(),
            names: ["Player 1".to_string(), "Player 2".to_string()],
            first_player: PlayerId::ONE,
            units: Vec::new(),
            start: None,
        }
    }

    /// Replace the board.
    pub fn board(mut self, board: BoardData) -> Self {
        self.board = board;
        self
    }

    /// Set a player's display name.
    pub fn player_name(mut self, player: PlayerId, name: &str) -> Self {
        let idx = if player == PlayerId::ONE { 0 } else { 1 };
        self.names[idx] = name.to_string();
        self
    }

    /// Player who goes first each battle round.
    pub fn first_player(mut self, player: PlayerId) -> Self {
        self.first_player = player;
        self
    }

    /// Add a unit.
    pub fn unit(mut self, spec: UnitSpec) -> Self {
        self.units.push(spec);
        self
    }

    /// Skip deployment and start battle round 1 in `phase` with `active` to play.
    pub fn start_in(mut self, phase: PhaseKind, active: PlayerId) -> Self {
        self.start = Some((phase, active));
        self
    }

    /// Build the state.
    pub fn build(self) -> Result<GameState, SetupError> {
        let mut units = BTreeMap::new();
        for spec in self.units {
            let unit = spec.build()?;
            if units.contains_key(&unit.id) {
                return Err(SetupError::DuplicateUnit(unit.id));
            }
            units.insert(unit.id.clone(), unit);
        }

        let players = [PlayerId::ONE, PlayerId::TWO]
            .into_iter()
            .zip(self.names)
            .map(|(id, name)| {
                (id, PlayerRecord { id, name, command_points: 0, victory_points: 0 })
            })
            .collect();

        let (current_phase, active_player, turn_number, battle_round) = match self.start {
            Some((phase, active)) => (phase, active, 1, 1),
            None => (PhaseKind::Deployment, self.first_player, 0, 0),
        };

        Ok(GameState {
            turn_number,
            current_phase,
            active_player,
            first_player: self.first_player,
            battle_round,
            selecting_player: None,
            players,
            units,
            board: self.board,
            outcome: None,
            open_sequence: None,
            last_sequence: BTreeMap::new(),
        })
    }
}

/// 44" x 60" board, deployment zones along the short edges, three objectives
/// across the middle.
pub fn standard_board() -> BoardData {
    let mut deployment_zones = BTreeMap::new();
    deployment_zones.insert(PlayerId::ONE, Zone { min_x: 0, min_y: 0, max_x: 44, max_y: 12 });
    deployment_zones.insert(PlayerId::TWO, Zone { min_x: 0, min_y: 48, max_x: 44, max_y: 60 });

    BoardData {
        width: 44,
        height: 60,
        objectives: vec![
            Objective { id: 1, position: Position::new(22, 30) },
            Objective { id: 2, position: Position::new(8, 30) },
            Objective { id: 3, position: Position::new(36, 30) },
        ],
        deployment_zones,
    }
}

/// Battle-line infantry.
pub fn line_profile() -> UnitProfile {
    UnitProfile {
        movement: 6,
        toughness: 4,
        save: 3,
        leadership: 6,
        objective_control: 2,
        ranged: vec![Weapon {
            name: "Rifle".into(), range: 24, attacks: 2, skill: 3, strength: 4, ap: 1, damage: 1,
        }],
        melee: vec![Weapon {
            name: "Close combat weapon".into(), range: 0, attacks: 2, skill: 3, strength: 4, ap: 0, damage: 1,
        }],
    }
}

/// Lone character.
pub fn leader_profile() -> UnitProfile {
    UnitProfile {
        movement: 6,
        toughness: 4,
        save: 2,
        leadership: 6,
        objective_control: 1,
        ranged: vec![Weapon {
            name: "Pistol".into(), range: 12, attacks: 1, skill: 2, strength: 5, ap: 1, damage: 2,
        }],
        melee: vec![Weapon {
            name: "Power sword".into(), range: 0, attacks: 5, skill: 2, strength: 5, ap: 2, damage: 2,
        }],
    }
}

/// Large melee-focused mob.
pub fn horde_profile() -> UnitProfile {
    UnitProfile {
        movement: 6,
        toughness: 5,
        save: 5,
        leadership: 7,
        objective_control: 2,
        ranged: vec![Weapon {
            name: "Slugga".into(), range: 12, attacks: 1, skill: 5, strength: 4, ap: 0, damage: 1,
        }],
        melee: vec![Weapon {
            name: "Choppa".into(), range: 0, attacks: 3, skill: 3, strength: 4, ap: 1, damage: 1,
        }],
    }
}

/// Two small armies, undeployed.
pub fn demo_setup() -> GameSetup {
    GameSetup::new()
        .player_name(PlayerId::ONE, "Blue")
        .player_name(PlayerId::TWO, "Red")
        .unit(UnitSpec::new("p1_captain", PlayerId::ONE, leader_profile(), 1).named("Captain").wounds(5))
        .unit(UnitSpec::new("p1_squad", PlayerId::ONE, line_profile(), 5).named("Battle Squad").wounds(2))
        .unit(UnitSpec::new("p2_boss", PlayerId::TWO, leader_profile(), 1).named("Warboss").wounds(6))
        .unit(UnitSpec::new("p2_mob", PlayerId::TWO, horde_profile(), 10).named("Mob"))
}

/// Demo state for tests.
#[cfg(test)]
pub fn demo_state() -> GameState {
    demo_setup().build().expect("demo roster is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_state_starts_in_deployment() {
        let state = demo_state();
        assert_eq!(state.current_phase, PhaseKind::Deployment);
        assert_eq!(state.turn_number, 0);
        assert_eq!(state.units.len(), 4);
        assert!(state.units.values().all(|u| !u.is_deployed()));
        assert_eq!(state.players[&PlayerId::TWO].name, "Red");
    }

    #[test]
    fn test_start_in_battle() {
        let state = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 3).at(Position::new(5, 5)))
            .start_in(PhaseKind::Fight, PlayerId::TWO)
            .build()
            .unwrap();
        assert_eq!(state.current_phase, PhaseKind::Fight);
        assert_eq!(state.active_player, PlayerId::TWO);
        assert_eq!(state.battle_round, 1);
        assert_eq!(state.units["a"].models[2].position, Some(Position::new(7, 5)));
    }

    #[test]
    fn test_duplicate_and_invalid_units() {
        let dup = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 1))
            .unit(UnitSpec::new("a", PlayerId::TWO, line_profile(), 1))
            .build();
        assert_eq!(dup, Err(SetupError::DuplicateUnit("a".into())));

        let dotted = GameSetup::new()
            .unit(UnitSpec::new("a.b", PlayerId::ONE, line_profile(), 1))
            .build();
        assert_eq!(dotted, Err(SetupError::InvalidUnitId("a.b".into())));

        let empty = GameSetup::new()
            .unit(UnitSpec::new("a", PlayerId::ONE, line_profile(), 0))
            .build();
        assert_eq!(empty, Err(SetupError::EmptyUnit("a".into())));
    }
}
