//! Runtime configuration.
//!
//! Both structs have sensible defaults and can be overridden from
//! `TABLETOP_*` environment variables:
//!
//! - `TABLETOP_CHECKSUM_INTERVAL_MS`
//! - `TABLETOP_RECONNECT_WINDOW_SECS`
//! - `TABLETOP_TURN_TIME_LIMIT_SECS` (`0` disables the turn timer)
//! - `TABLETOP_RESYNC_RETRY_BUDGET`
//! - `TABLETOP_TICK_INTERVAL_MS`
//! - `TABLETOP_OUTBOUND_QUEUE`
//! - `TABLETOP_MAX_BATTLE_ROUNDS`
//! - `TABLETOP_COMMAND_POINTS`
//! - `TABLETOP_OBJECTIVE_VP`

use std::env;
use std::str::FromStr;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::network::protocol::PROTOCOL_VERSION;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Variable present but unparsable.
    #[error("{key}: cannot parse '{value}'")]
    Parse {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Parsed but outside the allowed range.
    #[error("{key}: {reason}")]
    OutOfRange {
        /// Variable name.
        key: String,
        /// What is wrong.
        reason: String,
    },
}

// =============================================================================
// SYNC CONFIG
// =============================================================================

/// Network synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often the authority broadcasts a state checksum.
    pub checksum_interval: Duration,
    /// How long a disconnected peer may take to come back before forfeiting.
    pub reconnect_window: Duration,
    /// Per-turn time budget for the active player.
    pub turn_time_limit: Option<Duration>,
    /// Consecutive failed resyncs tolerated before a hard desync error.
    pub resync_retry_budget: u32,
    /// Driver timer resolution.
    pub tick_interval: Duration,
    /// Protocol version announced in hello.
    pub protocol_version: u32,
    /// Outbound message queue depth per peer.
    pub outbound_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checksum_interval: Duration::from_secs(5),
            reconnect_window: Duration::from_secs(60),
            turn_time_limit: None,
            resync_retry_budget: 3,
            tick_interval: Duration::from_millis(250),
            protocol_version: PROTOCOL_VERSION,
            outbound_queue: 64,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = read::<u64, _>(&lookup, "TABLETOP_CHECKSUM_INTERVAL_MS")? {
            config.checksum_interval = Duration::from_millis(positive("TABLETOP_CHECKSUM_INTERVAL_MS", ms)?);
        }
        if let Some(secs) = read::<u64, _>(&lookup, "TABLETOP_RECONNECT_WINDOW_SECS")? {
            config.reconnect_window = Duration::from_secs(secs);
        }
        if let Some(secs) = read::<u64, _>(&lookup, "TABLETOP_TURN_TIME_LIMIT_SECS")? {
            config.turn_time_limit = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(budget) = read::<u32, _>(&lookup, "TABLETOP_RESYNC_RETRY_BUDGET")? {
            config.resync_retry_budget = budget;
        }
        if let Some(ms) = read::<u64, _>(&lookup, "TABLETOP_TICK_INTERVAL_MS")? {
            config.tick_interval = Duration::from_millis(positive("TABLETOP_TICK_INTERVAL_MS", ms)?);
        }
        if let Some(depth) = read::<usize, _>(&lookup, "TABLETOP_OUTBOUND_QUEUE")? {
            config.outbound_queue = positive("TABLETOP_OUTBOUND_QUEUE", depth)?;
        }

        Ok(config)
    }
}

// =============================================================================
// GAME CONFIG
// =============================================================================

/// Game rule settings. Sent to participants in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Battle rounds before the game ends on points.
    pub max_battle_rounds: u32,
    /// Command points gained at the start of each turn.
    pub command_points_per_turn: u32,
    /// Victory points per scored objective.
    pub objective_vp: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_battle_rounds: 5,
            command_points_per_turn: 1,
            objective_vp: 5,
        }
    }
}

impl GameConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(rounds) = read::<u32, _>(&lookup, "TABLETOP_MAX_BATTLE_ROUNDS")? {
            config.max_battle_rounds = positive("TABLETOP_MAX_BATTLE_ROUNDS", rounds)?;
        }
        if let Some(cp) = read::<u32, _>(&lookup, "TABLETOP_COMMAND_POINTS")? {
            config.command_points_per_turn = cp;
        }
        if let Some(vp) = read::<u32, _>(&lookup, "TABLETOP_OBJECTIVE_VP")? {
            config.objective_vp = vp;
        }

        Ok(config)
    }
}

fn read<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn positive<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange { key: key.to_string(), reason: "must be positive".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        assert_eq!(SyncConfig::from_lookup(lookup(&[])).unwrap(), SyncConfig::default());
        assert_eq!(GameConfig::from_lookup(lookup(&[])).unwrap(), GameConfig::default());
    }

    #[test]
    fn test_overrides() {
        let sync = SyncConfig::from_lookup(lookup(&[
            ("TABLETOP_CHECKSUM_INTERVAL_MS", "1500"),
            ("TABLETOP_TURN_TIME_LIMIT_SECS", "90"),
            ("TABLETOP_RESYNC_RETRY_BUDGET", "5"),
        ])).unwrap();
        assert_eq!(sync.checksum_interval, Duration::from_millis(1500));
        assert_eq!(sync.turn_time_limit, Some(Duration::from_secs(90)));
        assert_eq!(sync.resync_retry_budget, 5);

        let game = GameConfig::from_lookup(lookup(&[("TABLETOP_MAX_BATTLE_ROUNDS", "3")])).unwrap();
        assert_eq!(game.max_battle_rounds, 3);
    }

    #[test]
    fn test_zero_turn_limit_disables_timer() {
        let sync = SyncConfig::from_lookup(lookup(&[("TABLETOP_TURN_TIME_LIMIT_SECS", "0")])).unwrap();
        assert_eq!(sync.turn_time_limit, None);
    }

    #[test]
    fn test_invalid_values() {
        let err = SyncConfig::from_lookup(lookup(&[("TABLETOP_TICK_INTERVAL_MS", "fast")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = GameConfig::from_lookup(lookup(&[("TABLETOP_MAX_BATTLE_ROUNDS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }
}
