//! State Hashing for Verification
//!
//! Provides deterministic hashing of game state for:
//! - Divergence detection between authority and participant
//! - Replay validation

use sha2::{Sha256, Digest};

/// Checksum output type (256 bits / 32 bytes)
pub type Checksum = [u8; 32];

/// Deterministic hasher for game state.
///
/// Wraps SHA-256 with length-prefixed helpers so adjacent fields cannot
/// run into each other. Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for the game state checksum.
    pub fn for_game_state() -> Self {
        Self::new(b"TABLETOP_SYNC_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with an optional u8, distinguishing `None` from any value.
    #[inline]
    pub fn update_opt_u8(&mut self, value: Option<u8>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u8(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Checksum {
        self.hasher.finalize().into()
    }
}

/// Compute a game state checksum.
///
/// Called by `GameState::checksum()`. The closure adds the
/// state-specific fields after the turn header.
pub fn compute_state_checksum<F>(turn_number: u32, battle_round: u32, add_state: F) -> Checksum
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();

    // Always hash the turn header first
    hasher.update_u32(turn_number);
    hasher.update_u32(battle_round);

    add_state(&mut hasher);

    hasher.finalize()
}

/// Short hex prefix of a checksum for log lines.
pub fn short_hex(checksum: &Checksum) -> String {
    hex::encode(&checksum[..6])
}

// =============================================================================
// TESTS
// =============================================================================
