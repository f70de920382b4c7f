//! Deterministic Random Number Generation
//!
//! Uses Xorshift128+ for fast, deterministic randomness, seeded through SplitMix64.
//! Seeds are derived by the authority from `(session_seed, counter, turn_number)`
//! and shipped with the action so every peer can reproduce the same dice.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};
use thiserror::Error;

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform.
///
/// # Example
///
/// ```
/// use tabletop_sync::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, irrelevant for dice
        (self.next_u64() % max as u64) as u32
    }

}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the seed for one randomness-consuming action.
///
/// Inputs are hashed in a fixed order behind a domain separator so the
/// same `(session_seed, counter, turn_number)` always yields the same seed
/// and no two counters collide in practice.
pub fn derive_action_seed(session_seed: u64, counter: u64, turn_number: u32) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(b"TABLETOP_SYNC_SEED_V1");
    hasher.update(session_seed.to_le_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(turn_number.to_le_bytes());

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// DICE
// =============================================================================

/// A stream of dice drawn from one agreed seed.
///
/// Rule evaluation receives a `DiceStream` and must not use any other
/// source of randomness.
#[derive(Clone, Debug)]
pub struct DiceStream {
    rng: DeterministicRng,
}

impl DiceStream {
    /// Start a stream from a seed.
    pub fn new(seed: u64) -> Self {
        Self { rng: DeterministicRng::new(seed) }
    }

    /// Roll one die with `sides` faces (1..=sides).
    pub fn roll(&mut self, sides: u32) -> u32 {
        self.rng.next_int(sides.max(1)) + 1
    }

    /// Roll one six-sided die.
    #[inline]
    pub fn d6(&mut self) -> u32 {
        self.roll(6)
    }

    /// Sum of `count` six-sided dice.
    pub fn d6_sum(&mut self, count: u32) -> u32 {
        (0..count).map(|_| self.d6()).sum()
    }

    /// Roll `count` six-sided dice and keep the individual results.
    pub fn d6_pool(&mut self, count: u32) -> Vec<u32> {
        (0..count).map(|_| self.d6()).collect()
    }
}

// =============================================================================
// RANDOM SERVICE
// =============================================================================

/// `(session_seed, counter)` pair identifying the next seed to mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngSeedRecord {
    /// Session seed agreed at session creation.
    pub session_seed: u64,
    /// Number of seeds minted so far.
    pub counter: u64,
}

/// Errors from the random service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RngError {
    /// Only the authority may mint seeds.
    #[error("only the authority may mint seeds")]
    NotAuthority,

    /// A replica observed a counter that went backwards.
    #[error("rng counter went backwards: have {have}, observed {observed}")]
    CounterRegression {
        /// Local counter.
        have: u64,
        /// Counter reported by the authority.
        observed: u64,
    },

    /// A replica observed a record from another session.
    #[error("rng session mismatch: have {have}, observed {observed}")]
    SessionMismatch {
        /// Local session seed.
        have: u64,
        /// Session seed reported by the authority.
        observed: u64,
    },
}

/// Produces reproducible seeds for randomness-consuming actions.
///
/// The authority calls [`next_seed`](Self::next_seed); replicas only track
/// the counter the authority reports and draw from seeds already attached
/// to actions.
#[derive(Clone, Debug)]
pub struct DeterministicRandomService {
    record: RngSeedRecord,
    authority: bool,
}

impl DeterministicRandomService {
    /// Service that mints seeds.
    pub fn authority(session_seed: u64) -> Self {
        Self {
            record: RngSeedRecord { session_seed, counter: 0 },
            authority: true,
        }
    }

    /// Service that follows an authority's counter.
    pub fn replica(session_seed: u64) -> Self {
        Self {
            record: RngSeedRecord { session_seed, counter: 0 },
            authority: false,
        }
    }

    /// Whether this service may mint seeds.
    pub fn is_authority(&self) -> bool {
        self.authority
    }

    /// Current record.
    pub fn record(&self) -> RngSeedRecord {
        self.record
    }

    /// Mint the next seed and advance the counter.
    pub fn next_seed(&mut self, turn_number: u32) -> Result<u64, RngError> {
        if !self.authority {
            return Err(RngError::NotAuthority);
        }
        let seed = derive_action_seed(self.record.session_seed, self.record.counter, turn_number);
        self.record.counter += 1;
        Ok(seed)
    }

    /// Dice for an agreed seed.
    pub fn draw(&self, seed: u64) -> DiceStream {
        DiceStream::new(seed)
    }

    /// Follow the authority's counter. Never moves backwards.
    pub fn observe(&mut self, record: RngSeedRecord) -> Result<(), RngError> {
        if record.session_seed != self.record.session_seed {
            return Err(RngError::SessionMismatch {
                have: self.record.session_seed,
                observed: record.session_seed,
            });
        }
        if record.counter < self.record.counter {
            return Err(RngError::CounterRegression {
                have: self.record.counter,
                observed: record.counter,
            });
        }
        self.record.counter = record.counter;
        Ok(())
    }

    /// Replace the record wholesale (resync / restore).
    pub fn reset(&mut self, record: RngSeedRecord) {
        self.record = record;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_known_values() {
        // These values must never change or recorded games stop replaying.
        let mut rng = DeterministicRng::new(42);
        assert_eq!(rng.next_u64(), 16629283624882167704);
        assert_eq!(rng.next_u64(), 1420492921613871959);
        assert_eq!(rng.next_u64(), 9768315062676884790);
    }

    #[test]
    fn test_next_int_bounds() {
        let mut rng = DeterministicRng::new(5678);
        for _ in 0..1000 {
            assert!(rng.next_int(6) < 6);
        }
        assert_eq!(rng.next_int(0), 0);
    }

    #[test]
    fn test_same_seed_same_dice() {
        let a = DiceStream::new(1111).d6_pool(10);
        let b = DiceStream::new(1111).d6_pool(10);
        assert_eq!(a, b);
        assert_ne!(a, DiceStream::new(1112).d6_pool(10));
    }

    #[test]
    fn test_dice_faces_in_range() {
        let mut dice = DiceStream::new(99);
        for _ in 0..600 {
            let roll = dice.d6();
            assert!((1..=6).contains(&roll));
        }

        let sum = dice.d6_sum(2);
        assert!((2..=12).contains(&sum));
    }

    #[test]
    fn test_same_session_seed_same_first_seed() {
        // Two independent authorities seeded with 42 agree on S0 and its dice.
        let mut a = DeterministicRandomService::authority(42);
        let mut b = DeterministicRandomService::authority(42);

        let s0_a = a.next_seed(1).unwrap();
        let s0_b = b.next_seed(1).unwrap();
        assert_eq!(s0_a, s0_b);
        assert_eq!(s0_a, derive_action_seed(42, 0, 1));

        let rolls_a = a.draw(s0_a).d6_pool(20);
        let rolls_b = b.draw(s0_b).d6_pool(20);
        assert_eq!(rolls_a, rolls_b);
        assert_eq!(a.record().counter, 1);
    }

    #[test]
    fn test_seeds_never_reused() {
        let mut service = DeterministicRandomService::authority(7);
        let seeds: Vec<u64> = (0..100).map(|_| service.next_seed(3).unwrap()).collect();
        let mut unique = seeds.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seeds.len());
    }

    #[test]
    fn test_derive_action_seed_inputs_matter() {
        let base = derive_action_seed(1, 0, 1);
        assert_ne!(base, derive_action_seed(2, 0, 1));
        assert_ne!(base, derive_action_seed(1, 1, 1));
        assert_ne!(base, derive_action_seed(1, 0, 2));
    }

    #[test]
    fn test_replica_cannot_mint() {
        let mut replica = DeterministicRandomService::replica(42);
        assert_eq!(replica.next_seed(1), Err(RngError::NotAuthority));
    }

    #[test]
    fn test_replica_counter_is_monotonic() {
        let mut replica = DeterministicRandomService::replica(42);
        replica.observe(RngSeedRecord { session_seed: 42, counter: 3 }).unwrap();
        assert_eq!(replica.record().counter, 3);

        let err = replica.observe(RngSeedRecord { session_seed: 42, counter: 2 });
        assert!(matches!(err, Err(RngError::CounterRegression { have: 3, observed: 2 })));

        let err = replica.observe(RngSeedRecord { session_seed: 9, counter: 4 });
        assert!(matches!(err, Err(RngError::SessionMismatch { .. })));
    }
}
