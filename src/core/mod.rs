//! Core deterministic primitives.
//!
//! Everything here is platform independent: integer-only randomness and
//! SHA-256 checksums that both peers compute identically.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, DeterministicRandomService, DiceStream, RngSeedRecord, RngError};
pub use hash::{Checksum, StateHasher, compute_state_checksum};
