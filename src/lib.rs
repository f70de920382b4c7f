//! # Tabletop Sync
//!
//! Deterministic action processing and host-authoritative lockstep for a
//! two-player, turn-based miniatures battle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TABLETOP SYNC                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Xorshift128+, seed derivation, dice       │
//! │  └── hash.rs     - State checksums                           │
//! │                                                              │
//! │  game/           - State and actions (deterministic)         │
//! │  ├── state.rs    - GameState, units, board                   │
//! │  ├── diff.rs     - Addressed mutations and batches           │
//! │  ├── store.rs    - Canonical state, snapshot/restore         │
//! │  ├── action.rs   - Actions and typed commands                │
//! │  ├── processor.rs- Validate, process, commit                 │
//! │  └── log.rs      - Accepted action log                       │
//! │                                                              │
//! │  phase/          - Turn phases and alternating activation    │
//! │  rules/          - Geometry and dice maths                   │
//! │                                                              │
//! │  network/        - Lockstep (non-deterministic)              │
//! │  ├── coordinator.rs - Driver task and public handle          │
//! │  ├── authority.rs   - Host: validation layers, broadcast     │
//! │  ├── participant.rs - Replica: apply, verify, resync         │
//! │  ├── session.rs     - Seats and reconnection                 │
//! │  ├── protocol.rs    - Peer messages                          │
//! │  └── transport.rs   - WebSocket and in-memory links          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `game/`, `phase/` and `rules/` modules are deterministic:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time in anything that is checksummed
//! - All randomness from authority-minted seeds
//!
//! Given the same initial state, session seed and accepted actions, every
//! peer ends with the same state checksum.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod phase;
pub mod rules;

// Re-export commonly used types
pub use config::{ConfigError, GameConfig, SyncConfig};
pub use crate::core::rng::{DeterministicRandomService, DiceStream, RngSeedRecord};
pub use game::{
    Action, ActionError, ActionProcessor, ActionResult, ActionType, Diff, DiffBatch, GameState, PhaseKind, PlayerId,
    StateSnapshot, StateStore,
};
pub use network::{CoordinatorEvent, NetworkCoordinator};
pub use phase::{Completion, PhaseController};
pub use rules::{RuleEvaluator, StandardRules};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
