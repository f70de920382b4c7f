//! Game Logic Module
//!
//! State, diffs and action processing. Everything here is deterministic:
//! BTreeMap iteration, integer geometry, and dice drawn only from seeds the
//! authority attached to actions.
//!
//! ## Module Structure
//!
//! - `state`: game state, units, players, board
//! - `diff`: dot-path mutation primitive and batches
//! - `store`: canonical state, batch numbering, snapshots
//! - `action`: wire actions and typed commands
//! - `processor`: validate → process → commit pipeline
//! - `log`: accepted-action log for replay
//! - `setup`: initial states from rosters
//! - `events`: side effects for logs and UI
//! - `error`: action error taxonomy

pub mod action;
pub mod diff;
pub mod error;
pub mod events;
pub mod log;
pub mod processor;
pub mod setup;
pub mod state;
pub mod store;

// Re-export key types
pub use action::{Action, ActionContext, ActionType, Command, TurnRule};
pub use diff::{apply_diffs, Diff, DiffBatch, DiffError, DiffOp};
pub use error::ActionError;
pub use events::GameEvent;
pub use log::{ActionLog, LogEntry};
pub use processor::{ActionMetadata, ActionProcessor, ActionResult, PhaseChange};
pub use setup::{GameSetup, SetupError, UnitSpec};
pub use state::{GameOutcome, GameState, OutcomeReason, PhaseKind, PlayerId, Position, Unit, UnitId};
pub use store::{ApplyStatus, StateSnapshot, StateStore, StoreError};
