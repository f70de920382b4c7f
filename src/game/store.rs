//! State Store
//!
//! Owns the canonical `GameState`. Every mutation goes through a numbered
//! `DiffBatch` that is applied all-or-nothing.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

use super::diff::{apply_diffs, Diff, DiffBatch, DiffError};
use super::state::GameState;

/// Snapshot format version. Bump on incompatible `GameState` changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Serializable state snapshot for persistence and resynchronization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Snapshot format version.
    pub format_version: u32,
    /// Last batch applied to `state`.
    pub batch_seq: u64,
    /// The state.
    pub state: GameState,
}

impl StateSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A diff failed; nothing was applied.
    #[error("diff application failed: {0}")]
    Diff(#[from] DiffError),

    /// A batch arrived out of order.
    #[error("batch gap: expected {expected}, got {got}")]
    Gap {
        /// Next expected batch.
        expected: u64,
        /// Batch received.
        got: u64,
    },

    /// Snapshot written by an incompatible version.
    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u32),
}

/// Result of offering a batch to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyStatus {
    /// Batch applied.
    Applied,
    /// Batch was already applied earlier; ignored.
    Duplicate,
}

// =============================================================================
// STORE
// =============================================================================

/// Canonical state holder.
#[derive(Clone, Debug)]
pub struct StateStore {
    state: GameState,
    /// Number of successful mutations (including restores).
    version: u64,
    /// Last applied batch.
    batch_seq: u64,
}

impl StateStore {
    /// Create a store around an initial state.
    pub fn new(state: GameState) -> Self {
        Self { state, version: 0, batch_seq: 0 }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Mutation counter.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Last applied batch number.
    #[inline]
    pub fn batch_seq(&self) -> u64 {
        self.batch_seq
    }

    /// Compute the state the diffs would produce without committing.
    pub fn preview(&self, diffs: &[Diff]) -> Result<GameState, StoreError> {
        Ok(apply_diffs(&self.state, diffs)?)
    }

    /// Number and apply the next batch.
    pub fn commit(&mut self, diffs: Vec<Diff>) -> Result<DiffBatch, StoreError> {
        let batch = DiffBatch { batch_seq: self.batch_seq + 1, diffs };
        self.apply_batch(&batch)?;
        Ok(batch)
    }

    /// Apply a batch produced elsewhere.
    ///
    /// Batches at or below the last applied number are ignored; a batch that
    /// skips ahead is an error and leaves the state untouched.
    pub fn apply_batch(&mut self, batch: &DiffBatch) -> Result<ApplyStatus, StoreError> {
        if batch.batch_seq <= self.batch_seq {
            debug!(batch_seq = batch.batch_seq, have = self.batch_seq, "Ignoring duplicate batch");
            return Ok(ApplyStatus::Duplicate);
        }
        let expected = self.batch_seq + 1;
        if batch.batch_seq != expected {
            return Err(StoreError::Gap { expected, got: batch.batch_seq });
        }

        let next = apply_diffs(&self.state, &batch.diffs)?;
        self.state = next;
        self.batch_seq = batch.batch_seq;
        self.version += 1;
        Ok(ApplyStatus::Applied)
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            batch_seq: self.batch_seq,
            state: self.state.clone(),
        }
    }

    /// Replace the state with a snapshot.
    pub fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StoreError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::UnsupportedFormat(snapshot.format_version));
        }
        self.state = snapshot.state;
        self.batch_seq = snapshot.batch_seq;
        self.version += 1;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
