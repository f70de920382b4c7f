//! Protocol Messages
//!
//! Wire format between the authority and a participant. Messages are tagged
//! JSON objects, one per WebSocket text frame.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::core::hash::Checksum;
use crate::core::rng::RngSeedRecord;
use crate::game::action::Action;
use crate::game::diff::DiffBatch;
use crate::game::error::ActionError;
use crate::game::processor::ActionResult;
use crate::game::state::{GameOutcome, PlayerId};
use crate::game::store::StateSnapshot;

/// Version announced in `Hello`; peers must match exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Participant introduces itself, or comes back with a token.
    Hello {
        /// Sender's protocol version.
        protocol_version: u32,
        /// Token from an earlier `Welcome`, when reconnecting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconnect_token: Option<Uuid>,
    },

    /// Authority accepts a participant.
    Welcome(Box<Welcome>),

    /// Authority turns a participant away.
    Refused {
        /// Why.
        reason: String,
    },

    /// Participant asks the authority to execute an action.
    Submit {
        /// Participant-chosen correlation id.
        request_id: u64,
        /// The action.
        action: Action,
    },

    /// Authority committed an action. Sent to every peer.
    Outcome {
        /// Set on the copy sent to the submitter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        /// Committed result; its diffs are the batch.
        result: Box<ActionResult>,
    },

    /// Authority refused a submitted action. Sent to the submitter only.
    Rejected {
        /// Correlation id of the submit.
        request_id: u64,
        /// Why.
        error: ActionError,
    },

    /// Periodic state checksum from the authority.
    Checksum {
        /// Batch the checksum was taken after.
        batch_seq: u64,
        /// Checksum of the deterministic state subset.
        checksum: Checksum,
    },

    /// Participant asks for a full snapshot.
    ResyncRequest {
        /// Last batch the participant applied.
        have_batch_seq: u64,
        /// Why.
        reason: String,
    },

    /// Full state from the authority.
    ResyncResponse {
        /// Authority state.
        snapshot: Box<StateSnapshot>,
        /// Authority random record.
        rng: RngSeedRecord,
    },

    /// The game is paused.
    Paused {
        /// Why.
        reason: String,
        /// Seconds left before the absent player forfeits.
        window_secs: u64,
    },

    /// The game continues.
    Resumed,

    /// The game ended outside a player action (forfeit, timeout).
    GameOver {
        /// Result.
        outcome: GameOutcome,
        /// System batch that recorded the outcome.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<DiffBatch>,
        /// Random record after the batch.
        rng: RngSeedRecord,
    },

    /// Liveness check.
    Ping {
        /// Sender clock, echoed back.
        timestamp: u64,
    },

    /// Liveness reply.
    Pong {
        /// Echoed timestamp.
        timestamp: u64,
    },

    /// Orderly departure.
    Goodbye {
        /// Why.
        reason: String,
    },
}

/// Handshake payload for an admitted participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// Session identifier.
    pub session_id: Uuid,
    /// Seat assigned to the participant.
    pub assigned_player: PlayerId,
    /// Present this in `Hello` to reclaim the seat after a disconnect.
    pub reconnect_token: Uuid,
    /// Game settings.
    pub game_config: GameConfig,
    /// Current state.
    pub snapshot: StateSnapshot,
    /// Current random record.
    pub rng: RngSeedRecord,
}

impl PeerMessage {
    /// Hello for a first connection or a reconnect.
    pub fn hello(reconnect_token: Option<Uuid>) -> Self {
        PeerMessage::Hello { protocol_version: PROTOCOL_VERSION, reconnect_token }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Hello { .. } => "hello",
            PeerMessage::Welcome(_) => "welcome",
            PeerMessage::Refused { .. } => "refused",
            PeerMessage::Submit { .. } => "submit",
            PeerMessage::Outcome { .. } => "outcome",
            PeerMessage::Rejected { .. } => "rejected",
            PeerMessage::Checksum { .. } => "checksum",
            PeerMessage::ResyncRequest { .. } => "resync_request",
            PeerMessage::ResyncResponse { .. } => "resync_response",
            PeerMessage::Paused { .. } => "paused",
            PeerMessage::Resumed => "resumed",
            PeerMessage::GameOver { .. } => "game_over",
            PeerMessage::Ping { .. } => "ping",
            PeerMessage::Pong { .. } => "pong",
            PeerMessage::Goodbye { .. } => "goodbye",
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
