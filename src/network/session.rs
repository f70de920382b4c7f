//! Peer Session Table
//!
//! Tracks which remote peer holds which seat, and for how long an absent
//! peer may still come back. Owned by the authority; a seat is never freed
//! while the session lives, so a dropped peer can only return with its
//! reconnect token.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::game::state::PlayerId;

/// Transport-level identity of one connection.
pub type PeerId = Uuid;

/// Connection state for reconnection support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Peer is connected.
    Connected,
    /// Peer dropped, waiting for reconnect.
    Disconnected {
        /// When the link went down.
        since: Instant,
    },
}

/// A remote peer holding a seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    /// Current connection of the seat holder.
    pub peer_id: PeerId,
    /// Seat.
    pub assigned_player: PlayerId,
    /// Link state.
    pub connection_state: ConnectionState,
    /// Secret presented on reconnect.
    pub reconnect_token: Uuid,
}

impl PeerSession {
    /// Check if the peer is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Connected)
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Every remote seat is held.
    #[error("no seat available")]
    SeatTaken,

    /// Token matches no seat, or the seat holder is still connected.
    #[error("invalid reconnect token")]
    InvalidToken,

    /// The session has ended.
    #[error("session closed")]
    SessionClosed,

    /// Peer holds no seat.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Local version.
        expected: u32,
        /// Peer's version.
        got: u32,
    },
}

// =============================================================================
// SESSION TABLE
// =============================================================================

/// Seats available to remote peers and who holds them.
#[derive(Debug, Clone)]
pub struct SessionTable {
    session_id: Uuid,
    remote_seats: Vec<PlayerId>,
    seats: BTreeMap<PlayerId, PeerSession>,
    closed: bool,
}

impl SessionTable {
    /// Table offering the given seats to remote peers, in order.
    pub fn new(remote_seats: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            remote_seats: remote_seats.into_iter().collect(),
            seats: BTreeMap::new(),
            closed: false,
        }
    }

    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Seat a new peer on the first free remote seat.
    pub fn admit(&mut self, peer_id: PeerId) -> Result<&PeerSession, SessionError> {
        if self.closed {
            return Err(SessionError::SessionClosed);
        }
        let seat = self
            .remote_seats
            .iter()
            .copied()
            .find(|p| !self.seats.contains_key(p))
            .ok_or(SessionError::SeatTaken)?;

        let session = self.seats.entry(seat).or_insert(PeerSession {
            peer_id,
            assigned_player: seat,
            connection_state: ConnectionState::Connected,
            reconnect_token: Uuid::new_v4(),
        });
        Ok(session)
    }

    /// Hand a disconnected seat to a new connection presenting its token.
    pub fn reconnect(&mut self, token: Uuid, peer_id: PeerId) -> Result<&PeerSession, SessionError> {
        if self.closed {
            return Err(SessionError::SessionClosed);
        }
        let session = self
            .seats
            .values_mut()
            .find(|s| s.reconnect_token == token && !s.is_connected())
            .ok_or(SessionError::InvalidToken)?;

        session.peer_id = peer_id;
        session.connection_state = ConnectionState::Connected;
        Ok(session)
    }

    /// Mark a peer's link as down. Returns the seat it held.
    pub fn disconnect(&mut self, peer_id: PeerId, now: Instant) -> Result<PlayerId, SessionError> {
        let session = self
            .seats
            .values_mut()
            .find(|s| s.peer_id == peer_id && s.is_connected())
            .ok_or(SessionError::UnknownPeer(peer_id))?;

        session.connection_state = ConnectionState::Disconnected { since: now };
        Ok(session.assigned_player)
    }

    /// End the session. Later admits and reconnects fail.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Seat of a connected peer.
    pub fn player_of(&self, peer_id: PeerId) -> Option<PlayerId> {
        self.seats
            .values()
            .find(|s| s.peer_id == peer_id && s.is_connected())
            .map(|s| s.assigned_player)
    }

    /// Connected peer holding a seat.
    pub fn peer_of(&self, player: PlayerId) -> Option<PeerId> {
        self.seats.get(&player).filter(|s| s.is_connected()).map(|s| s.peer_id)
    }

    /// Seat record.
    pub fn seat(&self, player: PlayerId) -> Option<&PeerSession> {
        self.seats.get(&player)
    }

    /// Connected peers.
    pub fn connected_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.seats.values().filter(|s| s.is_connected()).map(|s| s.peer_id)
    }

    /// Whether some seat is waiting for its peer to come back.
    pub fn any_disconnected(&self) -> bool {
        self.seats.values().any(|s| !s.is_connected())
    }

    /// Time left before the earliest absent peer runs out of window.
    pub fn window_remaining(&self, now: Instant, window: Duration) -> Option<Duration> {
        self.seats
            .values()
            .filter_map(|s| match s.connection_state {
                ConnectionState::Disconnected { since } => Some(window.saturating_sub(now.duration_since(since))),
                ConnectionState::Connected => None,
            })
            .min()
    }

    /// Seats whose peer has been gone longer than `window`.
    pub fn expired(&self, now: Instant, window: Duration) -> Vec<PlayerId> {
        self.seats
            .values()
            .filter_map(|s| match s.connection_state {
                ConnectionState::Disconnected { since } if now.duration_since(since) > window => {
                    Some(s.assigned_player)
                }
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
