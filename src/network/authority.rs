//! Authority Core
//!
//! The host side of a session. Owns the canonical processor, the seat table
//! and one outbound queue per link. Every input (local submit, transport
//! event, timer tick) is handled synchronously by the driver task, so the
//! core itself never awaits.
//!
//! Remote submits are checked in layers before they reach the processor:
//! schema, then sender identity, then pause state. Turn ownership and phase
//! rules are the processor's.

use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::core::hash::short_hex;
use crate::game::action::Action;
use crate::game::error::ActionError;
use crate::game::processor::{ActionProcessor, ActionResult};
use crate::game::state::{GameOutcome, OutcomeReason, PlayerId};

use super::events::{publish, CoordinatorEvent, StateMark};
use super::protocol::{PeerMessage, Welcome};
use super::session::{PeerId, SessionError, SessionTable};

/// Authoritative game host.
#[derive(Debug)]
pub struct AuthorityCore {
    processor: ActionProcessor,
    sessions: SessionTable,
    links: BTreeMap<PeerId, mpsc::Sender<PeerMessage>>,
    local_players: Vec<PlayerId>,
    sync: SyncConfig,
    paused: bool,
    turn_started: Instant,
    turn_mark: (u32, PlayerId),
    last_checksum: Instant,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl AuthorityCore {
    /// Host `processor`, seating `local_players` here and offering the rest
    /// to remote peers.
    pub fn new(
        processor: ActionProcessor,
        local_players: Vec<PlayerId>,
        sync: SyncConfig,
        events: broadcast::Sender<CoordinatorEvent>,
        now: Instant,
    ) -> Self {
        let remote_seats: Vec<PlayerId> = [PlayerId::ONE, PlayerId::TWO]
            .into_iter()
            .filter(|p| !local_players.contains(p))
            .collect();
        let state = processor.state();
        let turn_mark = (state.turn_number, state.active_player);
        Self {
            processor,
            sessions: SessionTable::new(remote_seats),
            links: BTreeMap::new(),
            local_players,
            sync,
            paused: false,
            turn_started: now,
            turn_mark,
            last_checksum: now,
            events,
        }
    }

    /// Canonical processor.
    pub fn processor(&self) -> &ActionProcessor {
        &self.processor
    }

    /// Seat table.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Whether play is suspended for a missing peer.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Seats played from this process.
    pub fn local_players(&self) -> &[PlayerId] {
        &self.local_players
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Execute an action for a locally seated player and broadcast the batch.
    pub fn submit_local(&mut self, action: Action, now: Instant) -> Result<ActionResult, ActionError> {
        action.parse()?;
        if !self.local_players.contains(&action.player) {
            return Err(ActionError::Authorization(format!("{} is not seated here", action.player)));
        }
        self.execute(action, None, now)
    }

    fn submit_remote(&mut self, peer: PeerId, request_id: u64, action: Action, now: Instant) {
        // 1. Schema
        if let Err(error) = action.parse() {
            self.reject(peer, request_id, error);
            return;
        }

        // 2. Sender identity
        match self.sessions.player_of(peer) {
            Some(seat) if seat == action.player => {}
            Some(seat) => {
                let error = ActionError::Authorization(format!("peer holds {} but claimed {}", seat, action.player));
                self.reject(peer, request_id, error);
                return;
            }
            None => {
                self.reject(peer, request_id, ActionError::Authorization("peer holds no seat".into()));
                return;
            }
        }

        // 3. Turn ownership and phase rules
        if let Err(error) = self.execute(action, Some((peer, request_id)), now) {
            self.reject(peer, request_id, error);
        }
    }

    fn execute(
        &mut self,
        action: Action,
        origin: Option<(PeerId, u64)>,
        now: Instant,
    ) -> Result<ActionResult, ActionError> {
        if self.processor.state().is_over() {
            return Err(ActionError::rule("the game is over"));
        }
        if self.paused {
            return Err(ActionError::Connection("the game is paused".into()));
        }

        let mark = StateMark::of(self.processor.state());
        let result = self.processor.submit(action)?;

        for peer in self.sessions.connected_peers().collect::<Vec<_>>() {
            let request_id = origin.filter(|(p, _)| *p == peer).map(|(_, id)| id);
            self.send(peer, PeerMessage::Outcome { request_id, result: Box::new(result.clone()) });
        }
        publish(&self.events, mark.changes(self.processor.state(), result.metadata.batch_seq));
        self.after_commit(now);
        Ok(result)
    }

    fn reject(&mut self, peer: PeerId, request_id: u64, error: ActionError) {
        debug!(%peer, request_id, %error, "Rejecting submit");
        self.send(peer, PeerMessage::Rejected { request_id, error });
    }

    /// Restart the turn clock on a new turn; close the table once the game ends.
    fn after_commit(&mut self, now: Instant) {
        let state = self.processor.state();
        let turn_mark = (state.turn_number, state.active_player);
        if turn_mark != self.turn_mark {
            self.turn_mark = turn_mark;
            self.turn_started = now;
        }
        if state.is_over() && !self.sessions.is_closed() {
            info!(outcome = ?state.outcome, "Game over");
            self.sessions.close();
        }
    }

    /// Record an outcome the players did not produce and tell everyone.
    fn end_game(&mut self, outcome: GameOutcome, now: Instant) {
        let mark = StateMark::of(self.processor.state());
        let batch = match self.processor.end_game(outcome) {
            Ok(Some(batch)) => batch,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to record outcome");
                return;
            }
        };
        let rng = self.processor.rng_record();
        self.broadcast(PeerMessage::GameOver { outcome, batch: Some(batch.clone()), rng });
        publish(&self.events, mark.changes(self.processor.state(), batch.batch_seq));
        self.after_commit(now);
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    /// A link came up; it holds no seat until it says hello.
    pub fn on_connected(&mut self, peer: PeerId, sender: mpsc::Sender<PeerMessage>) {
        debug!(%peer, "Link up");
        self.links.insert(peer, sender);
    }

    /// A link went down.
    pub fn on_disconnected(&mut self, peer: PeerId, now: Instant) {
        self.links.remove(&peer);
        let Ok(player) = self.sessions.disconnect(peer, now) else {
            return;
        };
        info!(%peer, %player, "Peer disconnected");
        publish(&self.events, [CoordinatorEvent::PeerDisconnected { player }]);

        if self.processor.state().is_over() {
            return;
        }
        let reason = format!("{} disconnected", player);
        self.paused = true;
        let window_secs = self.sync.reconnect_window.as_secs();
        self.broadcast(PeerMessage::Paused { reason: reason.clone(), window_secs });
        publish(&self.events, [CoordinatorEvent::Paused { reason }]);
    }

    /// A message arrived on a link.
    pub fn on_message(&mut self, peer: PeerId, message: PeerMessage, now: Instant) {
        match message {
            PeerMessage::Hello { protocol_version, reconnect_token } => {
                self.on_hello(peer, protocol_version, reconnect_token, now);
            }
            PeerMessage::Submit { request_id, action } => self.submit_remote(peer, request_id, action, now),
            PeerMessage::ResyncRequest { have_batch_seq, reason } => {
                if self.sessions.player_of(peer).is_none() {
                    return;
                }
                info!(%peer, have_batch_seq, batch_seq = self.processor.batch_seq(), %reason, "Resync requested");
                let snapshot = Box::new(self.processor.snapshot());
                let rng = self.processor.rng_record();
                self.send(peer, PeerMessage::ResyncResponse { snapshot, rng });
            }
            PeerMessage::Ping { timestamp } => self.send(peer, PeerMessage::Pong { timestamp }),
            PeerMessage::Pong { .. } => {}
            PeerMessage::Goodbye { reason } => {
                info!(%peer, %reason, "Peer said goodbye");
                self.on_disconnected(peer, now);
            }
            other => {
                warn!(%peer, kind = other.kind(), "Unexpected message from participant");
            }
        }
    }

    fn on_hello(&mut self, peer: PeerId, version: u32, token: Option<uuid::Uuid>, now: Instant) {
        if version != self.sync.protocol_version {
            let err = SessionError::VersionMismatch { expected: self.sync.protocol_version, got: version };
            self.refuse(peer, err);
            return;
        }

        let admitted = match token {
            Some(token) => self.sessions.reconnect(token, peer),
            None => self.sessions.admit(peer),
        };
        let (player, reconnect_token) = match admitted {
            Ok(seat) => (seat.assigned_player, seat.reconnect_token),
            Err(err) => {
                self.refuse(peer, err);
                return;
            }
        };

        info!(%peer, %player, reconnect = token.is_some(), "Peer seated");
        let welcome = Welcome {
            session_id: self.sessions.session_id(),
            assigned_player: player,
            reconnect_token,
            game_config: *self.processor.config(),
            snapshot: self.processor.snapshot(),
            rng: self.processor.rng_record(),
        };
        self.send(peer, PeerMessage::Welcome(Box::new(welcome)));
        publish(&self.events, [CoordinatorEvent::PeerConnected { player }]);

        if self.paused && !self.sessions.any_disconnected() {
            self.paused = false;
            // The absent player's clock does not run while paused
            self.turn_started = now;
            self.broadcast(PeerMessage::Resumed);
            publish(&self.events, [CoordinatorEvent::Resumed]);
        }
    }

    fn refuse(&mut self, peer: PeerId, err: SessionError) {
        warn!(%peer, error = %err, "Refusing peer");
        self.send(peer, PeerMessage::Refused { reason: err.to_string() });
        // Dropping the last sender closes the link once Refused is flushed
        self.links.remove(&peer);
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Reconnection windows, turn timer, periodic checksum.
    pub fn tick(&mut self, now: Instant) {
        if self.processor.state().is_over() {
            return;
        }

        if self.paused {
            if let Some(&player) = self.sessions.expired(now, self.sync.reconnect_window).first() {
                info!(%player, "Reconnection window expired");
                self.end_game(GameOutcome { winner: Some(player.opponent()), reason: OutcomeReason::Forfeit }, now);
            }
            return;
        }

        if let Some(limit) = self.sync.turn_time_limit {
            if now.duration_since(self.turn_started) > limit {
                let active = self.processor.state().active_player;
                info!(player = %active, "Turn time expired");
                self.end_game(GameOutcome { winner: Some(active.opponent()), reason: OutcomeReason::TurnTimeout }, now);
                return;
            }
        }

        if now.duration_since(self.last_checksum) >= self.sync.checksum_interval {
            self.last_checksum = now;
            self.broadcast_checksum();
        }
    }

    /// Send the current checksum to every seated peer.
    pub fn broadcast_checksum(&mut self) {
        let checksum = self.processor.checksum();
        let batch_seq = self.processor.batch_seq();
        debug!(batch_seq, checksum = %short_hex(&checksum), "Broadcasting checksum");
        self.broadcast(PeerMessage::Checksum { batch_seq, checksum });
    }

    /// Tell every link the host is leaving.
    pub fn shutdown(&mut self, reason: &str) {
        for peer in self.links.keys().copied().collect::<Vec<_>>() {
            self.send(peer, PeerMessage::Goodbye { reason: reason.to_string() });
        }
        self.links.clear();
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn broadcast(&mut self, message: PeerMessage) {
        for peer in self.sessions.connected_peers().collect::<Vec<_>>() {
            self.send(peer, message.clone());
        }
    }

    fn send(&mut self, peer: PeerId, message: PeerMessage) {
        let Some(sender) = self.links.get(&peer) else {
            return;
        };
        if let Err(e) = sender.try_send(message) {
            // A full queue means the peer stopped reading; it will resync
            warn!(%peer, error = %e, "Dropping outbound message");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
