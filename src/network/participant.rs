//! Participant Core
//!
//! The joining side of a session. Keeps a replica processor that only ever
//! applies authority batches, forwards local submits to the authority and
//! resolves each submit when the authority's outcome or rejection arrives.
//!
//! Divergence (a batch gap, a batch that will not apply, or a checksum that
//! disagrees) triggers a snapshot resync. Resyncs that keep failing past the
//! retry budget make the desync fatal.
//!
//! Losing the authority pauses play. If the link is not back within the
//! reconnection window the session ends with `ConnectionLost`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::core::hash::{short_hex, Checksum};
use crate::core::rng::{DeterministicRandomService, RngSeedRecord};
use crate::game::action::Action;
use crate::game::diff::DiffBatch;
use crate::game::error::ActionError;
use crate::game::processor::{ActionProcessor, ActionResult};
use crate::game::state::{GameOutcome, PlayerId};
use crate::game::store::{ApplyStatus, StateSnapshot};
use crate::rules::RuleEvaluator;

use super::events::{publish, CoordinatorEvent, StateMark};
use super::protocol::{PeerMessage, Welcome};
use super::session::PeerId;

/// Reply channel for one submitted action.
pub type Reply = oneshot::Sender<Result<ActionResult, ActionError>>;

/// Replica side of a session.
#[derive(Debug)]
pub struct ParticipantCore {
    processor: Option<ActionProcessor>,
    rules: Arc<dyn RuleEvaluator>,
    sync: SyncConfig,
    player: Option<PlayerId>,
    session_id: Option<Uuid>,
    reconnect_token: Option<Uuid>,
    link: Option<(PeerId, mpsc::Sender<PeerMessage>)>,
    pending: BTreeMap<u64, Reply>,
    next_request: u64,
    resync_in_flight: bool,
    resync_attempts: u32,
    paused: bool,
    lost_at: Option<Instant>,
    closed: Option<String>,
    fatal: Option<String>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl ParticipantCore {
    /// Participant that has not yet been welcomed.
    pub fn new(rules: Arc<dyn RuleEvaluator>, sync: SyncConfig, events: broadcast::Sender<CoordinatorEvent>) -> Self {
        Self {
            processor: None,
            rules,
            sync,
            player: None,
            session_id: None,
            reconnect_token: None,
            link: None,
            pending: BTreeMap::new(),
            next_request: 0,
            resync_in_flight: false,
            resync_attempts: 0,
            paused: false,
            lost_at: None,
            closed: None,
            fatal: None,
            events,
        }
    }

    /// Replica processor, once welcomed.
    pub fn processor(&self) -> Option<&ActionProcessor> {
        self.processor.as_ref()
    }

    /// Seat assigned by the authority.
    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    /// Session joined.
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Whether the authority link is up.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Whether play is suspended.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Reason the session became unrecoverable.
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.processor.as_ref().map_or(false, |p| p.state().is_over())
    }

    /// When the authority link went down, while a reconnect is still possible.
    pub fn link_lost_at(&self) -> Option<Instant> {
        self.lost_at
    }

    /// Reason the session ended without the game finishing.
    pub fn closed(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    /// Whether a resync is outstanding.
    pub fn resync_in_flight(&self) -> bool {
        self.resync_in_flight
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Forward an action to the authority. `reply` resolves with the
    /// authority's outcome or rejection; nothing is applied locally until
    /// the outcome's batch arrives.
    pub fn submit(&mut self, action: Action, reply: Reply) {
        if let Err(err) = self.check_submit(&action) {
            let _ = reply.send(Err(err));
            return;
        }
        let Some((peer, sender)) = &self.link else {
            let _ = reply.send(Err(ActionError::Connection("not connected to the authority".into())));
            return;
        };

        self.next_request += 1;
        let request_id = self.next_request;
        if let Err(e) = sender.try_send(PeerMessage::Submit { request_id, action }) {
            warn!(peer = %peer, error = %e, "Submit not sent");
            let _ = reply.send(Err(ActionError::Connection(e.to_string())));
            return;
        }
        self.pending.insert(request_id, reply);
    }

    fn check_submit(&self, action: &Action) -> Result<(), ActionError> {
        if let Some(reason) = &self.fatal {
            return Err(ActionError::Desync(reason.clone()));
        }
        if let Some(reason) = &self.closed {
            return Err(ActionError::Connection(reason.clone()));
        }
        action.parse()?;
        match self.player {
            Some(player) if player == action.player => {}
            Some(player) => {
                return Err(ActionError::Authorization(format!("seated as {}, not {}", player, action.player)));
            }
            None => return Err(ActionError::Connection("not yet seated".into())),
        }
        if self.is_over() {
            return Err(ActionError::rule("the game is over"));
        }
        if self.paused {
            return Err(ActionError::Connection("the game is paused".into()));
        }
        Ok(())
    }

    fn settle(&mut self, request_id: u64, result: Result<ActionResult, ActionError>) {
        if let Some(reply) = self.pending.remove(&request_id) {
            // The caller may have stopped waiting
            let _ = reply.send(result);
        }
    }

    fn fail_pending(&mut self, error: ActionError) {
        for (_, reply) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    /// The authority link came up; introduce ourselves.
    pub fn on_connected(&mut self, peer: PeerId, sender: mpsc::Sender<PeerMessage>) {
        info!(%peer, reconnect = self.reconnect_token.is_some(), "Connected to authority");
        if let Err(e) = sender.try_send(PeerMessage::hello(self.reconnect_token)) {
            warn!(error = %e, "Hello not sent");
        }
        self.link = Some((peer, sender));
    }

    /// The authority link went down. Play pauses until the link is back or
    /// the reconnection window runs out.
    pub fn on_disconnected(&mut self, peer: PeerId, now: Instant) {
        if self.link.as_ref().map(|(p, _)| *p) != Some(peer) {
            return;
        }
        warn!(%peer, "Lost the authority");
        self.link = None;
        self.resync_in_flight = false;
        self.fail_pending(ActionError::Connection("authority link lost".into()));
        let Some(player) = self.player else {
            return;
        };
        publish(&self.events, [CoordinatorEvent::PeerDisconnected { player: player.opponent() }]);
        if self.is_over() || self.fatal.is_some() || self.closed.is_some() {
            return;
        }

        self.lost_at = Some(now);
        if !self.paused {
            self.paused = true;
            let reason = "authority unreachable".to_string();
            info!(window_secs = self.sync.reconnect_window.as_secs(), "Game paused");
            publish(&self.events, [CoordinatorEvent::Paused { reason }]);
        }
    }

    /// Give up on the authority once the reconnection window has passed.
    pub fn tick(&mut self, now: Instant) {
        let Some(lost_at) = self.lost_at else {
            return;
        };
        if self.link.is_some() {
            return;
        }
        if now.duration_since(lost_at) > self.sync.reconnect_window {
            let secs = self.sync.reconnect_window.as_secs();
            self.end_session(format!("authority did not return within {}s", secs));
        }
    }

    fn end_session(&mut self, reason: String) {
        if self.closed.is_some() {
            return;
        }
        error!(%reason, "Session ended");
        self.closed = Some(reason.clone());
        self.lost_at = None;
        self.link = None;
        self.resync_in_flight = false;
        self.fail_pending(ActionError::Connection(reason.clone()));
        publish(&self.events, [CoordinatorEvent::ConnectionLost { reason }]);
    }

    /// A message arrived from the authority.
    pub fn on_message(&mut self, peer: PeerId, message: PeerMessage) {
        match message {
            PeerMessage::Welcome(welcome) => self.on_welcome(*welcome),
            PeerMessage::Refused { reason } => {
                error!(%reason, "Authority refused us");
                self.fail_pending(ActionError::Connection(reason.clone()));
                self.fatal = Some(reason.clone());
                publish(&self.events, [CoordinatorEvent::Refused { reason }]);
            }
            PeerMessage::Outcome { request_id, result } => self.on_outcome(request_id, *result),
            PeerMessage::Rejected { request_id, error } => {
                debug!(request_id, %error, "Submit rejected");
                self.settle(request_id, Err(error));
            }
            PeerMessage::Checksum { batch_seq, checksum } => self.on_checksum(batch_seq, checksum),
            PeerMessage::ResyncResponse { snapshot, rng } => self.on_resync(*snapshot, rng),
            PeerMessage::Paused { reason, window_secs } => {
                info!(%reason, window_secs, "Game paused");
                self.paused = true;
                publish(&self.events, [CoordinatorEvent::Paused { reason }]);
            }
            PeerMessage::Resumed => self.resume(),
            PeerMessage::GameOver { outcome, batch, rng } => self.on_game_over(outcome, batch, rng),
            PeerMessage::Ping { timestamp } => self.send(PeerMessage::Pong { timestamp }),
            PeerMessage::Pong { .. } => {}
            PeerMessage::Goodbye { reason } => {
                info!(%reason, "Authority said goodbye");
                if self.is_over() {
                    self.link = None;
                    self.fail_pending(ActionError::rule("the game is over"));
                } else {
                    self.end_session(format!("authority left: {}", reason));
                }
            }
            other => {
                warn!(%peer, kind = other.kind(), "Unexpected message from authority");
            }
        }
    }

    fn on_welcome(&mut self, welcome: Welcome) {
        let Welcome { session_id, assigned_player, reconnect_token, game_config, snapshot, rng } = welcome;
        info!(
            session_id = %hex::encode(session_id.as_bytes()),
            player = %assigned_player,
            batch_seq = snapshot.batch_seq,
            "Welcomed"
        );

        let mut processor = ActionProcessor::new(
            snapshot.state.clone(),
            Arc::clone(&self.rules),
            DeterministicRandomService::replica(rng.session_seed),
            game_config,
        );
        if let Err(e) = processor.resync(snapshot, rng) {
            self.declare_fatal(format!("welcome snapshot rejected: {}", e));
            return;
        }

        self.processor = Some(processor);
        self.player = Some(assigned_player);
        self.session_id = Some(session_id);
        self.reconnect_token = Some(reconnect_token);
        self.resync_in_flight = false;
        self.resync_attempts = 0;
        publish(&self.events, [CoordinatorEvent::PeerConnected { player: assigned_player.opponent() }]);
        if self.lost_at.take().is_some() {
            self.resume();
        }
    }

    fn resume(&mut self) {
        if !self.paused {
            return;
        }
        info!("Game resumed");
        self.paused = false;
        publish(&self.events, [CoordinatorEvent::Resumed]);
    }

    fn on_outcome(&mut self, request_id: Option<u64>, result: ActionResult) {
        self.apply_batch(&result.batch(), result.metadata.rng);
        // Committed on the authority whatever happened here
        if let Some(request_id) = request_id {
            self.settle(request_id, Ok(result));
        }
    }

    fn on_game_over(&mut self, outcome: GameOutcome, batch: Option<DiffBatch>, rng: RngSeedRecord) {
        info!(?outcome, "Game over");
        if let Some(batch) = batch {
            self.apply_batch(&batch, rng);
        }
        self.fail_pending(ActionError::rule("the game is over"));
    }

    fn apply_batch(&mut self, batch: &DiffBatch, rng: RngSeedRecord) {
        if self.resync_in_flight {
            // The snapshot on its way already covers this batch
            return;
        }
        let Some(processor) = self.processor.as_mut() else {
            warn!(batch_seq = batch.batch_seq, "Batch before welcome");
            return;
        };

        let mark = StateMark::of(processor.state());
        match processor.apply_remote(batch, rng) {
            Ok(ApplyStatus::Applied) => {
                let events = mark.changes(processor.state(), batch.batch_seq);
                publish(&self.events, events);
            }
            Ok(ApplyStatus::Duplicate) => {
                debug!(batch_seq = batch.batch_seq, "Duplicate batch ignored");
            }
            Err(e) => self.diverged(e.to_string()),
        }
    }

    fn on_checksum(&mut self, batch_seq: u64, checksum: Checksum) {
        if self.resync_in_flight {
            return;
        }
        let Some(processor) = self.processor.as_ref() else {
            return;
        };

        let local_seq = processor.batch_seq();
        let local = processor.checksum();
        if local_seq != batch_seq {
            self.diverged(format!("at batch {} but authority is at {}", local_seq, batch_seq));
        } else if local != checksum {
            self.diverged(format!(
                "checksum {} differs from authority {} at batch {}",
                short_hex(&local),
                short_hex(&checksum),
                batch_seq
            ));
        } else {
            debug!(batch_seq, checksum = %short_hex(&local), "Checksum verified");
            self.resync_attempts = 0;
        }
    }

    fn on_resync(&mut self, snapshot: StateSnapshot, rng: RngSeedRecord) {
        self.resync_in_flight = false;
        let Some(processor) = self.processor.as_mut() else {
            return;
        };

        let mark = StateMark::of(processor.state());
        if let Err(e) = processor.resync(snapshot, rng) {
            self.diverged(format!("resync failed: {}", e));
            return;
        }
        let batch_seq = processor.batch_seq();
        info!(batch_seq, checksum = %short_hex(&processor.checksum()), "Resynced");

        let mut events = vec![CoordinatorEvent::Resynced { batch_seq }];
        // Only the structural changes; no batch was applied
        events.extend(mark.changes(processor.state(), batch_seq).into_iter().skip(1));
        publish(&self.events, events);
    }

    fn diverged(&mut self, reason: String) {
        if self.fatal.is_some() {
            return;
        }
        let batch_seq = self.processor.as_ref().map_or(0, ActionProcessor::batch_seq);
        warn!(batch_seq, %reason, "Divergence detected");
        publish(&self.events, [CoordinatorEvent::Divergence { batch_seq, reason: reason.clone() }]);

        self.resync_attempts += 1;
        if self.resync_attempts > self.sync.resync_retry_budget {
            self.declare_fatal(reason);
            return;
        }

        self.resync_in_flight = true;
        self.send(PeerMessage::ResyncRequest { have_batch_seq: batch_seq, reason });
    }

    fn declare_fatal(&mut self, reason: String) {
        error!(%reason, "Desync is unrecoverable");
        self.fatal = Some(reason.clone());
        self.resync_in_flight = false;
        self.fail_pending(ActionError::Desync(reason.clone()));
        publish(&self.events, [CoordinatorEvent::DesyncFatal { reason }]);
    }

    /// Say goodbye to the authority.
    pub fn shutdown(&mut self, reason: &str) {
        self.send(PeerMessage::Goodbye { reason: reason.to_string() });
        self.link = None;
        self.lost_at = None;
        self.fail_pending(ActionError::Connection("shutting down".into()));
    }

    fn send(&mut self, message: PeerMessage) {
        if let Some((peer, sender)) = &self.link {
            if let Err(e) = sender.try_send(message) {
                warn!(peer = %peer, error = %e, "Dropping outbound message");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
