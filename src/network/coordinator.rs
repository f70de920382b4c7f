//! Network Coordinator
//!
//! Public face of a game session. One driver task owns the session core
//! (authority or participant) and consumes a single queue of inputs: local
//! submits, transport events and timer ticks. Callers talk to it through a
//! cloneable command channel and listen on a broadcast of
//! [`CoordinatorEvent`]s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::game::action::Action;
use crate::game::error::ActionError;
use crate::game::processor::{ActionProcessor, ActionResult};
use crate::game::state::PlayerId;
use crate::game::store::StateSnapshot;
use crate::rules::RuleEvaluator;

use super::authority::AuthorityCore;
use super::events::CoordinatorEvent;
use super::participant::{ParticipantCore, Reply};
use super::transport::{self, Listener, TransportError, TransportEvent};

/// How long a joining participant waits for its welcome.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between redial attempts after the authority link drops.
const REDIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Event channel depth.
const EVENT_CAPACITY: usize = 256;

/// Which side of a session this coordinator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Both players local, no network.
    Offline,
    /// Hosts the canonical state.
    Authority,
    /// Mirrors an authority.
    Participant,
}

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Could not bind or connect.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The authority turned us away.
    #[error("refused by authority: {0}")]
    Refused(String),

    /// No welcome within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The driver task has stopped.
    #[error("coordinator has shut down")]
    Closed,
}

enum Command {
    Submit { action: Action, reply: Reply },
    Snapshot { reply: oneshot::Sender<Option<StateSnapshot>> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Core {
    Authority(AuthorityCore),
    Participant(ParticipantCore),
}

/// Where a participant redials after losing its link.
struct Dialer {
    address: String,
    port: u16,
    events: mpsc::Sender<TransportEvent>,
    queue: usize,
    last_attempt: Option<Instant>,
}

/// Handle to a running session.
#[derive(Debug)]
pub struct NetworkCoordinator {
    role: Role,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<CoordinatorEvent>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl NetworkCoordinator {
    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Both players on this machine. Actions go straight to the processor.
    pub fn offline(processor: ActionProcessor, sync: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let core = AuthorityCore::new(processor, vec![PlayerId::ONE, PlayerId::TWO], sync.clone(), events.clone(), Instant::now());
        Self::spawn(Role::Offline, Core::Authority(core), sync, events, None, None, None)
    }

    /// Host on `port` (0 picks a free port), seating player one locally.
    pub async fn create_authority(port: u16, processor: ActionProcessor, sync: SyncConfig) -> Result<Self, CoordinatorError> {
        let (transport_tx, transport_rx) = mpsc::channel(sync.outbound_queue);
        let listener = transport::listen(SocketAddr::from(([0, 0, 0, 0], port)), transport_tx, sync.outbound_queue).await?;
        let local_addr = listener.local_addr();

        let mut coordinator = Self::authority_over(processor, sync, transport_rx, Some(listener));
        coordinator.local_addr = Some(local_addr);
        info!(%local_addr, "Authority ready");
        Ok(coordinator)
    }

    /// Host over an existing transport queue.
    pub fn authority_over(
        processor: ActionProcessor,
        sync: SyncConfig,
        transport: mpsc::Receiver<TransportEvent>,
        listener: Option<Listener>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let core = AuthorityCore::new(processor, vec![PlayerId::ONE], sync.clone(), events.clone(), Instant::now());
        Self::spawn(Role::Authority, Core::Authority(core), sync, events, Some(transport), listener, None)
    }

    /// Join the authority at `address:port`. Returns once seated.
    pub async fn join_participant(
        address: &str,
        port: u16,
        rules: Arc<dyn RuleEvaluator>,
        sync: SyncConfig,
    ) -> Result<Self, CoordinatorError> {
        let (transport_tx, transport_rx) = mpsc::channel(sync.outbound_queue);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        transport::connect(address, port, transport_tx.clone(), sync.outbound_queue, shutdown_tx.subscribe()).await?;

        let dialer = Dialer {
            address: address.to_string(),
            port,
            events: transport_tx,
            queue: sync.outbound_queue,
            last_attempt: None,
        };
        let mut seated = events.subscribe();
        let core = ParticipantCore::new(rules, sync.clone(), events.clone());
        let coordinator = Self::spawn(
            Role::Participant,
            Core::Participant(core),
            sync,
            events,
            Some(transport_rx),
            None,
            Some((dialer, shutdown_tx)),
        );
        wait_seated(&mut seated).await?;
        Ok(coordinator)
    }

    /// Join over an existing transport queue. Returns once seated.
    pub async fn participant_over(
        rules: Arc<dyn RuleEvaluator>,
        sync: SyncConfig,
        transport: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self, CoordinatorError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut seated = events.subscribe();
        let core = ParticipantCore::new(rules, sync.clone(), events.clone());
        let coordinator = Self::spawn(Role::Participant, Core::Participant(core), sync, events, Some(transport), None, None);
        wait_seated(&mut seated).await?;
        Ok(coordinator)
    }

    fn spawn(
        role: Role,
        core: Core,
        sync: SyncConfig,
        events: broadcast::Sender<CoordinatorEvent>,
        transport: Option<mpsc::Receiver<TransportEvent>>,
        listener: Option<Listener>,
        dialer: Option<(Dialer, broadcast::Sender<()>)>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(sync.outbound_queue);
        let task = tokio::spawn(drive(role, core, sync, command_rx, transport, listener, dialer));
        Self { role, commands, events, local_addr: None, task }
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Which side this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Bound address, for an authority listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Notifications, in commit order, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Execute an action.
    ///
    /// Offline and on the authority the action runs locally and (on the
    /// authority) the batch is broadcast. A participant forwards it and
    /// resolves once the authority's outcome has been applied. Dropping the
    /// future abandons the wait only.
    pub async fn submit(&self, action: Action) -> Result<ActionResult, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { action, reply })
            .await
            .map_err(|_| ActionError::Connection("coordinator has shut down".into()))?;
        rx.await
            .map_err(|_| ActionError::Connection("coordinator dropped the request".into()))?
    }

    /// Current local state; `None` before a participant is welcomed.
    pub async fn snapshot(&self) -> Result<Option<StateSnapshot>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot { reply }).await.map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Say goodbye and stop the driver.
    pub async fn shutdown(self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

async fn wait_seated(events: &mut broadcast::Receiver<CoordinatorEvent>) -> Result<(), CoordinatorError> {
    let seated = async {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::PeerConnected { .. }) => return Ok(()),
                Ok(CoordinatorEvent::Refused { reason }) => return Err(CoordinatorError::Refused(reason)),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(CoordinatorError::Closed),
            }
        }
    };
    timeout(HANDSHAKE_TIMEOUT, seated).await.map_err(|_| CoordinatorError::HandshakeTimeout)?
}

async fn next_transport(transport: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match transport {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// DRIVER
// =============================================================================

#[instrument(skip_all, fields(role = ?role))]
async fn drive(
    role: Role,
    mut core: Core,
    sync: SyncConfig,
    mut commands: mpsc::Receiver<Command>,
    mut transport: Option<mpsc::Receiver<TransportEvent>>,
    listener: Option<Listener>,
    mut dialer: Option<(Dialer, broadcast::Sender<()>)>,
) {
    let mut ticker = interval(sync.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Coordinator started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Submit { action, reply } => match &mut core {
                        Core::Authority(c) => {
                            let _ = reply.send(c.submit_local(action, Instant::now()));
                        }
                        Core::Participant(c) => c.submit(action, reply),
                    },
                    Command::Snapshot { reply } => {
                        let snapshot = match &core {
                            Core::Authority(c) => Some(c.processor().snapshot()),
                            Core::Participant(c) => c.processor().map(ActionProcessor::snapshot),
                        };
                        let _ = reply.send(snapshot);
                    }
                    Command::Shutdown { reply } => {
                        match &mut core {
                            Core::Authority(c) => c.shutdown("host shutting down"),
                            Core::Participant(c) => c.shutdown("participant leaving"),
                        }
                        let _ = reply.send(());
                        break;
                    }
                }
            }
            event = next_transport(&mut transport), if transport.is_some() => {
                let Some(event) = event else {
                    debug!("Transport queue closed");
                    transport = None;
                    continue;
                };
                let now = Instant::now();
                match (&mut core, event) {
                    (Core::Authority(c), TransportEvent::Connected { peer, sender }) => c.on_connected(peer, sender),
                    (Core::Authority(c), TransportEvent::Message { peer, message }) => c.on_message(peer, message, now),
                    (Core::Authority(c), TransportEvent::Disconnected { peer }) => c.on_disconnected(peer, now),
                    (Core::Participant(c), TransportEvent::Connected { peer, sender }) => c.on_connected(peer, sender),
                    (Core::Participant(c), TransportEvent::Message { peer, message }) => c.on_message(peer, message),
                    (Core::Participant(c), TransportEvent::Disconnected { peer }) => c.on_disconnected(peer, now),
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                match &mut core {
                    Core::Authority(c) => c.tick(now),
                    Core::Participant(c) => {
                        c.tick(now);
                        if let Some((d, shutdown)) = dialer.as_mut() {
                            redial(c, d, shutdown, &sync, now);
                        }
                    }
                }
            }
        }
    }

    if let Some(listener) = listener {
        listener.shutdown();
    }
    if let Some((_, shutdown)) = dialer {
        let _ = shutdown.send(());
    }
    info!("Coordinator stopped");
}

/// Try the authority again while the reconnection window is open.
fn redial(core: &ParticipantCore, dialer: &mut Dialer, shutdown: &broadcast::Sender<()>, sync: &SyncConfig, now: Instant) {
    let Some(lost_at) = core.link_lost_at() else {
        return;
    };
    if core.is_linked() || core.is_over() || core.fatal().is_some() || core.closed().is_some() {
        return;
    }
    if now.duration_since(lost_at) > sync.reconnect_window {
        return;
    }
    if dialer.last_attempt.map_or(false, |t| now.duration_since(t) < REDIAL_INTERVAL) {
        return;
    }
    dialer.last_attempt = Some(now);

    let (address, port, events, queue) = (dialer.address.clone(), dialer.port, dialer.events.clone(), dialer.queue);
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        if let Err(e) = transport::connect(&address, port, events, queue, shutdown_rx).await {
            warn!(error = %e, "Redial failed");
        }
    });
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::game::action::ActionType;
    use crate::game::state::{GameOutcome, OutcomeReason, PhaseKind};
    use crate::network::authority::tests::battle_processor;
    use crate::network::transport::loopback;
    use crate::rules::StandardRules;

    async fn next_matching<F>(rx: &mut broadcast::Receiver<CoordinatorEvent>, mut pred: F) -> CoordinatorEvent
    where
        F: FnMut(&CoordinatorEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream failed: {}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn fast_sync() -> SyncConfig {
        SyncConfig {
            tick_interval: Duration::from_millis(20),
            checksum_interval: Duration::from_millis(100),
            ..SyncConfig::default()
        }
    }

    async fn loopback_pair(sync: SyncConfig) -> (NetworkCoordinator, NetworkCoordinator, transport::LoopbackLink) {
        let (host_tx, host_rx) = mpsc::channel(64);
        let (guest_tx, guest_rx) = mpsc::channel(64);
        let host = NetworkCoordinator::authority_over(battle_processor(42), sync.clone(), host_rx, None);
        let link = loopback(host_tx, guest_tx, 64).await;
        let guest = NetworkCoordinator::participant_over(Arc::new(StandardRules), sync, guest_rx).await.unwrap();
        (host, guest, link)
    }

    #[tokio::test]
    async fn test_offline_submits_both_players() {
        let coordinator = NetworkCoordinator::offline(battle_processor(1), fast_sync());
        let mut events = coordinator.subscribe();
        assert_eq!(coordinator.role(), Role::Offline);

        coordinator.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, CoordinatorEvent::PhaseChanged { .. })).await;
        assert_eq!(event, CoordinatorEvent::PhaseChanged { from: PhaseKind::Movement, to: PhaseKind::Shooting });

        let result = coordinator.submit(Action::new(ActionType::Concede, PlayerId::TWO, 1)).await.unwrap();
        assert_eq!(
            result.metadata.game_over,
            Some(GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::Concession })
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_participant_mirrors_authority() {
        let (host, guest, _link) = loopback_pair(fast_sync()).await;
        let mut guest_events = guest.subscribe();

        let move_a = Action::new(ActionType::MoveUnit, PlayerId::ONE, 1)
            .with_actor("a")
            .with_payload(json!({ "x": 10, "y": 24, "advance": true }));
        host.submit(move_a).await.unwrap();
        next_matching(&mut guest_events, |e| *e == CoordinatorEvent::BatchApplied { batch_seq: 1 }).await;

        assert_eq!(host.snapshot().await.unwrap(), guest.snapshot().await.unwrap());

        // Out of turn from the participant is refused by the authority
        let err = guest.submit(Action::new(ActionType::EndPhase, PlayerId::TWO, 1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Authorization(_)));

        // Exempt action resolves with the authority's result
        let result = guest.submit(Action::new(ActionType::Concede, PlayerId::TWO, 2)).await.unwrap();
        assert_eq!(result.metadata.batch_seq, 2);
        assert_eq!(host.snapshot().await.unwrap(), guest.snapshot().await.unwrap());

        guest.shutdown().await;
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_checksums_verify_quietly() {
        let (host, guest, _link) = loopback_pair(fast_sync()).await;
        let mut guest_events = guest.subscribe();
        host.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).await.unwrap();
        next_matching(&mut guest_events, |e| matches!(e, CoordinatorEvent::BatchApplied { .. })).await;

        // Several checksum rounds pass without divergence
        tokio::time::sleep(Duration::from_millis(350)).await;
        while let Ok(event) = guest_events.try_recv() {
            assert!(!matches!(event, CoordinatorEvent::Divergence { .. }), "unexpected {:?}", event);
        }
        host.shutdown().await;
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_loss_pauses_then_forfeits() {
        let sync = SyncConfig { reconnect_window: Duration::from_millis(200), ..fast_sync() };
        let (host, guest, link) = loopback_pair(sync).await;
        let mut host_events = host.subscribe();

        link.sever().await;
        next_matching(&mut host_events, |e| matches!(e, CoordinatorEvent::Paused { .. })).await;

        let err = host.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Connection(_)));

        let event = next_matching(&mut host_events, |e| matches!(e, CoordinatorEvent::GameOver { .. })).await;
        assert_eq!(
            event,
            CoordinatorEvent::GameOver { outcome: GameOutcome { winner: Some(PlayerId::ONE), reason: OutcomeReason::Forfeit } }
        );
        host.shutdown().await;
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_loss_pauses_then_ends_participant() {
        let sync = SyncConfig { reconnect_window: Duration::from_millis(200), ..fast_sync() };
        let (host, guest, link) = loopback_pair(sync).await;
        let mut guest_events = guest.subscribe();

        link.sever().await;
        next_matching(&mut guest_events, |e| matches!(e, CoordinatorEvent::Paused { .. })).await;
        let err = guest.submit(Action::new(ActionType::EndPhase, PlayerId::TWO, 1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Connection(_)));

        next_matching(&mut guest_events, |e| matches!(e, CoordinatorEvent::ConnectionLost { .. })).await;
        let err = guest.submit(Action::new(ActionType::Concede, PlayerId::TWO, 1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Connection(_)));

        host.shutdown().await;
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_websocket_session() {
        let host = NetworkCoordinator::create_authority(0, battle_processor(9), fast_sync()).await.unwrap();
        let port = host.local_addr().unwrap().port();
        let guest = NetworkCoordinator::join_participant("127.0.0.1", port, Arc::new(StandardRules), fast_sync())
            .await
            .unwrap();
        let mut guest_events = guest.subscribe();

        host.submit(Action::new(ActionType::EndPhase, PlayerId::ONE, 1)).await.unwrap();
        next_matching(&mut guest_events, |e| matches!(e, CoordinatorEvent::PhaseChanged { .. })).await;
        assert_eq!(host.snapshot().await.unwrap(), guest.snapshot().await.unwrap());

        guest.shutdown().await;
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_participant_refused() {
        let (host_tx, host_rx) = mpsc::channel(64);
        let host = NetworkCoordinator::authority_over(battle_processor(1), fast_sync(), host_rx, None);

        let (first_tx, first_rx) = mpsc::channel(64);
        let _first_link = loopback(host_tx.clone(), first_tx, 64).await;
        let _first = NetworkCoordinator::participant_over(Arc::new(StandardRules), fast_sync(), first_rx).await.unwrap();

        let (second_tx, second_rx) = mpsc::channel(64);
        let _second_link = loopback(host_tx, second_tx, 64).await;
        let err = NetworkCoordinator::participant_over(Arc::new(StandardRules), fast_sync(), second_rx).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Refused(_)));

        host.shutdown().await;
    }
}
