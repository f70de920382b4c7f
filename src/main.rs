//! Tabletop Sync
//!
//! `tabletop-sync demo` plays a scripted offline game and checks that its
//! action log replays to the same checksum. `host <port>` and
//! `join <addr> <port>` run one side of a networked game.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tabletop_sync::{
    core::hash::short_hex,
    game::setup::demo_setup,
    game::state::{GameState, Position},
    Action, ActionProcessor, ActionType, CoordinatorEvent, DeterministicRandomService, GameConfig, NetworkCoordinator,
    PhaseKind, PlayerId, StandardRules, SyncConfig, VERSION,
};

const DEMO_SEED: u64 = 0x7AB1_E70F;
const DEMO_STEP_LIMIT: usize = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Tabletop Sync v{}", VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let sync = SyncConfig::from_env()?;
    let game = GameConfig::from_env()?;

    match args.first().map(String::as_str) {
        None | Some("demo") => demo(game),
        Some("host") => {
            let port = parse_port(args.get(1))?;
            host(port, game, sync).await
        }
        Some("join") => {
            let address = args.get(1).context("usage: tabletop-sync join <addr> <port>")?;
            let port = parse_port(args.get(2))?;
            join(address, port, sync).await
        }
        Some(other) => bail!("unknown mode '{}' (expected demo, host or join)", other),
    }
}

fn parse_port(arg: Option<&String>) -> anyhow::Result<u16> {
    let arg = arg.context("missing port")?;
    arg.parse().with_context(|| format!("invalid port '{}'", arg))
}

// =============================================================================
// NETWORK MODES
// =============================================================================

async fn host(port: u16, game: GameConfig, sync: SyncConfig) -> anyhow::Result<()> {
    let state = demo_setup().build()?;
    let processor = ActionProcessor::new(
        state,
        Arc::new(StandardRules),
        DeterministicRandomService::authority(rand_seed()),
        game,
    );
    let coordinator = NetworkCoordinator::create_authority(port, processor, sync).await?;
    if let Some(addr) = coordinator.local_addr() {
        info!("Hosting on {}", addr);
    }
    follow(coordinator).await
}

async fn join(address: &str, port: u16, sync: SyncConfig) -> anyhow::Result<()> {
    let coordinator = NetworkCoordinator::join_participant(address, port, Arc::new(StandardRules), sync).await?;
    info!("Joined {}:{}", address, port);
    follow(coordinator).await
}

/// Log coordinator events until ctrl-c or the game ends.
async fn follow(coordinator: NetworkCoordinator) -> anyhow::Result<()> {
    let mut events = coordinator.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CoordinatorEvent::GameOver { outcome }) => {
                    info!(?outcome, "Game over");
                    break;
                }
                Ok(CoordinatorEvent::DesyncFatal { reason }) => {
                    warn!("Unrecoverable desync: {}", reason);
                    break;
                }
                Ok(CoordinatorEvent::ConnectionLost { reason }) => {
                    warn!("Connection lost: {}", reason);
                    break;
                }
                Ok(event) => info!(?event, "Coordinator event"),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    coordinator.shutdown().await;
    Ok(())
}

fn rand_seed() -> u64 {
    let id = uuid::Uuid::new_v4();
    let (hi, lo) = id.as_u64_pair();
    hi ^ lo
}

// =============================================================================
// DEMO
// =============================================================================

fn demo(game: GameConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Game ===");
    info!("Session seed: {:#x}", DEMO_SEED);

    let initial = demo_setup().build()?;
    let mut processor = ActionProcessor::new(
        initial.clone(),
        Arc::new(StandardRules),
        DeterministicRandomService::authority(DEMO_SEED),
        game,
    );
    let mut bot = DemoBot::default();

    for _ in 0..DEMO_STEP_LIMIT {
        if processor.state().is_over() {
            break;
        }
        bot.step(&mut processor);
    }

    if !processor.state().is_over() {
        let concede = bot.action(PlayerId::TWO, ActionType::Concede, None, json!({}));
        processor.submit(concede).map_err(|e| anyhow!("concede failed: {}", e))?;
    }

    let state = processor.state();
    info!("=== Demo Game Complete ===");
    info!("Battle round: {}", state.battle_round);
    info!("Accepted actions: {}", processor.log().len());
    info!("Batches: {}", processor.batch_seq());
    for player in state.players.values() {
        info!("{} ({}): {} VP, {} CP", player.name, player.id, player.victory_points, player.command_points);
    }
    if let Some(outcome) = &state.outcome {
        match outcome.winner {
            Some(winner) => info!("Winner: {} by {:?}", winner, outcome.reason),
            None => info!("Draw by {:?}", outcome.reason),
        }
    }
    info!("Final checksum: {}", hex::encode(processor.checksum()));

    info!("=== Verifying Replay ===");
    let mut replica = ActionProcessor::new(
        initial,
        Arc::new(StandardRules),
        DeterministicRandomService::replica(DEMO_SEED),
        game,
    );
    for action in processor.log().actions() {
        replica
            .replay(action.clone())
            .map_err(|e| anyhow!("replay of {:?} failed: {}", action.action_type, e))?;
    }

    if replica.checksum() != processor.checksum() {
        bail!(
            "replay diverged: {} != {}",
            short_hex(&replica.checksum()),
            short_hex(&processor.checksum())
        );
    }
    info!("Replay verified: {}", short_hex(&replica.checksum()));
    Ok(())
}

/// Scripted opponent for both seats. Picks a plausible action for the
/// current phase and falls back to ending the phase.
#[derive(Default)]
struct DemoBot {
    sequence: BTreeMap<PlayerId, u64>,
    moved: BTreeMap<String, u32>,
    shot: BTreeMap<String, u32>,
    scored: BTreeMap<(PlayerId, u32), u32>,
}

impl DemoBot {
    fn action(&mut self, player: PlayerId, action_type: ActionType, actor: Option<&str>, payload: serde_json::Value) -> Action {
        let seq = self.sequence.entry(player).or_insert(0);
        *seq += 1;
        let action = Action::new(action_type, player, *seq).with_payload(payload);
        match actor {
            Some(unit) => action.with_actor(unit),
            None => action,
        }
    }

    /// Submit and report whether the action was accepted.
    fn try_submit(
        &mut self,
        processor: &mut ActionProcessor,
        player: PlayerId,
        action_type: ActionType,
        actor: Option<&str>,
        payload: serde_json::Value,
    ) -> bool {
        let action = self.action(player, action_type, actor, payload);
        match processor.submit(action) {
            Ok(result) => {
                if !result.message.is_empty() {
                    debug!("{}: {}", player, result.message);
                }
                true
            }
            Err(e) => {
                debug!(%player, ?action_type, "Rejected: {}", e);
                false
            }
        }
    }

    fn step(&mut self, processor: &mut ActionProcessor) {
        let state = processor.state().clone();
        let active = state.active_player;

        let acted = match state.current_phase {
            PhaseKind::Deployment => self.deploy(processor, &state, active),
            PhaseKind::Movement => self.advance(processor, &state, active),
            PhaseKind::Shooting => self.shoot(processor, &state, active),
            PhaseKind::Charge => self.charge(processor, &state, active),
            PhaseKind::Fight => self.fight(processor, &state),
            PhaseKind::Morale => self.rally(processor, &state, active),
            PhaseKind::Scoring => self.score(processor, &state, active),
            _ => false,
        };

        if !acted && !self.try_submit(processor, active, ActionType::EndPhase, None, json!({})) {
            // Stuck behind an open sequence or activation
            self.unblock(processor, &state);
        }
    }

    fn deploy(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        let Some(zone) = state.board.deployment_zones.get(&player).copied() else {
            return false;
        };
        let pending: Vec<String> = state.units_of(player).filter(|u| !u.is_deployed()).map(|u| u.id.clone()).collect();
        for (i, unit) in pending.iter().enumerate() {
            let x = 10 + 10 * i as i32;
            let y = if player == PlayerId::ONE { zone.min_y + 2 } else { zone.max_y - 10 };
            if self.try_submit(processor, player, ActionType::DeployUnit, Some(unit), json!({ "x": x, "y": y })) {
                return true;
            }
        }
        false
    }

    fn advance(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        for unit in state.units_of(player).filter(|u| u.is_active()) {
            if self.moved.get(&unit.id) == Some(&state.turn_number) {
                continue;
            }
            self.moved.insert(unit.id.clone(), state.turn_number);
            let (Some(from), Some(goal)) = (unit.anchor(), nearest_enemy(state, player, unit.anchor())) else {
                continue;
            };
            let step = unit.profile.movement as i32;
            let dy = (goal.1.y - from.y).clamp(-step, step);
            // Stop short of engagement range
            let dy = if (goal.1.y - from.y - dy).abs() < 3 { dy - dy.signum() * 3 } else { dy };
            let to = from.offset(0, dy);
            let id = unit.id.clone();
            if self.try_submit(processor, player, ActionType::MoveUnit, Some(&id), json!({ "x": to.x, "y": to.y, "advance": false })) {
                return true;
            }
        }
        false
    }

    fn shoot(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        for unit in state.units_of(player).filter(|u| u.is_active() && !u.profile.ranged.is_empty()) {
            if self.shot.get(&unit.id) == Some(&state.turn_number) {
                continue;
            }
            self.shot.insert(unit.id.clone(), state.turn_number);
            let Some((target, _)) = nearest_enemy(state, player, unit.anchor()) else {
                continue;
            };
            let id = unit.id.clone();
            if self.try_submit(processor, player, ActionType::SelectShooter, Some(&id), json!({ "target": target })) {
                return true;
            }
        }
        false
    }

    fn charge(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        for unit in state.units_of(player).filter(|u| u.is_active() && !u.profile.melee.is_empty()) {
            let Some((target, _)) = nearest_enemy(state, player, unit.anchor()) else {
                continue;
            };
            let id = unit.id.clone();
            if self.try_submit(processor, player, ActionType::DeclareCharge, Some(&id), json!({ "target": target })) {
                return true;
            }
        }
        false
    }

    fn fight(&mut self, processor: &mut ActionProcessor, state: &GameState) -> bool {
        let Some(selecting) = state.selecting_player else {
            return false;
        };
        for unit in state.units_of(selecting).filter(|u| u.is_active()) {
            let id = unit.id.clone();
            let Some((target, _)) = nearest_enemy(state, selecting, unit.anchor()) else {
                continue;
            };
            if self.try_submit(processor, selecting, ActionType::SelectFighter, Some(&id), json!({})) {
                self.try_submit(processor, selecting, ActionType::ResolveMelee, Some(&id), json!({ "target": target }));
                self.try_submit(processor, selecting, ActionType::CompleteActivation, None, json!({}));
                return true;
            }
        }
        false
    }

    fn rally(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        let shaken: Vec<String> =
            state.units_of(player).filter(|u| u.is_active() && u.below_half_strength()).map(|u| u.id.clone()).collect();
        shaken
            .iter()
            .any(|id| self.try_submit(processor, player, ActionType::BattleShockTest, Some(id), json!({})))
    }

    fn score(&mut self, processor: &mut ActionProcessor, state: &GameState, player: PlayerId) -> bool {
        let ids: Vec<u32> = state.board.objectives.iter().map(|o| o.id).collect();
        for objective in ids {
            if self.scored.get(&(player, objective)) == Some(&state.turn_number) {
                continue;
            }
            self.scored.insert((player, objective), state.turn_number);
            if self.try_submit(processor, player, ActionType::ScoreObjective, None, json!({ "objective": objective })) {
                return true;
            }
        }
        false
    }

    fn unblock(&mut self, processor: &mut ActionProcessor, state: &GameState) {
        let active = state.active_player;
        let defender = active.opponent();
        if self.try_submit(processor, active, ActionType::ContinueSequence, None, json!({})) {
            return;
        }
        if self.try_submit(processor, defender, ActionType::AllocateWounds, None, json!({ "models": [] })) {
            return;
        }
        if self.try_submit(processor, active, ActionType::CompleteSequence, None, json!({})) {
            return;
        }
        if let Some(selecting) = state.selecting_player {
            self.try_submit(processor, selecting, ActionType::CompleteActivation, None, json!({}));
        }
    }
}

/// Closest enemy unit to `from`, by anchor.
fn nearest_enemy(state: &GameState, player: PlayerId, from: Option<Position>) -> Option<(String, Position)> {
    let from = from?;
    state
        .units_of(player.opponent())
        .filter(|u| u.is_active())
        .filter_map(|u| u.anchor().map(|pos| (u.id.clone(), pos)))
        .min_by_key(|(id, pos)| (pos.distance_sq(from), id.clone()))
}
