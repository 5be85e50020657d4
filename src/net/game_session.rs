//! Game session manager - runs the game loop and broadcasts state to players

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::constants::{net, physics};
use crate::game::game_loop::{GameLoop, GameLoopEvent, PlayerIdentity, SessionError};
use crate::game::state::PlayerId;
use crate::game::terrain::Terrain;
use crate::metrics::Metrics;
use crate::net::framing::{frame, write_frame};
use crate::net::protocol::{encode, ClientMessage, GameSnapshot, ServerMessage};

/// Outbound queue of one connected player. Frames are already length-prefixed.
pub struct PlayerConnection {
    pub player_id: PlayerId,
    pub sender: mpsc::Sender<Bytes>,
}

/// Shared game session that owns the game loop and player connections
pub struct GameSession {
    pub game_loop: GameLoop,
    connections: HashMap<PlayerId, PlayerConnection>,
    metrics: Option<Arc<Metrics>>,
}

impl GameSession {
    pub fn new(terrain: Box<dyn Terrain>, config: GameConfig) -> Self {
        Self {
            game_loop: GameLoop::new(terrain, config),
            connections: HashMap::new(),
            metrics: None,
        }
    }

    pub fn new_with_metrics(terrain: Box<dyn Terrain>, config: GameConfig, metrics: Arc<Metrics>) -> Self {
        let mut session = Self::new(terrain, config);
        session.metrics = Some(metrics);
        session
    }

    /// Get current player count
    pub fn player_count(&self) -> usize {
        self.game_loop.player_count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Join a player and register their outbound queue. On success the player
    /// receives `Init` and everyone receives a fresh snapshot; on failure only
    /// the caller receives `JoinRejected`.
    pub fn join(
        &mut self,
        identity: PlayerIdentity,
        sender: mpsc::Sender<Bytes>,
    ) -> Result<PlayerId, SessionError> {
        let requested = identity.id.clone();
        let (player_id, color) = match self.game_loop.connect(identity) {
            Ok(joined) => joined,
            Err(e) => {
                warn!("Join rejected: {}", e);
                let rejection = ServerMessage::JoinRejected { reason: e.to_string() };
                if let Some(framed) = encode_frame(&rejection) {
                    self.send_frame(&requested, &sender, framed);
                }
                return Err(e);
            }
        };

        if let Some(framed) = encode_frame(&ServerMessage::Init {
            id: player_id.clone(),
            color,
        }) {
            self.send_frame(&player_id, &sender, framed);
        }
        self.connections.insert(
            player_id.clone(),
            PlayerConnection {
                player_id: player_id.clone(),
                sender,
            },
        );
        self.broadcast_now();
        Ok(player_id)
    }

    /// Remove a player and their queue. Dropping the sender ends the writer task.
    pub fn leave(&mut self, player_id: &str) -> bool {
        let had_connection = self.connections.remove(player_id).is_some();
        let removed = self.game_loop.disconnect(player_id);
        if removed {
            self.broadcast_now();
        }
        removed || had_connection
    }

    /// Whether `sender` is still the registered queue for `player_id`
    pub fn is_connected(&self, player_id: &str, sender: &mpsc::Sender<Bytes>) -> bool {
        self.connections
            .get(player_id)
            .is_some_and(|conn| conn.sender.same_channel(sender))
    }

    /// Remove a player on behalf of one stream. A stream whose player timed
    /// out and rejoined from another stream leaves the new player alone.
    pub fn leave_connection(&mut self, player_id: &str, sender: &mpsc::Sender<Bytes>) -> bool {
        if !self.is_connected(player_id, sender) {
            return false;
        }
        self.leave(player_id)
    }

    /// Apply a message from an already joined player
    pub fn handle_message(&mut self, player_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::Join { .. } => {
                debug!("Player {} sent a second Join, ignoring", player_id);
            }
            ClientMessage::UpdatePosition { position, rotation, speed } => {
                if let Err(e) = self.game_loop.update_position(player_id, position, rotation, speed) {
                    debug!("Position update from {} rejected: {}", player_id, e);
                }
            }
            ClientMessage::UseItem => {
                self.game_loop.use_item(player_id);
            }
            ClientMessage::HitBanana { id } => {
                self.game_loop.hit_banana(player_id, id);
            }
            ClientMessage::ChangeColor(color) => match self.game_loop.change_color(player_id, color) {
                Ok(()) => self.broadcast_now(),
                Err(e) => warn!("Color change from {} rejected: {}", player_id, e),
            },
            ClientMessage::ChangeName { name } => match self.game_loop.change_name(player_id, &name) {
                Ok(()) => self.broadcast_now(),
                Err(e) => warn!("Name change from {} rejected: {}", player_id, e),
            },
            ClientMessage::Leave => {
                self.leave(player_id);
            }
            ClientMessage::Ping { timestamp } => {
                let pong = ServerMessage::Pong {
                    client_timestamp: timestamp,
                    server_timestamp: self.game_loop.now(),
                };
                self.send_to_player(player_id, &pong);
            }
        }
    }

    /// Run one simulation tick and drop queues of players the loop removed
    pub fn tick(&mut self) -> Vec<GameLoopEvent> {
        let events = self.game_loop.tick();
        for event in &events {
            if let GameLoopEvent::PlayerTimedOut(player_id) = event {
                self.connections.remove(player_id);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_events(&events);
            metrics.record_game(&self.game_loop);
        }
        events
    }

    pub fn get_snapshot(&self) -> GameSnapshot {
        GameSnapshot::from_game_state(
            self.game_loop.state(),
            self.game_loop.tick_count(),
            self.game_loop.now(),
        )
    }

    /// Encode and frame the current snapshot once for all connections
    pub fn snapshot_frame(&self) -> Option<Bytes> {
        encode_frame(&ServerMessage::GameState(self.get_snapshot()))
    }

    /// Push a frame to every connection without waiting. A full queue drops
    /// the frame for that client only.
    pub fn broadcast(&self, framed: &Bytes) {
        for conn in self.connections.values() {
            self.send_frame(&conn.player_id, &conn.sender, framed.clone());
        }
    }

    /// Broadcast the current snapshot immediately
    pub fn broadcast_now(&self) {
        if self.connections.is_empty() {
            return;
        }
        if let Some(framed) = self.snapshot_frame() {
            self.broadcast(&framed);
        }
    }

    pub fn send_to_player(&self, player_id: &str, message: &ServerMessage) {
        let Some(conn) = self.connections.get(player_id) else {
            return;
        };
        if let Some(framed) = encode_frame(message) {
            self.send_frame(player_id, &conn.sender, framed);
        }
    }

    fn send_frame(&self, player_id: &str, sender: &mpsc::Sender<Bytes>, framed: Bytes) {
        let len = framed.len() as u64;
        match sender.try_send(framed) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                    metrics.bytes_sent.fetch_add(len, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full for {}, dropping frame", player_id);
                if let Some(metrics) = &self.metrics {
                    metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", player_id);
            }
        }
    }
}

fn encode_frame(message: &ServerMessage) -> Option<Bytes> {
    let encoded = match encode(message) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            return None;
        }
    };
    match frame(&encoded) {
        Ok(framed) => Some(framed),
        Err(e) => {
            warn!("Failed to frame message: {}", e);
            None
        }
    }
}

/// Create the bounded outbound queue for a new connection
pub fn outbound_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(net::OUTBOUND_QUEUE)
}

/// Drain a connection's outbound queue into its stream
pub fn spawn_writer<W>(mut stream: W, mut rx: mpsc::Receiver<Bytes>) -> tokio::task::JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(framed) = rx.recv().await {
            if let Err(e) = write_frame(&mut stream, &framed).await {
                debug!("Stream write error: {}", e);
                break;
            }
        }
    })
}

/// Start the 60 Hz simulation task
pub fn start_game_loop(session: Arc<RwLock<GameSession>>, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        let tick_duration = Duration::from_secs_f64(physics::DT as f64);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Game loop started at {} Hz", physics::TICK_RATE);
        let start = Instant::now();
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;

            {
                let mut session_guard = session.write().await;
                let tick_start = Instant::now();
                let events = session_guard.tick();
                metrics.record_tick_time(tick_start.elapsed());

                for event in &events {
                    debug!("Tick event: {:?}", event);
                }
                if events.iter().any(GameLoopEvent::is_structural) {
                    session_guard.broadcast_now();
                }
            }

            // Log stats periodically (every 30 seconds)
            if tick_count % (physics::TICK_RATE as u64 * 30) == 0 {
                let session_guard = session.read().await;
                let state = session_guard.game_loop.state();
                info!(
                    "Game: {}s, tick {}, {} players, {} bananas, {} cubes, {} shells, {} item boxes",
                    start.elapsed().as_secs(),
                    session_guard.game_loop.tick_count(),
                    state.player_count(),
                    state.bananas.len(),
                    state.fake_cubes.len(),
                    state.green_shells.len() + state.red_shells.len(),
                    state.item_boxes().len()
                );
            }
        }
    });
}

/// Start the snapshot broadcast task, independent from the simulation rate
pub fn start_broadcast_loop(session: Arc<RwLock<GameSession>>, rate: u32) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_micros(1_000_000 / rate.max(1) as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Broadcasting snapshots at {} Hz", rate);

        loop {
            ticker.tick().await;
            let session_guard = session.read().await;
            if session_guard.connection_count() == 0 {
                continue;
            }
            if let Some(framed) = session_guard.snapshot_frame() {
                session_guard.broadcast(&framed);
            }
        }
    });
}
