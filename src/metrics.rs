//! Prometheus-compatible metrics endpoint
//!
//! Exposes arena metrics in Prometheus format plus a JSON view and a
//! `/status` endpoint with the connected-player count.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::game_loop::{GameLoop, GameLoopEvent};
use crate::game::systems::collision::CollisionEvent;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Player counts
    pub total_players: AtomicU64,
    pub alive_players: AtomicU64,

    // Entity counts
    pub banana_count: AtomicU64,
    pub fake_cube_count: AtomicU64,
    pub green_shell_count: AtomicU64,
    pub red_shell_count: AtomicU64,
    pub item_boxes_active: AtomicU64,
    pub scheduled_tasks: AtomicU64,

    // Gameplay counters
    pub players_hit: AtomicU64,
    pub hits_blocked: AtomicU64,
    pub item_boxes_collected: AtomicU64,
    pub players_timed_out: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network stats
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_players: AtomicU64::new(0),
            alive_players: AtomicU64::new(0),
            banana_count: AtomicU64::new(0),
            fake_cube_count: AtomicU64::new(0),
            green_shell_count: AtomicU64::new(0),
            red_shell_count: AtomicU64::new(0),
            item_boxes_active: AtomicU64::new(0),
            scheduled_tasks: AtomicU64::new(0),
            players_hit: AtomicU64::new(0),
            hits_blocked: AtomicU64::new(0),
            item_boxes_collected: AtomicU64::new(0),
            players_timed_out: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Refresh the entity gauges from the live game
    pub fn record_game(&self, game: &GameLoop) {
        let state = game.state();
        let alive = state.players.values().filter(|p| p.is_alive()).count();
        self.total_players.store(state.player_count() as u64, Ordering::Relaxed);
        self.alive_players.store(alive as u64, Ordering::Relaxed);
        self.banana_count.store(state.bananas.len() as u64, Ordering::Relaxed);
        self.fake_cube_count.store(state.fake_cubes.len() as u64, Ordering::Relaxed);
        self.green_shell_count.store(state.green_shells.len() as u64, Ordering::Relaxed);
        self.red_shell_count.store(state.red_shells.len() as u64, Ordering::Relaxed);
        self.item_boxes_active.store(state.item_boxes().len() as u64, Ordering::Relaxed);
        self.scheduled_tasks.store(game.pending_tasks() as u64, Ordering::Relaxed);
    }

    /// Bump the gameplay counters for one tick's events
    pub fn record_events(&self, events: &[GameLoopEvent]) {
        for event in events {
            let counter = match event {
                GameLoopEvent::Collision(CollisionEvent::PlayerHit { .. }) => &self.players_hit,
                GameLoopEvent::Collision(CollisionEvent::HitBlocked { .. }) => &self.hits_blocked,
                GameLoopEvent::Collision(CollisionEvent::ItemBoxCollected { .. }) => {
                    &self.item_boxes_collected
                }
                GameLoopEvent::PlayerTimedOut(_) => &self.players_timed_out,
                _ => continue,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Player metrics
        metric!("kart_arena_players_total", "Number of connected players", "gauge",
            self.total_players.load(Ordering::Relaxed));
        metric!("kart_arena_players_alive", "Players with lives remaining", "gauge",
            self.alive_players.load(Ordering::Relaxed));

        // Entity metrics
        metric!("kart_arena_bananas", "Bananas on the track", "gauge",
            self.banana_count.load(Ordering::Relaxed));
        metric!("kart_arena_fake_cubes", "Fake item cubes on the track", "gauge",
            self.fake_cube_count.load(Ordering::Relaxed));
        metric!("kart_arena_green_shells", "Green shells in flight", "gauge",
            self.green_shell_count.load(Ordering::Relaxed));
        metric!("kart_arena_red_shells", "Red shells in flight", "gauge",
            self.red_shell_count.load(Ordering::Relaxed));
        metric!("kart_arena_item_boxes_active", "Item boxes available for pickup", "gauge",
            self.item_boxes_active.load(Ordering::Relaxed));
        metric!("kart_arena_scheduled_tasks", "Pending delayed tasks", "gauge",
            self.scheduled_tasks.load(Ordering::Relaxed));

        // Gameplay counters
        metric!("kart_arena_players_hit_total", "Hits that cost a life", "counter",
            self.players_hit.load(Ordering::Relaxed));
        metric!("kart_arena_hits_blocked_total", "Hits absorbed by a triple-shell stack", "counter",
            self.hits_blocked.load(Ordering::Relaxed));
        metric!("kart_arena_item_boxes_collected_total", "Item boxes picked up", "counter",
            self.item_boxes_collected.load(Ordering::Relaxed));
        metric!("kart_arena_players_timed_out_total", "Players removed for inactivity", "counter",
            self.players_timed_out.load(Ordering::Relaxed));

        // Performance metrics
        metric!("kart_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("kart_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("kart_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("kart_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("kart_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        // Network metrics
        metric!("kart_arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("kart_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("kart_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("kart_arena_messages_dropped_total", "Snapshots dropped for slow clients", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("kart_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("kart_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        metric!("kart_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "players": {
                "total": load(&self.total_players),
                "alive": load(&self.alive_players),
            },
            "entities": {
                "bananas": load(&self.banana_count),
                "fake_cubes": load(&self.fake_cube_count),
                "green_shells": load(&self.green_shell_count),
                "red_shells": load(&self.red_shell_count),
                "item_boxes_active": load(&self.item_boxes_active),
                "scheduled_tasks": load(&self.scheduled_tasks),
            },
            "gameplay": {
                "players_hit": load(&self.players_hit),
                "hits_blocked": load(&self.hits_blocked),
                "item_boxes_collected": load(&self.item_boxes_collected),
                "players_timed_out": load(&self.players_timed_out),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "network": {
                "connections": load(&self.connections_active),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "messages_dropped": load(&self.messages_dropped),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }

    /// Connected-player count for the status endpoint
    pub fn to_status_json(&self) -> String {
        serde_json::json!({
            "connected_players": self.total_players.load(Ordering::Relaxed),
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Build the HTTP response for a raw request
fn route(metrics: &Metrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or("");

    match path {
        "/metrics" => http_response("text/plain; version=0.0.4", &metrics.to_prometheus()),
        "/metrics/json" | "/json" => http_response("application/json", &metrics.to_json()),
        "/status" => http_response("application/json", &metrics.to_status_json()),
        "/health" | "/" => http_response("text/plain", "OK"),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
