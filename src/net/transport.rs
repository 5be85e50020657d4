//! WebTransport server implementation
//!
//! Each client session opens one bidirectional stream. The server reads
//! framed `ClientMessage`s from it and writes framed `ServerMessage`s back
//! through the connection's outbound queue.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::game::game_loop::PlayerIdentity;
use crate::game::state::PlayerId;
use crate::game::terrain::Terrain;
use crate::metrics::Metrics;
use crate::net::framing::{read_message, FramingError};
use crate::net::game_session::{
    outbound_channel, spawn_writer, start_broadcast_loop, start_game_loop, GameSession,
};
use crate::net::protocol::{decode, ClientMessage};
use crate::net::tls::TlsConfig;

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    game_session: Arc<RwLock<GameSession>>,
    metrics: Arc<Metrics>,
}

impl WebTransportServer {
    /// Create a new WebTransport server
    pub async fn new(
        config: ServerConfig,
        terrain: Box<dyn Terrain>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config =
            TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;
        let game_session = Arc::new(RwLock::new(GameSession::new_with_metrics(
            terrain,
            config.game.clone(),
            metrics.clone(),
        )));

        Ok(Self {
            config,
            tls_config,
            game_session,
            metrics,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    pub fn session(&self) -> Arc<RwLock<GameSession>> {
        self.game_session.clone()
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;
        use wtransport::ServerConfig;

        let addr = self.bind_addr();
        let server_config = ServerConfig::builder()
            .with_bind_address(addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;

        tracing::info!("WebTransport server listening on {}", addr);

        start_game_loop(self.game_session.clone(), self.metrics.clone());
        start_broadcast_loop(self.game_session.clone(), self.config.broadcast_rate);

        loop {
            let incoming = server.accept().await;
            let game_session = self.game_session.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, game_session, metrics).await {
                    tracing::warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    game_session: Arc<RwLock<GameSession>>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;

    tracing::debug!(
        "New connection from: {:?}, path: {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (send, recv) = connection.accept_bi().await?;
    tracing::debug!("Accepted bidirectional stream");

    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    serve_stream(recv, send, game_session, metrics.clone()).await;
    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);

    Ok(())
}

/// Drive one client stream until it closes or the player leaves
pub async fn serve_stream<R, W>(
    mut recv: R,
    send: W,
    game_session: Arc<RwLock<GameSession>>,
    metrics: Arc<Metrics>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = outbound_channel();
    let writer = spawn_writer(send, rx);
    let mut player_id: Option<PlayerId> = None;

    loop {
        let data = match read_message(&mut recv).await {
            Ok(data) => data,
            Err(FramingError::ConnectionClosed) => break,
            Err(FramingError::MessageTooLarge(len, max)) => {
                tracing::warn!("Rejected oversized message: {} bytes (max {})", len, max);
                break;
            }
            Err(e) => {
                tracing::debug!("Stream read error: {}", e);
                break;
            }
        };
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_received.fetch_add(data.len() as u64 + 4, Ordering::Relaxed);

        let message: ClientMessage = match decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Failed to decode client message: {}", e);
                continue;
            }
        };

        let mut session = game_session.write().await;
        if let Some(pid) = &player_id {
            if !session.is_connected(pid, &tx) {
                tracing::debug!("Player {} was removed by the server, stream must rejoin", pid);
                player_id = None;
            }
        }

        let pid = match &player_id {
            Some(pid) => pid.clone(),
            None => {
                if let ClientMessage::Join { id, name, color } = message {
                    if let Ok(joined) = session.join(PlayerIdentity { id, name, color }, tx.clone()) {
                        player_id = Some(joined);
                    }
                } else {
                    tracing::debug!("Ignoring message before Join");
                }
                continue;
            }
        };

        let leaving = matches!(message, ClientMessage::Leave);
        session.handle_message(&pid, message);
        if leaving {
            player_id = None;
            break;
        }
    }

    if let Some(pid) = player_id {
        tracing::debug!("Stream closed, removing player {}", pid);
        game_session.write().await.leave_connection(&pid, &tx);
    }

    // The session dropped its clone; dropping ours lets the writer drain and exit
    drop(tx);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::state::HslColor;
    use crate::game::terrain::FlatTerrain;
    use crate::net::framing::write_message;
    use crate::net::protocol::{encode, ServerMessage};
    use tokio::io::{duplex, AsyncWriteExt};

    fn shared_session() -> Arc<RwLock<GameSession>> {
        Arc::new(RwLock::new(GameSession::new(
            Box::new(FlatTerrain::new(0.0)),
            GameConfig {
                rng_seed: Some(3),
                ..GameConfig::default()
            },
        )))
    }

    fn join_message(id: &str) -> Vec<u8> {
        encode(&ClientMessage::Join {
            id: id.to_string(),
            name: "Peach".to_string(),
            color: HslColor::new(300.0, 70.0, 60.0),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_join_then_leave_over_stream() {
        let session = shared_session();
        let metrics = Arc::new(Metrics::new());
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, mut client_out) = duplex(64 * 1024);

        write_message(&mut client_in, &join_message("p1")).await.unwrap();
        write_message(&mut client_in, &encode(&ClientMessage::Leave).unwrap()).await.unwrap();

        serve_stream(server_in, server_out, session.clone(), metrics.clone()).await;

        let init: ServerMessage = decode(&read_message(&mut client_out).await.unwrap()).unwrap();
        assert!(matches!(init, ServerMessage::Init { ref id, .. } if id == "p1"));
        assert_eq!(session.read().await.player_count(), 0);
        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_stream_close_removes_player() {
        let session = shared_session();
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, _client_out) = duplex(64 * 1024);

        write_message(&mut client_in, &join_message("p2")).await.unwrap();
        client_in.shutdown().await.unwrap();
        drop(client_in);

        serve_stream(server_in, server_out, session.clone(), Arc::new(Metrics::new())).await;
        assert_eq!(session.read().await.player_count(), 0);
    }

    #[tokio::test]
    async fn test_messages_before_join_are_ignored() {
        let session = shared_session();
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, _client_out) = duplex(64 * 1024);

        write_message(&mut client_in, &encode(&ClientMessage::UseItem).unwrap()).await.unwrap();
        write_message(&mut client_in, &[0xde, 0xad]).await.unwrap();
        drop(client_in);

        serve_stream(server_in, server_out, session.clone(), Arc::new(Metrics::new())).await;
        assert_eq!(session.read().await.player_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_join_keeps_first_player() {
        let session = shared_session();
        let metrics = Arc::new(Metrics::new());

        let (mut first_in, first_server_in) = duplex(64 * 1024);
        let (first_server_out, _first_out) = duplex(64 * 1024);
        write_message(&mut first_in, &join_message("same")).await.unwrap();
        // Keep the first stream open while the second one tries the same id
        let first = tokio::spawn(serve_stream(
            first_server_in,
            first_server_out,
            session.clone(),
            metrics.clone(),
        ));

        while session.read().await.player_count() == 0 {
            tokio::task::yield_now().await;
        }

        let (mut second_in, second_server_in) = duplex(64 * 1024);
        let (second_server_out, mut second_out) = duplex(64 * 1024);
        write_message(&mut second_in, &join_message("same")).await.unwrap();
        drop(second_in);
        serve_stream(second_server_in, second_server_out, session.clone(), metrics.clone()).await;

        let reply: ServerMessage = decode(&read_message(&mut second_out).await.unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::JoinRejected { .. }));
        assert_eq!(session.read().await.player_count(), 1);

        drop(first_in);
        first.await.unwrap();
        assert_eq!(session.read().await.player_count(), 0);
    }

    fn short_timeout_session() -> Arc<RwLock<GameSession>> {
        Arc::new(RwLock::new(GameSession::new(
            Box::new(FlatTerrain::new(0.0)),
            GameConfig {
                idle_timeout_ms: 100,
                rng_seed: Some(3),
                ..GameConfig::default()
            },
        )))
    }

    async fn tick_until_empty(session: &Arc<RwLock<GameSession>>) {
        for _ in 0..20 {
            session.write().await.tick();
        }
        assert_eq!(session.read().await.player_count(), 0);
    }

    #[tokio::test]
    async fn test_closing_stale_stream_keeps_rejoined_player() {
        let session = short_timeout_session();
        let metrics = Arc::new(Metrics::new());

        let (mut old_in, old_server_in) = duplex(64 * 1024);
        let (old_server_out, _old_out) = duplex(64 * 1024);
        write_message(&mut old_in, &join_message("x")).await.unwrap();
        let old = tokio::spawn(serve_stream(old_server_in, old_server_out, session.clone(), metrics.clone()));
        while session.read().await.player_count() == 0 {
            tokio::task::yield_now().await;
        }
        tick_until_empty(&session).await;

        let (mut new_in, new_server_in) = duplex(64 * 1024);
        let (new_server_out, _new_out) = duplex(64 * 1024);
        write_message(&mut new_in, &join_message("x")).await.unwrap();
        let new = tokio::spawn(serve_stream(new_server_in, new_server_out, session.clone(), metrics.clone()));
        while session.read().await.player_count() == 0 {
            tokio::task::yield_now().await;
        }

        drop(old_in);
        old.await.unwrap();
        assert_eq!(session.read().await.player_count(), 1);
        assert_eq!(session.read().await.connection_count(), 1);

        drop(new_in);
        new.await.unwrap();
        assert_eq!(session.read().await.player_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_stream_can_rejoin() {
        let session = short_timeout_session();
        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, _client_out) = duplex(64 * 1024);
        write_message(&mut client_in, &join_message("y")).await.unwrap();
        let task = tokio::spawn(serve_stream(server_in, server_out, session.clone(), Arc::new(Metrics::new())));
        while session.read().await.player_count() == 0 {
            tokio::task::yield_now().await;
        }
        tick_until_empty(&session).await;

        // Messages for the evicted player are ignored until a fresh Join
        write_message(&mut client_in, &encode(&ClientMessage::UseItem).unwrap()).await.unwrap();
        write_message(&mut client_in, &join_message("y")).await.unwrap();
        while session.read().await.player_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.read().await.connection_count(), 1);

        drop(client_in);
        task.await.unwrap();
        assert_eq!(session.read().await.player_count(), 0);
    }
}
