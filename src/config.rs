use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::game::constants::{physics, timing};

/// Gameplay tunables owned by the game loop
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Players with no position update for longer than this are removed
    pub idle_timeout_ms: u64,
    /// When a star expires, also clear spin, boost and the item roulette
    pub star_expiry_resets_effects: bool,
    /// Fixed seed for reproducible item draws and block rolls
    pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: timing::IDLE_TIMEOUT_MS,
            star_expiry_resets_effects: true,
            rng_seed: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port for the metrics and status HTTP endpoint
    pub metrics_port: u16,
    /// JSON map file describing blocks, ramps and item boxes
    pub map_path: Option<PathBuf>,
    /// Snapshots per second sent to every client
    pub broadcast_rate: u32,
    /// Path to TLS certificate file (if not using self-signed)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using self-signed)
    pub tls_key_path: Option<String>,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            map_path: Some(PathBuf::from("maps/default.json")),
            broadcast_rate: physics::BROADCAST_RATE,
            tls_cert_path: None,
            tls_key_path: None,
            game: GameConfig::default(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = parsed,
                _ => tracing::warn!("Invalid METRICS_PORT '{}', using default", port),
            }
        }

        if let Ok(path) = std::env::var("MAP_PATH") {
            config.map_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(rate) = std::env::var("BROADCAST_RATE") {
            match rate.parse::<u32>() {
                Ok(parsed) if (1..=1000).contains(&parsed) => config.broadcast_rate = parsed,
                _ => tracing::warn!("BROADCAST_RATE must be 1-1000, got '{}', using default", rate),
            }
        }

        if let Ok(secs) = std::env::var("IDLE_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.game.idle_timeout_ms = parsed * 1000,
                _ => tracing::warn!("Invalid IDLE_TIMEOUT_SECS '{}', using default", secs),
            }
        }

        if let Ok(seed) = std::env::var("RNG_SEED") {
            if let Ok(parsed) = seed.parse::<u64>() {
                config.game.rng_seed = Some(parsed);
            } else {
                tracing::warn!("Invalid RNG_SEED '{}', using entropy", seed);
            }
        }

        if let Ok(flag) = std::env::var("STAR_EXPIRY_RESETS_EFFECTS") {
            if let Some(parsed) = parse_bool(&flag) {
                config.game.star_expiry_resets_effects = parsed;
            } else {
                tracing::warn!("Invalid STAR_EXPIRY_RESETS_EFFECTS '{}', using default", flag);
            }
        }

        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }

        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.broadcast_rate == 0 {
            return Err("broadcast_rate must be at least 1".to_string());
        }
        if self.game.idle_timeout_ms == 0 {
            return Err("idle timeout must be at least 1 second".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}
