use serde::{Deserialize, Serialize};

use crate::game::state::{
    EntityId, GameState, HslColor, ItemBoxId, ItemSlot, Millis, PlayerId, Shell, StaticHazard,
};
use crate::util::vec3::Vec3;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Enter the arena with a caller-chosen identity
    Join {
        id: PlayerId,
        name: String,
        color: HslColor,
    },
    /// Client-authoritative movement
    UpdatePosition {
        position: Vec3,
        rotation: f32,
        speed: f32,
    },
    UseItem,
    /// Client noticed it ran over a banana (informational)
    HitBanana { id: EntityId },
    ChangeColor(HslColor),
    ChangeName { name: String },
    /// Request to leave the game
    Leave,
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once after a successful join
    Init { id: PlayerId, color: HslColor },
    /// Join was rejected
    JoinRejected { reason: String },
    /// Full game state snapshot
    GameState(GameSnapshot),
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub color: HslColor,
    pub position: Vec3,
    pub rotation: f32,
    pub speed: f32,
    pub lives: u8,
    pub item: ItemSlot,
    pub trailing_item: Option<ItemSlot>,
    pub is_spinning: bool,
    pub is_starred: bool,
    pub is_boosted: bool,
    pub is_item_spinning: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardSnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: f32,
    pub dropped_by: PlayerId,
}

impl From<&StaticHazard> for HazardSnapshot {
    fn from(h: &StaticHazard) -> Self {
        Self {
            id: h.id,
            position: h.position,
            rotation: h.rotation,
            dropped_by: h.dropped_by.clone(),
        }
    }
}

impl From<&Shell> for HazardSnapshot {
    fn from(s: &Shell) -> Self {
        Self {
            id: s.id,
            position: s.position,
            rotation: s.rotation,
            dropped_by: s.dropped_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBoxSnapshot {
    pub id: ItemBoxId,
    pub position: Vec3,
}

/// Full game state for network transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u64,
    pub server_time: Millis,
    pub players: Vec<PlayerSnapshot>,
    pub bananas: Vec<HazardSnapshot>,
    pub fake_cubes: Vec<HazardSnapshot>,
    pub green_shells: Vec<HazardSnapshot>,
    pub red_shells: Vec<HazardSnapshot>,
    pub item_boxes: Vec<ItemBoxSnapshot>,
}

fn sorted_by_id<T, F: Fn(&T) -> EntityId>(mut items: Vec<T>, key: F) -> Vec<T> {
    items.sort_unstable_by_key(|i| key(i));
    items
}

impl GameSnapshot {
    /// Snapshot the whole store, ordered by id so consecutive snapshots diff cleanly
    pub fn from_game_state(state: &GameState, tick: u64, server_time: Millis) -> Self {
        let mut players: Vec<PlayerSnapshot> = state
            .players
            .values()
            .map(|p| PlayerSnapshot {
                id: p.id.clone(),
                name: p.name.clone(),
                color: p.color,
                position: p.position,
                rotation: p.rotation,
                speed: p.speed,
                lives: p.lives,
                item: p.item,
                trailing_item: p.trailing_item,
                is_spinning: p.is_spinning(),
                is_starred: p.is_starred(),
                is_boosted: p.is_boosted(),
                is_item_spinning: p.is_item_spinning,
            })
            .collect();
        players.sort_unstable_by(|a, b| a.id.cmp(&b.id));

        let statics = |m: &hashbrown::HashMap<EntityId, StaticHazard>| {
            sorted_by_id(m.values().map(HazardSnapshot::from).collect(), |h| h.id)
        };
        let shells = |m: &hashbrown::HashMap<EntityId, Shell>| {
            sorted_by_id(m.values().map(HazardSnapshot::from).collect(), |h| h.id)
        };

        let mut item_boxes: Vec<ItemBoxSnapshot> = state
            .item_boxes()
            .iter()
            .map(|b| ItemBoxSnapshot {
                id: b.id,
                position: b.position,
            })
            .collect();
        item_boxes.sort_unstable_by_key(|b| b.id);

        Self {
            tick,
            server_time,
            players,
            bananas: statics(&state.bananas),
            fake_cubes: statics(&state.fake_cubes),
            green_shells: shells(&state.green_shells),
            red_shells: shells(&state.red_shells),
            item_boxes,
        }
    }
}

/// Encode a message using bincode.
/// Uses legacy config for fixed-size integers (compatible with TypeScript client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with TypeScript client)
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
