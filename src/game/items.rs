//! Item acquisition and activation.
//!
//! Per player: EMPTY -> SPINNING (roulette) -> HELD -> either CONSUMED (boost,
//! star) or TRANSFERRED to the trailing slot, from which each use fires one
//! hazard.

use rand::Rng;
use tracing::debug;

use crate::game::constants::{player, timing};
use crate::game::placement::{drop_position, shell_spawn, units_dropped};
use crate::game::scheduler::{ScheduledTask, Scheduler};
use crate::game::state::{
    EntityId, GameState, HazardKind, ItemSlot, ItemType, Millis, PlayerId, Shell, StaticHazard,
};
use crate::game::terrain::Terrain;
use crate::util::vec3::Vec3;

/// Weighted draw over `ItemType::ALL` in declaration order
pub fn roll_item<R: Rng + ?Sized>(rng: &mut R) -> ItemType {
    let mut r = rng.gen_range(0.0..ItemType::total_weight());
    for item_type in ItemType::ALL {
        let weight = item_type.weight();
        if r < weight {
            return item_type;
        }
        r -= weight;
    }
    // Only reachable through float rounding at the very top of the range
    ItemType::ThreeGreenShells
}

/// Start the roulette for a player who touched an item box.
/// Returns false if the player holds something or is already rolling.
pub fn handle_item_box_collection(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    player_id: &str,
    now: Millis,
) -> bool {
    let Some(player) = state.players.get_mut(player_id) else {
        return false;
    };
    if player.item.quantity != 0 || player.is_item_spinning {
        return false;
    }
    player.is_item_spinning = true;
    scheduler.schedule(
        now + timing::ROULETTE_MS,
        ScheduledTask::FinishRoulette(player.id.clone()),
    );
    true
}

/// Roulette delay elapsed: hand out the drawn item
pub fn finish_roulette<R: Rng + ?Sized>(
    state: &mut GameState,
    player_id: &str,
    rng: &mut R,
) -> Option<ItemType> {
    let player = state.players.get_mut(player_id)?;
    let item_type = roll_item(rng);
    player.item = ItemSlot::new(item_type, item_type.roulette_quantity());
    player.is_item_spinning = false;
    debug!("Player {} received {:?}", player_id, item_type);
    Some(item_type)
}

/// Result of a `use_item` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseOutcome {
    /// Neither slot held anything
    Nothing,
    Spawned(HazardKind, EntityId),
    Boost,
    Star,
    /// Item moved into the trailing slot
    Trailing(ItemType),
}

/// Fire the trailing item if there is one, otherwise activate the held item
pub fn use_item(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    terrain: &dyn Terrain,
    player_id: &str,
    now: Millis,
) -> UseOutcome {
    let Some(player) = state.players.get_mut(player_id) else {
        return UseOutcome::Nothing;
    };

    if let Some(trailing) = player.trailing_item {
        let already_dropped = units_dropped(&trailing);
        player.consume_trailing_unit();
        let Some(kind) = trailing.item_type.hazard_kind() else {
            return UseOutcome::Nothing;
        };
        let dropped_by = player.id.clone();
        let id = if kind.is_shell() {
            let (position, rotation) = shell_spawn(player);
            spawn_shell(state, scheduler, kind, position, rotation, dropped_by, now)
        } else {
            let position = drop_position(player, already_dropped, terrain);
            let rotation = player.rotation;
            spawn_static(state, scheduler, kind, position, rotation, dropped_by, now)
        };
        return UseOutcome::Spawned(kind, id);
    }

    if player.item.is_empty() {
        return UseOutcome::Nothing;
    }

    let item_type = player.item.item_type;
    player.item = ItemSlot::empty();
    match item_type {
        ItemType::Boost => {
            player.effects.boost_until = Some(now + timing::BOOST_MS);
            UseOutcome::Boost
        }
        ItemType::Star => {
            player.effects.star_until = Some(now + timing::STAR_MS);
            UseOutcome::Star
        }
        _ => {
            player.trailing_item = Some(ItemSlot::new(item_type, item_type.trailing_quantity()));
            UseOutcome::Trailing(item_type)
        }
    }
}

/// Place a banana or fake cube and schedule its expiry
pub fn spawn_static(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    kind: HazardKind,
    position: Vec3,
    rotation: f32,
    dropped_by: PlayerId,
    now: Millis,
) -> EntityId {
    let id = state.next_entity_id();
    let hazard = StaticHazard {
        id,
        position,
        rotation,
        dropped_by,
        dropped_at: now,
    };
    if let Some(map) = state.static_hazards_mut(kind) {
        map.insert(id, hazard);
        scheduler.schedule(
            now + timing::HAZARD_LIFETIME_MS,
            ScheduledTask::ExpireHazard { kind, id },
        );
    }
    id
}

/// Launch a shell and schedule its arming
pub fn spawn_shell(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    kind: HazardKind,
    position: Vec3,
    rotation: f32,
    dropped_by: PlayerId,
    now: Millis,
) -> EntityId {
    let id = state.next_entity_id();
    let shell = Shell {
        id,
        position,
        rotation,
        speed: player::SHELL_SPEED,
        dropped_by,
        dropped_at: now,
        vertical_velocity: 0.0,
        can_hit_owner: false,
    };
    if let Some(map) = state.shells_mut(kind) {
        map.insert(id, shell);
        scheduler.schedule(now + timing::SHELL_ARMING_MS, ScheduledTask::ArmShell(id));
    }
    id
}
