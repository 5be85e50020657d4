//! Per-tick collision sweep between players, hazards and item boxes.
//!
//! Players are evaluated one at a time in id order. For each living player
//! the checks run bananas, fake cubes, shells, other players (contact and
//! carried hazards), own carried items vs. shells, then item boxes. Destroyed
//! hazards are tombstoned and removed once the sweep finishes, and later
//! checks skip anything already tombstoned.

use hashbrown::HashSet;
use rand::Rng;
use tracing::debug;

use crate::game::constants::{block_chance, radius, timing};
use crate::game::items::handle_item_box_collection;
use crate::game::placement::{trailing_hit_radius, trailing_positions};
use crate::game::scheduler::{ScheduledTask, Scheduler};
use crate::game::state::{EntityId, GameState, HazardKind, ItemBoxId, Millis, PlayerId};
use crate::util::vec3::Vec3;

/// What caused a player to lose a life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCause {
    Banana,
    FakeCube,
    Shell,
    Ram,
    CarriedHazard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionEvent {
    PlayerHit { player_id: PlayerId, cause: HitCause },
    /// A carried triple-shell stack absorbed an impact
    HitBlocked { player_id: PlayerId },
    ItemBoxCollected { player_id: PlayerId, item_box_id: ItemBoxId, roulette_started: bool },
}

type Tombstones = HashSet<(HazardKind, EntityId)>;

#[inline]
fn within(a: Vec3, b: Vec3, reach: f32) -> bool {
    a.distance_sq_to(b) < reach * reach
}

fn sorted_ids<V>(map: &hashbrown::HashMap<EntityId, V>) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = map.keys().copied().collect();
    ids.sort_unstable();
    ids
}

fn is_alive(state: &GameState, player_id: &str) -> bool {
    state.players.get(player_id).is_some_and(|p| p.is_alive())
}

fn hit(
    state: &mut GameState,
    player_id: &str,
    cause: HitCause,
    now: Millis,
    events: &mut Vec<CollisionEvent>,
) {
    if let Some(player) = state.players.get_mut(player_id) {
        if player.apply_hit(now) {
            debug!("Player {} hit by {:?}, {} lives left", player_id, cause, player.lives);
            events.push(CollisionEvent::PlayerHit {
                player_id: player_id.to_string(),
                cause,
            });
        }
    }
}

/// Roll the block chance of the player's triple-shell stack, consuming one
/// unit either way. None when the player carries no such stack.
fn roll_block<R: Rng + ?Sized>(state: &mut GameState, player_id: &str, rng: &mut R) -> Option<bool> {
    let player = state.players.get_mut(player_id)?;
    let stack = player.triple_shell_stack()?;
    let blocked = rng.gen_bool(block_chance(stack));
    player.consume_trailing_unit();
    Some(blocked)
}

fn static_hazards(
    state: &mut GameState,
    player_id: &str,
    tombstones: &mut Tombstones,
    now: Millis,
    events: &mut Vec<CollisionEvent>,
) {
    for (kind, cause) in [
        (HazardKind::Banana, HitCause::Banana),
        (HazardKind::FakeCube, HitCause::FakeCube),
    ] {
        let Some(map) = state.static_hazards(kind) else {
            continue;
        };
        let reach = kind.radius() + radius::CAR;
        for id in sorted_ids(map) {
            if tombstones.contains(&(kind, id)) {
                continue;
            }
            let (Some(player), Some(hazard)) = (
                state.players.get(player_id),
                state.static_hazards(kind).and_then(|m| m.get(&id)),
            ) else {
                continue;
            };
            if !within(player.position, hazard.position, reach) {
                continue;
            }
            tombstones.insert((kind, id));
            if !player.is_starred() {
                hit(state, player_id, cause, now, events);
            }
        }
    }
}

fn shells<R: Rng + ?Sized>(
    state: &mut GameState,
    player_id: &str,
    tombstones: &mut Tombstones,
    rng: &mut R,
    now: Millis,
    events: &mut Vec<CollisionEvent>,
) {
    let reach = radius::SHELL + radius::CAR + radius::SHELL_HIT_MARGIN;
    for kind in [HazardKind::GreenShell, HazardKind::RedShell] {
        let Some(map) = state.shells(kind) else {
            continue;
        };
        for id in sorted_ids(map) {
            if tombstones.contains(&(kind, id)) {
                continue;
            }
            let (Some(player), Some(shell)) = (
                state.players.get(player_id),
                state.shells(kind).and_then(|m| m.get(&id)),
            ) else {
                continue;
            };
            if !shell.can_hit(player_id) || !within(player.position, shell.position, reach) {
                continue;
            }

            if player.is_starred() {
                tombstones.insert((kind, id));
                continue;
            }
            // The shell is spent either way; a successful roll means the
            // carried unit intercepted it instead of the car
            tombstones.insert((kind, id));
            if let Some(true) = roll_block(state, player_id, rng) {
                debug!("Player {} blocked a shell", player_id);
                events.push(CollisionEvent::HitBlocked {
                    player_id: player_id.to_string(),
                });
                continue;
            }
            hit(state, player_id, HitCause::Shell, now, events);
        }
    }
}

fn other_players<R: Rng + ?Sized>(
    state: &mut GameState,
    player_id: &str,
    order: &[PlayerId],
    rng: &mut R,
    now: Millis,
    events: &mut Vec<CollisionEvent>,
) {
    let contact = 2.0 * radius::CAR + radius::SHELL;
    for other_id in order.iter().filter(|id| id.as_str() != player_id) {
        let (Some(player), Some(other)) =
            (state.players.get(player_id), state.players.get(other_id))
        else {
            continue;
        };
        if !other.is_alive() {
            continue;
        }
        let position = player.position;
        let rammer_starred = player.is_starred();

        if within(position, other.position, contact) {
            if rammer_starred && !other.is_starred() {
                hit(state, other_id, HitCause::Ram, now, events);
            } else if let Some(blocked) = roll_block(state, other_id, rng) {
                if blocked {
                    events.push(CollisionEvent::HitBlocked {
                        player_id: other_id.clone(),
                    });
                } else {
                    hit(state, other_id, HitCause::Ram, now, events);
                }
            }
        }

        // Carried bananas, cubes and single shells hanging off the other car
        let Some(other) = state.players.get(other_id) else {
            continue;
        };
        let Some(trailing) = other.trailing_item else {
            continue;
        };
        if trailing.item_type.is_triple_shell() {
            continue;
        }
        let reach = trailing_hit_radius(trailing.item_type) + radius::CAR;
        if trailing_positions(other)
            .iter()
            .any(|&slot| within(position, slot, reach))
        {
            if let Some(other) = state.players.get_mut(other_id) {
                other.consume_trailing_unit();
            }
            if !rammer_starred {
                hit(state, player_id, HitCause::CarriedHazard, now, events);
            }
        }
    }
}

fn own_trailing_vs_shells(state: &mut GameState, player_id: &str, tombstones: &mut Tombstones) {
    for kind in [HazardKind::GreenShell, HazardKind::RedShell] {
        let Some(map) = state.shells(kind) else {
            continue;
        };
        for id in sorted_ids(map) {
            if tombstones.contains(&(kind, id)) {
                continue;
            }
            let (Some(player), Some(shell)) = (
                state.players.get(player_id),
                state.shells(kind).and_then(|m| m.get(&id)),
            ) else {
                continue;
            };
            let Some(trailing) = player.trailing_item else {
                return;
            };
            if shell.dropped_by == player_id && !shell.can_hit_owner {
                continue;
            }
            let reach = trailing_hit_radius(trailing.item_type) + radius::SHELL;
            if trailing_positions(player)
                .iter()
                .any(|&slot| within(slot, shell.position, reach))
            {
                tombstones.insert((kind, id));
                if let Some(player) = state.players.get_mut(player_id) {
                    player.consume_trailing_unit();
                }
            }
        }
    }
}

fn item_boxes(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    player_id: &str,
    now: Millis,
    events: &mut Vec<CollisionEvent>,
) {
    let Some(player) = state.players.get(player_id) else {
        return;
    };
    let reach = radius::CUBE + radius::CAR;
    let touched: Vec<ItemBoxId> = state
        .item_boxes()
        .iter()
        .filter(|b| within(player.position, b.position, reach))
        .map(|b| b.id)
        .collect();

    for item_box_id in touched {
        if state.collect_item_box(item_box_id).is_none() {
            continue;
        }
        scheduler.schedule(
            now + timing::ITEM_BOX_RESPAWN_MS,
            ScheduledTask::RespawnItemBox(item_box_id),
        );
        let roulette_started = handle_item_box_collection(state, scheduler, player_id, now);
        events.push(CollisionEvent::ItemBoxCollected {
            player_id: player_id.to_string(),
            item_box_id,
            roulette_started,
        });
    }
}

/// Run the full collision sweep for one tick
pub fn update<R: Rng + ?Sized>(
    state: &mut GameState,
    scheduler: &mut Scheduler,
    rng: &mut R,
    now: Millis,
) -> Vec<CollisionEvent> {
    let mut events = Vec::new();
    let mut tombstones = Tombstones::new();
    let order = state.sorted_player_ids();

    for player_id in &order {
        if !is_alive(state, player_id) {
            continue;
        }
        static_hazards(state, player_id, &mut tombstones, now, &mut events);
        shells(state, player_id, &mut tombstones, rng, now, &mut events);
        other_players(state, player_id, &order, rng, now, &mut events);
        own_trailing_vs_shells(state, player_id, &mut tombstones);
        item_boxes(state, scheduler, player_id, now, &mut events);
    }

    for (kind, id) in tombstones {
        state.remove_hazard(kind, id);
    }
    events
}
