//! Game state definitions and structures
//!
//! Contains all entities (players, hazards, item boxes) and the aggregate
//! store the simulation mutates.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::{player, radius, timing};
use crate::util::vec3::Vec3;

/// Player identifier, supplied by the connecting client
pub type PlayerId = String;

/// Identifier shared by every hazard kind
pub type EntityId = u64;

/// Item box identifier, assigned once at map load
pub type ItemBoxId = u32;

/// Simulation clock in milliseconds
pub type Millis = u64;

/// Power-ups handed out by item boxes, in draw order.
///
/// The declaration order is part of the weighted draw contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Banana,
    Boost,
    FakeCube,
    GreenShell,
    RedShell,
    ThreeRedShells,
    Star,
    ThreeBananas,
    ThreeGreenShells,
}

impl ItemType {
    pub const ALL: [ItemType; 9] = [
        ItemType::Banana,
        ItemType::Boost,
        ItemType::FakeCube,
        ItemType::GreenShell,
        ItemType::RedShell,
        ItemType::ThreeRedShells,
        ItemType::Star,
        ItemType::ThreeBananas,
        ItemType::ThreeGreenShells,
    ];

    /// Relative draw weight
    pub fn weight(self) -> f64 {
        match self {
            ItemType::Banana => 3.0,
            ItemType::Boost => 2.0,
            ItemType::FakeCube => 4.0,
            ItemType::GreenShell => 5.0,
            ItemType::RedShell => 3.0,
            ItemType::ThreeRedShells => 2.0,
            ItemType::Star => 1.0,
            ItemType::ThreeBananas => 4.0,
            ItemType::ThreeGreenShells => 3.0,
        }
    }

    pub fn total_weight() -> f64 {
        Self::ALL.iter().map(|t| t.weight()).sum()
    }

    /// Quantity placed in the item slot when the roulette lands on this type.
    /// Three red shells arrive as a single slot unit and only expand on use.
    pub fn roulette_quantity(self) -> u8 {
        match self {
            ItemType::ThreeBananas | ItemType::ThreeGreenShells => 3,
            _ => 1,
        }
    }

    /// Quantity of the trailing stack created when the item is activated
    pub fn trailing_quantity(self) -> u8 {
        if self.is_triple() {
            3
        } else {
            1
        }
    }

    pub fn is_triple(self) -> bool {
        matches!(
            self,
            ItemType::ThreeBananas | ItemType::ThreeGreenShells | ItemType::ThreeRedShells
        )
    }

    /// Triple shells orbit the car and can block incoming impacts
    pub fn is_triple_shell(self) -> bool {
        matches!(self, ItemType::ThreeGreenShells | ItemType::ThreeRedShells)
    }

    /// Hazard spawned by one unit of this item, if it is a hazard at all
    pub fn hazard_kind(self) -> Option<HazardKind> {
        match self {
            ItemType::Banana | ItemType::ThreeBananas => Some(HazardKind::Banana),
            ItemType::FakeCube => Some(HazardKind::FakeCube),
            ItemType::GreenShell | ItemType::ThreeGreenShells => Some(HazardKind::GreenShell),
            ItemType::RedShell | ItemType::ThreeRedShells => Some(HazardKind::RedShell),
            ItemType::Boost | ItemType::Star => None,
        }
    }
}

/// A `{type, quantity}` inventory slot; quantity 0 means empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSlot {
    pub item_type: ItemType,
    pub quantity: u8,
}

impl ItemSlot {
    pub fn new(item_type: ItemType, quantity: u8) -> Self {
        Self { item_type, quantity }
    }

    /// The canonical empty slot
    pub fn empty() -> Self {
        Self::new(ItemType::Banana, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }
}

impl Default for ItemSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Car color in HSL (hue in degrees, saturation and lightness in percent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HslColor {
    pub h: f32,
    pub s: f32,
    pub l: f32,
}

impl HslColor {
    pub fn new(h: f32, s: f32, l: f32) -> Self {
        Self { h, s, l }
    }

    pub fn is_valid(&self) -> bool {
        let in_range = |v: f32, max: f32| v.is_finite() && (0.0..=max).contains(&v);
        in_range(self.h, 360.0) && in_range(self.s, 100.0) && in_range(self.l, 100.0)
    }
}

impl Default for HslColor {
    fn default() -> Self {
        Self::new(0.0, 100.0, 50.0)
    }
}

/// Timed status effects. Each is active until its expiry time and is
/// cleared by the once-per-tick effect sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEffects {
    pub spin_until: Option<Millis>,
    pub boost_until: Option<Millis>,
    pub star_until: Option<Millis>,
}

/// Player state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: HslColor,
    pub position: Vec3,
    pub rotation: f32,
    pub speed: f32,
    pub lives: u8,
    pub item: ItemSlot,
    pub trailing_item: Option<ItemSlot>,
    /// Roulette in progress
    pub is_item_spinning: bool,
    pub effects: TimedEffects,
    pub last_update: Millis,
}

impl Player {
    pub fn new(id: PlayerId, name: String, color: HslColor, now: Millis) -> Self {
        Self {
            id,
            name,
            color,
            position: Vec3::ZERO,
            rotation: 0.0,
            speed: 0.0,
            lives: player::STARTING_LIVES,
            item: ItemSlot::empty(),
            trailing_item: None,
            is_item_spinning: false,
            effects: TimedEffects::default(),
            last_update: now,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lives > 0
    }

    pub fn is_spinning(&self) -> bool {
        self.effects.spin_until.is_some()
    }

    pub fn is_starred(&self) -> bool {
        self.effects.star_until.is_some()
    }

    pub fn is_boosted(&self) -> bool {
        self.effects.boost_until.is_some()
    }

    /// Currently carrying a triple green or red shell stack
    pub fn triple_shell_stack(&self) -> Option<u8> {
        self.trailing_item
            .filter(|t| t.item_type.is_triple_shell())
            .map(|t| t.quantity)
    }

    /// Remove one unit from the trailing stack, unsetting it at zero.
    /// Returns the type of the consumed unit.
    pub fn consume_trailing_unit(&mut self) -> Option<ItemType> {
        let trailing = self.trailing_item.as_mut()?;
        let item_type = trailing.item_type;
        trailing.quantity = trailing.quantity.saturating_sub(1);
        if trailing.quantity == 0 {
            self.trailing_item = None;
        }
        Some(item_type)
    }

    /// Damage rule. Returns false when the hit was ignored.
    pub fn apply_hit(&mut self, now: Millis) -> bool {
        if !self.is_alive() || self.is_spinning() || self.is_starred() {
            return false;
        }
        self.lives -= 1;
        self.item = ItemSlot::empty();
        self.effects.spin_until = Some(now + timing::SPIN_MS);
        true
    }
}

/// Hazard variants. Bananas and fake cubes sit still, shells travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HazardKind {
    Banana,
    FakeCube,
    GreenShell,
    RedShell,
}

impl HazardKind {
    pub fn radius(self) -> f32 {
        match self {
            HazardKind::Banana => radius::BANANA,
            HazardKind::FakeCube => radius::CUBE,
            HazardKind::GreenShell | HazardKind::RedShell => radius::SHELL,
        }
    }

    pub fn is_shell(self) -> bool {
        matches!(self, HazardKind::GreenShell | HazardKind::RedShell)
    }
}

/// Banana or fake cube lying on the track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticHazard {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: f32,
    pub dropped_by: PlayerId,
    pub dropped_at: Millis,
}

/// Self-propelled shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shell {
    pub id: EntityId,
    pub position: Vec3,
    /// Direction of travel
    pub rotation: f32,
    pub speed: f32,
    pub dropped_by: PlayerId,
    pub dropped_at: Millis,
    pub vertical_velocity: f32,
    /// Set once the arming delay has elapsed
    pub can_hit_owner: bool,
}

impl Shell {
    pub fn age(&self, now: Millis) -> Millis {
        now.saturating_sub(self.dropped_at)
    }

    /// Whether this shell may damage `victim`
    pub fn can_hit(&self, victim: &str) -> bool {
        self.can_hit_owner || self.dropped_by != victim
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemBox {
    pub id: ItemBoxId,
    pub position: Vec3,
}

/// Aggregate root for everything the simulation owns
#[derive(Debug, Clone, Default)]
pub struct GameState {
    pub players: HashMap<PlayerId, Player>,
    pub bananas: HashMap<EntityId, StaticHazard>,
    pub fake_cubes: HashMap<EntityId, StaticHazard>,
    pub green_shells: HashMap<EntityId, Shell>,
    pub red_shells: HashMap<EntityId, Shell>,
    item_boxes: Vec<ItemBox>,
    pending_item_boxes: HashMap<ItemBoxId, ItemBox>,
    next_entity_id: EntityId,
}

impl GameState {
    /// Seed the arena with item boxes, ids assigned in order
    pub fn new(item_box_positions: &[Vec3]) -> Self {
        let item_boxes = item_box_positions
            .iter()
            .enumerate()
            .map(|(i, &position)| ItemBox {
                id: i as ItemBoxId,
                position,
            })
            .collect();
        Self {
            item_boxes,
            next_entity_id: 1,
            ..Default::default()
        }
    }

    pub fn next_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Player ids in stable order
    pub fn sorted_player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn static_hazards(&self, kind: HazardKind) -> Option<&HashMap<EntityId, StaticHazard>> {
        match kind {
            HazardKind::Banana => Some(&self.bananas),
            HazardKind::FakeCube => Some(&self.fake_cubes),
            _ => None,
        }
    }

    pub fn static_hazards_mut(
        &mut self,
        kind: HazardKind,
    ) -> Option<&mut HashMap<EntityId, StaticHazard>> {
        match kind {
            HazardKind::Banana => Some(&mut self.bananas),
            HazardKind::FakeCube => Some(&mut self.fake_cubes),
            _ => None,
        }
    }

    pub fn shells(&self, kind: HazardKind) -> Option<&HashMap<EntityId, Shell>> {
        match kind {
            HazardKind::GreenShell => Some(&self.green_shells),
            HazardKind::RedShell => Some(&self.red_shells),
            _ => None,
        }
    }

    pub fn shells_mut(&mut self, kind: HazardKind) -> Option<&mut HashMap<EntityId, Shell>> {
        match kind {
            HazardKind::GreenShell => Some(&mut self.green_shells),
            HazardKind::RedShell => Some(&mut self.red_shells),
            _ => None,
        }
    }

    /// Remove a hazard of any kind. Returns false if it was already gone.
    pub fn remove_hazard(&mut self, kind: HazardKind, id: EntityId) -> bool {
        match kind {
            HazardKind::Banana => self.bananas.remove(&id).is_some(),
            HazardKind::FakeCube => self.fake_cubes.remove(&id).is_some(),
            HazardKind::GreenShell => self.green_shells.remove(&id).is_some(),
            HazardKind::RedShell => self.red_shells.remove(&id).is_some(),
        }
    }

    pub fn contains_hazard(&self, kind: HazardKind, id: EntityId) -> bool {
        match kind {
            HazardKind::Banana => self.bananas.contains_key(&id),
            HazardKind::FakeCube => self.fake_cubes.contains_key(&id),
            HazardKind::GreenShell => self.green_shells.contains_key(&id),
            HazardKind::RedShell => self.red_shells.contains_key(&id),
        }
    }

    pub fn hazard_count(&self) -> usize {
        self.bananas.len() + self.fake_cubes.len() + self.green_shells.len() + self.red_shells.len()
    }

    /// Look up a shell without knowing its color
    pub fn shell_mut(&mut self, id: EntityId) -> Option<&mut Shell> {
        if let Some(shell) = self.green_shells.get_mut(&id) {
            return Some(shell);
        }
        self.red_shells.get_mut(&id)
    }

    /// Active item boxes
    pub fn item_boxes(&self) -> &[ItemBox] {
        &self.item_boxes
    }

    pub fn pending_item_box_count(&self) -> usize {
        self.pending_item_boxes.len()
    }

    /// Move an active box to the pending set. None if it is not active.
    pub fn collect_item_box(&mut self, id: ItemBoxId) -> Option<ItemBox> {
        let index = self.item_boxes.iter().position(|b| b.id == id)?;
        let item_box = self.item_boxes.swap_remove(index);
        self.pending_item_boxes.insert(id, item_box);
        Some(item_box)
    }

    /// Return a pending box to the active set. False if it was not pending.
    pub fn respawn_item_box(&mut self, id: ItemBoxId) -> bool {
        match self.pending_item_boxes.remove(&id) {
            Some(item_box) => {
                self.item_boxes.push(item_box);
                true
            }
            None => false,
        }
    }
}
