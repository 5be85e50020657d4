//! Authoritative game loop: owns the state, the delay queue, the RNG and the
//! terrain, applies session events and advances the simulation clock.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::constants::{physics, player};
use crate::game::items::{self, UseOutcome};
use crate::game::scheduler::{ScheduledTask, Scheduler};
use crate::game::state::{EntityId, GameState, HazardKind, HslColor, ItemBoxId, ItemType, Millis, Player, PlayerId};
use crate::game::systems::collision::{self, CollisionEvent};
use crate::game::systems::shells::{self, ShellReport};
use crate::game::terrain::Terrain;
use crate::util::vec3::Vec3;

/// Rejections for session events. The game state is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Player id {0} is already connected")]
    IdInUse(PlayerId),
    #[error("Unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("Invalid name")]
    InvalidName,
    #[error("Invalid color")]
    InvalidColor,
    #[error("Invalid position")]
    InvalidPosition,
}

/// Identity presented by a connecting client
#[derive(Debug, Clone)]
pub struct PlayerIdentity {
    pub id: PlayerId,
    pub name: String,
    pub color: HslColor,
}

/// Things that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum GameLoopEvent {
    Collision(CollisionEvent),
    ItemAssigned { player_id: PlayerId, item_type: ItemType },
    ItemBoxRespawned(ItemBoxId),
    HazardExpired { kind: HazardKind, id: EntityId },
    ShellsRemoved(ShellReport),
    PlayerTimedOut(PlayerId),
}

impl GameLoopEvent {
    /// Events that change who is in the game and warrant an immediate snapshot
    pub fn is_structural(&self) -> bool {
        matches!(self, GameLoopEvent::PlayerTimedOut(_))
    }
}

/// Trim and check a display name
pub fn validate_name(name: &str) -> Result<String, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.chars().count() > player::MAX_NAME_LENGTH
        || trimmed.chars().any(|c| c.is_control())
    {
        return Err(SessionError::InvalidName);
    }
    Ok(trimmed.to_string())
}

pub struct GameLoop {
    state: GameState,
    scheduler: Scheduler,
    rng: StdRng,
    terrain: Box<dyn Terrain>,
    config: GameConfig,
    tick: u64,
    now: Millis,
}

impl GameLoop {
    pub fn new(terrain: Box<dyn Terrain>, config: GameConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = GameState::new(&terrain.item_box_positions());
        info!("Game loop created with {} item boxes", state.item_boxes().len());
        Self {
            state,
            scheduler: Scheduler::new(),
            rng,
            terrain,
            config,
            tick: 0,
            now: 0,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn player_count(&self) -> usize {
        self.state.player_count()
    }

    /// Add a player. An empty id is replaced with a fresh one.
    pub fn connect(&mut self, identity: PlayerIdentity) -> Result<(PlayerId, HslColor), SessionError> {
        let id = if identity.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            identity.id
        };
        if self.state.players.contains_key(&id) {
            return Err(SessionError::IdInUse(id));
        }
        let player = Player::new(id.clone(), identity.name, identity.color, self.now);
        info!("Player {} ({}) joined", player.name, id);
        self.state.players.insert(id.clone(), player);
        Ok((id, identity.color))
    }

    pub fn disconnect(&mut self, player_id: &str) -> bool {
        let removed = self.state.players.remove(player_id).is_some();
        if removed {
            info!("Player {} left", player_id);
        }
        removed
    }

    /// Client-authoritative movement
    pub fn update_position(
        &mut self,
        player_id: &str,
        position: Vec3,
        rotation: f32,
        speed: f32,
    ) -> Result<(), SessionError> {
        if !position.is_finite() || !rotation.is_finite() || !speed.is_finite() {
            return Err(SessionError::InvalidPosition);
        }
        let player = self
            .state
            .players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::UnknownPlayer(player_id.to_string()))?;
        player.position = position;
        player.rotation = rotation;
        player.speed = speed;
        player.last_update = self.now;
        Ok(())
    }

    pub fn use_item(&mut self, player_id: &str) -> UseOutcome {
        let outcome = items::use_item(
            &mut self.state,
            &mut self.scheduler,
            self.terrain.as_ref(),
            player_id,
            self.now,
        );
        if outcome != UseOutcome::Nothing {
            debug!("Player {} used item: {:?}", player_id, outcome);
        }
        outcome
    }

    /// Client-side banana report. Collision authority stays with the server.
    pub fn hit_banana(&self, player_id: &str, banana_id: EntityId) {
        debug!("Player {} reports hitting banana {}", player_id, banana_id);
    }

    pub fn change_color(&mut self, player_id: &str, color: HslColor) -> Result<(), SessionError> {
        if !color.is_valid() {
            return Err(SessionError::InvalidColor);
        }
        let player = self
            .state
            .players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::UnknownPlayer(player_id.to_string()))?;
        player.color = color;
        Ok(())
    }

    pub fn change_name(&mut self, player_id: &str, name: &str) -> Result<(), SessionError> {
        let name = validate_name(name)?;
        let player = self
            .state
            .players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::UnknownPlayer(player_id.to_string()))?;
        player.name = name;
        Ok(())
    }

    /// Advance the clock by one tick: due tasks, effect expiry, shell
    /// physics, collisions, then the idle sweep.
    pub fn tick(&mut self) -> Vec<GameLoopEvent> {
        self.tick += 1;
        self.now = self.tick * 1000 / physics::TICK_RATE as u64;
        let now = self.now;

        let mut events = Vec::new();
        self.run_due_tasks(now, &mut events);
        self.expire_effects(now);

        let report = shells::update(&mut self.state, self.terrain.as_ref(), now, physics::DT);
        if report.expired + report.destroyed > 0 {
            events.push(GameLoopEvent::ShellsRemoved(report));
        }

        events.extend(
            collision::update(&mut self.state, &mut self.scheduler, &mut self.rng, now)
                .into_iter()
                .map(GameLoopEvent::Collision),
        );

        self.sweep_idle(now, &mut events);
        events
    }

    fn run_due_tasks(&mut self, now: Millis, events: &mut Vec<GameLoopEvent>) {
        while let Some(task) = self.scheduler.pop_due(now) {
            match task {
                ScheduledTask::RespawnItemBox(id) => {
                    if self.state.respawn_item_box(id) {
                        events.push(GameLoopEvent::ItemBoxRespawned(id));
                    }
                }
                ScheduledTask::FinishRoulette(player_id) => {
                    if let Some(item_type) = items::finish_roulette(&mut self.state, &player_id, &mut self.rng) {
                        events.push(GameLoopEvent::ItemAssigned { player_id, item_type });
                    }
                }
                ScheduledTask::ExpireHazard { kind, id } => {
                    if self.state.remove_hazard(kind, id) {
                        events.push(GameLoopEvent::HazardExpired { kind, id });
                    }
                }
                ScheduledTask::ArmShell(id) => {
                    if let Some(shell) = self.state.shell_mut(id) {
                        shell.can_hit_owner = true;
                    }
                }
            }
        }
    }

    fn expire_effects(&mut self, now: Millis) {
        let expired = |until: Option<Millis>| until.is_some_and(|t| t <= now);
        let reset_on_star = self.config.star_expiry_resets_effects;

        for player in self.state.players.values_mut() {
            let effects = &mut player.effects;
            if expired(effects.spin_until) {
                effects.spin_until = None;
            }
            if expired(effects.boost_until) {
                effects.boost_until = None;
            }
            if expired(effects.star_until) {
                effects.star_until = None;
                if reset_on_star {
                    effects.spin_until = None;
                    effects.boost_until = None;
                    player.is_item_spinning = false;
                }
            }
        }
    }

    fn sweep_idle(&mut self, now: Millis, events: &mut Vec<GameLoopEvent>) {
        let timeout = self.config.idle_timeout_ms;
        let idle: Vec<PlayerId> = self
            .state
            .players
            .values()
            .filter(|p| now.saturating_sub(p.last_update) > timeout)
            .map(|p| p.id.clone())
            .collect();
        for player_id in idle {
            self.state.players.remove(&player_id);
            info!("Player {} timed out", player_id);
            events.push(GameLoopEvent::PlayerTimedOut(player_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::timing;
    use crate::game::state::ItemSlot;
    use crate::game::terrain::FlatTerrain;

    fn test_config() -> GameConfig {
        GameConfig {
            rng_seed: Some(1234),
            ..GameConfig::default()
        }
    }

    fn game_with_boxes(boxes: Vec<Vec3>) -> GameLoop {
        GameLoop::new(
            Box::new(FlatTerrain::new(0.0).with_item_boxes(boxes)),
            test_config(),
        )
    }

    fn join(game: &mut GameLoop, id: &str) -> PlayerId {
        game.connect(PlayerIdentity {
            id: id.into(),
            name: id.into(),
            color: HslColor::new(120.0, 80.0, 50.0),
        })
        .unwrap()
        .0
    }

    /// Keep a player alive past the idle timeout
    fn touch(game: &mut GameLoop, id: &str) {
        let p = &game.state().players[id];
        let (pos, rot) = (p.position, p.rotation);
        game.update_position(id, pos, rot, 0.0).unwrap();
    }

    #[test]
    fn test_connect_defaults() {
        let mut game = game_with_boxes(vec![]);
        let (id, color) = game
            .connect(PlayerIdentity {
                id: "abc".into(),
                name: "Mario".into(),
                color: HslColor::new(10.0, 20.0, 30.0),
            })
            .unwrap();
        assert_eq!(id, "abc");
        assert_eq!(color, HslColor::new(10.0, 20.0, 30.0));
        let p = &game.state().players["abc"];
        assert_eq!(p.lives, 3);
        assert!(p.item.is_empty());
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn test_connect_duplicate_and_generated_ids() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        let dup = game.connect(PlayerIdentity {
            id: "a".into(),
            name: "again".into(),
            color: HslColor::default(),
        });
        assert_eq!(dup, Err(SessionError::IdInUse("a".into())));

        let generated = join(&mut game, "");
        assert!(!generated.is_empty());
        assert_eq!(game.player_count(), 2);
    }

    #[test]
    fn test_change_name_and_color() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");

        assert!(game.change_name("a", "  Luigi  ").is_ok());
        assert_eq!(game.state().players["a"].name, "Luigi");

        assert_eq!(game.change_name("a", "   "), Err(SessionError::InvalidName));
        assert_eq!(
            game.change_name("a", &"x".repeat(21)),
            Err(SessionError::InvalidName)
        );
        assert_eq!(game.change_name("a", "bad\nname"), Err(SessionError::InvalidName));
        assert_eq!(game.state().players["a"].name, "Luigi");

        assert_eq!(
            game.change_color("a", HslColor::new(400.0, 0.0, 0.0)),
            Err(SessionError::InvalidColor)
        );
        assert_eq!(game.state().players["a"].color, HslColor::new(120.0, 80.0, 50.0));
        assert!(game.change_color("a", HslColor::new(200.0, 50.0, 50.0)).is_ok());

        assert!(matches!(
            game.change_name("ghost", "Name"),
            Err(SessionError::UnknownPlayer(_))
        ));
    }

    #[test]
    fn test_update_position_rejects_non_finite() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        assert_eq!(
            game.update_position("a", Vec3::new(f32::NAN, 0.0, 0.0), 0.0, 0.0),
            Err(SessionError::InvalidPosition)
        );
        assert_eq!(game.state().players["a"].position, Vec3::ZERO);
    }

    #[test]
    fn test_idle_timeout() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "idle");
        join(&mut game, "active");

        let mut timed_out = Vec::new();
        while game.now() <= timing::IDLE_TIMEOUT_MS + 100 {
            touch(&mut game, "active");
            for event in game.tick() {
                if let GameLoopEvent::PlayerTimedOut(id) = event {
                    timed_out.push((id, game.now()));
                }
            }
        }
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].0, "idle");
        assert!(timed_out[0].1 > timing::IDLE_TIMEOUT_MS);
        assert!(game.state().players.contains_key("active"));
    }

    #[test]
    fn test_item_box_respawn_timing() {
        let mut boxes: Vec<Vec3> = (0..8).map(|i| Vec3::new(100.0 + i as f32 * 10.0, 0.0, 0.0)).collect();
        boxes[7] = Vec3::new(0.0, 0.0, 0.0);
        let mut game = game_with_boxes(boxes);
        join(&mut game, "a");

        game.tick();
        let collected_at = game.now();
        assert!(game.state().item_boxes().iter().all(|b| b.id != 7));

        // Drive away so the box is not immediately re-collected
        game.update_position("a", Vec3::new(-50.0, 0.0, 0.0), 0.0, 0.0).unwrap();

        let mut respawned_at = None;
        while respawned_at.is_none() {
            touch(&mut game, "a");
            for event in game.tick() {
                if event == GameLoopEvent::ItemBoxRespawned(7) {
                    respawned_at = Some(game.now());
                }
            }
            if respawned_at.is_none() {
                assert!(game.state().item_boxes().iter().all(|b| b.id != 7));
            }
        }
        let respawned_at = respawned_at.unwrap();
        assert!(respawned_at >= collected_at + timing::ITEM_BOX_RESPAWN_MS);
        assert!(respawned_at < collected_at + timing::ITEM_BOX_RESPAWN_MS + 17);
        let b = game.state().item_boxes().iter().find(|b| b.id == 7).unwrap();
        assert_eq!(b.position, Vec3::ZERO);
    }

    #[test]
    fn test_roulette_assigns_item_after_delay() {
        let mut game = game_with_boxes(vec![Vec3::ZERO]);
        join(&mut game, "a");
        game.tick();
        let started = game.now();
        assert!(game.state().players["a"].is_item_spinning);
        game.update_position("a", Vec3::new(-50.0, 0.0, 0.0), 0.0, 0.0).unwrap();

        let mut assigned_at = None;
        while assigned_at.is_none() {
            for event in game.tick() {
                if let GameLoopEvent::ItemAssigned { player_id, .. } = event {
                    assert_eq!(player_id, "a");
                    assigned_at = Some(game.now());
                }
            }
        }
        assert!(assigned_at.unwrap() >= started + timing::ROULETTE_MS);
        let p = &game.state().players["a"];
        assert!(!p.is_item_spinning);
        assert!(p.item.quantity >= 1);
    }

    #[test]
    fn test_shell_arms_after_delay() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        game.update_position("a", Vec3::ZERO, 0.0, 0.0).unwrap();
        game.state_mut().players.get_mut("a").unwrap().trailing_item =
            Some(ItemSlot::new(ItemType::GreenShell, 1));
        let UseOutcome::Spawned(HazardKind::GreenShell, id) = game.use_item("a") else {
            panic!("expected a green shell");
        };
        let fired_at = game.now();
        assert!(!game.state().green_shells[&id].can_hit_owner);

        while game.now() < fired_at + timing::SHELL_ARMING_MS {
            assert!(!game.state().green_shells[&id].can_hit_owner);
            game.tick();
        }
        assert!(game.state().green_shells[&id].can_hit_owner);
    }

    #[test]
    fn test_banana_expires() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        game.state_mut().players.get_mut("a").unwrap().trailing_item =
            Some(ItemSlot::new(ItemType::Banana, 1));
        game.use_item("a");
        game.disconnect("a");
        assert_eq!(game.state().bananas.len(), 1);
        // Owner left, the banana stays and still names its dropper
        assert_eq!(game.state().bananas.values().next().unwrap().dropped_by, "a");

        let mut expired = false;
        while game.now() < timing::HAZARD_LIFETIME_MS + 100 {
            if game
                .tick()
                .iter()
                .any(|e| matches!(e, GameLoopEvent::HazardExpired { kind: HazardKind::Banana, .. }))
            {
                expired = true;
                assert!(game.now() >= timing::HAZARD_LIFETIME_MS);
            }
        }
        assert!(expired);
        assert!(game.state().bananas.is_empty());
    }

    #[test]
    fn test_hit_banana_is_informational() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        game.hit_banana("a", 99);
        assert_eq!(game.state().players["a"].lives, 3);
    }

    #[test]
    fn test_effects_expire_on_tick() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        game.state_mut().players.get_mut("a").unwrap().item = ItemSlot::new(ItemType::Boost, 1);
        assert_eq!(game.use_item("a"), UseOutcome::Boost);
        while game.now() < timing::BOOST_MS {
            assert!(game.state().players["a"].is_boosted());
            game.tick();
        }
        assert!(!game.state().players["a"].is_boosted());
    }

    fn star_then_spin(resets: bool) -> bool {
        let config = GameConfig {
            star_expiry_resets_effects: resets,
            ..test_config()
        };
        let mut game = GameLoop::new(Box::new(FlatTerrain::new(0.0)), config);
        join(&mut game, "a");
        game.state_mut().players.get_mut("a").unwrap().item = ItemSlot::new(ItemType::Star, 1);
        game.use_item("a");

        // Ride out most of the star, then get a spin that outlasts it
        while game.now() < timing::STAR_MS - 100 {
            touch(&mut game, "a");
            game.tick();
        }
        let now = game.now();
        game.state_mut().players.get_mut("a").unwrap().effects.spin_until = Some(now + 2_000);
        while game.state().players["a"].is_starred() {
            game.tick();
        }
        game.state().players["a"].is_spinning()
    }

    #[test]
    fn test_star_expiry_resets_spin_by_default() {
        assert!(!star_then_spin(true));
    }

    #[test]
    fn test_star_expiry_can_leave_spin_alone() {
        assert!(star_then_spin(false));
    }

    #[test]
    fn test_lives_monotonic_over_play() {
        let mut game = game_with_boxes(vec![]);
        join(&mut game, "a");
        join(&mut game, "b");
        game.update_position("b", Vec3::new(0.0, 0.0, 10.0), 0.0, 0.0).unwrap();
        let mut last = 3;
        for _ in 0..20 {
            game.state_mut().players.get_mut("b").unwrap().trailing_item =
                Some(ItemSlot::new(ItemType::GreenShell, 1));
            let rotation = std::f32::consts::PI;
            game.update_position("b", Vec3::new(0.0, 0.0, 10.0), rotation, 0.0).unwrap();
            touch(&mut game, "a");
            game.use_item("b");
            for _ in 0..120 {
                game.tick();
                let lives = game.state().players["a"].lives;
                assert!(lives <= last);
                last = lives;
            }
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_single_shell_rarely_beats_full_stack() {
        let trials = 300;
        let mut damaged = 0;
        for seed in 0..trials {
            let mut game = GameLoop::new(
                Box::new(FlatTerrain::new(0.0)),
                GameConfig {
                    rng_seed: Some(seed),
                    ..GameConfig::default()
                },
            );
            join(&mut game, "a");
            game.state_mut().players.get_mut("a").unwrap().trailing_item =
                Some(ItemSlot::new(ItemType::ThreeGreenShells, 3));

            let now = game.now();
            let state = game.state_mut();
            let id = state.next_entity_id();
            state.green_shells.insert(
                id,
                crate::game::state::Shell {
                    id,
                    position: Vec3::new(0.0, 0.0, 4.0),
                    rotation: std::f32::consts::PI,
                    speed: player::SHELL_SPEED,
                    dropped_by: "enemy".into(),
                    dropped_at: now,
                    vertical_velocity: 0.0,
                    can_hit_owner: true,
                },
            );

            for _ in 0..60 {
                game.tick();
            }
            let a = &game.state().players["a"];
            assert!(game.state().green_shells.is_empty());
            assert_eq!(a.trailing_item.map(|t| t.quantity), Some(2));
            if a.lives < 3 {
                damaged += 1;
            }
        }
        let rate = damaged as f64 / trials as f64;
        assert!(rate < 0.2, "single shell damage rate {}", rate);
    }
}
