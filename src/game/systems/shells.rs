//! Shell physics: aging, hazard-vs-hazard contact, planar travel, red shell
//! homing and terrain resolution (gravity, landing, wall bounce).

use hashbrown::HashSet;
use std::f32::consts::{PI, TAU};

use crate::game::constants::physics::{GRAVITY, LANDING_EPSILON, OBSTACLE_CLEARANCE, TERMINAL_VELOCITY};
use crate::game::constants::{radius, timing};
use crate::game::state::{EntityId, GameState, HazardKind, Millis, Shell};
use crate::game::terrain::{sample_or_flat, Obstacle, Terrain};
use crate::util::vec3::Vec3;

/// What happened to shells during one physics pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellReport {
    pub expired: usize,
    pub destroyed: usize,
    pub bananas_destroyed: usize,
    pub bounces: usize,
}

/// Wrap an angle into (-PI, PI]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Yaw toward the nearest living player other than the shell's owner
fn homing_rotation(state: &GameState, shell: &Shell) -> Option<f32> {
    state
        .players
        .values()
        .filter(|p| p.is_alive() && p.id != shell.dropped_by)
        .min_by(|a, b| {
            let da = shell.position.planar_distance_sq_to(a.position);
            let db = shell.position.planar_distance_sq_to(b.position);
            da.total_cmp(&db)
        })
        .map(|target| shell.position.yaw_to(target.position))
}

/// Reflect off the obstacle face with the smaller penetration and push the
/// shell back out to that face
fn bounce(position: &mut Vec3, rotation: &mut f32, obstacle: &Obstacle) {
    let half = obstacle.half_extent();
    let center = obstacle.position;
    let dx = position.x - center.x;
    let dz = position.z - center.z;
    let reach_x = half.x + radius::SHELL;
    let reach_z = half.z + radius::SHELL;
    let penetration_x = reach_x - dx.abs();
    let penetration_z = reach_z - dz.abs();

    if penetration_x < penetration_z {
        *rotation = wrap_angle(-*rotation);
        position.x = center.x + reach_x.copysign(dx);
    } else {
        *rotation = wrap_angle(PI - *rotation);
        position.z = center.z + reach_z.copysign(dz);
    }
}

enum Step {
    Keep(Shell),
    Destroy,
}

/// Advance one shell. Hazard contacts are handled by the caller.
fn integrate(
    state: &GameState,
    terrain: &dyn Terrain,
    kind: HazardKind,
    mut shell: Shell,
    now: Millis,
    dt: f32,
    report: &mut ShellReport,
) -> Step {
    if kind == HazardKind::RedShell && shell.age(now) > timing::HOMING_DELAY_MS {
        if let Some(rotation) = homing_rotation(state, &shell) {
            shell.rotation = rotation;
        }
    }

    let travel = Vec3::from_yaw(shell.rotation) * (shell.speed * dt);
    let mut position = shell.position + travel;

    let sample = sample_or_flat(terrain, position.x, position.z, shell.position.y);
    let diff = sample.height - position.y;

    if diff.abs() <= LANDING_EPSILON {
        position.y = sample.height;
        shell.vertical_velocity = 0.0;
    } else if diff < 0.0 {
        shell.vertical_velocity = (shell.vertical_velocity + GRAVITY * dt).max(TERMINAL_VELOCITY);
        position.y = (position.y + shell.vertical_velocity * dt).max(sample.height);
        if position.y <= sample.height {
            shell.vertical_velocity = 0.0;
        }
    } else {
        match sample.obstacle {
            Some(obstacle) if position.y < obstacle.top() - OBSTACLE_CLEARANCE => {
                if kind == HazardKind::RedShell {
                    return Step::Destroy;
                }
                bounce(&mut position, &mut shell.rotation, &obstacle);
                report.bounces += 1;
            }
            _ => {
                position.y = sample.height;
                shell.vertical_velocity = 0.0;
            }
        }
    }

    shell.position = position;
    Step::Keep(shell)
}

/// Run one physics pass over every shell. Removals are applied after the
/// whole pass.
pub fn update(state: &mut GameState, terrain: &dyn Terrain, now: Millis, dt: f32) -> ShellReport {
    let mut report = ShellReport::default();
    let mut doomed: HashSet<(HazardKind, EntityId)> = HashSet::new();
    let mut doomed_bananas: HashSet<EntityId> = HashSet::new();
    let contact_sq = (2.0 * radius::SHELL) * (2.0 * radius::SHELL);
    let banana_sq = radius::SHELL * radius::SHELL;

    let mut order: Vec<(HazardKind, EntityId)> = Vec::with_capacity(
        state.green_shells.len() + state.red_shells.len(),
    );
    for kind in [HazardKind::GreenShell, HazardKind::RedShell] {
        if let Some(map) = state.shells(kind) {
            let mut ids: Vec<EntityId> = map.keys().copied().collect();
            ids.sort_unstable();
            order.extend(ids.into_iter().map(|id| (kind, id)));
        }
    }

    for (kind, id) in order {
        if doomed.contains(&(kind, id)) {
            continue;
        }
        let Some(shell) = state.shells(kind).and_then(|m| m.get(&id)).cloned() else {
            continue;
        };

        if shell.age(now) > timing::SHELL_LIFETIME_MS {
            doomed.insert((kind, id));
            report.expired += 1;
            continue;
        }

        let banana = state
            .bananas
            .values()
            .find(|b| !doomed_bananas.contains(&b.id) && b.position.distance_sq_to(shell.position) < banana_sq)
            .map(|b| b.id);
        if let Some(banana_id) = banana {
            doomed_bananas.insert(banana_id);
            doomed.insert((kind, id));
            report.destroyed += 1;
            report.bananas_destroyed += 1;
            continue;
        }

        if kind == HazardKind::RedShell {
            let green_hit = state
                .green_shells
                .values()
                .find(|g| {
                    !doomed.contains(&(HazardKind::GreenShell, g.id))
                        && g.position.distance_sq_to(shell.position) < contact_sq
                })
                .map(|g| (HazardKind::GreenShell, g.id));
            let other = green_hit.or_else(|| {
                state
                    .red_shells
                    .values()
                    .find(|r| {
                        r.id != id
                            && !doomed.contains(&(HazardKind::RedShell, r.id))
                            && r.position.distance_sq_to(shell.position) < contact_sq
                    })
                    .map(|r| (HazardKind::RedShell, r.id))
            });
            if let Some(other) = other {
                doomed.insert(other);
                doomed.insert((kind, id));
                report.destroyed += 2;
                continue;
            }
        }

        match integrate(state, terrain, kind, shell, now, dt, &mut report) {
            Step::Keep(updated) => {
                if let Some(slot) = state.shells_mut(kind).and_then(|m| m.get_mut(&id)) {
                    *slot = updated;
                }
            }
            Step::Destroy => {
                doomed.insert((kind, id));
                report.destroyed += 1;
            }
        }
    }

    for (kind, id) in doomed {
        state.remove_hazard(kind, id);
    }
    for id in doomed_bananas {
        state.bananas.remove(&id);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::physics::DT;
    use crate::game::state::{HslColor, Player, StaticHazard};
    use crate::game::terrain::{BlockTerrain, FlatTerrain};
    use std::f32::consts::FRAC_PI_2;

    fn shell(id: EntityId, position: Vec3, rotation: f32, dropped_at: Millis) -> Shell {
        Shell {
            id,
            position,
            rotation,
            speed: 16.0,
            dropped_by: "owner".into(),
            dropped_at,
            vertical_velocity: 0.0,
            can_hit_owner: true,
        }
    }

    fn banana(id: EntityId, position: Vec3) -> StaticHazard {
        StaticHazard {
            id,
            position,
            rotation: 0.0,
            dropped_by: "owner".into(),
            dropped_at: 0,
        }
    }

    fn add_player(state: &mut GameState, id: &str, position: Vec3) {
        let mut p = Player::new(id.into(), id.into(), HslColor::default(), 0);
        p.position = position;
        state.players.insert(id.into(), p);
    }

    fn wall_terrain() -> BlockTerrain {
        BlockTerrain::from_json_str(
            r#"{ "blocks": [ { "min": { "x": 10.0, "y": 0.0, "z": -5.0 }, "max": { "x": 12.0, "y": 3.0, "z": 5.0 } } ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(-FRAC_PI_2) + FRAC_PI_2).abs() < 1e-6);
        assert!((wrap_angle(TAU + 0.5) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_old_shell_removed_without_side_effects() {
        let mut state = GameState::new(&[]);
        let now = 20_000;
        state.green_shells.insert(1, shell(1, Vec3::ZERO, 0.0, now - 10_001));
        state.bananas.insert(2, banana(2, Vec3::ZERO));

        let report = update(&mut state, &FlatTerrain::new(0.0), now, DT);
        assert_eq!(report.expired, 1);
        assert!(state.green_shells.is_empty());
        assert_eq!(state.bananas.len(), 1);
    }

    #[test]
    fn test_shell_and_banana_destroy_each_other() {
        let mut state = GameState::new(&[]);
        state.red_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        state.bananas.insert(2, banana(2, Vec3::new(0.3, 0.0, 0.0)));

        update(&mut state, &FlatTerrain::new(0.0), 100, DT);
        assert!(state.red_shells.is_empty());
        assert!(state.bananas.is_empty());
    }

    #[test]
    fn test_red_shell_destroys_green_and_red() {
        let mut state = GameState::new(&[]);
        state.red_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        state.green_shells.insert(2, shell(2, Vec3::new(0.5, 0.0, 0.0), 0.0, 0));
        state.red_shells.insert(3, shell(3, Vec3::new(50.0, 0.0, 0.0), 0.0, 0));
        state.red_shells.insert(4, shell(4, Vec3::new(50.5, 0.0, 0.0), 0.0, 0));

        update(&mut state, &FlatTerrain::new(0.0), 100, DT);
        assert!(state.green_shells.is_empty());
        assert!(state.red_shells.is_empty());
    }

    #[test]
    fn test_green_shells_pass_through_each_other() {
        let mut state = GameState::new(&[]);
        state.green_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        state.green_shells.insert(2, shell(2, Vec3::new(0.5, 0.0, 0.0), 0.0, 0));

        update(&mut state, &FlatTerrain::new(0.0), 100, DT);
        assert_eq!(state.green_shells.len(), 2);
    }

    #[test]
    fn test_planar_movement() {
        let mut state = GameState::new(&[]);
        state.green_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        update(&mut state, &FlatTerrain::new(0.0), 100, DT);
        let s = &state.green_shells[&1];
        assert!(s.position.approx_eq(Vec3::new(0.0, 0.0, 16.0 * DT), 1e-5));
    }

    #[test]
    fn test_red_shell_homes_on_current_position() {
        let mut state = GameState::new(&[]);
        add_player(&mut state, "owner", Vec3::new(0.0, 0.0, 1.0));
        add_player(&mut state, "target", Vec3::new(20.0, 0.0, 0.0));
        state.red_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        let terrain = FlatTerrain::new(0.0);

        update(&mut state, &terrain, 600, DT);
        let r = state.red_shells[&1].rotation;
        assert!((r - FRAC_PI_2).abs() < 1e-4, "rotation {}", r);

        // Target moves; the next tick re-aims at where it is now
        state.players.get_mut("target").unwrap().position = Vec3::new(0.0, 0.0, -20.0);
        update(&mut state, &terrain, 617, DT);
        let s = &state.red_shells[&1];
        let expected = s.position.yaw_to(Vec3::new(0.0, 0.0, -20.0));
        assert!((s.rotation.abs() - PI).abs() < 0.05);
        assert!((wrap_angle(s.rotation - expected)).abs() < 0.05);
    }

    #[test]
    fn test_young_red_shell_flies_straight() {
        let mut state = GameState::new(&[]);
        add_player(&mut state, "target", Vec3::new(20.0, 0.0, 0.0));
        state.red_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));
        update(&mut state, &FlatTerrain::new(0.0), 400, DT);
        assert_eq!(state.red_shells[&1].rotation, 0.0);
    }

    #[test]
    fn test_homing_skips_owner_and_dead_players() {
        let mut state = GameState::new(&[]);
        add_player(&mut state, "owner", Vec3::new(1.0, 0.0, 0.0));
        add_player(&mut state, "dead", Vec3::new(-1.0, 0.0, 0.0));
        state.players.get_mut("dead").unwrap().lives = 0;
        add_player(&mut state, "alive", Vec3::new(0.0, 0.0, -30.0));
        state.red_shells.insert(1, shell(1, Vec3::ZERO, 0.0, 0));

        update(&mut state, &FlatTerrain::new(0.0), 1_000, DT);
        assert!((state.red_shells[&1].rotation.abs() - PI).abs() < 1e-4);
    }

    #[test]
    fn test_falls_under_gravity_and_lands() {
        let mut state = GameState::new(&[]);
        state.green_shells.insert(1, shell(1, Vec3::new(0.0, 5.0, 0.0), 0.0, 0));
        let terrain = FlatTerrain::new(0.0);

        update(&mut state, &terrain, 10, DT);
        let s = &state.green_shells[&1];
        assert!(s.vertical_velocity < 0.0);
        assert!(s.position.y < 5.0);

        for tick in 0..300 {
            update(&mut state, &terrain, 10 + tick, DT);
            let s = &state.green_shells[&1];
            assert!(s.position.y >= 0.0);
            assert!(s.vertical_velocity >= TERMINAL_VELOCITY);
        }
        let s = &state.green_shells[&1];
        assert_eq!(s.position.y, 0.0);
        assert_eq!(s.vertical_velocity, 0.0);
    }

    #[test]
    fn test_terminal_velocity() {
        let mut state = GameState::new(&[]);
        let mut s = shell(1, Vec3::new(0.0, 1_000.0, 0.0), 0.0, 0);
        s.vertical_velocity = -19.95;
        state.green_shells.insert(1, s);
        update(&mut state, &FlatTerrain::new(0.0), 10, DT);
        assert_eq!(state.green_shells[&1].vertical_velocity, TERMINAL_VELOCITY);
    }

    #[test]
    fn test_green_shell_bounces_off_wall() {
        let mut state = GameState::new(&[]);
        state.green_shells.insert(1, shell(1, Vec3::new(9.8, 0.0, 0.0), FRAC_PI_2, 0));
        let report = update(&mut state, &wall_terrain(), 100, DT);

        assert_eq!(report.bounces, 1);
        let s = &state.green_shells[&1];
        assert!((s.rotation + FRAC_PI_2).abs() < 1e-5);
        assert!((s.position.x - 9.5).abs() < 1e-5);
        assert_eq!(s.position.y, 0.0);
    }

    #[test]
    fn test_red_shell_destroyed_by_wall() {
        let mut state = GameState::new(&[]);
        state.red_shells.insert(1, shell(1, Vec3::new(9.8, 0.0, 0.0), FRAC_PI_2, 0));
        update(&mut state, &wall_terrain(), 100, DT);
        assert!(state.red_shells.is_empty());
    }

    #[test]
    fn test_shell_near_top_climbs_onto_block() {
        let mut state = GameState::new(&[]);
        state.green_shells.insert(1, shell(1, Vec3::new(9.8, 2.9, 0.0), FRAC_PI_2, 0));
        update(&mut state, &wall_terrain(), 100, DT);
        let s = &state.green_shells[&1];
        assert_eq!(s.position.y, 3.0);
        assert!((s.rotation - FRAC_PI_2).abs() < 1e-6);
    }
}
