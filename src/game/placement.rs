//! Hazard placement geometry: where dropped hazards land and where carried
//! (trailing) items sit around their player.

use smallvec::SmallVec;
use std::f32::consts::TAU;

use crate::game::constants::{placement, radius};
use crate::game::state::{ItemSlot, ItemType, Player};
use crate::game::terrain::{sample_or_flat, Terrain};
use crate::util::vec3::Vec3;

/// Planar point behind `player` for the `index`-th unit of a stack
fn behind(player: &Player, index: u8) -> Vec3 {
    let offset = placement::TRAIL_DISTANCE + index as f32 * placement::TRAIL_SPACING;
    player.position - Vec3::from_yaw(player.rotation) * offset
}

/// Units already dropped from the trailing stack `slot`
pub fn units_dropped(slot: &ItemSlot) -> u8 {
    slot.item_type.trailing_quantity().saturating_sub(slot.quantity)
}

/// Landing spot for a banana or cube dropped from a stack that has already
/// shed `units_dropped` units. Height comes from the terrain under the spot.
pub fn drop_position(player: &Player, units_dropped: u8, terrain: &dyn Terrain) -> Vec3 {
    let spot = behind(player, units_dropped);
    let ground = sample_or_flat(terrain, spot.x, spot.z, player.position.y);
    spot.with_y(ground.height)
}

/// Shells leave from the car itself, heading where the car faces
pub fn shell_spawn(player: &Player) -> (Vec3, f32) {
    (player.position, player.rotation)
}

/// World positions of every carried unit of the player's trailing item.
///
/// Triple shells orbit the car a third of a turn apart; everything else
/// trails in a line behind it.
pub fn trailing_positions(player: &Player) -> SmallVec<[Vec3; 3]> {
    let Some(trailing) = player.trailing_item else {
        return SmallVec::new();
    };
    if trailing.item_type.is_triple_shell() {
        (0..trailing.quantity)
            .map(|k| {
                let angle = player.rotation + k as f32 * TAU / 3.0;
                player.position + Vec3::from_yaw(angle) * placement::ORBIT_RADIUS
            })
            .collect()
    } else {
        (0..trailing.quantity).map(|k| behind(player, k)).collect()
    }
}

/// Radius used when other cars touch a carried item of this type
pub fn trailing_hit_radius(item_type: ItemType) -> f32 {
    item_type
        .hazard_kind()
        .map_or(radius::CUBE, |kind| kind.radius())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::HslColor;
    use crate::game::terrain::FlatTerrain;

    fn player_at(position: Vec3, rotation: f32) -> Player {
        let mut p = Player::new("p".into(), "p".into(), HslColor::default(), 0);
        p.position = position;
        p.rotation = rotation;
        p
    }

    #[test]
    fn test_drop_behind_facing() {
        let p = player_at(Vec3::new(0.0, 0.0, 10.0), 0.0);
        let terrain = FlatTerrain::new(0.0);
        let pos = drop_position(&p, 0, &terrain);
        assert!(pos.approx_eq(Vec3::new(0.0, 0.0, 8.0), 1e-5));

        let further = drop_position(&p, 2, &terrain);
        assert!(further.approx_eq(Vec3::new(0.0, 0.0, 6.0), 1e-5));
    }

    #[test]
    fn test_drop_height_from_terrain() {
        let p = player_at(Vec3::new(0.0, 5.0, 0.0), 0.0);
        let terrain = FlatTerrain::new(1.25);
        assert_eq!(drop_position(&p, 0, &terrain).y, 1.25);
    }

    #[test]
    fn test_units_dropped() {
        assert_eq!(units_dropped(&ItemSlot::new(ItemType::ThreeBananas, 3)), 0);
        assert_eq!(units_dropped(&ItemSlot::new(ItemType::ThreeBananas, 1)), 2);
        assert_eq!(units_dropped(&ItemSlot::new(ItemType::Banana, 1)), 0);
    }

    #[test]
    fn test_triple_shells_orbit() {
        let mut p = player_at(Vec3::ZERO, 0.0);
        p.trailing_item = Some(ItemSlot::new(ItemType::ThreeGreenShells, 3));
        let slots = trailing_positions(&p);
        assert_eq!(slots.len(), 3);
        for slot in &slots {
            assert!((slot.length() - placement::ORBIT_RADIUS).abs() < 1e-5);
        }
        assert!(slots[0].approx_eq(Vec3::new(0.0, 0.0, 2.0), 1e-5));
        // Evenly spread: pairwise distances equal
        let d01 = slots[0].distance_to(slots[1]);
        let d12 = slots[1].distance_to(slots[2]);
        assert!((d01 - d12).abs() < 1e-4);
    }

    #[test]
    fn test_bananas_trail_in_line() {
        let mut p = player_at(Vec3::ZERO, 0.0);
        p.trailing_item = Some(ItemSlot::new(ItemType::ThreeBananas, 2));
        let slots = trailing_positions(&p);
        assert_eq!(slots.len(), 2);
        assert!(slots[0].approx_eq(Vec3::new(0.0, 0.0, -2.0), 1e-5));
        assert!(slots[1].approx_eq(Vec3::new(0.0, 0.0, -3.0), 1e-5));
    }

    #[test]
    fn test_no_trailing_no_positions() {
        assert!(trailing_positions(&player_at(Vec3::ZERO, 0.0)).is_empty());
    }

    #[test]
    fn test_trailing_hit_radius() {
        assert_eq!(trailing_hit_radius(ItemType::ThreeBananas), radius::BANANA);
        assert_eq!(trailing_hit_radius(ItemType::GreenShell), radius::SHELL);
        assert_eq!(trailing_hit_radius(ItemType::FakeCube), radius::CUBE);
    }
}
