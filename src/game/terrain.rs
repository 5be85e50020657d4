//! Terrain height queries.
//!
//! The simulation only needs two things from the map: the ground height under
//! a planar position (plus the solid block standing there, if any) and the
//! fixed list of item box spawn points. `BlockTerrain` answers both from a
//! JSON map of axis-aligned blocks and ramps.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::util::vec3::Vec3;

/// Highest ledge a shell rolls onto instead of treating it as a wall
pub const STEP_HEIGHT: f32 = 0.5;

/// Solid block occupying a queried cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    /// Center of the block
    pub position: Vec3,
    /// Full size along each axis
    pub extent: Vec3,
}

impl Obstacle {
    pub fn top(&self) -> f32 {
        self.position.y + self.extent.y * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        self.extent * 0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightSample {
    pub height: f32,
    pub obstacle: Option<Obstacle>,
}

impl HeightSample {
    pub fn flat(height: f32) -> Self {
        Self {
            height,
            obstacle: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("Non-finite query position ({0}, {1})")]
    NonFinite(f32, f32),
}

#[derive(Debug, thiserror::Error)]
pub enum MapLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid map: {0}")]
    Invalid(String),
}

/// Height-query collaborator used by hazard placement and shell physics
pub trait Terrain: Send + Sync {
    fn query_height(&self, x: f32, z: f32, previous_y: f32) -> Result<HeightSample, TerrainError>;

    /// Item box spawn points, read once at startup
    fn item_box_positions(&self) -> Vec<Vec3>;
}

/// Query the terrain, treating a failure as flat ground at height 0
pub fn sample_or_flat(terrain: &dyn Terrain, x: f32, z: f32, previous_y: f32) -> HeightSample {
    match terrain.query_height(x, z, previous_y) {
        Ok(sample) => sample,
        Err(e) => {
            warn!("Terrain query failed, assuming flat ground: {}", e);
            HeightSample::flat(0.0)
        }
    }
}

/// Endless flat ground
#[derive(Debug, Clone, Default)]
pub struct FlatTerrain {
    pub height: f32,
    pub item_boxes: Vec<Vec3>,
}

impl FlatTerrain {
    pub fn new(height: f32) -> Self {
        Self {
            height,
            item_boxes: Vec::new(),
        }
    }

    pub fn with_item_boxes(mut self, positions: Vec<Vec3>) -> Self {
        self.item_boxes = positions;
        self
    }
}

impl Terrain for FlatTerrain {
    fn query_height(&self, x: f32, z: f32, _previous_y: f32) -> Result<HeightSample, TerrainError> {
        if !x.is_finite() || !z.is_finite() {
            return Err(TerrainError::NonFinite(x, z));
        }
        Ok(HeightSample::flat(self.height))
    }

    fn item_box_positions(&self) -> Vec<Vec3> {
        self.item_boxes.clone()
    }
}

/// Axis-aligned solid box given by opposite corners
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Block {
    pub min: Vec3,
    pub max: Vec3,
}

impl Block {
    fn contains_planar(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.z && z <= self.max.z
    }

    fn as_obstacle(&self) -> Obstacle {
        Obstacle {
            position: (self.min + self.max) * 0.5,
            extent: self.max - self.min,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Z,
}

/// Sloped surface rising linearly from `min.y` at the `min` edge to `max.y`
/// at the `max` edge along `axis`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Ramp {
    pub min: Vec3,
    pub max: Vec3,
    pub axis: Axis,
}

impl Ramp {
    fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        if x < self.min.x || x > self.max.x || z < self.min.z || z > self.max.z {
            return None;
        }
        let (pos, lo, hi) = match self.axis {
            Axis::X => (x, self.min.x, self.max.x),
            Axis::Z => (z, self.min.z, self.max.z),
        };
        let span = hi - lo;
        let t = if span > 0.0 { (pos - lo) / span } else { 1.0 };
        Some(self.min.y + (self.max.y - self.min.y) * t)
    }
}

/// JSON map description
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MapDefinition {
    pub blocks: Vec<Block>,
    pub ramps: Vec<Ramp>,
    pub item_boxes: Vec<Vec3>,
}

/// Terrain built from blocks and ramps over flat ground at height 0.
///
/// A block whose top is within `STEP_HEIGHT` of the querying height is
/// walkable; a taller one is reported as an obstacle; one whose underside is
/// above that reach is a bridge and is ignored.
#[derive(Debug, Clone, Default)]
pub struct BlockTerrain {
    blocks: Vec<Block>,
    ramps: Vec<Ramp>,
    item_boxes: Vec<Vec3>,
}

impl BlockTerrain {
    pub fn from_definition(def: MapDefinition) -> Result<Self, MapLoadError> {
        for (i, block) in def.blocks.iter().enumerate() {
            if block.min.x > block.max.x || block.min.y > block.max.y || block.min.z > block.max.z {
                return Err(MapLoadError::Invalid(format!("block {} has min > max", i)));
            }
        }
        for (i, ramp) in def.ramps.iter().enumerate() {
            if ramp.min.x > ramp.max.x || ramp.min.z > ramp.max.z {
                return Err(MapLoadError::Invalid(format!("ramp {} has min > max", i)));
            }
        }
        if def.item_boxes.iter().any(|p| !p.is_finite()) {
            return Err(MapLoadError::Invalid("non-finite item box position".into()));
        }
        Ok(Self {
            blocks: def.blocks,
            ramps: def.ramps,
            item_boxes: def.item_boxes,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, MapLoadError> {
        let def: MapDefinition = serde_json::from_str(json)?;
        Self::from_definition(def)
    }

    pub fn load(path: &Path) -> Result<Self, MapLoadError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Load a map, falling back to an empty arena on any failure
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No map configured, using empty arena");
            return Self::default();
        };
        match Self::load(path) {
            Ok(terrain) => {
                info!(
                    "Loaded map {}: {} blocks, {} ramps, {} item boxes",
                    path.display(),
                    terrain.blocks.len(),
                    terrain.ramps.len(),
                    terrain.item_boxes.len()
                );
                terrain
            }
            Err(e) => {
                warn!("Failed to load map {}: {}, using empty arena", path.display(), e);
                Self::default()
            }
        }
    }
}

impl Terrain for BlockTerrain {
    fn query_height(&self, x: f32, z: f32, previous_y: f32) -> Result<HeightSample, TerrainError> {
        if !x.is_finite() || !z.is_finite() {
            return Err(TerrainError::NonFinite(x, z));
        }
        let reach = previous_y + STEP_HEIGHT;

        let mut height = 0.0f32;
        for ramp in &self.ramps {
            if let Some(h) = ramp.height_at(x, z) {
                if h <= reach {
                    height = height.max(h);
                }
            }
        }

        let mut obstacle: Option<Obstacle> = None;
        for block in self.blocks.iter().filter(|b| b.contains_planar(x, z)) {
            if block.min.y > reach {
                continue;
            }
            if block.max.y <= reach {
                height = height.max(block.max.y);
            } else if obstacle.map_or(true, |o| block.max.y > o.top()) {
                obstacle = Some(block.as_obstacle());
            }
        }

        if let Some(o) = obstacle {
            height = height.max(o.top());
        }
        Ok(HeightSample { height, obstacle })
    }

    fn item_box_positions(&self) -> Vec<Vec3> {
        self.item_boxes.clone()
    }
}
