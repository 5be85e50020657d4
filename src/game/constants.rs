//! Gameplay tunables shared by the simulation and the wire layer.
//!
//! Times are milliseconds of simulation clock, distances are world units.

/// Simulation clock and vertical physics
pub mod physics {
    /// Simulation tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / TICK_RATE as f32;
    /// State broadcast rate in Hz (decoupled from, and faster than, the tick)
    pub const BROADCAST_RATE: u32 = 100;
    /// Downward acceleration applied to airborne shells (units/s²)
    pub const GRAVITY: f32 = -9.8;
    /// Fastest a shell may fall (units/s)
    pub const TERMINAL_VELOCITY: f32 = -20.0;
    /// Height difference under which a shell snaps onto the ground
    pub const LANDING_EPSILON: f32 = 0.1;
    /// A shell this far below an obstacle top collides with its side
    pub const OBSTACLE_CLEARANCE: f32 = 0.25;
}

/// Collision radii
pub mod radius {
    pub const CAR: f32 = 1.5;
    pub const BANANA: f32 = 0.5;
    pub const CUBE: f32 = 0.6;
    pub const SHELL: f32 = 0.5;
    /// Extra slack added to shell vs. car tests
    pub const SHELL_HIT_MARGIN: f32 = 0.2;
}

/// Where dropped and carried hazards sit relative to their player
pub mod placement {
    /// Gap between a car and the first hazard trailing it
    pub const TRAIL_DISTANCE: f32 = 2.0;
    /// Extra gap for every unit already dropped from a stack
    pub const TRAIL_SPACING: f32 = 1.0;
    /// Radius of the circle triple shells orbit on
    pub const ORBIT_RADIUS: f32 = 2.0;
}

/// Entity lifetimes and delays (milliseconds)
pub mod timing {
    pub const HAZARD_LIFETIME_MS: u64 = 120_000;
    pub const SHELL_LIFETIME_MS: u64 = 10_000;
    /// Window during which a fresh shell cannot hit its own dropper
    pub const SHELL_ARMING_MS: u64 = 300;
    /// Red shells start homing once older than this
    pub const HOMING_DELAY_MS: u64 = 500;
    pub const ITEM_BOX_RESPAWN_MS: u64 = 5_000;
    /// Roulette delay between collecting a box and receiving the item
    pub const ROULETTE_MS: u64 = 3_000;
    pub const BOOST_MS: u64 = 1_000;
    pub const STAR_MS: u64 = 8_000;
    pub const SPIN_MS: u64 = 3_000;
    /// Players without a position update for longer than this are evicted
    pub const IDLE_TIMEOUT_MS: u64 = 30_000;
}

/// Player and item constants
pub mod player {
    pub const STARTING_LIVES: u8 = 3;
    pub const MAX_NAME_LENGTH: usize = 20;
    /// Shell travel speed (units/s), same for green and red
    pub const SHELL_SPEED: f32 = 16.0;
}

/// Chance that a carried triple-shell stack absorbs an impact,
/// keyed by the number of shells left in the stack.
pub fn block_chance(stack_size: u8) -> f64 {
    match stack_size {
        0 => 0.0,
        1 => 0.5,
        2 => 0.7,
        _ => 0.9,
    }
}

/// Network constants
pub mod net {
    /// Maximum framed message size (bytes)
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Per-connection outbound queue depth; snapshots beyond it are dropped
    pub const OUTBOUND_QUEUE: usize = 64;
}
