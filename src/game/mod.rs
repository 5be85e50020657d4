pub mod constants;
pub mod game_loop;
pub mod items;
pub mod placement;
pub mod scheduler;
pub mod state;
pub mod systems;
pub mod terrain;
