// Re-export glam for convenience
pub use glam::*;

// Dispatch grid arithmetic
mod grid;
pub use grid::{area, div_round_up, round_down, round_up, round_up_dims};
