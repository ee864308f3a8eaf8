//! Integer helpers for sizing compute dispatch grids.
//!
//! Dispatch sizes on a compute device must be whole multiples of the
//! workgroup shape, so most of the sizing logic boils down to rounding
//! counts up or down to a granularity.

use glam::UVec2;

/// Number of `step`-sized chunks needed to cover `value`.
///
/// Zero covers nothing, so `div_round_up(0, n) == 0`.
#[inline]
pub fn div_round_up(value: u32, step: u32) -> u32 {
    debug_assert!(step != 0, "step must be non-zero");
    value.div_ceil(step)
}

/// Round `value` up to the next multiple of `step`.
#[inline]
pub fn round_up(value: u32, step: u32) -> u32 {
    div_round_up(value, step) * step
}

/// Round `value` down to the previous multiple of `step`.
#[inline]
pub fn round_down(value: u32, step: u32) -> u32 {
    debug_assert!(step != 0, "step must be non-zero");
    (value / step) * step
}

/// Round both axes of `dims` up to multiples of `step`.
#[inline]
pub fn round_up_dims(dims: UVec2, step: UVec2) -> UVec2 {
    UVec2::new(round_up(dims.x, step.x), round_up(dims.y, step.y))
}

/// Element count of a 2D grid, widened so large grids don't overflow.
#[inline]
pub fn area(dims: UVec2) -> usize {
    dims.x as usize * dims.y as usize
}
