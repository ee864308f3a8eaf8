//! Dispatch sizing for a tile.
//!
//! Two strategies share one contract: given a tile and the largest tile
//! the lane buffers were sized for, produce the global/local dispatch size
//! and how many samples of each pixel run side by side.
//!
//! - **Work stealing**: one lane per pixel, lanes pull further samples from
//!   a per-workgroup pool on the device.
//! - **Fixed allocation**: the tile is replicated horizontally, one copy per
//!   sample running in parallel, as many as the lane budget allows.
//!
//! In both cases the dispatch area never exceeds the max feasible tile area;
//! that bound is what lets the lane buffers be allocated once.

use std::fmt;

use split_core::{DeviceCapabilities, KernelDimensions, RenderTile};
use split_math::{area, round_down, round_up, round_up_dims, UVec2};

use crate::config::SplitKernelConfig;

/// Dispatch size computed for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub global: UVec2,
    pub local: UVec2,
    /// Samples of a pixel processed concurrently by separate lanes
    pub parallel_samples: u32,
}

impl WorkSize {
    pub fn dims(&self) -> KernelDimensions {
        KernelDimensions::new(self.global, self.local)
    }

    /// Number of lanes in flight for the tile.
    pub fn lanes(&self) -> usize {
        area(self.global)
    }
}

/// How a tile is spread over lanes.
pub trait WorkSizeStrategy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Size the dispatch for `tile`.
    ///
    /// Panics if `max_feasible_tile_size` is not a multiple of the local
    /// size or the result would not fit in it.
    fn compute(&self, tile: &RenderTile, max_feasible_tile_size: UVec2) -> WorkSize;

    /// Number of work pool counters the strategy needs, if any.
    fn work_pool_groups(&self, max_feasible_tile_size: UVec2) -> Option<usize>;
}

/// Pick the strategy matching the device's capabilities.
pub fn select_strategy(
    caps: &DeviceCapabilities,
    config: &SplitKernelConfig,
) -> Box<dyn WorkSizeStrategy> {
    if caps.work_stealing {
        Box::new(WorkStealing::new(config.local_size))
    } else {
        Box::new(FixedAllocation::new(config.local_size, config.wavefront_width))
    }
}

/// One lane per pixel; samples are handed out dynamically on the device.
#[derive(Debug, Clone, Copy)]
pub struct WorkStealing {
    local_size: UVec2,
}

impl WorkStealing {
    pub fn new(local_size: UVec2) -> Self {
        Self { local_size }
    }
}

impl WorkSizeStrategy for WorkStealing {
    fn name(&self) -> &'static str {
        "work-stealing"
    }

    fn compute(&self, tile: &RenderTile, max_feasible_tile_size: UVec2) -> WorkSize {
        assert_aligned(max_feasible_tile_size, self.local_size);

        let work_size = WorkSize {
            global: round_up_dims(tile.size(), self.local_size),
            local: self.local_size,
            parallel_samples: 1,
        };
        assert_within_budget(&work_size, max_feasible_tile_size);
        work_size
    }

    fn work_pool_groups(&self, max_feasible_tile_size: UVec2) -> Option<usize> {
        let max_global = round_up_dims(max_feasible_tile_size, self.local_size);
        Some(area(max_global) / area(self.local_size))
    }
}

/// Fixed number of lanes per sample, as many samples in flight as fit.
#[derive(Debug, Clone, Copy)]
pub struct FixedAllocation {
    local_size: UVec2,
    wavefront_width: u32,
}

impl FixedAllocation {
    pub fn new(local_size: UVec2, wavefront_width: u32) -> Self {
        Self {
            local_size,
            wavefront_width,
        }
    }
}

impl WorkSizeStrategy for FixedAllocation {
    fn name(&self) -> &'static str {
        "fixed-allocation"
    }

    fn compute(&self, tile: &RenderTile, max_feasible_tile_size: UVec2) -> WorkSize {
        assert_aligned(max_feasible_tile_size, self.local_size);

        let global_y = round_up(tile.h, self.local_size.y);
        let parallel_samples = parallel_samples(
            area(max_feasible_tile_size),
            global_y,
            tile.w,
            tile.num_samples,
            self.wavefront_width,
        );
        assert!(
            parallel_samples != 0,
            "tile {}x{} does not fit in a max feasible tile of {}x{}",
            tile.w,
            tile.h,
            max_feasible_tile_size.x,
            max_feasible_tile_size.y
        );

        let work_size = WorkSize {
            global: UVec2::new(tile.w * parallel_samples, global_y),
            local: self.local_size,
            parallel_samples,
        };
        assert_within_budget(&work_size, max_feasible_tile_size);
        work_size
    }

    fn work_pool_groups(&self, _max_feasible_tile_size: UVec2) -> Option<usize> {
        None
    }
}

/// Samples that can run side by side for a tile of `tile_w` columns and
/// `global_y` (rounded) rows, given `max_lanes` lanes.
///
/// The result never exceeds `num_samples`, and is floored to a multiple of
/// `wavefront_width` once it reaches that width. Smaller values are left
/// alone.
pub fn parallel_samples(
    max_lanes: usize,
    global_y: u32,
    tile_w: u32,
    num_samples: u32,
    wavefront_width: u32,
) -> u32 {
    if global_y == 0 || tile_w == 0 {
        return 0;
    }

    let columns = max_lanes / global_y as usize;
    let fit = (columns / tile_w as usize).min(num_samples as usize) as u32;
    if fit >= wavefront_width {
        round_down(fit, wavefront_width)
    } else {
        fit
    }
}

fn assert_aligned(max_feasible_tile_size: UVec2, local_size: UVec2) {
    assert!(
        max_feasible_tile_size.x % local_size.x == 0 && max_feasible_tile_size.y % local_size.y == 0,
        "max feasible tile size {}x{} is not a multiple of local size {}x{}",
        max_feasible_tile_size.x,
        max_feasible_tile_size.y,
        local_size.x,
        local_size.y
    );
}

fn assert_within_budget(work_size: &WorkSize, max_feasible_tile_size: UVec2) {
    assert!(
        work_size.lanes() <= area(max_feasible_tile_size),
        "dispatch {}x{} exceeds max feasible tile size {}x{}",
        work_size.global.x,
        work_size.global.y,
        max_feasible_tile_size.x,
        max_feasible_tile_size.y
    );
}
