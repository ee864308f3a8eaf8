//! Adaptive host loop driving the split kernel over a tile.
//!
//! Per tile the scheduler:
//!
//! 1. sizes the dispatch (and allocates lane buffers on the first tile),
//! 2. runs the data-init kernel,
//! 3. enqueues batches of path iteration rounds, reading the ray state back
//!    after each batch until no lane is active or the task is canceled,
//! 4. sums per-lane radiance into the tile unless canceled.
//!
//! Reading the ray state back is the only point where the host waits on the
//! device. The number of rounds per batch is tuned from tile to tile: a tile
//! that needed extra batches makes the next tile start with a larger budget,
//! a tile that finished in its first batch shrinks it by one step.

use split_core::{Device, DeviceBuffer, KernelDimensions, RenderTile, RequestedFeatures, Task};
use split_math::{area, round_up_dims, UVec2};

use crate::config::SplitKernelConfig;
use crate::error::{SplitKernelError, SplitKernelResult};
use crate::lane_state::{LaneBufferSizing, LaneStateBuffer};
use crate::pipeline::{KernelPipeline, Stage};
use crate::work_size::{select_strategy, WorkSizeStrategy};

/// Outcome of one scheduled tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileReport {
    /// The task was canceled; no radiance was added to the tile
    pub canceled: bool,
    /// Batches after which lanes were still active
    pub host_interventions: u32,
    /// Path iteration rounds enqueued
    pub rounds: u32,
    /// Lanes in flight
    pub lanes: usize,
    pub parallel_samples: u32,
    /// Round budget the next tile starts with
    pub next_round_budget: u32,
}

/// Host side of the split path tracing kernel.
///
/// One instance schedules tiles strictly one after another; lane buffers
/// are allocated on the first tile and kept until the scheduler is dropped.
pub struct SplitKernel<D: Device> {
    device: D,
    config: SplitKernelConfig,
    strategy: Box<dyn WorkSizeStrategy>,
    pipeline: KernelPipeline,
    lanes: Option<LaneStateBuffer>,
    /// Set until lane buffers have been allocated
    first_tile: bool,
    /// Rounds enqueued between ray state read-backs
    path_iteration_times: u32,
}

impl<D: Device> SplitKernel<D> {
    /// Create a scheduler for `device`, picking the dispatch strategy from
    /// the device's capabilities.
    pub fn new(device: D, config: SplitKernelConfig) -> Self {
        assert!(config.path_iter_inc > 0, "path iteration increment must be non-zero");

        let caps = device.capabilities();
        let strategy = select_strategy(&caps, &config);
        log::info!("Split kernel on {} using {} dispatch", caps.name, strategy.name());

        Self {
            device,
            config,
            strategy,
            pipeline: KernelPipeline::new(),
            lanes: None,
            first_tile: true,
            path_iteration_times: config.path_iter_inc,
        }
    }

    /// Load every pipeline stage for `features`.
    pub fn load_kernels(&mut self, features: &RequestedFeatures) -> SplitKernelResult<()> {
        if let Some(lanes) = &self.lanes {
            if lanes.sizing().max_closure != features.max_closure {
                log::warn!(
                    "Max closure changed from {} to {}; split data keeps its original size",
                    lanes.sizing().max_closure,
                    features.max_closure
                );
            }
        }
        self.pipeline.load(&mut self.device, features)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &SplitKernelConfig {
        &self.config
    }

    pub fn strategy(&self) -> &dyn WorkSizeStrategy {
        self.strategy.as_ref()
    }

    /// Lane buffers, once the first tile has been scheduled.
    pub fn lane_buffers(&self) -> Option<&LaneStateBuffer> {
        self.lanes.as_ref()
    }

    /// Round budget the next tile starts with.
    pub fn path_iteration_times(&self) -> u32 {
        self.path_iteration_times
    }

    /// Path trace one tile.
    ///
    /// `max_feasible_tile_size` bounds every tile this scheduler will see and
    /// must stay the same across calls, since lane buffers are sized from
    /// the first one. Device failures abort the tile; allocated buffers are
    /// kept so the caller may retry.
    pub fn path_trace(
        &mut self,
        task: &dyn Task,
        tile: &RenderTile,
        max_feasible_tile_size: UVec2,
        per_thread_output_buffer_size: usize,
        data: &DeviceBuffer,
    ) -> SplitKernelResult<TileReport> {
        let max_closure = self.pipeline.max_closure().ok_or(SplitKernelError::NotLoaded)?;

        let work_size = self.strategy.compute(tile, max_feasible_tile_size);
        let num_global_elements = area(max_feasible_tile_size);
        let inc = self.config.path_iter_inc;

        if self.first_tile {
            let sizing = LaneBufferSizing {
                max_lanes: num_global_elements,
                max_closure,
                per_thread_output_buffer_size,
                work_pool_groups: self.strategy.work_pool_groups(max_feasible_tile_size),
                kernel_globals_size: self.device.kernel_globals_size(),
            };
            self.lanes = Some(LaneStateBuffer::allocate(&mut self.device, sizing)?);
            self.first_tile = false;
        }
        let lanes = match self.lanes.as_mut() {
            Some(lanes) => lanes,
            None => unreachable!("lane buffers exist once the first tile is done"),
        };
        assert!(
            num_global_elements <= lanes.max_lanes(),
            "max feasible tile size grew from {} to {} lanes",
            lanes.max_lanes(),
            num_global_elements
        );

        log::debug!(
            "Tile {}x{} at ({}, {}): dispatch {}x{}, {} parallel samples, budget {}",
            tile.w,
            tile.h,
            tile.x,
            tile.y,
            work_size.global.x,
            work_size.global.y,
            work_size.parallel_samples,
            self.path_iteration_times
        );

        let dims = work_size.dims();
        self.device
            .enqueue_data_init(&lanes.data_init_args(dims, tile, work_size.parallel_samples, *data))
            .map_err(SplitKernelError::DataInit)?;

        let mut host_interventions = 0u32;
        let mut next_path_iteration_times = self.path_iteration_times;
        let mut rounds = 0u32;
        let mut canceled = false;

        let mut active_lanes = true;
        while active_lanes {
            for _ in 0..self.path_iteration_times {
                for stage in Stage::ROUND {
                    let stage_dims =
                        KernelDimensions::new(stage.global_size(work_size.global), work_size.local);
                    self.pipeline
                        .enqueue(stage, &stage_dims, &lanes.kernel_globals, data)?;
                }
                rounds += 1;

                if task.is_canceled() {
                    canceled = true;
                    break;
                }
            }

            active_lanes = lanes.any_lane_active(&mut self.device, work_size.lanes())?;

            if active_lanes {
                host_interventions += 1;
                // The batch was too short; sync sooner for the rest of this
                // tile and start the next tile with a larger budget.
                self.path_iteration_times = inc;
                next_path_iteration_times += inc;
            }
            log::trace!(
                "{} rounds enqueued, lanes active: {}, interventions: {}",
                rounds,
                active_lanes,
                host_interventions
            );

            if task.is_canceled() {
                canceled = true;
                break;
            }
        }

        if !canceled {
            let local = self.config.reduce_local_size;
            let reduce_dims = KernelDimensions::new(round_up_dims(tile.size(), local), local);
            self.pipeline.enqueue(
                Stage::SumAllRadiance,
                &reduce_dims,
                &lanes.kernel_globals,
                data,
            )?;
        }

        self.path_iteration_times = if host_interventions == 0 {
            // Finished within the first batch: too many rounds were enqueued.
            next_path_iteration_times.saturating_sub(inc).max(inc)
        } else {
            next_path_iteration_times
        };

        let report = TileReport {
            canceled,
            host_interventions,
            rounds,
            lanes: work_size.lanes(),
            parallel_samples: work_size.parallel_samples,
            next_round_budget: self.path_iteration_times,
        };
        if canceled {
            log::info!("Tile at ({}, {}) canceled after {} rounds", tile.x, tile.y, rounds);
        } else {
            log::debug!(
                "Tile at ({}, {}) done: {} rounds, {} host interventions, next budget {}",
                tile.x,
                tile.y,
                rounds,
                host_interventions,
                self.path_iteration_times
            );
        }
        Ok(report)
    }
}

impl<D: Device> Drop for SplitKernel<D> {
    fn drop(&mut self) {
        if let Some(lanes) = self.lanes.take() {
            lanes.release(&mut self.device);
        }
    }
}
