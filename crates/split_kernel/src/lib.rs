//! Split Kernel - Host-side scheduler for wavefront path tracing.
//!
//! A path tracer split into independent stages, each run over a large array
//! of light path "lanes" on a compute device. This crate owns the host side:
//! sizing dispatches, allocating lane state once, loading the stages and
//! running the adaptive loop that decides how many rounds to enqueue between
//! synchronizations.
//!
//! # Example
//!
//! ```ignore
//! use split_core::{CancelToken, Device, RenderTile, RequestedFeatures};
//! use split_kernel::{HostDevice, HostDeviceConfig, SplitKernel, SplitKernelConfig};
//! use split_math::UVec2;
//!
//! let mut device = HostDevice::new(HostDeviceConfig::default());
//! let data = device.mem_alloc("data", 256)?;
//! let output = device.mem_alloc("output", 64 * 64 * 4)?;
//!
//! let mut kernel = SplitKernel::new(device.clone(), SplitKernelConfig::default());
//! kernel.load_kernels(&RequestedFeatures::default())?;
//!
//! let tile = RenderTile::new(0, 0, 64, 64, 16, output);
//! let report = kernel.path_trace(&CancelToken::new(), &tile, UVec2::new(1024, 64), 16, &data)?;
//! println!("{} rounds, {} host interventions", report.rounds, report.host_interventions);
//! ```

mod config;
mod error;
mod host;
mod lane_state;
mod pipeline;
mod scheduler;
mod split_data;
mod work_size;

pub use config::{
    SplitKernelConfig, PATH_ITER_INC_FACTOR, SPLIT_KERNEL_LOCAL_SIZE, SUM_ALL_RADIANCE_LOCAL_SIZE,
    WAVEFRONT_WIDTH,
};
pub use error::{SplitKernelError, SplitKernelResult};
pub use host::{HostDevice, HostDeviceConfig, HostDeviceStats, PathLength};
pub use lane_state::{has_active_lanes, LaneBufferSizing, LaneStateBuffer};
pub use pipeline::{KernelPipeline, Stage};
pub use scheduler::{SplitKernel, TileReport};
pub use split_data::{
    shader_data_size, split_data_buffer_size, NUM_QUEUES, QUEUE_ACTIVE_AND_REGENERATED_RAYS,
    QUEUE_HITBG_BUFF_UPDATE_TOREGEN_RAYS, QUEUE_SHADOW_RAY_CAST_AO_RAYS,
    QUEUE_SHADOW_RAY_CAST_DL_RAYS,
};
pub use work_size::{
    parallel_samples, select_strategy, FixedAllocation, WorkSize, WorkSizeStrategy, WorkStealing,
};

/// Re-export dispatch dimension types from split_math
pub use split_math::UVec2;
