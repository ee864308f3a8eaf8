//! Split Core - Contracts between the split-kernel scheduler and its collaborators.
//!
//! This crate provides:
//!
//! - **Device contract**: `Device`, `SplitKernelFunction`, `DeviceBuffer`,
//!   `KernelDimensions`, `DataInitArgs`
//! - **Render inputs**: `RenderTile`, `RequestedFeatures`, `Task`
//! - **Lane state**: the `RayState` byte values shared with device kernels
//!
//! # Example
//!
//! ```ignore
//! use split_core::{CancelToken, Task};
//!
//! let token = CancelToken::new();
//! let task = token.clone();
//! token.cancel();
//! assert!(task.is_canceled());
//! ```

pub mod device;
pub mod features;
pub mod ray_state;
pub mod task;
pub mod tile;

// Re-export commonly used types
pub use device::{
    BufferId, DataInitArgs, Device, DeviceBuffer, DeviceCapabilities, DeviceError, DeviceResult,
    KernelDimensions, SplitKernelFunction,
};
pub use features::RequestedFeatures;
pub use ray_state::RayState;
pub use task::{CancelToken, Task};
pub use tile::RenderTile;
