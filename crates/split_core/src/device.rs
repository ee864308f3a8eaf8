//! Compute device contract.
//!
//! The scheduler never touches device memory directly. It asks a `Device`
//! for buffers, hands those handles to kernel dispatches and copies the
//! ray-state array back when it needs to decide whether to keep going.

use std::fmt;

use split_math::{area, UVec2};
use thiserror::Error;

use crate::features::RequestedFeatures;
use crate::tile::RenderTile;

/// Errors reported by a compute device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Out of device memory allocating {name} ({bytes} bytes)")]
    OutOfMemory { name: &'static str, bytes: usize },

    #[error("Invalid device buffer: {0}")]
    InvalidBuffer(BufferId),

    #[error("Copy of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    CopyOutOfRange { offset: usize, len: usize, size: usize },

    #[error("Kernel {kernel} failed to launch: {reason}")]
    LaunchFailed { kernel: &'static str, reason: String },

    #[error("Transfer from {name} failed: {reason}")]
    TransferFailed { name: &'static str, reason: String },
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Opaque identifier of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a block of device memory.
///
/// Handles are plain values; ownership of the memory stays with whoever
/// allocated it and must be returned through `Device::mem_free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub id: BufferId,
    /// Size in bytes
    pub size: usize,
    /// Debug name, used in logs and errors
    pub name: &'static str,
}

/// What the device can do, used to pick a dispatch-sizing strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Human readable device name
    pub name: String,
    /// Whether kernels pull samples from a per-workgroup work pool
    pub work_stealing: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            work_stealing: false,
        }
    }
}

/// Global and local (workgroup) size of a 2D dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDimensions {
    pub global: UVec2,
    pub local: UVec2,
}

impl KernelDimensions {
    pub fn new(global: UVec2, local: UVec2) -> Self {
        Self { global, local }
    }

    /// Total number of work items in the dispatch.
    pub fn lanes(&self) -> usize {
        area(self.global)
    }

    /// Number of workgroups in the dispatch.
    pub fn work_groups(&self) -> usize {
        self.lanes() / area(self.local).max(1)
    }
}

/// Everything the data-init kernel needs to reset a tile's lane window.
#[derive(Debug, Clone, Copy)]
pub struct DataInitArgs<'a> {
    pub dims: KernelDimensions,
    pub tile: &'a RenderTile,
    /// Capacity of the lane arrays (max feasible tile area)
    pub num_global_elements: usize,
    pub num_parallel_samples: u32,
    pub kernel_globals: DeviceBuffer,
    /// Scene data shared by every stage
    pub data: DeviceBuffer,
    pub split_data: DeviceBuffer,
    pub ray_state: DeviceBuffer,
    pub queue_index: DeviceBuffer,
    pub use_queues_flag: DeviceBuffer,
    /// Present only when the device uses work stealing
    pub work_pool: Option<DeviceBuffer>,
}

/// A loaded, callable pipeline stage.
pub trait SplitKernelFunction {
    /// Enqueue one dispatch of this stage. May return before the device
    /// has finished executing it.
    fn enqueue(
        &self,
        dims: &KernelDimensions,
        kernel_globals: &DeviceBuffer,
        data: &DeviceBuffer,
    ) -> DeviceResult<()>;
}

/// A compute device able to run the split kernel.
pub trait Device {
    fn capabilities(&self) -> DeviceCapabilities;

    /// Allocate `bytes` of device memory.
    fn mem_alloc(&mut self, name: &'static str, bytes: usize) -> DeviceResult<DeviceBuffer>;

    /// Release a buffer previously returned by `mem_alloc`.
    fn mem_free(&mut self, buffer: DeviceBuffer);

    /// Blocking copy from device memory into `dst`, starting at `offset` bytes.
    fn mem_copy_from(&mut self, buffer: &DeviceBuffer, offset: usize, dst: &mut [u8])
        -> DeviceResult<()>;

    /// Resolve a named stage for the given features, or `None` if the
    /// device cannot provide it.
    fn split_kernel_function(
        &mut self,
        name: &'static str,
        features: &RequestedFeatures,
    ) -> Option<Box<dyn SplitKernelFunction>>;

    /// Byte size of the device's kernel globals structure.
    fn kernel_globals_size(&self) -> usize;

    /// Enqueue the data-init kernel for a tile.
    fn enqueue_data_init(&mut self, args: &DataInitArgs<'_>) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_dimensions_counts() {
        let dims = KernelDimensions::new(UVec2::new(256, 8), UVec2::new(64, 1));
        assert_eq!(dims.lanes(), 2048);
        assert_eq!(dims.work_groups(), 32);
    }

    #[test]
    fn test_device_error_messages() {
        let err = DeviceError::OutOfMemory { name: "split_data", bytes: 1024 };
        assert_eq!(
            err.to_string(),
            "Out of device memory allocating split_data (1024 bytes)"
        );

        let err = DeviceError::InvalidBuffer(BufferId(7));
        assert_eq!(err.to_string(), "Invalid device buffer: #7");

        let err = DeviceError::TransferFailed { name: "ray_state", reason: "bus error".to_string() };
        assert_eq!(err.to_string(), "Transfer from ray_state failed: bus error");
    }
}
