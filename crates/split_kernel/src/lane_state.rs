//! Device-resident lane arrays.
//!
//! Everything the split kernel keeps per lane lives here. The buffers are
//! sized for the largest tile the scheduler will ever see and reused for
//! every tile after that.

use split_core::{DataInitArgs, Device, DeviceBuffer, DeviceResult, KernelDimensions, RayState, RenderTile};

use crate::error::{SplitKernelError, SplitKernelResult};
use crate::split_data::{queue_index_size, split_data_buffer_size, work_pool_size};

/// Inputs that decide how large the lane buffers are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneBufferSizing {
    /// Lane capacity (max feasible tile area)
    pub max_lanes: usize,
    /// Closure count the kernels were loaded with
    pub max_closure: u32,
    /// Per-lane sample output size in bytes
    pub per_thread_output_buffer_size: usize,
    /// Work pool counters, only for work stealing
    pub work_pool_groups: Option<usize>,
    /// Bytes of the device's kernel globals
    pub kernel_globals_size: usize,
}

/// Lane state buffers for one scheduler.
#[derive(Debug)]
pub struct LaneStateBuffer {
    pub kernel_globals: DeviceBuffer,
    pub split_data: DeviceBuffer,
    pub ray_state: DeviceBuffer,
    pub queue_index: DeviceBuffer,
    pub use_queues_flag: DeviceBuffer,
    pub work_pool: Option<DeviceBuffer>,
    /// Host copy of the ray state, filled by `any_lane_active`
    ray_state_host: Vec<u8>,
    sizing: LaneBufferSizing,
}

impl LaneStateBuffer {
    /// Allocate every lane buffer. On failure, buffers already allocated
    /// are freed again before the error is returned.
    pub fn allocate<D: Device>(device: &mut D, sizing: LaneBufferSizing) -> SplitKernelResult<Self> {
        let mut allocated = Vec::new();
        match Self::allocate_all(device, &sizing, &mut allocated) {
            Ok(buffers) => {
                log::info!(
                    "Allocated lane buffers for {} lanes: {} bytes of split data, max closure {}",
                    sizing.max_lanes,
                    buffers.split_data.size,
                    sizing.max_closure
                );
                Ok(buffers)
            }
            Err(err) => {
                log::error!("Lane buffer allocation failed: {}", err);
                for buffer in allocated {
                    device.mem_free(buffer);
                }
                Err(SplitKernelError::Allocation(err))
            }
        }
    }

    fn allocate_all<D: Device>(
        device: &mut D,
        sizing: &LaneBufferSizing,
        allocated: &mut Vec<DeviceBuffer>,
    ) -> DeviceResult<Self> {
        let mut alloc = |name: &'static str, bytes: usize| -> DeviceResult<DeviceBuffer> {
            let buffer = device.mem_alloc(name, bytes)?;
            allocated.push(buffer);
            Ok(buffer)
        };

        let work_pool = match sizing.work_pool_groups {
            Some(groups) => Some(alloc("work_pool_wgs", work_pool_size(groups))?),
            None => None,
        };
        let queue_index = alloc("queue_index", queue_index_size())?;
        let use_queues_flag = alloc("use_queues_flag", 1)?;
        let kernel_globals = alloc("kernel_globals", sizing.kernel_globals_size)?;
        let ray_state = alloc("ray_state", sizing.max_lanes)?;
        let split_data = alloc(
            "split_data",
            split_data_buffer_size(
                sizing.max_lanes,
                sizing.max_closure,
                sizing.per_thread_output_buffer_size,
            ),
        )?;

        Ok(Self {
            kernel_globals,
            split_data,
            ray_state,
            queue_index,
            use_queues_flag,
            work_pool,
            ray_state_host: vec![RayState::Inactive.as_byte(); sizing.max_lanes],
            sizing: *sizing,
        })
    }

    /// Return every buffer to the device.
    pub fn release<D: Device>(self, device: &mut D) {
        log::debug!("Releasing lane buffers for {} lanes", self.sizing.max_lanes);
        for buffer in self.buffers() {
            device.mem_free(buffer);
        }
    }

    fn buffers(&self) -> Vec<DeviceBuffer> {
        let mut buffers = vec![
            self.kernel_globals,
            self.split_data,
            self.ray_state,
            self.queue_index,
            self.use_queues_flag,
        ];
        buffers.extend(self.work_pool);
        buffers
    }

    pub fn sizing(&self) -> &LaneBufferSizing {
        &self.sizing
    }

    pub fn max_lanes(&self) -> usize {
        self.sizing.max_lanes
    }

    /// Ray state of the first `lanes` lanes as of the last read-back.
    pub fn ray_states(&self, lanes: usize) -> &[u8] {
        &self.ray_state_host[..lanes]
    }

    /// Arguments for the data-init kernel of a tile.
    pub fn data_init_args<'a>(
        &self,
        dims: KernelDimensions,
        tile: &'a RenderTile,
        num_parallel_samples: u32,
        data: DeviceBuffer,
    ) -> DataInitArgs<'a> {
        DataInitArgs {
            dims,
            tile,
            num_global_elements: self.sizing.max_lanes,
            num_parallel_samples,
            kernel_globals: self.kernel_globals,
            data,
            split_data: self.split_data,
            ray_state: self.ray_state,
            queue_index: self.queue_index,
            use_queues_flag: self.use_queues_flag,
            work_pool: self.work_pool,
        }
    }

    /// Whether any of the first `lanes` lanes still has work.
    ///
    /// Waits for the device, copies the ray state back and scans it on the
    /// host. Callers only see the answer, so this can move to a device-side
    /// reduction without touching the scheduler.
    pub fn any_lane_active<D: Device>(&mut self, device: &mut D, lanes: usize) -> SplitKernelResult<bool> {
        assert!(
            lanes <= self.sizing.max_lanes,
            "{} lanes requested, buffers hold {}",
            lanes,
            self.sizing.max_lanes
        );

        device
            .mem_copy_from(&self.ray_state, 0, &mut self.ray_state_host[..lanes])
            .map_err(SplitKernelError::ReadBack)?;
        Ok(has_active_lanes(&self.ray_state_host[..lanes]))
    }
}

/// True if any state byte is not exactly `RayState::Inactive`.
pub fn has_active_lanes(states: &[u8]) -> bool {
    states.iter().any(|&state| !RayState::is_inactive_byte(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostDevice, HostDeviceConfig};
    use split_core::ray_state::RAY_SHADOW_RAY_CAST_DL;
    use split_core::DeviceError;

    fn sizing(work_pool_groups: Option<usize>) -> LaneBufferSizing {
        LaneBufferSizing {
            max_lanes: 4096,
            max_closure: 8,
            per_thread_output_buffer_size: 16,
            work_pool_groups,
            kernel_globals_size: 256,
        }
    }

    #[test]
    fn test_has_active_lanes() {
        let inactive = RayState::Inactive.as_byte();
        assert!(!has_active_lanes(&[]));
        assert!(!has_active_lanes(&[inactive; 8]));
        assert!(has_active_lanes(&[inactive, RayState::Active.as_byte(), inactive]));
        assert!(has_active_lanes(&[inactive | RAY_SHADOW_RAY_CAST_DL]));
    }

    #[test]
    fn test_allocate_without_work_pool() {
        let mut device = HostDevice::new(HostDeviceConfig::default());
        let buffers = LaneStateBuffer::allocate(&mut device, sizing(None)).unwrap();

        assert!(buffers.work_pool.is_none());
        assert_eq!(buffers.ray_state.size, 4096);
        assert_eq!(buffers.queue_index.size, 16);
        assert_eq!(buffers.use_queues_flag.size, 1);
        assert_eq!(buffers.kernel_globals.size, 256);
        assert_eq!(buffers.split_data.size, split_data_buffer_size(4096, 8, 16));
        assert_eq!(device.stats().allocations, 5);

        buffers.release(&mut device);
        assert_eq!(device.stats().frees, 5);
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_allocate_with_work_pool() {
        let mut device = HostDevice::new(HostDeviceConfig::default());
        let buffers = LaneStateBuffer::allocate(&mut device, sizing(Some(64))).unwrap();

        assert_eq!(buffers.work_pool.map(|b| b.size), Some(256));
        assert_eq!(device.stats().allocations, 6);
    }

    #[test]
    fn test_failed_allocation_frees_partial_buffers() {
        let mut device = HostDevice::new(HostDeviceConfig {
            memory_limit: Some(8 * 1024),
            ..Default::default()
        });

        let err = LaneStateBuffer::allocate(&mut device, sizing(None)).unwrap_err();
        assert!(matches!(err, SplitKernelError::Allocation(_)));
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_read_back_failure_is_reported() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut device = HostDevice::new(HostDeviceConfig {
            fail_read_back: true,
            ..Default::default()
        });
        let mut buffers = LaneStateBuffer::allocate(&mut device, sizing(None)).unwrap();

        let err = buffers.any_lane_active(&mut device, 64).unwrap_err();
        assert!(matches!(
            err,
            SplitKernelError::ReadBack(DeviceError::TransferFailed { name: "ray_state", .. })
        ));
        buffers.release(&mut device);
    }
}
