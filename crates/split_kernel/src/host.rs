//! Host-emulated compute device.
//!
//! Runs the split kernel contract in host memory so the scheduler can be
//! driven without a GPU. Stage dispatches execute a synthetic path model
//! instead of real shading: every sample traces a path of a configured
//! number of bounces and contributes unit radiance when it terminates.
//! Lanes of a dispatch are processed in parallel with rayon.
//!
//! Per-lane split data layout (32-bit words, first `4 * max_lanes` words):
//!
//! | word | meaning |
//! |------|---------|
//! | 0    | bounces left on the current path |
//! | 1    | samples left, including the current one |
//! | 2    | index of the current sample |
//! | 3    | accumulated radiance (`f32` bits) |

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use split_core::{
    BufferId, DataInitArgs, Device, DeviceBuffer, DeviceCapabilities, DeviceError, DeviceResult,
    KernelDimensions, RayState, RenderTile, RequestedFeatures, SplitKernelFunction,
};

use crate::split_data::{NUM_QUEUES, QUEUE_ACTIVE_AND_REGENERATED_RAYS};

const LANE_WORDS: usize = 4;
const WORD_BOUNCES: usize = 0;
const WORD_SAMPLES_LEFT: usize = 1;
const WORD_SAMPLE: usize = 2;
const WORD_RADIANCE: usize = 3;

/// Stages that need volume support when the scene has volumes.
const VOLUME_STAGES: &[&str] = &["shader_eval", "holdout_emission_blurring_pathtermination_ao"];

/// Number of bounces a synthetic path takes before terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLength {
    /// Every path takes exactly this many rounds
    Fixed(u32),
    /// Uniform in `min..=max`, seeded per lane and sample
    Random { min: u32, max: u32 },
}

/// Behavior of a `HostDevice`.
#[derive(Debug, Clone)]
pub struct HostDeviceConfig {
    pub name: String,
    pub work_stealing: bool,
    pub path_length: PathLength,
    pub seed: u64,
    pub kernel_globals_size: usize,
    pub supports_volume: bool,
    /// Kernels the device pretends not to have
    pub unavailable_kernels: Vec<&'static str>,
    /// Kernel whose dispatches fail
    pub failing_kernel: Option<&'static str>,
    /// Make every data init dispatch fail
    pub fail_data_init: bool,
    /// Make every copy back to the host fail
    pub fail_read_back: bool,
    /// Cap on live allocated bytes
    pub memory_limit: Option<usize>,
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Host".to_string(),
            work_stealing: false,
            path_length: PathLength::Fixed(4),
            seed: 0,
            kernel_globals_size: 1024,
            supports_volume: true,
            unavailable_kernels: Vec::new(),
            failing_kernel: None,
            fail_data_init: false,
            fail_read_back: false,
            memory_limit: None,
        }
    }
}

/// Counters for inspecting what the scheduler asked of the device.
#[derive(Debug, Clone, Default)]
pub struct HostDeviceStats {
    pub allocations: usize,
    pub frees: usize,
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub data_inits: usize,
    /// Dispatch count per kernel name
    pub dispatches: HashMap<&'static str, usize>,
    /// Dimensions of the most recent dispatch per kernel name
    pub last_dims: HashMap<&'static str, KernelDimensions>,
}

impl HostDeviceStats {
    pub fn dispatch_count(&self, kernel: &str) -> usize {
        self.dispatches.get(kernel).copied().unwrap_or(0)
    }
}

/// Tile state recorded by data init, read by the stage kernels.
#[derive(Debug, Clone, Copy)]
struct Binding {
    tile: RenderTile,
    global: split_math::UVec2,
    parallel_samples: u32,
    split_data: BufferId,
    ray_state: BufferId,
}

#[derive(Debug, Default)]
struct HostMemory {
    buffers: HashMap<BufferId, Vec<u32>>,
    sizes: HashMap<BufferId, usize>,
    next_id: u64,
    stats: HostDeviceStats,
    binding: Option<Binding>,
}

impl HostMemory {
    fn words_mut(&mut self, id: BufferId) -> DeviceResult<&mut Vec<u32>> {
        self.buffers.get_mut(&id).ok_or(DeviceError::InvalidBuffer(id))
    }

    fn check(&self, buffer: &DeviceBuffer) -> DeviceResult<()> {
        if self.buffers.contains_key(&buffer.id) {
            Ok(())
        } else {
            Err(DeviceError::InvalidBuffer(buffer.id))
        }
    }

    /// Run `f` over the first `lanes` lanes in parallel, handing each its
    /// state byte and split data words.
    fn for_each_lane<F>(
        &mut self,
        kernel: &'static str,
        ray_state: BufferId,
        split_data: BufferId,
        lanes: usize,
        f: F,
    ) -> DeviceResult<()>
    where
        F: Fn(usize, &mut u8, &mut [u32]) + Sync,
    {
        let state_bytes = self.words_mut(ray_state)?.len() * 4;
        let split_words = self.words_mut(split_data)?.len();
        if state_bytes < lanes || split_words < lanes * LANE_WORDS {
            return Err(DeviceError::LaunchFailed {
                kernel,
                reason: format!("lane buffers too small for {} lanes", lanes),
            });
        }

        let mut states = std::mem::take(self.words_mut(ray_state)?);
        if let Some(split) = self.buffers.get_mut(&split_data) {
            let state_bytes: &mut [u8] = bytemuck::cast_slice_mut(states.as_mut_slice());
            state_bytes[..lanes]
                .par_iter_mut()
                .zip(split[..lanes * LANE_WORDS].par_chunks_mut(LANE_WORDS))
                .enumerate()
                .for_each(|(lane, (state, words))| f(lane, state, words));
        }
        self.buffers.insert(ray_state, states);
        Ok(())
    }

    fn record_dispatch(&mut self, kernel: &'static str, dims: &KernelDimensions) {
        *self.stats.dispatches.entry(kernel).or_insert(0) += 1;
        self.stats.last_dims.insert(kernel, *dims);
    }
}

/// A `Device` backed by host memory.
///
/// Clones share memory and statistics, so a clone kept outside a scheduler
/// can still observe buffers after the scheduler is dropped.
#[derive(Debug, Clone)]
pub struct HostDevice {
    config: Arc<HostDeviceConfig>,
    memory: Arc<Mutex<HostMemory>>,
}

impl HostDevice {
    pub fn new(config: HostDeviceConfig) -> Self {
        Self {
            config: Arc::new(config),
            memory: Arc::new(Mutex::new(HostMemory::default())),
        }
    }

    pub fn config(&self) -> &HostDeviceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HostMemory> {
        self.memory.lock()
    }

    pub fn stats(&self) -> HostDeviceStats {
        self.lock().stats.clone()
    }

    /// Read a buffer as `f32` values.
    pub fn read_f32(&self, buffer: &DeviceBuffer) -> DeviceResult<Vec<f32>> {
        let mut memory = self.lock();
        let words = memory.words_mut(buffer.id)?;
        let floats: &[f32] = bytemuck::cast_slice(words.as_slice());
        Ok(floats[..buffer.size / 4].to_vec())
    }

    /// Read a buffer as raw bytes.
    pub fn read_bytes(&self, buffer: &DeviceBuffer) -> DeviceResult<Vec<u8>> {
        let mut memory = self.lock();
        let words = memory.words_mut(buffer.id)?;
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        Ok(bytes[..buffer.size].to_vec())
    }

    fn path_length(&self, lane: usize, sample: u32) -> u32 {
        match self.config.path_length {
            PathLength::Fixed(bounces) => bounces.max(1),
            PathLength::Random { min, max } => {
                let seed = self.config.seed
                    ^ (lane as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    ^ (sample as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
                let mut rng = StdRng::seed_from_u64(seed);
                rng.gen_range(min.max(1)..=max.max(min).max(1))
            }
        }
    }
}

/// Samples lane `lane` is responsible for under the given binding.
fn lane_samples(lane: usize, global: split_math::UVec2, tile: &RenderTile, parallel_samples: u32) -> Option<(u32, u32)> {
    let gx = lane as u32 % global.x;
    let gy = lane as u32 / global.x;
    if gy >= tile.h || gx >= tile.w * parallel_samples {
        return None;
    }

    // Samples are interleaved across the copies of the tile.
    let slot = gx / tile.w;
    if slot >= tile.num_samples {
        return None;
    }
    let count = (tile.num_samples - slot).div_ceil(parallel_samples);
    Some((slot, count))
}

impl Device for HostDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            name: self.config.name.clone(),
            work_stealing: self.config.work_stealing,
        }
    }

    fn mem_alloc(&mut self, name: &'static str, bytes: usize) -> DeviceResult<DeviceBuffer> {
        let mut memory = self.lock();
        if let Some(limit) = self.config.memory_limit {
            if memory.stats.live_bytes + bytes > limit {
                return Err(DeviceError::OutOfMemory { name, bytes });
            }
        }

        let id = BufferId(memory.next_id);
        memory.next_id += 1;
        memory.buffers.insert(id, vec![0; bytes.div_ceil(4)]);
        memory.sizes.insert(id, bytes);
        memory.stats.allocations += 1;
        memory.stats.live_buffers += 1;
        memory.stats.live_bytes += bytes;
        log::trace!("Allocated {} ({} bytes) as {}", name, bytes, id);

        Ok(DeviceBuffer { id, size: bytes, name })
    }

    fn mem_free(&mut self, buffer: DeviceBuffer) {
        let mut memory = self.lock();
        if memory.buffers.remove(&buffer.id).is_some() {
            let size = memory.sizes.remove(&buffer.id).unwrap_or(0);
            memory.stats.frees += 1;
            memory.stats.live_buffers -= 1;
            memory.stats.live_bytes -= size;
        } else {
            log::warn!("Freeing unknown buffer {} ({})", buffer.id, buffer.name);
        }
    }

    fn mem_copy_from(&mut self, buffer: &DeviceBuffer, offset: usize, dst: &mut [u8]) -> DeviceResult<()> {
        if self.config.fail_read_back {
            return Err(DeviceError::TransferFailed {
                name: buffer.name,
                reason: "injected failure".to_string(),
            });
        }

        let mut memory = self.lock();
        let size = buffer.size;
        let words = memory.words_mut(buffer.id)?;
        if offset + dst.len() > size {
            return Err(DeviceError::CopyOutOfRange { offset, len: dst.len(), size });
        }

        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }

    fn split_kernel_function(
        &mut self,
        name: &'static str,
        features: &RequestedFeatures,
    ) -> Option<Box<dyn SplitKernelFunction>> {
        if self.config.unavailable_kernels.contains(&name) {
            return None;
        }
        if features.use_volume && !self.config.supports_volume && VOLUME_STAGES.contains(&name) {
            return None;
        }

        Some(Box::new(HostKernel {
            name,
            device: self.clone(),
            fail: self.config.failing_kernel == Some(name),
        }))
    }

    fn kernel_globals_size(&self) -> usize {
        self.config.kernel_globals_size
    }

    fn enqueue_data_init(&mut self, args: &DataInitArgs<'_>) -> DeviceResult<()> {
        if self.config.fail_data_init {
            return Err(DeviceError::LaunchFailed {
                kernel: "data_init",
                reason: "injected failure".to_string(),
            });
        }

        let lanes = args.dims.lanes();
        let tile = *args.tile;
        let global = args.dims.global;
        let parallel_samples = args.num_parallel_samples;

        let mut memory = self.lock();
        for buffer in [&args.kernel_globals, &args.data, &args.queue_index, &args.use_queues_flag] {
            memory.check(buffer)?;
        }
        if lanes > args.num_global_elements || lanes > args.ray_state.size {
            return Err(DeviceError::LaunchFailed {
                kernel: "data_init",
                reason: format!("{} lanes exceed lane buffers of {}", lanes, args.num_global_elements),
            });
        }

        {
            let queues = memory.words_mut(args.queue_index.id)?;
            queues[..NUM_QUEUES].fill(0);
            queues[QUEUE_ACTIVE_AND_REGENERATED_RAYS] = lanes as u32;
        }
        memory.words_mut(args.use_queues_flag.id)?.fill(0);
        if let Some(pool) = &args.work_pool {
            memory.words_mut(pool.id)?.fill(0);
        }

        memory.for_each_lane(
            "data_init",
            args.ray_state.id,
            args.split_data.id,
            lanes,
            |lane, state, words| {
                words[WORD_RADIANCE] = 0f32.to_bits();
                match lane_samples(lane, global, &tile, parallel_samples) {
                    Some((slot, count)) => {
                        *state = RayState::Active.as_byte();
                        words[WORD_SAMPLE] = tile.start_sample + slot;
                        words[WORD_SAMPLES_LEFT] = count;
                        words[WORD_BOUNCES] = self.path_length(lane, words[WORD_SAMPLE]);
                    }
                    None => {
                        *state = RayState::Inactive.as_byte();
                        words[WORD_SAMPLES_LEFT] = 0;
                        words[WORD_BOUNCES] = 0;
                    }
                }
            },
        )?;

        memory.binding = Some(Binding {
            tile,
            global,
            parallel_samples,
            split_data: args.split_data.id,
            ray_state: args.ray_state.id,
        });
        memory.stats.data_inits += 1;
        Ok(())
    }
}

/// One stage of the synthetic pipeline.
struct HostKernel {
    name: &'static str,
    device: HostDevice,
    fail: bool,
}

impl HostKernel {
    /// Advance every active lane by one bounce.
    fn next_iteration_setup(&self, memory: &mut HostMemory, binding: &Binding, lanes: usize) -> DeviceResult<()> {
        let parallel_samples = binding.parallel_samples;
        memory.for_each_lane(
            self.name,
            binding.ray_state,
            binding.split_data,
            lanes,
            |lane, state, words| {
                if RayState::is_inactive_byte(*state) {
                    return;
                }

                words[WORD_BOUNCES] = words[WORD_BOUNCES].saturating_sub(1);
                if words[WORD_BOUNCES] > 0 {
                    *state = RayState::Active.as_byte();
                    return;
                }

                let radiance = f32::from_bits(words[WORD_RADIANCE]) + 1.0;
                words[WORD_RADIANCE] = radiance.to_bits();
                words[WORD_SAMPLES_LEFT] -= 1;
                if words[WORD_SAMPLES_LEFT] > 0 {
                    words[WORD_SAMPLE] += parallel_samples;
                    words[WORD_BOUNCES] = self.device.path_length(lane, words[WORD_SAMPLE]);
                    *state = RayState::Regenerated.as_byte();
                } else {
                    *state = RayState::Inactive.as_byte();
                }
            },
        )
    }

    /// Add the radiance of every lane into its pixel of the tile buffer.
    fn sum_all_radiance(&self, memory: &mut HostMemory, binding: &Binding) -> DeviceResult<()> {
        let tile = binding.tile;
        let lanes = split_math::area(binding.global);

        let mut sums = vec![0f32; tile.pixel_count() as usize];
        {
            let split = memory.words_mut(binding.split_data)?;
            for lane in 0..lanes {
                if lane_samples(lane, binding.global, &tile, binding.parallel_samples).is_some() {
                    let gx = lane as u32 % binding.global.x;
                    let gy = lane as u32 / binding.global.x;
                    let pixel = (gy * tile.w + gx % tile.w) as usize;
                    sums[pixel] += f32::from_bits(split[lane * LANE_WORDS + WORD_RADIANCE]);
                }
            }
        }

        let size = tile.buffer.size;
        let output = memory.words_mut(tile.buffer.id)?;
        let output: &mut [f32] = bytemuck::cast_slice_mut(output.as_mut_slice());
        for y in 0..tile.h {
            for x in 0..tile.w {
                let index = (tile.offset + y * tile.stride + x) as usize;
                if (index + 1) * 4 > size {
                    return Err(DeviceError::CopyOutOfRange { offset: index * 4, len: 4, size });
                }
                output[index] += sums[(y * tile.w + x) as usize];
            }
        }
        Ok(())
    }
}

impl SplitKernelFunction for HostKernel {
    fn enqueue(
        &self,
        dims: &KernelDimensions,
        kernel_globals: &DeviceBuffer,
        data: &DeviceBuffer,
    ) -> DeviceResult<()> {
        if self.fail {
            return Err(DeviceError::LaunchFailed {
                kernel: self.name,
                reason: "injected failure".to_string(),
            });
        }

        let mut memory = self.device.lock();
        memory.check(kernel_globals)?;
        memory.check(data)?;
        memory.record_dispatch(self.name, dims);

        let binding = memory.binding.ok_or_else(|| DeviceError::LaunchFailed {
            kernel: self.name,
            reason: "data init has not run".to_string(),
        })?;

        match self.name {
            "next_iteration_setup" => {
                let lanes = dims.lanes().min(split_math::area(binding.global));
                self.next_iteration_setup(&mut memory, &binding, lanes)
            }
            "sum_all_radiance" => self.sum_all_radiance(&mut memory, &binding),
            // Shading stages leave the synthetic path state alone.
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_math::UVec2;

    fn output_tile(device: &mut HostDevice, w: u32, h: u32, samples: u32) -> RenderTile {
        let buffer = device.mem_alloc("output", (w * h * 4) as usize).unwrap();
        RenderTile::new(0, 0, w, h, samples, buffer)
    }

    #[test]
    fn test_lane_samples_interleave() {
        let buffer = DeviceBuffer { id: BufferId(0), size: 0, name: "output" };
        let tile = RenderTile::new(0, 0, 4, 2, 10, buffer);
        let global = UVec2::new(4 * 3, 2);

        // Slots 0..3 take samples {0,3,6,9}, {1,4,7}, {2,5,8}.
        assert_eq!(lane_samples(0, global, &tile, 3), Some((0, 4)));
        assert_eq!(lane_samples(4, global, &tile, 3), Some((1, 3)));
        assert_eq!(lane_samples(8, global, &tile, 3), Some((2, 3)));
        assert_eq!(lane_samples(12, global, &tile, 3), Some((0, 4)));
    }

    #[test]
    fn test_lanes_outside_tile_start_inactive() {
        let buffer = DeviceBuffer { id: BufferId(0), size: 0, name: "output" };
        let tile = RenderTile::new(0, 0, 100, 2, 1, buffer);
        let global = UVec2::new(128, 2);

        assert!(lane_samples(99, global, &tile, 1).is_some());
        assert!(lane_samples(100, global, &tile, 1).is_none());
        assert!(lane_samples(127, global, &tile, 1).is_none());
    }

    #[test]
    fn test_copy_out_of_range() {
        let mut device = HostDevice::new(HostDeviceConfig::default());
        let buffer = device.mem_alloc("ray_state", 16).unwrap();
        let mut dst = [0u8; 8];

        assert!(device.mem_copy_from(&buffer, 8, &mut dst).is_ok());
        assert_eq!(
            device.mem_copy_from(&buffer, 12, &mut dst),
            Err(DeviceError::CopyOutOfRange { offset: 12, len: 8, size: 16 })
        );
    }

    #[test]
    fn test_memory_limit() {
        let mut device = HostDevice::new(HostDeviceConfig {
            memory_limit: Some(100),
            ..Default::default()
        });
        let a = device.mem_alloc("a", 60).unwrap();
        assert!(matches!(
            device.mem_alloc("b", 60),
            Err(DeviceError::OutOfMemory { name: "b", bytes: 60 })
        ));

        device.mem_free(a);
        assert!(device.mem_alloc("b", 60).is_ok());
    }

    #[test]
    fn test_volume_stages_need_support() {
        let mut device = HostDevice::new(HostDeviceConfig {
            supports_volume: false,
            ..Default::default()
        });
        let features = RequestedFeatures {
            use_volume: true,
            ..Default::default()
        };

        assert!(device.split_kernel_function("shader_eval", &features).is_none());
        assert!(device.split_kernel_function("scene_intersect", &features).is_some());
        assert!(device
            .split_kernel_function("shader_eval", &RequestedFeatures::default())
            .is_some());
    }

    #[test]
    fn test_kernel_before_data_init_fails() {
        let mut device = HostDevice::new(HostDeviceConfig::default());
        let kg = device.mem_alloc("kernel_globals", 64).unwrap();
        let kernel = device
            .split_kernel_function("scene_intersect", &RequestedFeatures::default())
            .unwrap();
        let dims = KernelDimensions::new(UVec2::new(64, 1), UVec2::new(64, 1));

        assert!(matches!(
            kernel.enqueue(&dims, &kg, &kg),
            Err(DeviceError::LaunchFailed { kernel: "scene_intersect", .. })
        ));
    }

    #[test]
    fn test_synthetic_paths_terminate() {
        let mut device = HostDevice::new(HostDeviceConfig {
            path_length: PathLength::Fixed(2),
            ..Default::default()
        });
        let tile = output_tile(&mut device, 8, 2, 3);
        let kg = device.mem_alloc("kernel_globals", 64).unwrap();
        let data = device.mem_alloc("data", 64).unwrap();
        let split_data = device.mem_alloc("split_data", 64 * 16).unwrap();
        let ray_state = device.mem_alloc("ray_state", 64).unwrap();
        let queue_index = device.mem_alloc("queue_index", 16).unwrap();
        let use_queues_flag = device.mem_alloc("use_queues_flag", 1).unwrap();

        let dims = KernelDimensions::new(UVec2::new(8 * 3, 2), UVec2::new(8, 1));
        device
            .enqueue_data_init(&DataInitArgs {
                dims,
                tile: &tile,
                num_global_elements: 64,
                num_parallel_samples: 3,
                kernel_globals: kg,
                data,
                split_data,
                ray_state,
                queue_index,
                use_queues_flag,
                work_pool: None,
            })
            .unwrap();

        let setup = device
            .split_kernel_function("next_iteration_setup", &RequestedFeatures::default())
            .unwrap();
        let lanes = dims.lanes();
        let states = device.read_bytes(&ray_state).unwrap();
        assert!(states[..lanes].iter().all(|&s| s == RayState::Active.as_byte()));

        for _ in 0..2 {
            setup.enqueue(&dims, &kg, &data).unwrap();
        }
        let states = device.read_bytes(&ray_state).unwrap();
        assert!(states[..lanes].iter().all(|&s| RayState::is_inactive_byte(s)));

        let reduce = device
            .split_kernel_function("sum_all_radiance", &RequestedFeatures::default())
            .unwrap();
        reduce.enqueue(&dims, &kg, &data).unwrap();
        let output = device.read_f32(&tile.buffer).unwrap();
        assert!(output.iter().all(|&v| v == 3.0));
    }
}
