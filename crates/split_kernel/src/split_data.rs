//! Size of the per-lane persistent state buffer.
//!
//! The split data buffer is a struct-of-arrays: every field below is laid
//! out as one array holding that field for every lane, each array padded
//! to 16 bytes. The shader data array grows with the number of closures
//! the loaded kernels were built for.

/// Number of lane queues kept by the device.
pub const NUM_QUEUES: usize = 4;

/// Queue of lanes that are active or were just regenerated.
pub const QUEUE_ACTIVE_AND_REGENERATED_RAYS: usize = 0;
/// Queue of lanes that hit the background or need regenerating.
pub const QUEUE_HITBG_BUFF_UPDATE_TOREGEN_RAYS: usize = 1;
/// Queue of lanes with an ambient occlusion shadow ray.
pub const QUEUE_SHADOW_RAY_CAST_AO_RAYS: usize = 2;
/// Queue of lanes with a direct lighting shadow ray.
pub const QUEUE_SHADOW_RAY_CAST_DL_RAYS: usize = 3;

const SPLIT_DATA_ALIGNMENT: usize = 16;

/// Bytes of one shading closure.
const SHADER_CLOSURE_SIZE: usize = 80;

/// One struct-of-arrays field: name and per-lane byte size.
struct SplitDataField {
    #[allow(dead_code)]
    name: &'static str,
    bytes: usize,
}

const fn field(name: &'static str, bytes: usize) -> SplitDataField {
    SplitDataField { name, bytes }
}

/// Fields whose size doesn't depend on the closure count.
const FIXED_FIELDS: &[SplitDataField] = &[
    field("rng", 4),
    field("throughput", 16),
    field("L_transparent", 4),
    field("path_radiance", 208),
    field("ray", 48),
    field("path_state", 64),
    field("isect", 32),
    field("ao_alpha", 16),
    field("ao_bsdf", 16),
    field("ao_light_ray", 48),
    field("bsdf_eval", 64),
    field("is_lamp", 4),
    field("light_ray", 48),
    field("queue_data", 4 * NUM_QUEUES),
    field("work_array", 4),
];

/// Shader data header, before the closure array.
const SHADER_DATA_HEADER_SIZE: usize = 224;

/// Per-lane bytes of shader data for kernels built with `max_closure` closures.
pub fn shader_data_size(max_closure: u32) -> usize {
    SHADER_DATA_HEADER_SIZE + max_closure as usize * SHADER_CLOSURE_SIZE
}

fn padded(num_elements: usize, per_lane: usize) -> usize {
    (num_elements * per_lane).div_ceil(SPLIT_DATA_ALIGNMENT) * SPLIT_DATA_ALIGNMENT
}

/// Total bytes of split data for `num_elements` lanes.
///
/// `per_thread_output_buffer_size` is the per-lane slice of the sample
/// output buffers the reduction stage sums into the tile.
pub fn split_data_buffer_size(
    num_elements: usize,
    max_closure: u32,
    per_thread_output_buffer_size: usize,
) -> usize {
    let fixed: usize = FIXED_FIELDS
        .iter()
        .map(|f| padded(num_elements, f.bytes))
        .sum();

    fixed
        + padded(num_elements, shader_data_size(max_closure))
        + padded(num_elements, per_thread_output_buffer_size)
}

/// Bytes of the queue index buffer.
pub fn queue_index_size() -> usize {
    NUM_QUEUES * std::mem::size_of::<i32>()
}

/// Bytes of the work pool for `work_groups` workgroups.
pub fn work_pool_size(work_groups: usize) -> usize {
    work_groups * std::mem::size_of::<u32>()
}
