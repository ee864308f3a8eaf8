//! Scheduler tuning constants.

use serde::{Deserialize, Serialize};
use split_math::UVec2;

/// Workgroup shape used by every path iteration stage.
pub const SPLIT_KERNEL_LOCAL_SIZE: UVec2 = UVec2::new(64, 1);

/// Wavefront width on AMD hardware; parallel samples are kept a multiple
/// of this so whole wavefronts stay busy.
pub const WAVEFRONT_WIDTH: u32 = 64;

/// Step by which the number of rounds between host syncs grows and shrinks.
pub const PATH_ITER_INC_FACTOR: u32 = 8;

/// Workgroup shape of the radiance reduction stage.
pub const SUM_ALL_RADIANCE_LOCAL_SIZE: UVec2 = UVec2::new(16, 16);

/// Tuning of the split kernel scheduler.
///
/// Every field has a hardware-tuned default, so a config file only needs
/// to name the values it overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitKernelConfig {
    /// Local work size of the path iteration stages
    pub local_size: UVec2,
    /// Granularity parallel samples are rounded down to
    pub wavefront_width: u32,
    /// Additive step of the round budget controller
    pub path_iter_inc: u32,
    /// Local work size of the reduction stage
    pub reduce_local_size: UVec2,
}

impl Default for SplitKernelConfig {
    fn default() -> Self {
        Self {
            local_size: SPLIT_KERNEL_LOCAL_SIZE,
            wavefront_width: WAVEFRONT_WIDTH,
            path_iter_inc: PATH_ITER_INC_FACTOR,
            reduce_local_size: SUM_ALL_RADIANCE_LOCAL_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SplitKernelConfig = serde_json::from_str(r#"{ "path_iter_inc": 4 }"#).unwrap();
        assert_eq!(config.path_iter_inc, 4);
        assert_eq!(config.local_size, SPLIT_KERNEL_LOCAL_SIZE);
        assert_eq!(config.wavefront_width, WAVEFRONT_WIDTH);
    }

    #[test]
    fn test_local_size_from_json() {
        let config: SplitKernelConfig =
            serde_json::from_str(r#"{ "local_size": [32, 2] }"#).unwrap();
        assert_eq!(config.local_size, UVec2::new(32, 2));
    }
}
