//! Render settings, read from an optional JSON file.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use split_core::RequestedFeatures;
use split_kernel::{HostDeviceConfig, PathLength, SplitKernelConfig};
use split_math::{area, UVec2};

use crate::tiles::TileOrder;

/// Everything needed to render an image with the host device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tile_order: TileOrder,
    /// Samples per pixel
    pub samples: u32,
    /// Largest tile the lane buffers are sized for
    pub max_feasible_tile_size: UVec2,
    pub work_stealing: bool,
    pub max_closure: u32,
    pub per_thread_output_buffer_size: usize,
    /// Shortest and longest synthetic path, in bounces
    pub path_length: [u32; 2],
    pub seed: u64,
    /// Cancel the render after this many seconds
    pub time_limit: Option<f64>,
    pub kernel: SplitKernelConfig,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 512,
            height: 256,
            tile_size: 64,
            tile_order: TileOrder::RowMajor,
            samples: 16,
            max_feasible_tile_size: UVec2::new(256, 64),
            work_stealing: false,
            max_closure: 8,
            per_thread_output_buffer_size: 16,
            path_length: [1, 24],
            seed: 0,
            time_limit: None,
            kernel: SplitKernelConfig::default(),
        }
    }
}

impl RenderSettings {
    /// Load settings from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the scheduler would treat as contract violations.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.width > 0 && self.height > 0, "Image size must be non-zero");
        ensure!(self.tile_size > 0, "Tile size must be non-zero");
        ensure!(self.samples > 0, "Sample count must be non-zero");
        ensure!(self.kernel.path_iter_inc > 0, "path_iter_inc must be non-zero");
        ensure!(self.kernel.wavefront_width > 0, "wavefront_width must be non-zero");
        ensure!(
            self.kernel.local_size.cmpgt(UVec2::ZERO).all(),
            "local_size must be non-zero in both dimensions"
        );
        ensure!(
            self.kernel.reduce_local_size.cmpgt(UVec2::ZERO).all(),
            "reduce_local_size must be non-zero in both dimensions"
        );

        let max = self.max_feasible_tile_size;
        let local = self.kernel.local_size;
        ensure!(
            max.x % local.x == 0 && max.y % local.y == 0,
            "Max feasible tile size {}x{} must be a multiple of local size {}x{}",
            max.x,
            max.y,
            local.x,
            local.y
        );

        let tile = UVec2::splat(self.tile_size);
        let dispatch = if self.work_stealing {
            split_math::round_up_dims(tile, local)
        } else {
            UVec2::new(tile.x, split_math::round_up(tile.y, local.y))
        };
        ensure!(
            area(dispatch) <= area(max),
            "Tile size {} does not fit in max feasible tile size {}x{}",
            self.tile_size,
            max.x,
            max.y
        );
        Ok(())
    }

    pub fn requested_features(&self) -> RequestedFeatures {
        RequestedFeatures::with_max_closure(self.max_closure)
    }

    pub fn host_device_config(&self) -> HostDeviceConfig {
        let [min, max] = self.path_length;
        HostDeviceConfig {
            work_stealing: self.work_stealing,
            path_length: PathLength::Random { min, max },
            seed: self.seed,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RenderSettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let settings: RenderSettings =
            serde_json::from_str(r#"{ "samples": 8, "kernel": { "path_iter_inc": 4 } }"#).unwrap();
        assert_eq!(settings.samples, 8);
        assert_eq!(settings.kernel.path_iter_inc, 4);
        assert_eq!(settings.tile_size, 64);
    }

    #[test]
    fn test_misaligned_max_tile_rejected() {
        let settings = RenderSettings {
            max_feasible_tile_size: UVec2::new(1000, 256),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_oversized_tile_rejected() {
        let settings = RenderSettings {
            tile_size: 1024,
            max_feasible_tile_size: UVec2::new(256, 256),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_kernel_sizes_rejected() {
        let mut settings = RenderSettings::default();
        settings.kernel.local_size = UVec2::new(0, 1);
        assert!(settings.validate().is_err());

        let mut settings = RenderSettings::default();
        settings.kernel.wavefront_width = 0;
        assert!(settings.validate().is_err());

        let mut settings = RenderSettings::default();
        settings.kernel.reduce_local_size = UVec2::new(16, 0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_host_device_config() {
        let settings = RenderSettings {
            work_stealing: true,
            path_length: [2, 9],
            ..Default::default()
        };
        let config = settings.host_device_config();
        assert!(config.work_stealing);
        assert_eq!(config.path_length, PathLength::Random { min: 2, max: 9 });
    }
}
