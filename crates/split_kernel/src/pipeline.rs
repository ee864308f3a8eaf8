//! The ordered set of split kernel stages.

use split_core::{Device, DeviceBuffer, KernelDimensions, RequestedFeatures, SplitKernelFunction};
use split_math::UVec2;

use crate::error::{SplitKernelError, SplitKernelResult};

/// One stage of the split path tracing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SceneIntersect,
    LampEmission,
    QueueEnqueue,
    BackgroundBufferUpdate,
    ShaderEval,
    HoldoutEmissionBlurringPathterminationAo,
    DirectLighting,
    ShadowBlocked,
    NextIterationSetup,
    SumAllRadiance,
}

impl Stage {
    /// Every stage, in load order.
    pub const ALL: [Stage; 10] = [
        Stage::SceneIntersect,
        Stage::LampEmission,
        Stage::QueueEnqueue,
        Stage::BackgroundBufferUpdate,
        Stage::ShaderEval,
        Stage::HoldoutEmissionBlurringPathterminationAo,
        Stage::DirectLighting,
        Stage::ShadowBlocked,
        Stage::NextIterationSetup,
        Stage::SumAllRadiance,
    ];

    /// Stages making up one round of path iteration, in dispatch order.
    pub const ROUND: [Stage; 9] = [
        Stage::SceneIntersect,
        Stage::LampEmission,
        Stage::QueueEnqueue,
        Stage::BackgroundBufferUpdate,
        Stage::ShaderEval,
        Stage::HoldoutEmissionBlurringPathterminationAo,
        Stage::DirectLighting,
        Stage::ShadowBlocked,
        Stage::NextIterationSetup,
    ];

    /// Kernel name the device resolves.
    pub const fn name(self) -> &'static str {
        match self {
            Stage::SceneIntersect => "scene_intersect",
            Stage::LampEmission => "lamp_emission",
            Stage::QueueEnqueue => "queue_enqueue",
            Stage::BackgroundBufferUpdate => "background_buffer_update",
            Stage::ShaderEval => "shader_eval",
            Stage::HoldoutEmissionBlurringPathterminationAo => {
                "holdout_emission_blurring_pathtermination_ao"
            }
            Stage::DirectLighting => "direct_lighting",
            Stage::ShadowBlocked => "shadow_blocked",
            Stage::NextIterationSetup => "next_iteration_setup",
            Stage::SumAllRadiance => "sum_all_radiance",
        }
    }

    /// Global size of this stage's dispatch for a tile dispatched at `global`.
    ///
    /// Shadow blocking handles the AO and direct lighting rays of a lane
    /// separately, so it runs twice as wide.
    pub fn global_size(self, global: UVec2) -> UVec2 {
        match self {
            Stage::ShadowBlocked => UVec2::new(global.x * 2, global.y),
            _ => global,
        }
    }
}

/// Loaded kernels for every stage.
///
/// Either all stages are loaded or none are.
#[derive(Default)]
pub struct KernelPipeline {
    kernels: Option<Vec<Box<dyn SplitKernelFunction>>>,
    max_closure: Option<u32>,
}

impl KernelPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every stage on `device`.
    ///
    /// All stages are looked up even after one is missing so the error
    /// lists everything the device could not provide. On failure any
    /// previously loaded pipeline is dropped.
    pub fn load<D: Device>(
        &mut self,
        device: &mut D,
        features: &RequestedFeatures,
    ) -> SplitKernelResult<()> {
        let mut kernels = Vec::with_capacity(Stage::ALL.len());
        let mut missing = Vec::new();

        for stage in Stage::ALL {
            match device.split_kernel_function(stage.name(), features) {
                Some(kernel) => kernels.push(kernel),
                None => missing.push(stage.name()),
            }
        }

        if !missing.is_empty() {
            log::error!("Failed to load split kernels: {}", missing.join(", "));
            self.kernels = None;
            self.max_closure = None;
            return Err(SplitKernelError::MissingKernels(missing));
        }

        log::info!(
            "Loaded {} split kernels (max closure {})",
            kernels.len(),
            features.max_closure
        );
        self.kernels = Some(kernels);
        self.max_closure = Some(features.max_closure);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.kernels.is_some()
    }

    /// Closure count recorded by the last successful load.
    pub fn max_closure(&self) -> Option<u32> {
        self.max_closure
    }

    /// Enqueue one dispatch of `stage`.
    pub fn enqueue(
        &self,
        stage: Stage,
        dims: &KernelDimensions,
        kernel_globals: &DeviceBuffer,
        data: &DeviceBuffer,
    ) -> SplitKernelResult<()> {
        let kernels = self.kernels.as_ref().ok_or(SplitKernelError::NotLoaded)?;
        kernels[stage as usize]
            .enqueue(dims, kernel_globals, data)
            .map_err(|source| SplitKernelError::Enqueue {
                stage: stage.name(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostDevice, HostDeviceConfig};

    #[test]
    fn test_stage_order_matches_index() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(*stage as usize, i);
        }
        assert_eq!(&Stage::ALL[..9], &Stage::ROUND[..]);
    }

    #[test]
    fn test_shadow_blocked_runs_twice_as_wide() {
        let global = UVec2::new(1024, 64);
        assert_eq!(Stage::ShadowBlocked.global_size(global), UVec2::new(2048, 64));
        assert_eq!(Stage::DirectLighting.global_size(global), global);
    }

    #[test]
    fn test_load_records_max_closure() {
        let mut device = HostDevice::new(HostDeviceConfig::default());
        let mut pipeline = KernelPipeline::new();
        assert!(!pipeline.is_loaded());

        pipeline
            .load(&mut device, &RequestedFeatures::with_max_closure(12))
            .unwrap();
        assert!(pipeline.is_loaded());
        assert_eq!(pipeline.max_closure(), Some(12));
    }

    #[test]
    fn test_load_is_all_or_nothing() {
        let mut device = HostDevice::new(HostDeviceConfig {
            unavailable_kernels: vec!["shader_eval", "sum_all_radiance"],
            ..Default::default()
        });
        let mut pipeline = KernelPipeline::new();

        let err = pipeline
            .load(&mut device, &RequestedFeatures::default())
            .unwrap_err();
        assert_eq!(
            err,
            SplitKernelError::MissingKernels(vec!["shader_eval", "sum_all_radiance"])
        );
        assert!(!pipeline.is_loaded());
        assert_eq!(pipeline.max_closure(), None);
    }

    #[test]
    fn test_enqueue_before_load_fails() {
        let pipeline = KernelPipeline::new();
        let buffer = DeviceBuffer {
            id: split_core::BufferId(0),
            size: 0,
            name: "kernel_globals",
        };
        let dims = KernelDimensions::new(UVec2::new(64, 1), UVec2::new(64, 1));
        let err = pipeline
            .enqueue(Stage::SceneIntersect, &dims, &buffer, &buffer)
            .unwrap_err();
        assert_eq!(err, SplitKernelError::NotLoaded);
    }
}
