//! Scheduler errors.

use split_core::DeviceError;
use thiserror::Error;

/// Errors that abort kernel loading or a tile.
///
/// Cancellation is not an error; a canceled tile still returns a report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitKernelError {
    #[error("Split kernels unavailable: {}", .0.join(", "))]
    MissingKernels(Vec<&'static str>),

    #[error("Split kernels have not been loaded")]
    NotLoaded,

    #[error("Failed to allocate lane buffers: {0}")]
    Allocation(#[source] DeviceError),

    #[error("Data init kernel failed: {0}")]
    DataInit(#[source] DeviceError),

    #[error("Failed to enqueue {stage}: {source}")]
    Enqueue {
        stage: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to read back ray state: {0}")]
    ReadBack(#[source] DeviceError),
}

/// Result type for scheduler operations.
pub type SplitKernelResult<T> = Result<T, SplitKernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_kernels_lists_all_names() {
        let err = SplitKernelError::MissingKernels(vec!["shader_eval", "shadow_blocked"]);
        assert_eq!(
            err.to_string(),
            "Split kernels unavailable: shader_eval, shadow_blocked"
        );
    }
}
