//! Feature request used to select kernel variants.

use serde::{Deserialize, Serialize};

/// Maximum number of shading closures a kernel can be built for.
pub const MAX_CLOSURE: u32 = 64;

/// Features the scene needs from the compiled kernels.
///
/// `max_closure` also drives how much per-lane shader storage the split
/// data buffer reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestedFeatures {
    /// Maximum number of shading closures any shader can produce
    pub max_closure: u32,
    /// Scene contains volumes
    pub use_volume: bool,
    /// Scene contains subsurface scattering
    pub use_subsurface: bool,
}

impl Default for RequestedFeatures {
    fn default() -> Self {
        Self {
            max_closure: MAX_CLOSURE,
            use_volume: false,
            use_subsurface: false,
        }
    }
}

impl RequestedFeatures {
    /// Features for a scene whose shaders emit at most `max_closure` closures.
    pub fn with_max_closure(max_closure: u32) -> Self {
        Self {
            max_closure: max_closure.min(MAX_CLOSURE),
            ..Default::default()
        }
    }
}
