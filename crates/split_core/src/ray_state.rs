//! Per-lane ray state values.
//!
//! The state array is one byte per lane and is written by the device
//! kernels, so these values must match the kernel side exactly.

/// Flag set on a lane that has an ambient occlusion shadow ray to cast.
pub const RAY_SHADOW_RAY_CAST_AO: u8 = 16;
/// Flag set on a lane that has a direct lighting shadow ray to cast.
pub const RAY_SHADOW_RAY_CAST_DL: u8 = 32;

const FLAG_MASK: u8 = RAY_SHADOW_RAY_CAST_AO | RAY_SHADOW_RAY_CAST_DL;

/// Base state of a lane, without the shadow ray flags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RayState {
    /// Path is being traced
    Active = 0,
    /// Lane has no more work for this tile
    Inactive = 1,
    /// Path finished and its radiance must be written to the output
    UpdateBuffer = 2,
    /// Path escaped the scene
    HitBackground = 3,
    /// Lane will pick up a new sample
    ToRegenerate = 4,
    /// Lane has just picked up a new sample
    Regenerated = 5,
    /// Skip direct lighting for this bounce
    SkipDl = 6,
}

impl RayState {
    #[inline]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a state byte, ignoring the shadow ray flag bits.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & !FLAG_MASK {
            0 => Some(Self::Active),
            1 => Some(Self::Inactive),
            2 => Some(Self::UpdateBuffer),
            3 => Some(Self::HitBackground),
            4 => Some(Self::ToRegenerate),
            5 => Some(Self::Regenerated),
            6 => Some(Self::SkipDl),
            _ => None,
        }
    }

    /// A lane counts as finished only when its raw byte is exactly
    /// `Inactive`; an inactive lane with a pending shadow flag is still busy.
    #[inline]
    pub fn is_inactive_byte(byte: u8) -> bool {
        byte == Self::Inactive.as_byte()
    }
}
