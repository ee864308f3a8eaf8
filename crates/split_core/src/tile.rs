//! Render tile handed to the scheduler.

use split_math::UVec2;

use crate::device::DeviceBuffer;

/// A rectangular region of the image to path trace.
///
/// The tile is not modified while it is being scheduled; the device
/// accumulates into `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTile {
    /// X coordinate of tile's top-left corner
    pub x: u32,
    /// Y coordinate of tile's top-left corner
    pub y: u32,
    /// Width of the tile in pixels
    pub w: u32,
    /// Height of the tile in pixels
    pub h: u32,
    /// First sample index to render
    pub start_sample: u32,
    /// Number of samples to render per pixel
    pub num_samples: u32,
    /// Offset of the tile's first pixel in `buffer`, in pixels
    pub offset: u32,
    /// Row stride of `buffer`, in pixels
    pub stride: u32,
    /// Output accumulation buffer
    pub buffer: DeviceBuffer,
}

impl RenderTile {
    /// A tile that owns its whole output buffer (offset 0, stride = width).
    pub fn new(x: u32, y: u32, w: u32, h: u32, num_samples: u32, buffer: DeviceBuffer) -> Self {
        Self {
            x,
            y,
            w,
            h,
            start_sample: 0,
            num_samples,
            offset: 0,
            stride: w,
            buffer,
        }
    }

    /// Width and height as a vector.
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.w, self.h)
    }

    /// Get the total number of pixels in this tile.
    pub fn pixel_count(&self) -> u32 {
        self.w * self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferId;

    #[test]
    fn test_new_tile_owns_buffer() {
        let buffer = DeviceBuffer { id: BufferId(1), size: 64 * 64 * 16, name: "output" };
        let tile = RenderTile::new(0, 64, 64, 32, 16, buffer);
        assert_eq!(tile.stride, 64);
        assert_eq!(tile.offset, 0);
        assert_eq!(tile.size(), UVec2::new(64, 32));
        assert_eq!(tile.pixel_count(), 2048);
    }
}
