//! Splitting an image into render tiles.

use serde::{Deserialize, Serialize};

/// A rectangular region of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Order tiles are handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileOrder {
    /// Left to right, top to bottom
    #[default]
    RowMajor,
    /// Closest to the image center first
    Center,
}

/// Cover a `width` x `height` image with tiles of at most `tile_size`
/// pixels per side. Tiles on the right and bottom edges may be smaller.
pub fn generate_tiles(width: u32, height: u32, tile_size: u32, order: TileOrder) -> Vec<TileRect> {
    assert!(tile_size > 0, "tile size must be non-zero");

    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile_size as usize) {
        for x in (0..width).step_by(tile_size as usize) {
            tiles.push(TileRect {
                x,
                y,
                width: tile_size.min(width - x),
                height: tile_size.min(height - y),
            });
        }
    }

    if order == TileOrder::Center {
        let cx = width as i64;
        let cy = height as i64;
        // Compare doubled coordinates to stay in integers.
        tiles.sort_by_key(|t| {
            let dx = 2 * t.x as i64 + t.width as i64 - cx;
            let dy = 2 * t.y as i64 + t.height as i64 - cy;
            dx * dx + dy * dy
        });
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_fit() {
        let tiles = generate_tiles(128, 128, 64, TileOrder::RowMajor);
        assert_eq!(tiles.len(), 4);
        let total: u32 = tiles.iter().map(|t| t.pixel_count()).sum();
        assert_eq!(total, 128 * 128);
        assert_eq!((tiles[1].x, tiles[1].y), (64, 0));
    }

    #[test]
    fn test_partial_edge_tiles() {
        let tiles = generate_tiles(100, 70, 64, TileOrder::RowMajor);
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[3], TileRect { x: 64, y: 64, width: 36, height: 6 });
        let total: u32 = tiles.iter().map(|t| t.pixel_count()).sum();
        assert_eq!(total, 100 * 70);
    }

    #[test]
    fn test_center_order() {
        let tiles = generate_tiles(192, 192, 64, TileOrder::Center);
        assert_eq!(tiles.len(), 9);
        assert_eq!((tiles[0].x, tiles[0].y), (64, 64));
    }
}
