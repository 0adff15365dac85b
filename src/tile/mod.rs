//! Partition a large image into a grid of independently addressable tiles,
//! so a zoomed view only has to hold the tiles on screen.

use image::{DynamicImage, GenericImageView};

use crate::error::{AppError, Result};

/// A fixed-size grid partition of a source image.
///
/// The grid covers `ceil(W / tile_width) x ceil(H / tile_height)` tiles;
/// tiles in the last column or row cover the remainder and are smaller than
/// the requested size when the image dimensions are not exact multiples.
/// Every returned tile is an owned copy: the source is never mutated, and
/// tiles stay valid after the grid is dropped.
pub struct TiledImage {
    image: DynamicImage,
    tile_width: u32,
    tile_height: u32,
    width_count: u32,
    height_count: u32,
}

impl TiledImage {
    /// Build a grid over `image`. Tile dimensions must be non-zero.
    pub fn new(image: DynamicImage, tile_width: u32, tile_height: u32) -> Result<Self> {
        if tile_width == 0 || tile_height == 0 {
            return Err(AppError::InvalidArgument(
                "tile dimensions must be non-zero".to_string(),
            ));
        }
        let (width, height) = image.dimensions();
        Ok(Self {
            image,
            tile_width,
            tile_height,
            width_count: width.div_ceil(tile_width),
            height_count: height.div_ceil(tile_height),
        })
    }

    /// Number of tile columns.
    pub fn width_count(&self) -> u32 {
        self.width_count
    }

    /// Number of tile rows.
    pub fn height_count(&self) -> u32 {
        self.height_count
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// The tile at grid position `(x_index, y_index)`. Out-of-range indices
    /// are an error; the grid never clamps or wraps.
    pub fn tile_at(&self, x_index: u32, y_index: u32) -> Result<DynamicImage> {
        if x_index >= self.width_count || y_index >= self.height_count {
            return Err(AppError::InvalidArgument(format!(
                "tile index ({}, {}) outside grid {}x{}",
                x_index, y_index, self.width_count, self.height_count
            )));
        }
        Ok(self.copy_tile(x_index, y_index))
    }

    /// Every tile in row-major order (`y_index` outer, `x_index` inner).
    /// Materializes the whole grid at once, which is a little expensive;
    /// prefer [`TiledImage::tile_at`] when a single tile will do.
    pub fn all_tiles(&self) -> Vec<DynamicImage> {
        let mut tiles = Vec::with_capacity((self.width_count * self.height_count) as usize);
        for y_index in 0..self.height_count {
            for x_index in 0..self.width_count {
                tiles.push(self.copy_tile(x_index, y_index));
            }
        }
        tiles
    }

    /// Copy out one tile. Indices are in range by the callers' checks.
    fn copy_tile(&self, x_index: u32, y_index: u32) -> DynamicImage {
        let (width, height) = self.image.dimensions();
        let x = x_index * self.tile_width;
        let y = y_index * self.tile_height;
        let w = self.tile_width.min(width - x);
        let h = self.tile_height.min(height - y);
        self.image.crop_imm(x, y, w, h)
    }
}
