//! Zoom levels and tile addressing
//!
//! Zoom 0 is the coarsest level, where the whole mosaic fits in one tile.
//! Each further level doubles the resolution up to `max_zoom`, the full
//! resolution. Tiles live at `<z>/<z>-<column>-<row>.<ext>`; edge tiles are
//! cropped to the level extent.

use std::path::{Path, PathBuf};

use crate::mosaic::CropWindow;

use super::types::LayerKind;

/// Smallest zoom at which the mosaic is shown at full resolution
pub fn max_zoom(width: u32, height: u32, tile_size: u32) -> u32 {
    let max_dim = width.max(height) as u64;
    let mut zoom = 0;
    while (tile_size as u64) << zoom < max_dim {
        zoom += 1;
    }
    zoom
}

/// Pixel extent of the mosaic at zoom `z`
pub fn level_size(width: u32, height: u32, max_zoom: u32, z: u32) -> (u32, u32) {
    let factor = 1u64 << max_zoom.saturating_sub(z);
    let scale = |v: u32| (v as u64).div_ceil(factor).max(1) as u32;
    (scale(width), scale(height))
}

/// Number of tile columns and rows covering a level
pub fn tile_counts(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    (level_width.div_ceil(tile_size), level_height.div_ceil(tile_size))
}

/// Pixel window of one tile inside its level, cropped at the right and bottom edges
pub fn tile_window(level_width: u32, level_height: u32, tile_size: u32, column: u32, row: u32) -> Option<CropWindow> {
    let x = column.checked_mul(tile_size)?;
    let y = row.checked_mul(tile_size)?;
    if x >= level_width || y >= level_height {
        return None;
    }
    Some(CropWindow {
        x,
        y,
        width: tile_size.min(level_width - x),
        height: tile_size.min(level_height - y),
    })
}

pub fn tile_name(z: u32, column: u32, row: u32, kind: LayerKind) -> String {
    format!("{}-{}-{}.{}", z, column, row, kind.extension())
}

pub fn tile_path(root: &Path, z: u32, column: u32, row: u32, kind: LayerKind) -> PathBuf {
    root.join(z.to_string()).join(tile_name(z, column, row, kind))
}

/// Parse a tile file name like "3-2-1.png" into (z, column, row)
pub fn parse_tile_name(name: &str) -> Option<(u32, u32, u32)> {
    let (stem, _) = name.rsplit_once('.')?;
    let mut parts = stem.split('-');
    let z = parts.next()?.parse().ok()?;
    let column = parts.next()?.parse().ok()?;
    let row = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((z, column, row))
}
