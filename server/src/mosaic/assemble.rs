//! Stitching of a site grid into one mosaic
//!
//! Sites are placed strictly by their (row, column) index: each grid row is
//! concatenated left to right, and the row strips are stacked top to bottom.
//! Only one grid row of site images is resident at a time.

use image::{ImageBuffer, Primitive};
use tracing::{debug, info};

use crate::grid::Grid;

use super::types::{Mosaic, MosaicError, Raster};

/// Assemble a fully populated grid, loading each site through `load`
pub fn assemble<S, T, F>(grid: &Grid<S>, mut load: F) -> Result<Mosaic<T>, MosaicError>
where
    T: Primitive,
    F: FnMut(&S) -> Result<Raster<T>, MosaicError>,
{
    if grid.is_empty() {
        return Err(MosaicError::EmptyGrid);
    }
    if let Some((row, column)) = grid.first_missing() {
        return Err(MosaicError::IncompleteGrid { row, column });
    }

    let mut site_size: Option<(u32, u32)> = None;
    let mut pixels: Vec<T> = Vec::new();
    let mut mosaic_width = 0u32;

    for row in 0..grid.height() {
        let mut strip = Vec::with_capacity(grid.width());
        for (column, cell) in grid.row(row).enumerate() {
            let site = cell.ok_or(MosaicError::IncompleteGrid { row, column })?;
            let raster = load(site)?;

            let (expected_width, expected_height) = *site_size.get_or_insert(raster.dimensions());
            if raster.dimensions() != (expected_width, expected_height) {
                return Err(MosaicError::DimensionMismatch {
                    row,
                    column,
                    expected_width,
                    expected_height,
                    width: raster.width(),
                    height: raster.height(),
                });
            }
            strip.push(raster);
        }

        let (site_width, site_height) = site_size.unwrap_or((0, 0));
        if row == 0 {
            mosaic_width = site_width * grid.width() as u32;
            pixels.reserve(mosaic_width as usize * site_height as usize * grid.height());
        }

        append_strip(&mut pixels, &strip, site_height);
        debug_assert_eq!(
            pixels.len(),
            mosaic_width as usize * site_height as usize * (row + 1)
        );
        debug!("Stitched grid row {} ({} sites)", row, strip.len());
    }

    let (site_width, site_height) = site_size.unwrap_or((0, 0));
    let mosaic_height = site_height * grid.height() as u32;
    let raster = ImageBuffer::from_raw(mosaic_width, mosaic_height, pixels).ok_or(
        MosaicError::DimensionMismatch {
            row: grid.height(),
            column: grid.width(),
            expected_width: mosaic_width,
            expected_height: mosaic_height,
            width: site_width,
            height: site_height,
        },
    )?;

    info!(
        "Assembled {}x{} mosaic from {}x{} grid",
        mosaic_width,
        mosaic_height,
        grid.height(),
        grid.width()
    );

    Ok(Mosaic::new(raster, site_width, site_height))
}

/// Assemble a grid of rasters that are already in memory
pub fn assemble_rasters<T: Primitive>(grid: &Grid<Raster<T>>) -> Result<Mosaic<T>, MosaicError> {
    assemble(grid, |raster| Ok(raster.clone()))
}

/// Append one grid row: pixel row `y` of the strip is the concatenation of
/// pixel row `y` of every site, left to right
fn append_strip<T: Primitive>(pixels: &mut Vec<T>, strip: &[Raster<T>], site_height: u32) {
    for y in 0..site_height as usize {
        for raster in strip {
            let width = raster.width() as usize;
            let start = y * width;
            pixels.extend_from_slice(&raster.as_raw()[start..start + width]);
        }
    }
}
