//! Mosaic raster types and error definitions

use image::{ImageBuffer, Luma, Primitive};
use thiserror::Error;

/// Single-channel raster; `u16` for intensities, `u32` for label matrices
pub type Raster<T> = ImageBuffer<Luma<T>, Vec<T>>;

/// Errors that can occur while assembling or cropping mosaics
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("Grid is empty")]
    EmptyGrid,

    #[error("Incomplete grid: no site image at row={row}, column={column}")]
    IncompleteGrid { row: usize, column: usize },

    #[error(
        "Dimension mismatch at row={row}, column={column}: expected {expected_width}x{expected_height}, got {width}x{height}"
    )]
    DimensionMismatch {
        row: usize,
        column: usize,
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Failed to read site image '{path}': {reason}")]
    ReadError { path: String, reason: String },

    #[error(
        "Crop window ({x}, {y}, {width}x{height}) exceeds raster bounds {raster_width}x{raster_height}"
    )]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        raster_width: u32,
        raster_height: u32,
    },
}

/// Rectangular window inside a raster, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A stitched raster owned by one assembly run
#[derive(Debug, Clone)]
pub struct Mosaic<T: Primitive> {
    pixels: Raster<T>,
    /// Size of one site image, kept to map site-local coordinates into the mosaic
    site_width: u32,
    site_height: u32,
    /// Offset of the current pixels relative to the uncropped mosaic
    origin_x: u32,
    origin_y: u32,
}

impl<T: Primitive> Mosaic<T> {
    pub fn new(pixels: Raster<T>, site_width: u32, site_height: u32) -> Self {
        Self {
            pixels,
            site_width,
            site_height,
            origin_x: 0,
            origin_y: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn site_size(&self) -> (u32, u32) {
        (self.site_width, self.site_height)
    }

    /// Offset of this mosaic's top-left pixel in the uncropped mosaic
    pub fn origin(&self) -> (u32, u32) {
        (self.origin_x, self.origin_y)
    }

    pub fn pixels(&self) -> &Raster<T> {
        &self.pixels
    }

    pub fn into_pixels(self) -> Raster<T> {
        self.pixels
    }

    /// Replace the pixel buffer by the given window of itself
    pub fn crop(&mut self, window: CropWindow) -> Result<(), MosaicError> {
        self.pixels = crop_raster(&self.pixels, window)?;
        self.origin_x += window.x;
        self.origin_y += window.y;
        Ok(())
    }

    /// Replace every pixel value in place
    pub fn map_in_place(&mut self, mut f: impl FnMut(T) -> T) {
        for pixel in self.pixels.pixels_mut() {
            pixel.0[0] = f(pixel.0[0]);
        }
    }
}

/// Copy a window out of a raster
pub fn crop_raster<T: Primitive>(raster: &Raster<T>, window: CropWindow) -> Result<Raster<T>, MosaicError> {
    let (raster_width, raster_height) = raster.dimensions();
    let fits = window.x.checked_add(window.width).is_some_and(|r| r <= raster_width)
        && window.y.checked_add(window.height).is_some_and(|b| b <= raster_height);
    if !fits {
        return Err(MosaicError::CropOutOfBounds {
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            raster_width,
            raster_height,
        });
    }

    let src = raster.as_raw();
    let stride = raster_width as usize;
    let row_len = window.width as usize;
    let mut out = Vec::with_capacity(row_len * window.height as usize);
    for y in window.y..window.y + window.height {
        let start = y as usize * stride + window.x as usize;
        out.extend_from_slice(&src[start..start + row_len]);
    }

    // Buffer length matches width * height by construction
    Ok(ImageBuffer::from_raw(window.width, window.height, out)
        .unwrap_or_else(|| ImageBuffer::new(window.width, window.height)))
}
