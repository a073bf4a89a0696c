//! Mosaic module
//!
//! Stitches a grid of site images into one raster per channel and cycle and
//! aligns the mosaics of different cycles onto their common region.

pub mod align;
pub mod assemble;
pub mod types;

pub use align::{
    AlignError, AlignmentPlan, CycleAligner, Overlaps, Rect, ShiftDescriptor, ShiftFile, YAxis,
    crop_site,
};
pub use assemble::{assemble, assemble_rasters};
pub use types::{CropWindow, Mosaic, MosaicError, Raster, crop_raster};
