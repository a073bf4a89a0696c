//! Pyramid module
//!
//! Zoomable tile pyramids for display, mask and global id layers.

pub mod builder;
pub mod display;
pub mod layout;
pub mod types;

pub use builder::{LevelRaster, PyramidBuilder};
pub use display::{DisplayRange, DisplayScaling, percentile, rescale};
pub use layout::{level_size, max_zoom, parse_tile_name, tile_counts, tile_path, tile_window};
pub use types::{LayerKind, PyramidError, PyramidManifest};
