//! Label-related types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while unifying or encoding object labels
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Label overflow: id {id} cannot be encoded as RGB (max {max})")]
    LabelOverflow { id: u64, max: u32 },

    #[error("Global id space exhausted at site row={row}, column={column} (offset {offset})")]
    IdSpaceExhausted { row: usize, column: usize, offset: u32 },

    #[error("Label matrix missing at row={row}, column={column}")]
    MissingSite { row: usize, column: usize },

    #[error("Label matrices differ in size: {expected_width}x{expected_height} vs {width}x{height}")]
    ShapeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Failed to read label image '{path}': {reason}")]
    ReadError { path: String, reason: String },
}

/// Axis-aligned pixel bounds of one labelled object, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl PixelBounds {
    pub fn point(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn extend(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// Geometry of one labelled object in pixel space of its raster
#[derive(Debug, Clone, PartialEq)]
pub struct LabelOutline {
    pub label: u32,
    /// Closed ring of pixel-corner coordinates, first vertex repeated last
    pub ring: Vec<(f64, f64)>,
    /// Mean of the pixel centers
    pub centroid: (f64, f64),
    pub bounds: PixelBounds,
    pub area: usize,
}
