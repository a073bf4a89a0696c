//! Pyramid tile serving types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pyramid::{LayerKind, PyramidError, PyramidManifest};

/// Errors that can occur when serving pyramid tiles
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Layer '{layer}' not found in experiment '{experiment_id}'")]
    LayerNotFound { experiment_id: String, layer: String },

    #[error("Invalid zoom level {z}: layer has levels 0..={max_zoom}")]
    InvalidLevel { z: u32, max_zoom: u32 },

    #[error("Invalid tile coordinates: z={z}, x={x}, y={y}")]
    InvalidTileCoordinates { z: u32, x: u32, y: u32 },

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Request for a single tile of a layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub experiment_id: String,
    pub layer: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

/// Encoded tile together with its format
#[derive(Debug, Clone)]
pub struct TileData {
    pub kind: LayerKind,
    pub bytes: bytes::Bytes,
}

/// Layer summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub kind: LayerKind,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub max_zoom: u32,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, manifest: &PyramidManifest) -> Self {
        Self {
            name: name.into(),
            kind: manifest.kind,
            width: manifest.width,
            height: manifest.height,
            tile_size: manifest.tile_size,
            max_zoom: manifest.max_zoom,
        }
    }
}
