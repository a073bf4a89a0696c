//! Pyramid-related types and error definitions

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::LabelError;

/// Errors that can occur while building or reading tile pyramids
#[derive(Debug, Error)]
pub enum PyramidError {
    #[error("Output already exists: {0}")]
    OutputExists(String),

    #[error("Mosaic is empty")]
    EmptyMosaic,

    #[error("Invalid tile size {0}: must be a power of two >= 16")]
    InvalidTileSize(u32),

    #[error("Failed to encode tile z={z}, column={column}, row={row}: {reason}")]
    EncodeError {
        z: u32,
        column: u32,
        row: u32,
        reason: String,
    },

    #[error("Invalid manifest '{path}': {reason}")]
    ManifestError { path: String, reason: String },

    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What a layer's pixels mean, which decides resampling and file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// 8-bit intensities, mean-downsampled, JPEG
    Display,
    /// Binary object mask, nearest-neighbour downsampled, PNG
    Label,
    /// RGB-encoded global ids, nearest-neighbour downsampled, PNG
    GlobalId,
}

impl LayerKind {
    pub fn extension(self) -> &'static str {
        match self {
            LayerKind::Display => "jpg",
            LayerKind::Label | LayerKind::GlobalId => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            LayerKind::Display => "image/jpeg",
            LayerKind::Label | LayerKind::GlobalId => "image/png",
        }
    }
}

/// Manifest written next to the zoom directories of a pyramid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidManifest {
    /// Full resolution width in pixels
    pub width: u32,
    /// Full resolution height in pixels
    pub height: u32,
    pub tile_size: u32,
    /// Zoom level of the full resolution tiles; zoom 0 fits in one tile
    pub max_zoom: u32,
    pub kind: LayerKind,
    /// SHA-256 of the full resolution pixels, hex encoded
    pub sha256: String,
}

impl PyramidManifest {
    pub const FILE_NAME: &'static str = "pyramid.json";

    pub fn load(dir: &Path) -> Result<Self, PyramidError> {
        let path = dir.join(Self::FILE_NAME);
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| PyramidError::ManifestError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, dir: &Path) -> Result<(), PyramidError> {
        let path = dir.join(Self::FILE_NAME);
        let json = serde_json::to_vec_pretty(self).map_err(|e| PyramidError::ManifestError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
