//! Site image metadata and grid-related error definitions

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while locating site images in the acquisition grid
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Failed to extract metadata from '{filename}': {reason}")]
    MetadataExtraction { filename: String, reason: String },

    #[error("Invalid extraction pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Grid position row={row}, column={column} is outside a {height}x{width} grid")]
    OutOfRange {
        row: usize,
        column: usize,
        height: usize,
        width: usize,
    },

    #[error("Grid position row={row}, column={column} is occupied twice ('{existing}' and '{duplicate}')")]
    DuplicatePosition {
        row: usize,
        column: usize,
        existing: String,
        duplicate: String,
    },

    #[error("Failed to read image '{path}': {reason}")]
    ReadError { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What a site image depicts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageKind {
    /// Fluorescence intensities of one channel
    Channel { name: String },
    /// Label matrix of segmented objects of one type
    Segmentation { object_type: String },
    /// Transmitted light image
    Brightfield,
}

impl ImageKind {
    /// Layer name used for pyramids and object types
    pub fn layer_name(&self) -> &str {
        match self {
            ImageKind::Channel { name } => name,
            ImageKind::Segmentation { object_type } => object_type,
            ImageKind::Brightfield => "brightfield",
        }
    }
}

/// Position of a site image within the acquisition, all zero-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: usize,
    pub column: usize,
    pub site: usize,
    pub cycle: u32,
    pub tpoint: u32,
    pub zplane: u32,
}

/// Metadata shared by every kind of site image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// File name the position was extracted from
    pub filename: String,
    pub position: GridPosition,
    pub kind: ImageKind,
}

/// A located site image with its pixel dimensions read once at construction
#[derive(Debug, Clone)]
pub struct SiteImage {
    pub metadata: ImageMetadata,
    path: PathBuf,
    width: u32,
    height: u32,
}

impl SiteImage {
    /// Open a site image, reading its dimensions from the file header
    pub fn open(path: &Path, metadata: ImageMetadata) -> Result<Self, GridError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| GridError::ReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            metadata,
            path: path.to_path_buf(),
            width,
            height,
        })
    }

    /// Create a site image with already known dimensions
    pub fn with_dimensions(path: PathBuf, metadata: ImageMetadata, width: u32, height: u32) -> Self {
        Self {
            metadata,
            path,
            width,
            height,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn position(&self) -> GridPosition {
        self.metadata.position
    }
}

impl fmt::Display for SiteImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metadata.filename)
    }
}
