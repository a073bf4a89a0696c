//! Spatial index types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while building, loading or querying the object index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    #[error("Duplicate external id {external_id} for type '{type_name}'")]
    DuplicateExternalId { type_name: String, external_id: u64 },

    #[error("Failed to commit {count} objects of type '{type_name}': {reason}")]
    CommitFailed {
        type_name: String,
        count: usize,
        reason: String,
    },

    #[error("Objects of type '{0}' are staged but not committed")]
    NotCommitted(String),

    #[error("Invalid outline for object {external_id} of type '{type_name}': {reason}")]
    InvalidOutline {
        type_name: String,
        external_id: u64,
        reason: String,
    },

    #[error("Failed to parse object dataset: {0}")]
    ParseError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid index snapshot '{path}': {reason}")]
    SnapshotError { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Axis-aligned bounding box in map space (x = column, y = -row)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box containing all points, `None` for no points
    pub fn from_points(points: &[[f64; 2]]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = BBox::new(first[0], first[1], first[0], first[1]);
        for p in rest {
            bbox.min_x = bbox.min_x.min(p[0]);
            bbox.min_y = bbox.min_y.min(p[1]);
            bbox.max_x = bbox.max_x.max(p[0]);
            bbox.max_y = bbox.max_y.max(p[1]);
        }
        Some(bbox)
    }

    /// Closed-interval overlap test; touching boxes intersect
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x && other.min_x <= self.max_x && self.min_y <= other.max_y && other.min_y <= self.max_y
    }

    pub fn contains(&self, point: [f64; 2]) -> bool {
        point[0] >= self.min_x && point[0] <= self.max_x && point[1] >= self.min_y && point[1] <= self.max_y
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

/// Object as delivered by the object dataset, before it has a global id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub external_id: u64,
    /// Global id proposed by label unification, if any
    #[serde(default)]
    pub proposed_id: Option<u64>,
    #[serde(default)]
    pub tpoint: u32,
    #[serde(default)]
    pub zplane: u32,
    /// Outline vertices in map space
    pub outline: Vec<[f64; 2]>,
}

/// A committed, indexed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    pub external_id: u64,
    pub global_id: u64,
    pub type_name: String,
    pub tpoint: u32,
    pub zplane: u32,
    /// Closed outline ring in map space
    pub outline: Vec<[f64; 2]>,
    pub centroid: [f64; 2],
    pub bbox: BBox,
}

/// Summary of one object type, served by the type listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    pub object_count: usize,
    pub max_zoom: u32,
    /// Below this zoom objects are served as centroid points
    pub min_poly_zoom: u32,
    /// (tpoint, zplane) layers holding objects
    pub layers: Vec<(u32, u32)>,
}
