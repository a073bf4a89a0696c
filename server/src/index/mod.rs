//! Object index module
//!
//! Two-phase construction, storage and spatial lookup of segmented objects.
//!
//! ## Architecture
//!
//! - `builder`: stages objects, commits global ids, builds the R-trees
//! - `spatial`: per-type, per-layer R-trees over object bounding boxes
//! - `zoom`: sampled threshold between point and polygon rendering
//! - `proto`: gzip-compressed protobuf snapshots of a finished index
//! - `reader`: object dataset readers

pub mod builder;
pub mod geometry;
pub mod proto;
pub mod reader;
pub mod simplify;
pub mod spatial;
pub mod types;
pub mod zoom;

pub use builder::{AssignedIds, IdIssuer, ObjectRef, PreferProposed, SpatialIndexBuilder};
pub use geometry::{polygon_centroid, ring_to_map, tile_bounds};
pub use proto::{SNAPSHOT_FILE, read_snapshot, write_snapshot};
pub use reader::{CompositeReader, ObjectDataset, ObjectDatasetReader};
pub use simplify::simplify_ring;
pub use spatial::{ObjectIndex, TypeIndex};
pub use types::{BBox, IndexError, MapObject, RawObject, TypeInfo};
pub use zoom::{ZoomSampling, min_poly_zoom};
