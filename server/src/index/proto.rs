//! Protobuf snapshot of a committed object index
//!
//! Snapshots are written gzip-compressed as `objects.pb.gz`. Bounding boxes
//! are not stored; they are recomputed from the outlines on load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use prost::Message;
use tracing::info;

use super::spatial::{ObjectIndex, TypeIndex};
use super::types::{BBox, IndexError, MapObject};

pub const SNAPSHOT_FILE: &str = "objects.pb.gz";

#[derive(Clone, PartialEq, Message)]
pub struct IndexSnapshot {
    #[prost(message, repeated, tag = "1")]
    pub types: Vec<TypeSnapshot>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TypeSnapshot {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub max_zoom: u32,
    #[prost(uint32, tag = "3")]
    pub min_poly_zoom: u32,
    #[prost(message, repeated, tag = "4")]
    pub objects: Vec<ObjectSnapshot>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ObjectSnapshot {
    #[prost(uint64, tag = "1")]
    pub external_id: u64,
    #[prost(uint64, tag = "2")]
    pub global_id: u64,
    #[prost(uint32, tag = "3")]
    pub tpoint: u32,
    #[prost(uint32, tag = "4")]
    pub zplane: u32,
    /// Outline vertices flattened as x0, y0, x1, y1, ...
    #[prost(double, repeated, tag = "5")]
    pub outline: Vec<f64>,
    #[prost(double, tag = "6")]
    pub centroid_x: f64,
    #[prost(double, tag = "7")]
    pub centroid_y: f64,
}

impl From<&ObjectIndex> for IndexSnapshot {
    fn from(index: &ObjectIndex) -> Self {
        let types = index
            .types()
            .map(|t| TypeSnapshot {
                name: t.name().to_string(),
                max_zoom: t.max_zoom(),
                min_poly_zoom: t.min_poly_zoom(),
                objects: t
                    .objects()
                    .iter()
                    .map(|o| ObjectSnapshot {
                        external_id: o.external_id,
                        global_id: o.global_id,
                        tpoint: o.tpoint,
                        zplane: o.zplane,
                        outline: o.outline.iter().flatten().copied().collect(),
                        centroid_x: o.centroid[0],
                        centroid_y: o.centroid[1],
                    })
                    .collect(),
            })
            .collect();
        Self { types }
    }
}

impl IndexSnapshot {
    /// Rebuild the spatial index from the snapshot
    pub fn into_index(self) -> Result<ObjectIndex, IndexError> {
        let mut index = ObjectIndex::new();
        for snapshot in self.types {
            let objects = snapshot
                .objects
                .into_iter()
                .map(|o| {
                    let outline: Vec<[f64; 2]> = o.outline.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
                    let bbox = BBox::from_points(&outline).ok_or_else(|| IndexError::InvalidOutline {
                        type_name: snapshot.name.clone(),
                        external_id: o.external_id,
                        reason: "empty outline".to_string(),
                    })?;
                    Ok(MapObject {
                        external_id: o.external_id,
                        global_id: o.global_id,
                        type_name: snapshot.name.clone(),
                        tpoint: o.tpoint,
                        zplane: o.zplane,
                        outline,
                        centroid: [o.centroid_x, o.centroid_y],
                        bbox,
                    })
                })
                .collect::<Result<Vec<_>, IndexError>>()?;

            let mut type_index = TypeIndex::new(snapshot.name, snapshot.max_zoom, objects);
            type_index.set_min_poly_zoom(snapshot.min_poly_zoom);
            index.insert(type_index);
        }
        Ok(index)
    }
}

/// Write a gzip-compressed snapshot of the index
pub fn write_snapshot(path: &Path, index: &ObjectIndex) -> Result<(), IndexError> {
    let bytes = IndexSnapshot::from(index).encode_to_vec();
    let staging = staging_path(path);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&staging)?), Compression::default());
    encoder.write_all(&bytes)?;
    encoder.finish()?.flush()?;
    std::fs::rename(&staging, path)?;
    info!(
        "Wrote index snapshot {:?}: {} objects, {} bytes uncompressed",
        path,
        index.object_count(),
        bytes.len()
    );
    Ok(())
}

fn staging_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a snapshot written by [`write_snapshot`]
pub fn read_snapshot(path: &Path) -> Result<ObjectIndex, IndexError> {
    let mut bytes = Vec::new();
    GzDecoder::new(BufReader::new(File::open(path)?)).read_to_end(&mut bytes)?;
    IndexSnapshot::decode(bytes.as_slice())
        .map_err(|e| IndexError::SnapshotError {
            path: path.display().to_string(),
            reason: format!("Failed to decode protobuf: {}", e),
        })?
        .into_index()
}
