//! Object dataset reader implementations for different file formats
//!
//! An object dataset holds, per object type, the outlines of all objects
//! keyed by external id. Datasets come from the extraction step of the
//! pipeline or from an external segmentation tool.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use super::types::{IndexError, RawObject};

/// Objects grouped by type name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDataset {
    pub types: BTreeMap<String, Vec<RawObject>>,
}

impl ObjectDataset {
    pub fn object_count(&self) -> usize {
        self.types.values().map(Vec::len).sum()
    }
}

/// Trait for reading object datasets in different formats
pub trait ObjectDatasetReader: Send + Sync {
    /// Check if this reader can handle the given file
    fn can_read(&self, path: &Path) -> bool;

    /// Read and parse the dataset
    fn read(&self, path: &Path) -> Result<ObjectDataset, IndexError>;
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn parse_json(bytes: &[u8]) -> Result<ObjectDataset, IndexError> {
    serde_json::from_slice(bytes).map_err(|e| IndexError::ParseError(format!("Invalid JSON dataset: {}", e)))
}

/// Plain JSON reader for .json files
pub struct JsonReader;

impl ObjectDatasetReader for JsonReader {
    fn can_read(&self, path: &Path) -> bool {
        file_name(path).ends_with(".json")
    }

    fn read(&self, path: &Path) -> Result<ObjectDataset, IndexError> {
        parse_json(&std::fs::read(path)?)
    }
}

/// Gzip-compressed JSON reader for .json.gz files
pub struct GzipJsonReader;

impl ObjectDatasetReader for GzipJsonReader {
    fn can_read(&self, path: &Path) -> bool {
        file_name(path).ends_with(".json.gz")
    }

    fn read(&self, path: &Path) -> Result<ObjectDataset, IndexError> {
        let mut bytes = Vec::new();
        GzDecoder::new(BufReader::new(File::open(path)?)).read_to_end(&mut bytes)?;
        parse_json(&bytes)
    }
}

/// Composite reader that tries multiple readers in sequence
pub struct CompositeReader {
    readers: Vec<Box<dyn ObjectDatasetReader>>,
}

impl CompositeReader {
    /// Create a new composite reader with default readers
    pub fn new() -> Self {
        Self {
            readers: vec![Box::new(GzipJsonReader), Box::new(JsonReader)],
        }
    }

    /// Find a reader that can handle the given file
    pub fn find_reader(&self, path: &Path) -> Option<&dyn ObjectDatasetReader> {
        self.readers.iter().find(|r| r.can_read(path)).map(|r| &**r)
    }
}

impl Default for CompositeReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDatasetReader for CompositeReader {
    fn can_read(&self, path: &Path) -> bool {
        self.readers.iter().any(|r| r.can_read(path))
    }

    fn read(&self, path: &Path) -> Result<ObjectDataset, IndexError> {
        self.find_reader(path)
            .ok_or_else(|| IndexError::UnsupportedFormat(format!("No reader available for file: {}", path.display())))?
            .read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const DATASET: &str = r#"{
        "types": {
            "cells": [
                {"external_id": 1, "proposed_id": 18, "outline": [[10, -50], [20, -50], [20, -10], [10, -10]]},
                {"external_id": 2, "tpoint": 1, "outline": [[0, 0], [1, 0], [1, -1]]}
            ]
        }
    }"#;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cellmap_reader_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_json_reader() {
        let path = temp_path("objects.json");
        std::fs::write(&path, DATASET).unwrap();
        let dataset = CompositeReader::new().read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(dataset.object_count(), 2);
        let cells = &dataset.types["cells"];
        assert_eq!(cells[0].proposed_id, Some(18));
        assert_eq!(cells[1].tpoint, 1);
        assert_eq!(cells[1].zplane, 0);
    }

    #[test]
    fn test_gzip_reader_selected_by_suffix() {
        let path = temp_path("objects.json.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(DATASET.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let reader = CompositeReader::new();
        assert!(GzipJsonReader.can_read(&path));
        let dataset = reader.read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(dataset.object_count(), 2);
    }

    #[test]
    fn test_unsupported_format() {
        let reader = CompositeReader::new();
        let err = reader.read(Path::new("/tmp/objects.csv")).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_invalid_json() {
        let path = temp_path("broken.json");
        std::fs::write(&path, "{\"types\": 3}").unwrap();
        let err = JsonReader.read(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, IndexError::ParseError(_)));
    }
}
