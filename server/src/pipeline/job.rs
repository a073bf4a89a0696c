//! Batch job description
//!
//! A job is a JSON file naming the experiment, where site images of each
//! cycle live, which channels become display layers and which label images
//! become object types. It is validated once at load time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{GridLocator, LocatorConfig};
use crate::index::{CompositeReader, ObjectDatasetReader};
use crate::mosaic::YAxis;
use crate::pyramid::DisplayScaling;
use crate::query::registry::is_valid_experiment_id;

/// Errors that can occur when loading a job file
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to read job file '{path}': {reason}")]
    ReadError { path: String, reason: String },

    #[error("Invalid job '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl JobError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        JobError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn default_tile_size() -> u32 {
    256
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_true() -> bool {
    true
}

/// Site images and registration results of one acquisition cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSource {
    pub cycle: u32,
    pub image_dir: PathBuf,
    /// Shift descriptor written by the registration step; none means unshifted
    #[serde(default)]
    pub shift_file: Option<PathBuf>,
}

/// How the cycles of a job are brought onto their common region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Crop stitched mosaics by the median shift of each cycle
    #[default]
    Mosaic,
    /// Crop every site by its own shift before stitching
    Sites,
}

/// One channel rendered as an 8-bit display pyramid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayLayer {
    /// Channel name as captured by the `channel` group of the pattern
    pub channel: String,
    pub cycle: u32,
    #[serde(default)]
    pub scaling: DisplayScaling,
    /// Time point to show when the channel was imaged more than once
    #[serde(default)]
    pub tpoint: Option<u32>,
    /// Z-plane to show when the channel was imaged as a stack
    #[serde(default)]
    pub zplane: Option<u32>,
}

/// Label images of one object type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectLayer {
    pub object_type: String,
    pub cycle: u32,
    pub label_dir: PathBuf,
    /// File name pattern of the label images, defaults to the job pattern
    #[serde(default)]
    pub pattern: Option<String>,
    /// Objects whose parent touches the site border are removed
    #[serde(default)]
    pub parent: Option<String>,
    /// Write a binary mask pyramid of the objects
    #[serde(default = "default_true")]
    pub mask_layer: bool,
    /// Write an RGB-encoded global id pyramid of the objects
    #[serde(default = "default_true")]
    pub id_layer: bool,
}

/// A complete batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub experiment_id: String,
    /// Root of the published experiments
    pub data_dir: PathBuf,
    pub locator: LocatorConfig,
    #[serde(default)]
    pub reference_cycle: u32,
    /// Axis convention of the shift files
    #[serde(default)]
    pub y_axis: YAxis,
    #[serde(default)]
    pub alignment: AlignmentMode,
    pub cycles: Vec<CycleSource>,
    #[serde(default)]
    pub layers: Vec<DisplayLayer>,
    #[serde(default)]
    pub objects: Vec<ObjectLayer>,
    /// Object datasets from an external segmentation tool, in map space
    #[serde(default)]
    pub datasets: Vec<PathBuf>,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Replace previously published output of the experiment
    #[serde(default)]
    pub overwrite: bool,
}

impl JobConfig {
    /// Read and validate a job file
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let read_error = |reason: String| JobError::ReadError {
            path: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| read_error(e.to_string()))?;
        let job: JobConfig = serde_json::from_slice(&bytes).map_err(|e| read_error(e.to_string()))?;
        job.validate()?;
        Ok(job)
    }

    /// Check everything that can be checked before touching pixels
    pub fn validate(&self) -> Result<(), JobError> {
        if !is_valid_experiment_id(&self.experiment_id) {
            return Err(JobError::invalid(
                "experiment_id",
                format!("'{}' is not a plain directory name", self.experiment_id),
            ));
        }
        if self.layers.is_empty() && self.objects.is_empty() && self.datasets.is_empty() {
            return Err(JobError::invalid("layers", "job has neither display layers nor objects"));
        }
        if self.tile_size < 16 || !self.tile_size.is_power_of_two() {
            return Err(JobError::invalid(
                "tile_size",
                format!("{} is not a power of two >= 16", self.tile_size),
            ));
        }
        GridLocator::new(self.locator.clone()).map_err(|e| JobError::invalid("locator.pattern", e.to_string()))?;

        let mut cycles = BTreeSet::new();
        for source in &self.cycles {
            if !cycles.insert(source.cycle) {
                return Err(JobError::invalid("cycles", format!("cycle {} listed twice", source.cycle)));
            }
            if !source.image_dir.is_dir() {
                return Err(JobError::invalid(
                    "cycles.image_dir",
                    format!("{:?} is not a directory", source.image_dir),
                ));
            }
            if let Some(shift_file) = &source.shift_file
                && !shift_file.is_file()
            {
                return Err(JobError::invalid(
                    "cycles.shift_file",
                    format!("{:?} does not exist", shift_file),
                ));
            }
        }
        if !cycles.contains(&self.reference_cycle) {
            return Err(JobError::invalid(
                "reference_cycle",
                format!("cycle {} is not listed in cycles", self.reference_cycle),
            ));
        }

        let mut names = BTreeSet::new();
        for layer in &self.layers {
            if !cycles.contains(&layer.cycle) {
                return Err(JobError::invalid(
                    "layers.cycle",
                    format!("layer '{}' refers to unknown cycle {}", layer.channel, layer.cycle),
                ));
            }
            if !is_valid_experiment_id(&layer.channel) || !names.insert(layer.channel.clone()) {
                return Err(JobError::invalid(
                    "layers.channel",
                    format!("'{}' is not a unique plain name", layer.channel),
                ));
            }
        }

        let object_types: BTreeSet<&str> = self.objects.iter().map(|o| o.object_type.as_str()).collect();
        for object in &self.objects {
            if !cycles.contains(&object.cycle) {
                return Err(JobError::invalid(
                    "objects.cycle",
                    format!("objects '{}' refer to unknown cycle {}", object.object_type, object.cycle),
                ));
            }
            if !is_valid_experiment_id(&object.object_type) || !names.insert(object.object_type.clone()) {
                return Err(JobError::invalid(
                    "objects.object_type",
                    format!("'{}' is not a unique plain name", object.object_type),
                ));
            }
            if !object.label_dir.is_dir() {
                return Err(JobError::invalid(
                    "objects.label_dir",
                    format!("{:?} is not a directory", object.label_dir),
                ));
            }
            if let Some(pattern) = &object.pattern {
                let config = LocatorConfig {
                    pattern: pattern.clone(),
                    ..self.locator.clone()
                };
                GridLocator::new(config).map_err(|e| JobError::invalid("objects.pattern", e.to_string()))?;
            }
            if let Some(parent) = &object.parent
                && (parent == &object.object_type || !object_types.contains(parent.as_str()))
            {
                return Err(JobError::invalid(
                    "objects.parent",
                    format!("'{}' is not another object type of the job", parent),
                ));
            }
        }

        let reader = CompositeReader::new();
        for dataset in &self.datasets {
            if !dataset.is_file() || !reader.can_read(dataset) {
                return Err(JobError::invalid(
                    "datasets",
                    format!("{:?} is not a readable object dataset", dataset),
                ));
            }
        }
        Ok(())
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.data_dir.join(&self.experiment_id)
    }

    pub fn cycle(&self, cycle: u32) -> Option<&CycleSource> {
        self.cycles.iter().find(|c| c.cycle == cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cellmap_job_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn job(dir: &Path) -> JobConfig {
        serde_json::from_value(serde_json::json!({
            "experiment_id": "plate1",
            "data_dir": dir.join("data"),
            "locator": { "pattern": r"r(?P<row>\d+)_c(?P<column>\d+)_(?P<channel>\w+)\.png" },
            "cycles": [{ "cycle": 0, "image_dir": dir }],
            "layers": [{ "channel": "dapi", "cycle": 0 }],
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_and_valid_job() {
        let dir = temp_dir("valid");
        let job = job(&dir);
        assert_eq!(job.tile_size, 256);
        assert_eq!(job.y_axis, YAxis::Down);
        assert_eq!(job.alignment, AlignmentMode::Mosaic);
        assert_eq!(job.layers[0].zplane, None);
        assert!(job.locator.one_based);
        assert!(job.validate().is_ok());
        assert_eq!(job.experiment_dir(), dir.join("data").join("plate1"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejects_invalid_jobs() {
        let dir = temp_dir("invalid");

        let mut bad = job(&dir);
        bad.layers.clear();
        assert!(matches!(bad.validate(), Err(JobError::Invalid { field, .. }) if field == "layers"));

        let mut bad = job(&dir);
        bad.tile_size = 300;
        assert!(matches!(bad.validate(), Err(JobError::Invalid { field, .. }) if field == "tile_size"));

        let mut bad = job(&dir);
        bad.locator.pattern = "(?P<row>".to_string();
        assert!(bad.validate().is_err());

        let mut bad = job(&dir);
        bad.reference_cycle = 2;
        assert!(bad.validate().is_err());

        let mut bad = job(&dir);
        bad.cycles[0].shift_file = Some(dir.join("missing.json"));
        assert!(matches!(bad.validate(), Err(JobError::Invalid { field, .. }) if field == "cycles.shift_file"));

        let mut bad = job(&dir);
        bad.datasets.push(dir.join("objects.csv"));
        assert!(matches!(bad.validate(), Err(JobError::Invalid { field, .. }) if field == "datasets"));

        let mut bad = job(&dir);
        bad.experiment_id = "../escape".to_string();
        assert!(bad.validate().is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
