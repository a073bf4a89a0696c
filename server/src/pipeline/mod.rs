//! Batch pipeline module
//!
//! Turns the site images of one experiment into published pyramid layers and
//! an object index snapshot, driven by a JSON job file.

pub mod job;
pub mod run;

pub use job::{AlignmentMode, CycleSource, DisplayLayer, JobConfig, JobError, ObjectLayer};
pub use run::{Pipeline, PipelineError, PipelineReport, STAGING_DIR, id_layer_name, snapshot_path};
