//! Acquisition grid module
//!
//! Locates site images in the acquisition grid from file names or stage
//! coordinates and arranges them into a row/column grid.

pub mod layout;
pub mod locator;
pub mod types;

pub use layout::{Grid, ScanOrder};
pub use locator::{
    GridLocator, LocatorConfig, StageLayout, StagePosition, StageSite, grid_from_sites, planes_from_sites,
    positions_from_stage,
};
pub use types::{GridError, GridPosition, ImageKind, ImageMetadata, SiteImage};
