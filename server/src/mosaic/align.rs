//! Cross-cycle alignment of mosaics
//!
//! Every cycle is placed in a common pixel frame at its (rounded) shift
//! relative to the reference cycle. The intersection of all placed mosaics is
//! the region imaged in every cycle; each mosaic is cropped to it.
//!
//! Shifts are in pixel space: x grows to the right, y grows downward. Shift
//! files written in stage convention (y up) are converted on load.

use std::collections::BTreeMap;
use std::path::Path;

use image::Primitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{CropWindow, Mosaic, MosaicError, Raster, crop_raster};

/// Errors that can occur while aligning cycles
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("No common overlap between cycles {cycles:?}")]
    NoCommonOverlap { cycles: Vec<u32> },

    #[error("Shift {shift} of cycle {cycle} exceeds the maximal tolerated shift {max_shift}")]
    ShiftOutOfBounds { cycle: u32, shift: f64, max_shift: u32 },

    #[error("No shift descriptor for cycle {0}")]
    MissingShift(u32),

    #[error("Reference cycle {0} has no mosaic")]
    UnknownReferenceCycle(u32),

    #[error("Invalid shift file '{path}': {reason}")]
    InvalidShiftFile { path: String, reason: String },

    #[error("Mosaic error: {0}")]
    Mosaic(#[from] MosaicError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Direction of the y axis in a shift file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YAxis {
    /// Image convention, y grows with the row index
    #[default]
    Down,
    /// Stage convention, y grows upward; values are negated on load
    Up,
}

/// Registration results of one cycle as written by the registration step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftFile {
    pub x_shift: Vec<f64>,
    pub y_shift: Vec<f64>,
    pub file_name: Vec<String>,
    pub upper_overlap: u32,
    pub lower_overlap: u32,
    pub right_overlap: u32,
    pub left_overlap: u32,
    pub max_shift: u32,
    /// Per site flag; 1 marks a site whose shift could not be determined
    #[serde(default)]
    pub no_shift_index: Vec<u8>,
    #[serde(default)]
    pub no_shift_count: usize,
    #[serde(default)]
    pub segmentation_dir: String,
    #[serde(default)]
    pub segmentation_filename_trunk: String,
    pub cycle_num: u32,
}

impl ShiftFile {
    /// Read and validate a shift file
    pub fn load(path: &Path) -> Result<Self, AlignError> {
        let bytes = std::fs::read(path)?;
        let file: ShiftFile =
            serde_json::from_slice(&bytes).map_err(|e| AlignError::InvalidShiftFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        file.validate(path)?;
        Ok(file)
    }

    fn validate(&self, path: &Path) -> Result<(), AlignError> {
        let sites = self.x_shift.len();
        let invalid = |reason: String| AlignError::InvalidShiftFile {
            path: path.display().to_string(),
            reason,
        };

        if self.y_shift.len() != sites || self.file_name.len() != sites {
            return Err(invalid(format!(
                "xShift, yShift and fileName differ in length ({}, {}, {})",
                sites,
                self.y_shift.len(),
                self.file_name.len()
            )));
        }
        if !self.no_shift_index.is_empty() && self.no_shift_index.len() != sites {
            return Err(invalid(format!(
                "noShiftIndex has {} entries for {} sites",
                self.no_shift_index.len(),
                sites
            )));
        }
        let flagged = self.no_shift_index.iter().filter(|&&f| f != 0).count();
        if flagged != self.no_shift_count {
            warn!(
                "Shift file {:?}: noShiftCount={} but {} sites are flagged",
                path, self.no_shift_count, flagged
            );
        }
        Ok(())
    }

    fn is_unreliable(&self, site: usize) -> bool {
        self.no_shift_index.get(site).is_some_and(|&f| f != 0)
    }

    /// Shift of one site in pixel space; zero for flagged sites
    pub fn site_shift(&self, site: usize, y_axis: YAxis) -> (f64, f64) {
        if self.is_unreliable(site) {
            return (0.0, 0.0);
        }
        let x = self.x_shift.get(site).copied().unwrap_or(0.0);
        let y = self.y_shift.get(site).copied().unwrap_or(0.0);
        match y_axis {
            YAxis::Down => (x, y),
            YAxis::Up => (x, -y),
        }
    }

    /// Cycle-level descriptor: median of the reliable site shifts
    pub fn descriptor(&self, y_axis: YAxis) -> ShiftDescriptor {
        let reliable: Vec<usize> = (0..self.x_shift.len())
            .filter(|&site| !self.is_unreliable(site))
            .collect();
        let xs: Vec<f64> = reliable.iter().map(|&s| self.site_shift(s, y_axis).0).collect();
        let ys: Vec<f64> = reliable.iter().map(|&s| self.site_shift(s, y_axis).1).collect();

        ShiftDescriptor::new(
            median(xs),
            median(ys),
            Overlaps {
                upper: self.upper_overlap,
                lower: self.lower_overlap,
                right: self.right_overlap,
                left: self.left_overlap,
            },
            self.max_shift,
        )
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Pixels lost at each side of a site when all cycles are overlaid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Overlaps {
    pub upper: u32,
    pub lower: u32,
    pub right: u32,
    pub left: u32,
}

/// Displacement of one cycle relative to the reference cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftDescriptor {
    pub x_shift: f64,
    pub y_shift: f64,
    pub overlaps: Overlaps,
    pub max_shift: u32,
}

impl ShiftDescriptor {
    /// Create a descriptor, limiting every overlap to `max_shift`
    pub fn new(x_shift: f64, y_shift: f64, overlaps: Overlaps, max_shift: u32) -> Self {
        Self {
            x_shift,
            y_shift,
            overlaps: Overlaps {
                upper: overlaps.upper.min(max_shift),
                lower: overlaps.lower.min(max_shift),
                right: overlaps.right.min(max_shift),
                left: overlaps.left.min(max_shift),
            },
            max_shift,
        }
    }

    /// A descriptor for a cycle that needs no correction
    pub fn zero(max_shift: u32) -> Self {
        Self::new(0.0, 0.0, Overlaps::default(), max_shift)
    }

    fn check(&self, cycle: u32, shift: f64) -> Result<f64, AlignError> {
        if shift.abs() > self.max_shift as f64 {
            return Err(AlignError::ShiftOutOfBounds {
                cycle,
                shift,
                max_shift: self.max_shift,
            });
        }
        Ok(shift)
    }

    /// Rounded pixel shift, clamped to the maximal tolerated shift
    pub fn pixel_shift(&self, cycle: u32) -> (i64, i64) {
        let limit = self.max_shift as f64;
        let clamp = |shift: f64| match self.check(cycle, shift) {
            Ok(shift) => shift,
            Err(e) => {
                warn!("{}; clamping", e);
                shift.clamp(-limit, limit)
            }
        };
        (
            clamp(self.x_shift).round() as i64,
            clamp(self.y_shift).round() as i64,
        )
    }
}

/// Axis-aligned rectangle with exclusive max corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Rect {
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> i64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> i64 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Overlapping region, `None` when the rectangles do not overlap
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        (!rect.is_empty()).then_some(rect)
    }
}

/// Crop windows that bring every cycle onto the common region
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentPlan {
    /// Common region in the reference cycle's pixel frame
    pub intersection: Rect,
    pub crops: BTreeMap<u32, CropWindow>,
}

impl AlignmentPlan {
    pub fn crop(&self, cycle: u32) -> Option<CropWindow> {
        self.crops.get(&cycle).copied()
    }

    pub fn width(&self) -> u32 {
        self.intersection.width() as u32
    }

    pub fn height(&self) -> u32 {
        self.intersection.height() as u32
    }
}

/// Aligns the mosaics of all cycles to a reference cycle
pub struct CycleAligner {
    reference_cycle: u32,
}

impl CycleAligner {
    pub fn new(reference_cycle: u32) -> Self {
        Self { reference_cycle }
    }

    pub fn reference_cycle(&self) -> u32 {
        self.reference_cycle
    }

    /// Compute crop windows from mosaic dimensions and shift descriptors
    pub fn plan(
        &self,
        dimensions: &BTreeMap<u32, (u32, u32)>,
        shifts: &BTreeMap<u32, ShiftDescriptor>,
    ) -> Result<AlignmentPlan, AlignError> {
        if !dimensions.contains_key(&self.reference_cycle) {
            return Err(AlignError::UnknownReferenceCycle(self.reference_cycle));
        }

        let reference = shifts
            .get(&self.reference_cycle)
            .map(|s| s.pixel_shift(self.reference_cycle))
            .unwrap_or((0, 0));

        let mut boxes = BTreeMap::new();
        for (&cycle, &(width, height)) in dimensions {
            let shift = shifts.get(&cycle).ok_or(AlignError::MissingShift(cycle))?;
            let (x, y) = shift.pixel_shift(cycle);
            let (x, y) = (x - reference.0, y - reference.1);
            boxes.insert(cycle, Rect::new(x, y, x + width as i64, y + height as i64));
        }

        let cycles: Vec<u32> = boxes.keys().copied().collect();
        let mut intersection: Option<Rect> = None;
        for rect in boxes.values() {
            intersection = match intersection {
                None if rect.is_empty() => None,
                None => Some(*rect),
                Some(current) => current.intersection(rect),
            };
            if intersection.is_none() {
                return Err(AlignError::NoCommonOverlap { cycles });
            }
        }
        let intersection = intersection.ok_or(AlignError::NoCommonOverlap {
            cycles: cycles.clone(),
        })?;

        let crops = boxes
            .iter()
            .map(|(&cycle, rect)| {
                let window = CropWindow {
                    x: (intersection.min_x - rect.min_x) as u32,
                    y: (intersection.min_y - rect.min_y) as u32,
                    width: intersection.width() as u32,
                    height: intersection.height() as u32,
                };
                debug!("Cycle {} crop window: {:?}", cycle, window);
                (cycle, window)
            })
            .collect();

        info!(
            "Common region of {} cycles: {}x{}",
            cycles.len(),
            intersection.width(),
            intersection.height()
        );

        Ok(AlignmentPlan {
            intersection,
            crops,
        })
    }

    /// Crop every cycle's mosaic to the region shared by all cycles
    pub fn align<T: Primitive>(
        &self,
        mut mosaics: BTreeMap<u32, Mosaic<T>>,
        shifts: &BTreeMap<u32, ShiftDescriptor>,
    ) -> Result<BTreeMap<u32, Mosaic<T>>, AlignError> {
        let dimensions = mosaics
            .iter()
            .map(|(&cycle, m)| (cycle, (m.width(), m.height())))
            .collect();
        let plan = self.plan(&dimensions, shifts)?;

        for (cycle, mosaic) in mosaics.iter_mut() {
            if let Some(window) = plan.crop(*cycle) {
                mosaic.crop(window)?;
            }
        }
        Ok(mosaics)
    }
}

/// Crop a single site by its own shift and the descriptor's overlaps
///
/// All sites of all cycles come out with the same size: the site size minus
/// the overlaps on each side. Shifts larger than the overlap on the side they
/// point to are clamped so the window stays inside the site.
pub fn crop_site<T: Primitive>(
    site: &Raster<T>,
    shift: (f64, f64),
    descriptor: &ShiftDescriptor,
) -> Result<Raster<T>, AlignError> {
    let o = descriptor.overlaps;
    let (width, height) = site.dimensions();

    let out_width = width.checked_sub(o.left + o.right).filter(|w| *w > 0);
    let out_height = height.checked_sub(o.upper + o.lower).filter(|h| *h > 0);
    let (Some(out_width), Some(out_height)) = (out_width, out_height) else {
        return Err(AlignError::NoCommonOverlap { cycles: Vec::new() });
    };

    let sx = (shift.0.round() as i64).clamp(-(o.left as i64), o.right as i64);
    let sy = (shift.1.round() as i64).clamp(-(o.upper as i64), o.lower as i64);

    let window = CropWindow {
        x: (o.left as i64 + sx) as u32,
        y: (o.upper as i64 + sy) as u32,
        width: out_width,
        height: out_height,
    };
    Ok(crop_raster(site, window)?)
}
