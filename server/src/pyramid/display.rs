//! 16-bit to 8-bit rescaling of display layers

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mosaic::Raster;

fn default_clip_percentile() -> f64 {
    99.9
}

/// How intensities are mapped to the 8-bit display range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayScaling {
    /// Percentile used as upper clip value when `clip_value` is not set
    #[serde(default = "default_clip_percentile")]
    pub clip_percentile: f64,
    /// Fixed upper clip value
    #[serde(default)]
    pub clip_value: Option<u16>,
    /// Values at or below the threshold become black
    #[serde(default)]
    pub threshold: Option<u16>,
}

impl Default for DisplayScaling {
    fn default() -> Self {
        Self {
            clip_percentile: default_clip_percentile(),
            clip_value: None,
            threshold: None,
        }
    }
}

/// Resolved intensity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRange {
    pub lower: u16,
    pub upper: u16,
}

impl DisplayScaling {
    pub fn range(&self, raster: &Raster<u16>) -> DisplayRange {
        let upper = self
            .clip_value
            .unwrap_or_else(|| percentile(raster, self.clip_percentile));
        let lower = self.threshold.unwrap_or(0).min(upper);
        DisplayRange { lower, upper }
    }
}

/// Intensity below which `p` percent of the pixels fall
pub fn percentile(raster: &Raster<u16>, p: f64) -> u16 {
    let total = raster.as_raw().len();
    if total == 0 {
        return 0;
    }
    let mut histogram = vec![0usize; u16::MAX as usize + 1];
    for &v in raster.as_raw() {
        histogram[v as usize] += 1;
    }

    // Small epsilon keeps 99.9% of 1000 at rank 999 despite float rounding
    let rank = (p.clamp(0.0, 100.0) * total as f64 / 100.0 - 1e-9).ceil().max(1.0) as usize;
    let mut seen = 0;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= rank {
            return value as u16;
        }
    }
    u16::MAX
}

/// Linear map of `[lower, upper]` onto `[0, 255]`, clipping outside values
pub fn rescale(raster: &Raster<u16>, range: DisplayRange) -> Raster<u8> {
    debug!("Rescaling {}x{} raster to 8 bit with {:?}", raster.width(), raster.height(), range);
    let span = range.upper.saturating_sub(range.lower) as f64;
    ImageBuffer::from_fn(raster.width(), raster.height(), |x, y| {
        let v = raster.get_pixel(x, y).0[0];
        let out = if v <= range.lower {
            0
        } else if v >= range.upper || span == 0.0 {
            255
        } else {
            (((v - range.lower) as f64 / span) * 255.0).round() as u8
        };
        Luma([out])
    })
}
