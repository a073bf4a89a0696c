//! Multi-resolution tile pyramid generation
//!
//! Levels are written from full resolution (`max_zoom`) down to zoom 0, each
//! level obtained by halving the previous one. Tiles of a level are encoded in
//! parallel. The pyramid is first written to a `<dir>.partial` staging
//! directory and renamed into place once complete, so a failed build never
//! leaves a partial pyramid behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Luma};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::labels::encode_raster;
use crate::mosaic::{CropWindow, Raster, crop_raster};

use super::layout::{max_zoom, tile_counts, tile_path, tile_window};
use super::types::{LayerKind, PyramidError, PyramidManifest};

/// Pixels of one pyramid level
pub trait LevelRaster: Sized + Sync {
    fn dimensions(&self) -> (u32, u32);

    /// Half-resolution copy, rounding odd sizes up
    fn downsample(&self, kind: LayerKind) -> Self;

    fn crop(&self, window: CropWindow) -> Option<Self>;

    /// Encoded tile bytes in the format of `kind`
    fn encode(&self, kind: LayerKind, jpeg_quality: u8) -> Result<Vec<u8>, String>;

    fn digest(&self, hasher: &mut Sha256);
}

impl LevelRaster for Raster<u8> {
    fn dimensions(&self) -> (u32, u32) {
        ImageBuffer::dimensions(self)
    }

    fn downsample(&self, kind: LayerKind) -> Self {
        match kind {
            LayerKind::Display => downsample_mean(self),
            LayerKind::Label | LayerKind::GlobalId => downsample_nearest(self),
        }
    }

    fn crop(&self, window: CropWindow) -> Option<Self> {
        crop_raster(self, window).ok()
    }

    fn encode(&self, kind: LayerKind, jpeg_quality: u8) -> Result<Vec<u8>, String> {
        match kind {
            LayerKind::Display => encode_jpeg(self.as_raw(), self.width(), self.height(), jpeg_quality),
            LayerKind::Label => encode_png(self.as_raw(), self.width(), self.height(), ExtendedColorType::L8),
            LayerKind::GlobalId => Err("8-bit rasters cannot hold global ids".to_string()),
        }
    }

    fn digest(&self, hasher: &mut Sha256) {
        hasher.update(self.as_raw());
    }
}

impl LevelRaster for Raster<u32> {
    fn dimensions(&self) -> (u32, u32) {
        ImageBuffer::dimensions(self)
    }

    fn downsample(&self, _kind: LayerKind) -> Self {
        downsample_nearest(self)
    }

    fn crop(&self, window: CropWindow) -> Option<Self> {
        crop_raster(self, window).ok()
    }

    fn encode(&self, kind: LayerKind, _jpeg_quality: u8) -> Result<Vec<u8>, String> {
        match kind {
            LayerKind::GlobalId => {
                let rgb = encode_raster(self).map_err(|e| e.to_string())?;
                encode_png(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            }
            LayerKind::Label => {
                let mask: Vec<u8> = self.as_raw().iter().map(|&v| if v == 0 { 0 } else { 255 }).collect();
                encode_png(&mask, self.width(), self.height(), ExtendedColorType::L8)
            }
            LayerKind::Display => Err("label rasters are never written as JPEG".to_string()),
        }
    }

    fn digest(&self, hasher: &mut Sha256) {
        for v in self.as_raw() {
            hasher.update(v.to_le_bytes());
        }
    }
}

fn downsample_mean(raster: &Raster<u8>) -> Raster<u8> {
    let (width, height) = raster.dimensions();
    ImageBuffer::from_fn(width.div_ceil(2), height.div_ceil(2), |x, y| {
        let mut sum = 0u32;
        let mut count = 0u32;
        for sy in (2 * y)..(2 * y + 2).min(height) {
            for sx in (2 * x)..(2 * x + 2).min(width) {
                sum += raster.get_pixel(sx, sy).0[0] as u32;
                count += 1;
            }
        }
        Luma([((sum + count / 2) / count.max(1)) as u8])
    })
}

fn downsample_nearest<T: image::Primitive>(raster: &Raster<T>) -> Raster<T> {
    let (width, height) = raster.dimensions();
    ImageBuffer::from_fn(width.div_ceil(2), height.div_ceil(2), |x, y| *raster.get_pixel(2 * x, 2 * y))
}

fn encode_jpeg(raw: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(raw, width, height, ExtendedColorType::L8)
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    Ok(buffer)
}

fn encode_png(raw: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(raw, width, height, color)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(buffer)
}

/// Builds tile pyramids from aligned mosaics
#[derive(Debug, Clone)]
pub struct PyramidBuilder {
    tile_size: u32,
    jpeg_quality: u8,
    overwrite: bool,
}

impl PyramidBuilder {
    pub const DEFAULT_TILE_SIZE: u32 = 256;

    pub fn new(tile_size: u32) -> Result<Self, PyramidError> {
        if tile_size < 16 || !tile_size.is_power_of_two() {
            return Err(PyramidError::InvalidTileSize(tile_size));
        }
        Ok(Self {
            tile_size,
            jpeg_quality: 85,
            overwrite: false,
        })
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Write the full pyramid of `raster` into `output_dir`
    pub fn build<R: LevelRaster>(
        &self,
        raster: &R,
        kind: LayerKind,
        output_dir: &Path,
    ) -> Result<PyramidManifest, PyramidError> {
        let (width, height) = raster.dimensions();
        if width == 0 || height == 0 {
            return Err(PyramidError::EmptyMosaic);
        }
        if output_dir.exists() && !self.overwrite {
            return Err(PyramidError::OutputExists(output_dir.display().to_string()));
        }

        let staging = staging_dir(output_dir);
        if staging.exists() {
            warn!("Removing stale staging directory {:?}", staging);
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let start = Instant::now();
        let manifest = match self.write_levels(raster, kind, &staging) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!("Failed to remove staging directory {:?}: {}", staging, cleanup);
                }
                return Err(e);
            }
        };

        if output_dir.exists() {
            fs::remove_dir_all(output_dir)?;
        }
        fs::rename(&staging, output_dir)?;

        info!(
            "Built {:?} pyramid {:?}: {}x{}, {} zoom levels in {:?}",
            kind,
            output_dir,
            width,
            height,
            manifest.max_zoom + 1,
            start.elapsed()
        );
        Ok(manifest)
    }

    fn write_levels<R: LevelRaster>(
        &self,
        raster: &R,
        kind: LayerKind,
        root: &Path,
    ) -> Result<PyramidManifest, PyramidError> {
        let (width, height) = raster.dimensions();
        let max_zoom = max_zoom(width, height, self.tile_size);

        let mut hasher = Sha256::new();
        raster.digest(&mut hasher);
        let sha256 = hex::encode(hasher.finalize());

        let mut downsampled: Option<R> = None;
        for z in (0..=max_zoom).rev() {
            let level = downsampled.as_ref().unwrap_or(raster);
            self.write_level(level, kind, z, root)?;
            if z > 0 {
                let next = level.downsample(kind);
                downsampled = Some(next);
            }
        }

        let manifest = PyramidManifest {
            width,
            height,
            tile_size: self.tile_size,
            max_zoom,
            kind,
            sha256,
        };
        manifest.save(root)?;
        Ok(manifest)
    }

    fn write_level<R: LevelRaster>(&self, level: &R, kind: LayerKind, z: u32, root: &Path) -> Result<(), PyramidError> {
        let (width, height) = level.dimensions();
        let (columns, rows) = tile_counts(width, height, self.tile_size);
        fs::create_dir_all(root.join(z.to_string()))?;

        let tiles: Vec<(u32, u32)> = (0..rows)
            .flat_map(|row| (0..columns).map(move |column| (column, row)))
            .collect();

        tiles.par_iter().try_for_each(|&(column, row)| {
            let encode_error = |reason: String| PyramidError::EncodeError { z, column, row, reason };
            let tile = tile_window(width, height, self.tile_size, column, row)
                .and_then(|window| level.crop(window))
                .ok_or_else(|| encode_error("tile outside level".to_string()))?;
            let bytes = tile.encode(kind, self.jpeg_quality).map_err(encode_error)?;
            fs::write(tile_path(root, z, column, row, kind), bytes)?;
            Ok::<(), PyramidError>(())
        })?;

        debug!("Wrote zoom {}: {}x{} px, {} tiles", z, width, height, tiles.len());
        Ok(())
    }
}

fn staging_dir(output_dir: &Path) -> PathBuf {
    let name = output_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pyramid".to_string());
    output_dir.with_file_name(format!("{}.partial", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::layout::parse_tile_name;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cellmap_pyramid_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let _ = fs::remove_dir_all(staging_dir(&dir));
        dir
    }

    fn gradient(width: u32, height: u32) -> Raster<u8> {
        ImageBuffer::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_level_directories_and_edge_tiles() {
        let dir = temp_dir("levels");
        let builder = PyramidBuilder::new(64).unwrap();
        let manifest = builder.build(&gradient(200, 100), LayerKind::Display, &dir).unwrap();

        assert_eq!(manifest.max_zoom, 2);
        assert!(dir.join("pyramid.json").exists());
        assert!(!staging_dir(&dir).exists());

        // Full resolution: 200x100 -> 4x2 tiles, right column 8 px wide
        let z2: Vec<String> = fs::read_dir(dir.join("2"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(z2.len(), 8);
        assert!(z2.iter().all(|n| parse_tile_name(n).is_some_and(|(z, _, _)| z == 2)));
        let edge = image::open(dir.join("2").join("2-3-1.jpg")).unwrap();
        assert_eq!((edge.width(), edge.height()), (8, 36));

        // Zoom 0 is a single 50x25 tile
        let top = image::open(dir.join("0").join("0-0-0.jpg")).unwrap();
        assert_eq!((top.width(), top.height()), (50, 25));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_existing_output_requires_overwrite() {
        let dir = temp_dir("exists");
        let builder = PyramidBuilder::new(64).unwrap();
        builder.build(&gradient(10, 10), LayerKind::Display, &dir).unwrap();

        let err = builder.build(&gradient(10, 10), LayerKind::Display, &dir).unwrap_err();
        assert!(matches!(err, PyramidError::OutputExists(_)));

        builder
            .clone()
            .with_overwrite(true)
            .build(&gradient(10, 10), LayerKind::Display, &dir)
            .unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = temp_dir("det_a");
        let b = temp_dir("det_b");
        let builder = PyramidBuilder::new(32).unwrap();
        let labels: Raster<u32> = ImageBuffer::from_fn(70, 40, |x, y| Luma([x / 10 + 100 * (y / 10)]));

        let ma = builder.build(&labels, LayerKind::GlobalId, &a).unwrap();
        let mb = builder.build(&labels, LayerKind::GlobalId, &b).unwrap();
        assert_eq!(ma, mb);
        for z in 0..=ma.max_zoom {
            let name = format!("{}-0-0.png", z);
            assert_eq!(
                fs::read(a.join(z.to_string()).join(&name)).unwrap(),
                fs::read(b.join(z.to_string()).join(&name)).unwrap()
            );
        }

        fs::remove_dir_all(&a).unwrap();
        fs::remove_dir_all(&b).unwrap();
    }

    #[test]
    fn test_global_id_tiles_are_lossless() {
        let dir = temp_dir("ids");
        let labels: Raster<u32> = ImageBuffer::from_fn(16, 16, |x, y| Luma([70_000 + x + 16 * y]));
        PyramidBuilder::new(16)
            .unwrap()
            .build(&labels, LayerKind::GlobalId, &dir)
            .unwrap();

        let tile = image::open(dir.join("0").join("0-0-0.png")).unwrap().into_rgb8();
        let decoded: Vec<u32> = tile.pixels().map(|p| crate::labels::decode(p.0)).collect();
        assert_eq!(&decoded, labels.as_raw());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_build_leaves_nothing() {
        let dir = temp_dir("overflow");
        let labels: Raster<u32> = ImageBuffer::from_pixel(8, 8, Luma([u32::MAX]));
        let err = PyramidBuilder::new(16)
            .unwrap()
            .build(&labels, LayerKind::GlobalId, &dir)
            .unwrap_err();
        assert!(matches!(err, PyramidError::EncodeError { .. }));
        assert!(!dir.exists());
        assert!(!staging_dir(&dir).exists());
    }

    #[test]
    fn test_downsampling() {
        let raster: Raster<u8> = ImageBuffer::from_fn(3, 2, |x, _| Luma([(x * 100) as u8]));
        let mean = downsample_mean(&raster);
        assert_eq!(mean.dimensions(), (2, 1));
        assert_eq!(mean.as_raw(), &vec![50, 200]);

        let nearest = downsample_nearest(&raster);
        assert_eq!(nearest.as_raw(), &vec![0, 200]);
    }

    #[test]
    fn test_invalid_tile_size() {
        assert!(matches!(PyramidBuilder::new(100), Err(PyramidError::InvalidTileSize(100))));
        assert!(matches!(PyramidBuilder::new(8), Err(PyramidError::InvalidTileSize(8))));
    }
}
