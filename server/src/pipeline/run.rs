//! End-to-end run of one batch job
//!
//! Site images are located per cycle, time point and z-plane, then stitched.
//! Cycles are brought onto their common region either by cropping whole
//! mosaics or by cropping every site by its own shift. Label images get
//! grid-wide global ids; their outlines feed the object index, which is
//! written as the experiment's snapshot.
//!
//! A run writes into `<data_dir>/.staging/<experiment>` and moves the result
//! into place only after every layer and the snapshot were written, so a
//! failed run leaves previously published output untouched.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::Primitive;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grid::{Grid, GridError, GridLocator, ImageKind, LocatorConfig, ScanOrder, SiteImage, planes_from_sites};
use crate::index::{
    AssignedIds, CompositeReader, IdIssuer, IndexError, ObjectDataset, ObjectDatasetReader, PreferProposed,
    RawObject, SNAPSHOT_FILE, SpatialIndexBuilder, ring_to_map, write_snapshot,
};
use crate::labels::{GlobalIdAssigner, LabelError, MAX_RGB_ID, extract_outlines, mask_border_children};
use crate::mosaic::{
    AlignError, AlignmentPlan, CropWindow, CycleAligner, MosaicError, Overlaps, Raster, ShiftDescriptor, ShiftFile,
    YAxis, assemble, assemble_rasters, crop_site,
};
use crate::pyramid::{LayerKind, PyramidBuilder, PyramidError, max_zoom, rescale};
use crate::tiles::LAYERS_DIR;

use super::job::{AlignmentMode, DisplayLayer, JobConfig, JobError, ObjectLayer};

/// Directory below the data directory holding experiments being built
pub const STAGING_DIR: &str = ".staging";

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Mosaic error: {0}")]
    Mosaic(#[from] MosaicError),

    #[error("Alignment error: {0}")]
    Align(#[from] AlignError),

    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("No site images for '{layer}' in {dir}")]
    NoImages { layer: String, dir: String },

    #[error("Layer '{layer}' has images of several planes (tpoint, zplane) {planes:?}; select one")]
    AmbiguousPlane { layer: String, planes: Vec<(u32, u32)> },

    #[error("Mosaics of cycle {cycle} differ in size: {expected:?} but '{layer}' is {found:?}")]
    CycleSizeMismatch {
        cycle: u32,
        layer: String,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Cropped sites of cycle {cycle} stitch to {found:?}, other cycles to {expected:?}")]
    CycleExtentMismatch {
        cycle: u32,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Object type '{0}' is defined more than once")]
    DuplicateType(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub experiment_id: String,
    /// Size of the aligned mosaics
    pub width: u32,
    pub height: u32,
    pub max_zoom: u32,
    /// Published pyramid layers
    pub layers: Vec<String>,
    /// Indexed objects per type
    pub objects: BTreeMap<String, usize>,
    /// Largest global id per label-derived type
    pub max_ids: BTreeMap<String, u32>,
}

/// Time point and z-plane of a set of site images
type Plane = (u32, u32);

/// Sites and label matrices of one plane
struct LabelPlane {
    sites: Grid<SiteImage>,
    labels: Grid<Raster<u32>>,
}

/// Labels of one object type, before and after global id assignment
struct LabelGrid<'a> {
    layer: &'a ObjectLayer,
    planes: BTreeMap<Plane, LabelPlane>,
}

/// Per-site crops for jobs whose sites were registered one by one
struct SiteCrops {
    files: BTreeMap<u32, ShiftFile>,
    /// Overlaps shared by all cycles
    descriptor: ShiftDescriptor,
    y_axis: YAxis,
    order: ScanOrder,
}

impl SiteCrops {
    fn load(job: &JobConfig) -> Result<Self, PipelineError> {
        let mut files = BTreeMap::new();
        let mut overlaps = Overlaps::default();
        let mut max_shift = 0;
        for source in &job.cycles {
            let Some(path) = &source.shift_file else {
                continue;
            };
            let file = ShiftFile::load(path)?;
            let cycle = file.descriptor(job.y_axis);
            overlaps.upper = overlaps.upper.max(cycle.overlaps.upper);
            overlaps.lower = overlaps.lower.max(cycle.overlaps.lower);
            overlaps.left = overlaps.left.max(cycle.overlaps.left);
            overlaps.right = overlaps.right.max(cycle.overlaps.right);
            max_shift = max_shift.max(cycle.max_shift);
            files.insert(source.cycle, file);
        }
        let descriptor = ShiftDescriptor::new(0.0, 0.0, overlaps, max_shift);
        debug!("Site crops of {} shifted cycles: {:?}", files.len(), descriptor.overlaps);
        Ok(Self {
            files,
            descriptor,
            y_axis: job.y_axis,
            order: job.locator.scan_order,
        })
    }

    /// Size of a site after cropping
    fn site_size(&self, (width, height): (u32, u32)) -> (u32, u32) {
        let o = self.descriptor.overlaps;
        (
            width.saturating_sub(o.left + o.right),
            height.saturating_sub(o.upper + o.lower),
        )
    }

    fn crop<T: Primitive>(
        &self,
        cycle: u32,
        grid_width: usize,
        site: &SiteImage,
        raster: Raster<T>,
    ) -> Result<Raster<T>, AlignError> {
        let position = site.position();
        // Shift files list sites in acquisition order
        let index = self.order.site_index(position.row, position.column, grid_width);
        let shift = self
            .files
            .get(&cycle)
            .map_or((0.0, 0.0), |file| file.site_shift(index, self.y_axis));
        crop_site(&raster, shift, &self.descriptor)
    }
}

/// How cycles are brought onto their common region
enum Registration {
    Mosaic(Option<AlignmentPlan>),
    Sites(SiteCrops),
}

impl Registration {
    /// Crop window of a stitched mosaic; sites are cropped before stitching
    fn window(&self, cycle: u32) -> Option<CropWindow> {
        match self {
            Registration::Mosaic(plan) => plan.as_ref().and_then(|p| p.crop(cycle)),
            Registration::Sites(_) => None,
        }
    }

    fn site_crops(&self) -> Option<&SiteCrops> {
        match self {
            Registration::Mosaic(_) => None,
            Registration::Sites(crops) => Some(crops),
        }
    }
}

/// Runs a validated job
pub struct Pipeline {
    job: JobConfig,
    locator: GridLocator,
    builder: PyramidBuilder,
}

impl Pipeline {
    pub fn new(job: JobConfig) -> Result<Self, PipelineError> {
        job.validate()?;
        let locator = GridLocator::new(job.locator.clone())?;
        let builder = PyramidBuilder::new(job.tile_size)?.with_jpeg_quality(job.jpeg_quality);
        Ok(Self { job, locator, builder })
    }

    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        let start = Instant::now();
        let experiment_dir = self.job.experiment_dir();
        if experiment_dir.exists() && !self.job.overwrite {
            return Err(PyramidError::OutputExists(experiment_dir.display().to_string()).into());
        }

        let staging = staging_dir(&self.job);
        if staging.exists() {
            warn!("Removing stale staging directory {:?}", staging);
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(staging.join(LAYERS_DIR))?;
        info!("Running job for experiment '{}'", self.job.experiment_id);

        let report = match self.build(&staging) {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    warn!("Failed to remove staging directory {:?}: {}", staging, cleanup);
                }
                return Err(e);
            }
        };
        replace_dir(&staging, &experiment_dir)?;

        info!(
            "Finished experiment '{}' in {:?}: {}x{}, {} layers, {} objects",
            self.job.experiment_id,
            start.elapsed(),
            report.width,
            report.height,
            report.layers.len(),
            report.objects.values().sum::<usize>()
        );
        Ok(report)
    }

    /// Write every layer and the snapshot of the job into `output_dir`
    fn build(&self, output_dir: &Path) -> Result<PipelineReport, PipelineError> {
        let layers_dir = output_dir.join(LAYERS_DIR);
        let label_types: BTreeSet<&str> = self.job.objects.iter().map(|o| o.object_type.as_str()).collect();
        let datasets = self.read_datasets(&label_types)?;

        let crops = match self.job.alignment {
            AlignmentMode::Mosaic => None,
            AlignmentMode::Sites => Some(SiteCrops::load(&self.job)?),
        };

        let channel_grids = self
            .job
            .layers
            .iter()
            .map(|layer| Ok((layer, self.locate_channel(layer)?)))
            .collect::<Result<Vec<_>, PipelineError>>()?;
        let mut label_grids = self
            .job
            .objects
            .iter()
            .map(|layer| self.load_labels(layer, crops.as_ref()))
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let mut dimensions: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
        for (layer, grid) in &channel_grids {
            record_dimensions(&mut dimensions, layer.cycle, &layer.channel, grid, crops.as_ref())?;
        }
        for labels in &label_grids {
            for plane in labels.planes.values() {
                record_dimensions(
                    &mut dimensions,
                    labels.layer.cycle,
                    &labels.layer.object_type,
                    &plane.sites,
                    crops.as_ref(),
                )?;
            }
        }

        let (registration, (width, height)) = match crops {
            Some(crops) => (Registration::Sites(crops), uniform_extent(&dimensions)?),
            None => {
                let plan = self.alignment_plan(&dimensions)?;
                let extent = plan.as_ref().map_or((0, 0), |p| (p.width(), p.height()));
                (Registration::Mosaic(plan), extent)
            }
        };
        let zoom = if width > 0 && height > 0 {
            max_zoom(width, height, self.job.tile_size)
        } else {
            0
        };

        let mut published = Vec::new();
        for (layer, grid) in &channel_grids {
            self.publish_channel(layer, grid, &registration, &layers_dir)?;
            published.push(layer.channel.clone());
        }

        let issuer: Arc<dyn IdIssuer> = if datasets.is_empty() {
            Arc::new(AssignedIds)
        } else {
            Arc::new(PreferProposed)
        };
        let mut index_builder = SpatialIndexBuilder::new(issuer, zoom, self.job.tile_size);
        let mut max_ids = BTreeMap::new();

        for labels in &mut label_grids {
            let layer = labels.layer;
            let window = registration.window(layer.cycle);
            let mut assigner = GlobalIdAssigner::new(self.job.locator.scan_order);
            index_builder.declare_type(&layer.object_type);
            for (&(tpoint, zplane), plane) in labels.planes.iter_mut() {
                assigner.assign(&mut plane.labels)?;
                let objects = site_objects(plane, window, (width, height));
                debug!(
                    "Extracted {} '{}' objects at tpoint {} zplane {}",
                    objects.len(),
                    layer.object_type,
                    tpoint,
                    zplane
                );
                for object in objects {
                    index_builder.add(&layer.object_type, object)?;
                }
            }
            max_ids.insert(layer.object_type.clone(), assigner.max_id());
        }

        let by_type: BTreeMap<&str, &LabelGrid<'_>> = label_grids
            .iter()
            .map(|labels| (labels.layer.object_type.as_str(), labels))
            .collect();
        for labels in &label_grids {
            let layer = labels.layer;
            let parent = layer.parent.as_deref().and_then(|p| by_type.get(p)).copied();
            let max_id = max_ids.get(&layer.object_type).copied().unwrap_or(0);
            let several = labels.planes.len() > 1;
            for (&plane, child) in &labels.planes {
                let (shown, hidden) = display_labels(child, parent.and_then(|p| p.planes.get(&plane)))?;
                if let Some(parent) = parent
                    && hidden > 0
                {
                    info!(
                        "Hiding {} '{}' objects whose '{}' parent touches a site border",
                        hidden, layer.object_type, parent.layer.object_type
                    );
                }
                let name = plane_layer_name(&layer.object_type, plane, several);
                published.extend(self.publish_labels(
                    layer,
                    &name,
                    &shown,
                    registration.window(layer.cycle),
                    max_id,
                    &layers_dir,
                )?);
            }
        }

        add_datasets(&mut index_builder, datasets)?;

        index_builder.commit_all()?;
        let index = index_builder.finish()?;
        write_snapshot(&output_dir.join(SNAPSHOT_FILE), &index)?;

        let objects = index.infos().into_iter().map(|info| (info.name, info.object_count)).collect();
        Ok(PipelineReport {
            experiment_id: self.job.experiment_id.clone(),
            width,
            height,
            max_zoom: zoom,
            layers: published,
            objects,
            max_ids,
        })
    }

    fn image_dir(&self, cycle: u32) -> Result<&Path, PipelineError> {
        self.job
            .cycle(cycle)
            .map(|c| c.image_dir.as_path())
            .ok_or_else(|| {
                JobError::Invalid {
                    field: "cycles".to_string(),
                    reason: format!("cycle {} is not listed", cycle),
                }
                .into()
            })
    }

    fn locate_channel(&self, layer: &DisplayLayer) -> Result<Grid<SiteImage>, PipelineError> {
        let dir = self.image_dir(layer.cycle)?;
        let kind = ImageKind::Channel {
            name: layer.channel.clone(),
        };
        let no_images = || PipelineError::NoImages {
            layer: layer.channel.clone(),
            dir: dir.display().to_string(),
        };
        let sites: Vec<SiteImage> = self
            .locator
            .scan_directory(dir, &kind)?
            .into_iter()
            .filter(|site| {
                self.locator
                    .channel(&site.metadata.filename)
                    .is_none_or(|channel| channel == layer.channel)
            })
            .filter(|site| in_cycle(&self.locator, site, layer.cycle))
            .filter(|site| {
                let position = site.position();
                layer.tpoint.is_none_or(|t| t == position.tpoint) && layer.zplane.is_none_or(|z| z == position.zplane)
            })
            .collect();
        if sites.is_empty() {
            return Err(no_images());
        }

        let mut planes = planes_from_sites(sites)?;
        if planes.len() > 1 {
            return Err(PipelineError::AmbiguousPlane {
                layer: layer.channel.clone(),
                planes: planes.keys().copied().collect(),
            });
        }
        planes.pop_first().map(|(_, grid)| grid).ok_or_else(no_images)
    }

    fn load_labels<'a>(&self, layer: &'a ObjectLayer, crops: Option<&SiteCrops>) -> Result<LabelGrid<'a>, PipelineError> {
        let kind = ImageKind::Segmentation {
            object_type: layer.object_type.clone(),
        };
        let custom;
        let locator = match &layer.pattern {
            Some(pattern) => {
                custom = GridLocator::new(LocatorConfig {
                    pattern: pattern.clone(),
                    ..self.job.locator.clone()
                })?;
                &custom
            }
            None => &self.locator,
        };
        let sites: Vec<SiteImage> = locator
            .scan_directory(&layer.label_dir, &kind)?
            .into_iter()
            .filter(|site| in_cycle(locator, site, layer.cycle))
            .collect();
        if sites.is_empty() {
            return Err(PipelineError::NoImages {
                layer: layer.object_type.clone(),
                dir: layer.label_dir.display().to_string(),
            });
        }

        let mut planes = BTreeMap::new();
        for (plane, sites) in planes_from_sites(sites)? {
            let labels = load_grid(&sites, |site| -> Result<Raster<u32>, PipelineError> {
                let labels = read_labels(site)?;
                match crops {
                    Some(crops) => Ok(crops.crop(layer.cycle, sites.width(), site, labels)?),
                    None => Ok(labels),
                }
            })?;
            debug!(
                "Loaded {}x{} label sites of '{}' at plane {:?}",
                labels.height(),
                labels.width(),
                layer.object_type,
                plane
            );
            planes.insert(plane, LabelPlane { sites, labels });
        }
        Ok(LabelGrid { layer, planes })
    }

    /// Read every object dataset, rejecting types that are defined twice
    fn read_datasets(&self, label_types: &BTreeSet<&str>) -> Result<Vec<ObjectDataset>, PipelineError> {
        let reader = CompositeReader::new();
        let mut defined: BTreeSet<String> = label_types.iter().map(|t| t.to_string()).collect();
        let mut datasets = Vec::with_capacity(self.job.datasets.len());
        for path in &self.job.datasets {
            let dataset = reader.read(path)?;
            info!(
                "Read object dataset {:?}: {} types, {} objects",
                path,
                dataset.types.len(),
                dataset.object_count()
            );
            if let Some(duplicate) = dataset.types.keys().find(|name| !defined.insert(name.to_string())) {
                return Err(PipelineError::DuplicateType(duplicate.clone()));
            }
            datasets.push(dataset);
        }
        Ok(datasets)
    }

    fn alignment_plan(&self, dimensions: &BTreeMap<u32, (u32, u32)>) -> Result<Option<AlignmentPlan>, PipelineError> {
        if dimensions.is_empty() {
            return Ok(None);
        }
        let mut shifts = BTreeMap::new();
        for &cycle in dimensions.keys() {
            let descriptor = match self.job.cycle(cycle).and_then(|c| c.shift_file.as_ref()) {
                Some(path) => ShiftFile::load(path)?.descriptor(self.job.y_axis),
                None => ShiftDescriptor::zero(0),
            };
            shifts.insert(cycle, descriptor);
        }

        let reference = if dimensions.contains_key(&self.job.reference_cycle) {
            self.job.reference_cycle
        } else {
            // Only cycles with layers take part; fall back to the first of them
            let first = dimensions.keys().next().copied().unwrap_or(self.job.reference_cycle);
            warn!(
                "Reference cycle {} has no layers, aligning to cycle {}",
                self.job.reference_cycle, first
            );
            first
        };
        Ok(Some(CycleAligner::new(reference).plan(dimensions, &shifts)?))
    }

    fn publish_channel(
        &self,
        layer: &DisplayLayer,
        grid: &Grid<SiteImage>,
        registration: &Registration,
        layers_dir: &Path,
    ) -> Result<(), PipelineError> {
        let mosaic = match registration.site_crops() {
            Some(crops) => {
                let sites = load_grid(grid, |site| -> Result<Raster<u16>, PipelineError> {
                    Ok(crops.crop(layer.cycle, grid.width(), site, read_intensities(site)?)?)
                })?;
                assemble_rasters(&sites)?
            }
            None => {
                let mut mosaic = assemble(grid, read_intensities)?;
                if let Some(window) = registration.window(layer.cycle) {
                    mosaic.crop(window)?;
                }
                mosaic
            }
        };
        let range = layer.scaling.range(mosaic.pixels());
        debug!(
            "Display range of '{}': {}..{}",
            layer.channel, range.lower, range.upper
        );
        let display = rescale(mosaic.pixels(), range);
        self.builder
            .build(&display, LayerKind::Display, &layers_dir.join(&layer.channel))?;
        Ok(())
    }

    fn publish_labels(
        &self,
        layer: &ObjectLayer,
        name: &str,
        labels: &Grid<Raster<u32>>,
        window: Option<CropWindow>,
        max_id: u32,
        layers_dir: &Path,
    ) -> Result<Vec<String>, PipelineError> {
        if !layer.mask_layer && !layer.id_layer {
            return Ok(Vec::new());
        }
        let mut mosaic = assemble_rasters(labels)?;
        if let Some(window) = window {
            mosaic.crop(window)?;
        }

        let mut published = Vec::new();
        if layer.mask_layer {
            self.builder
                .build(mosaic.pixels(), LayerKind::Label, &layers_dir.join(name))?;
            published.push(name.to_string());
        }
        if layer.id_layer {
            if max_id > MAX_RGB_ID {
                let err = LabelError::LabelOverflow {
                    id: max_id as u64,
                    max: MAX_RGB_ID,
                };
                warn!("Skipping id layer of '{}': {}", name, err);
            } else {
                let ids = id_layer_name(name);
                self.builder
                    .build(mosaic.pixels(), LayerKind::GlobalId, &layers_dir.join(&ids))?;
                published.push(ids);
            }
        }
        Ok(published)
    }
}

/// Directory name of the RGB id pyramid of an object type
pub fn id_layer_name(object_type: &str) -> String {
    format!("{}_ids", object_type)
}

/// Layer name of one plane; types imaged in a single plane keep their name
fn plane_layer_name(object_type: &str, (tpoint, zplane): Plane, several: bool) -> String {
    if several {
        format!("{}_t{}_z{}", object_type, tpoint, zplane)
    } else {
        object_type.to_string()
    }
}

/// Sites belong to the layer's cycle unless the pattern does not encode one
fn in_cycle(locator: &GridLocator, site: &SiteImage, cycle: u32) -> bool {
    !locator.captures_group("cycle") || site.position().cycle == cycle
}

fn staging_dir(job: &JobConfig) -> PathBuf {
    job.data_dir.join(STAGING_DIR).join(&job.experiment_id)
}

/// Move a finished staging directory into place, replacing older output
fn replace_dir(staging: &Path, target: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !target.exists() {
        std::fs::rename(staging, target)?;
        return Ok(());
    }

    let mut retired_name = staging.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    retired_name.push(".old");
    let retired = staging.with_file_name(retired_name);
    if retired.exists() {
        std::fs::remove_dir_all(&retired)?;
    }
    std::fs::rename(target, &retired)?;
    if let Err(e) = std::fs::rename(staging, target) {
        std::fs::rename(&retired, target)?;
        return Err(e.into());
    }
    if let Err(e) = std::fs::remove_dir_all(&retired) {
        warn!("Failed to remove replaced output {:?}: {}", retired, e);
    }
    debug!("Replaced {:?} with new output", target);
    Ok(())
}

fn record_dimensions(
    dimensions: &mut BTreeMap<u32, (u32, u32)>,
    cycle: u32,
    layer: &str,
    grid: &Grid<SiteImage>,
    crops: Option<&SiteCrops>,
) -> Result<(), PipelineError> {
    let Some(site) = grid.get(0, 0) else {
        return Err(MosaicError::IncompleteGrid { row: 0, column: 0 }.into());
    };
    let size = (site.width(), site.height());
    let (site_width, site_height) = crops.map_or(size, |c| c.site_size(size));
    let found = (
        site_width * grid.width() as u32,
        site_height * grid.height() as u32,
    );
    let expected = *dimensions.entry(cycle).or_insert(found);
    if expected != found {
        return Err(PipelineError::CycleSizeMismatch {
            cycle,
            layer: layer.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Mosaic size shared by all cycles whose sites were cropped one by one
fn uniform_extent(dimensions: &BTreeMap<u32, (u32, u32)>) -> Result<(u32, u32), PipelineError> {
    let mut cycles = dimensions.iter();
    let Some((_, &expected)) = cycles.next() else {
        return Ok((0, 0));
    };
    for (&cycle, &found) in cycles {
        if found != expected {
            return Err(PipelineError::CycleExtentMismatch { cycle, expected, found });
        }
    }
    Ok(expected)
}

/// Load every site of a fully populated grid
fn load_grid<T, E: From<MosaicError>>(
    grid: &Grid<SiteImage>,
    load: impl Fn(&SiteImage) -> Result<T, E>,
) -> Result<Grid<T>, E> {
    if let Some((row, column)) = grid.first_missing() {
        return Err(MosaicError::IncompleteGrid { row, column }.into());
    }
    let mut rows = Vec::with_capacity(grid.height());
    for row in 0..grid.height() {
        let cells = grid
            .row(row)
            .enumerate()
            .map(|(column, cell)| {
                let site = cell.ok_or(MosaicError::IncompleteGrid { row, column })?;
                load(site)
            })
            .collect::<Result<Vec<T>, E>>()?;
        rows.push(cells);
    }
    Ok(Grid::from_rows(rows))
}

fn read_error(site: &SiteImage, e: image::ImageError) -> MosaicError {
    MosaicError::ReadError {
        path: site.path().display().to_string(),
        reason: e.to_string(),
    }
}

fn read_intensities(site: &SiteImage) -> Result<Raster<u16>, MosaicError> {
    Ok(image::open(site.path()).map_err(|e| read_error(site, e))?.into_luma16())
}

fn read_labels(site: &SiteImage) -> Result<Raster<u32>, MosaicError> {
    let labels = image::open(site.path()).map_err(|e| read_error(site, e))?.into_luma16();
    let (width, height) = labels.dimensions();
    let raw = labels.into_raw().into_iter().map(u32::from).collect();
    Raster::from_raw(width, height, raw).ok_or_else(|| MosaicError::ReadError {
        path: site.path().display().to_string(),
        reason: "label buffer does not match image size".to_string(),
    })
}

/// Labels as drawn in mask and id layers, with the number of hidden objects
///
/// Children of parents touching a site border are hidden from the drawing
/// only; they keep their global ids and index entries.
fn display_labels<'g>(
    child: &'g LabelPlane,
    parent: Option<&LabelPlane>,
) -> Result<(Cow<'g, Grid<Raster<u32>>>, usize), PipelineError> {
    let Some(parent) = parent else {
        return Ok((Cow::Borrowed(&child.labels), 0));
    };
    let mut masked = child.labels.clone();
    let mut hidden = 0;
    for row in 0..masked.height() {
        for column in 0..masked.width() {
            let (Some(children), Some(parents)) = (masked.get_mut(row, column), parent.labels.get(row, column)) else {
                continue;
            };
            hidden += mask_border_children(children, parents)?.len();
        }
    }
    Ok((Cow::Owned(masked), hidden))
}

/// Objects of every site in map space of the aligned mosaic
fn site_objects(plane: &LabelPlane, window: Option<CropWindow>, size: (u32, u32)) -> Vec<RawObject> {
    let (crop_x, crop_y) = window.map_or((0, 0), |w| (w.x as i64, w.y as i64));
    let mut objects = Vec::new();

    for row in 0..plane.labels.height() {
        for column in 0..plane.labels.width() {
            let (Some(raster), Some(site)) = (plane.labels.get(row, column), plane.sites.get(row, column)) else {
                continue;
            };
            let position = site.position();
            let offset_x = column as i64 * raster.width() as i64 - crop_x;
            let offset_y = row as i64 * raster.height() as i64 - crop_y;

            for outline in extract_outlines(raster) {
                let b = outline.bounds;
                let outside = offset_x + b.max_x as i64 + 1 <= 0
                    || offset_y + b.max_y as i64 + 1 <= 0
                    || offset_x + b.min_x as i64 >= size.0 as i64
                    || offset_y + b.min_y as i64 >= size.1 as i64;
                if outside {
                    continue;
                }
                objects.push(RawObject {
                    external_id: outline.label as u64,
                    proposed_id: Some(outline.label as u64),
                    tpoint: position.tpoint,
                    zplane: position.zplane,
                    outline: ring_to_map(&outline.ring, (offset_x as f64, offset_y as f64)),
                });
            }
        }
    }
    objects
}

/// Add the objects of every dataset to the index
fn add_datasets(index_builder: &mut SpatialIndexBuilder, datasets: Vec<ObjectDataset>) -> Result<(), PipelineError> {
    for dataset in datasets {
        for (type_name, objects) in dataset.types {
            index_builder.declare_type(&type_name);
            for object in objects {
                index_builder.add(&type_name, object)?;
            }
        }
    }
    Ok(())
}

/// Location of the snapshot a job publishes
pub fn snapshot_path(job: &JobConfig) -> PathBuf {
    job.experiment_dir().join(SNAPSHOT_FILE)
}
