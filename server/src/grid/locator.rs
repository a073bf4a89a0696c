//! Grid position extraction from file names and stage coordinates

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::layout::{Grid, ScanOrder};
use super::types::{GridError, GridPosition, ImageKind, ImageMetadata, SiteImage};

/// Configuration of the file name extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Regular expression with named groups `row`, `column`, `site`, `cycle`
    /// and optionally `channel`, `tpoint`, `zplane`
    pub pattern: String,
    /// Whether coordinates in file names start at 1
    #[serde(default = "default_one_based")]
    pub one_based: bool,
    /// Flip row indices for plates imaged bottom-up (needs `grid_height`)
    #[serde(default)]
    pub invert_rows: bool,
    #[serde(default)]
    pub grid_height: Option<usize>,
    /// Needed when the pattern carries a site number but no row/column
    #[serde(default)]
    pub grid_width: Option<usize>,
    #[serde(default)]
    pub scan_order: ScanOrder,
    /// Stage position file; rows and columns then come from the stage
    /// coordinates of the `site` group instead of the file name
    #[serde(default)]
    pub stage_file: Option<PathBuf>,
    /// Stage coordinates closer than this share a row or column
    #[serde(default = "default_stage_tolerance")]
    pub stage_tolerance: f64,
}

fn default_one_based() -> bool {
    true
}

fn default_stage_tolerance() -> f64 {
    1.0
}

/// Derives grid positions of site images from their file names
pub struct GridLocator {
    regex: Regex,
    config: LocatorConfig,
    has_row_column: bool,
    stage: Option<StageLayout>,
}

impl GridLocator {
    /// Compile and validate the extraction pattern
    pub fn new(config: LocatorConfig) -> Result<Self, GridError> {
        let regex = Regex::new(&config.pattern).map_err(|e| GridError::InvalidPattern {
            pattern: config.pattern.clone(),
            reason: e.to_string(),
        })?;

        let groups: Vec<&str> = regex.capture_names().flatten().collect();
        let has_row_column = groups.contains(&"row") && groups.contains(&"column");
        let has_site = groups.contains(&"site");

        let stage = match &config.stage_file {
            Some(path) if has_site => Some(StageLayout::load(path, config.stage_tolerance, config.one_based)?),
            Some(_) => {
                return Err(GridError::InvalidPattern {
                    pattern: config.pattern.clone(),
                    reason: "stage positions need a named group 'site'".to_string(),
                });
            }
            None => None,
        };

        if stage.is_none() && !has_row_column && !(has_site && config.grid_width.is_some()) {
            return Err(GridError::InvalidPattern {
                pattern: config.pattern.clone(),
                reason: "needs named groups 'row' and 'column', or 'site' with grid_width set"
                    .to_string(),
            });
        }
        if config.invert_rows && config.grid_height.is_none() {
            return Err(GridError::InvalidPattern {
                pattern: config.pattern.clone(),
                reason: "invert_rows requires grid_height".to_string(),
            });
        }
        if config.grid_width == Some(0) {
            return Err(GridError::InvalidPattern {
                pattern: config.pattern.clone(),
                reason: "grid_width must be positive".to_string(),
            });
        }

        Ok(Self {
            regex,
            config,
            has_row_column,
            stage,
        })
    }

    /// Whether the pattern has a named group of this name
    pub fn captures_group(&self, group: &str) -> bool {
        self.regex.capture_names().flatten().any(|name| name == group)
    }

    /// Extract the zero-based grid position encoded in a file name
    pub fn locate(&self, filename: &str) -> Result<GridPosition, GridError> {
        let captures =
            self.regex
                .captures(filename)
                .ok_or_else(|| GridError::MetadataExtraction {
                    filename: filename.to_string(),
                    reason: format!("does not match pattern '{}'", self.config.pattern),
                })?;

        let width = self.config.grid_width;
        let order = self.config.scan_order;

        let (mut row, column, site) = if let Some(stage) = &self.stage {
            let site = self.coordinate(filename, &captures, "site")?;
            let (row, column) = stage.cell(site).ok_or_else(|| GridError::MetadataExtraction {
                filename: filename.to_string(),
                reason: format!("site {} has no stage position", site),
            })?;
            self.check_bounds(filename, row, column)?;
            (row, column, site)
        } else if self.has_row_column {
            let row = self.coordinate(filename, &captures, "row")?;
            let column = self.coordinate(filename, &captures, "column")?;
            self.check_bounds(filename, row, column)?;
            let site = match self.optional_coordinate(filename, &captures, "site")? {
                Some(site) => site,
                None => width.map_or(0, |w| order.site_index(row, column, w)),
            };
            (row, column, site)
        } else {
            let site = self.coordinate(filename, &captures, "site")?;
            // Validated in `new`: site-only patterns always carry a grid width
            let width = width.unwrap_or(1);
            let (row, column) = order.position(site, width);
            self.check_bounds(filename, row, column)?;
            (row, column, site)
        };

        if self.config.invert_rows
            && let Some(height) = self.config.grid_height
        {
            row = height - 1 - row;
        }

        let cycle = self.raw_number(filename, &captures, "cycle")?.unwrap_or(0) as u32;
        let tpoint = self.raw_number(filename, &captures, "tpoint")?.unwrap_or(0) as u32;
        let zplane = self.raw_number(filename, &captures, "zplane")?.unwrap_or(0) as u32;

        Ok(GridPosition {
            row,
            column,
            site,
            cycle,
            tpoint,
            zplane,
        })
    }

    /// Channel name captured by the pattern, if any
    pub fn channel(&self, filename: &str) -> Option<String> {
        self.regex
            .captures(filename)
            .and_then(|c| c.name("channel"))
            .map(|m| m.as_str().to_string())
    }

    /// Locate every image file in a directory, skipping names that do not match
    ///
    /// Files whose metadata cannot be extracted cannot be placed in the grid;
    /// they are logged and left out.
    pub fn scan_directory(&self, dir: &Path, kind: &ImageKind) -> Result<Vec<SiteImage>, GridError> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let mut sites = Vec::new();
        for path in entries {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.locate(filename) {
                Ok(position) => {
                    let metadata = ImageMetadata {
                        filename: filename.to_string(),
                        position,
                        kind: kind.clone(),
                    };
                    sites.push(SiteImage::open(&path, metadata)?);
                }
                Err(e) => warn!("Skipping image: {}", e),
            }
        }

        debug!("Located {} site images in {:?}", sites.len(), dir);
        Ok(sites)
    }

    fn check_bounds(&self, filename: &str, row: usize, column: usize) -> Result<(), GridError> {
        let out_of_grid = |reason: String| GridError::MetadataExtraction {
            filename: filename.to_string(),
            reason,
        };
        if let Some(width) = self.config.grid_width
            && column >= width
        {
            return Err(out_of_grid(format!("column {} exceeds grid width {}", column, width)));
        }
        if let Some(height) = self.config.grid_height
            && row >= height
        {
            return Err(out_of_grid(format!("row {} exceeds grid height {}", row, height)));
        }
        Ok(())
    }

    fn raw_number(
        &self,
        filename: &str,
        captures: &Captures<'_>,
        group: &str,
    ) -> Result<Option<usize>, GridError> {
        let Some(m) = captures.name(group) else {
            return Ok(None);
        };
        m.as_str()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| GridError::MetadataExtraction {
                filename: filename.to_string(),
                reason: format!("group '{}' is not a number: '{}'", group, m.as_str()),
            })
    }

    fn optional_coordinate(
        &self,
        filename: &str,
        captures: &Captures<'_>,
        group: &str,
    ) -> Result<Option<usize>, GridError> {
        let Some(value) = self.raw_number(filename, captures, group)? else {
            return Ok(None);
        };
        if !self.config.one_based {
            return Ok(Some(value));
        }
        value
            .checked_sub(1)
            .map(Some)
            .ok_or_else(|| GridError::MetadataExtraction {
                filename: filename.to_string(),
                reason: format!("one-based group '{}' is zero", group),
            })
    }

    fn coordinate(
        &self,
        filename: &str,
        captures: &Captures<'_>,
        group: &str,
    ) -> Result<usize, GridError> {
        self.optional_coordinate(filename, captures, group)?
            .ok_or_else(|| GridError::MetadataExtraction {
                filename: filename.to_string(),
                reason: format!("group '{}' did not participate in the match", group),
            })
    }
}

/// Stage coordinates of one site as reported by the microscope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
}

/// One entry of a stage position file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageSite {
    /// Site number as it appears in file names
    pub site: usize,
    #[serde(flatten)]
    pub position: StagePosition,
}

/// Grid cells of sites placed by their stage coordinates
#[derive(Debug, Clone, Default)]
pub struct StageLayout {
    cells: HashMap<usize, (usize, usize)>,
}

impl StageLayout {
    /// Place sites on the grid; site numbers follow the locator's base
    pub fn new(sites: &[StageSite], tolerance: f64, one_based: bool) -> Result<Self, GridError> {
        let positions: Vec<StagePosition> = sites.iter().map(|s| s.position).collect();
        let mut cells = HashMap::with_capacity(sites.len());
        for (entry, cell) in sites.iter().zip(positions_from_stage(&positions, tolerance)) {
            let site = if one_based {
                entry.site.checked_sub(1).ok_or_else(|| GridError::MetadataExtraction {
                    filename: format!("site {}", entry.site),
                    reason: "one-based site number is zero".to_string(),
                })?
            } else {
                entry.site
            };
            if cells.insert(site, cell).is_some() {
                return Err(GridError::MetadataExtraction {
                    filename: format!("site {}", entry.site),
                    reason: "listed twice in stage positions".to_string(),
                });
            }
        }
        Ok(Self { cells })
    }

    /// Read a JSON array of `{"site", "x", "y"}` entries
    pub fn load(path: &Path, tolerance: f64, one_based: bool) -> Result<Self, GridError> {
        let read_error = |reason: String| GridError::ReadError {
            path: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| read_error(e.to_string()))?;
        let sites: Vec<StageSite> = serde_json::from_slice(&bytes).map_err(|e| read_error(e.to_string()))?;
        let layout = Self::new(&sites, tolerance, one_based)?;
        debug!("Placed {} sites from stage positions in {:?}", layout.cells.len(), path);
        Ok(layout)
    }

    /// Zero-based (row, column) of a zero-based site index
    pub fn cell(&self, site: usize) -> Option<(usize, usize)> {
        self.cells.get(&site).copied()
    }
}

/// Grid (row, column) of each stage position
///
/// Distinct x positions become columns in ascending order. Stage y points up,
/// so distinct y positions become rows in descending order. Positions closer
/// than `tolerance` are treated as the same row or column.
pub fn positions_from_stage(positions: &[StagePosition], tolerance: f64) -> Vec<(usize, usize)> {
    let xs = distinct_sorted(positions.iter().map(|p| p.x), tolerance);
    let mut ys = distinct_sorted(positions.iter().map(|p| p.y), tolerance);
    ys.reverse();

    positions
        .iter()
        .map(|p| {
            let column = nearest_index(&xs, p.x);
            let row = nearest_index(&ys, p.y);
            (row, column)
        })
        .collect()
}

fn distinct_sorted(values: impl Iterator<Item = f64>, tolerance: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(f64::total_cmp);
    let mut distinct: Vec<f64> = Vec::new();
    for value in sorted {
        match distinct.last() {
            Some(last) if (value - last).abs() <= tolerance => {}
            _ => distinct.push(value),
        }
    }
    distinct
}

fn nearest_index(values: &[f64], target: f64) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Split located sites by time point and z-plane, one grid per plane
pub fn planes_from_sites(sites: Vec<SiteImage>) -> Result<BTreeMap<(u32, u32), Grid<SiteImage>>, GridError> {
    let mut planes: BTreeMap<(u32, u32), Vec<SiteImage>> = BTreeMap::new();
    for site in sites {
        let position = site.position();
        planes.entry((position.tpoint, position.zplane)).or_default().push(site);
    }
    planes
        .into_iter()
        .map(|(plane, sites)| Ok((plane, grid_from_sites(sites)?)))
        .collect()
}

/// Place located sites into a grid sized by their largest row and column
pub fn grid_from_sites(sites: Vec<SiteImage>) -> Result<Grid<SiteImage>, GridError> {
    let height = sites.iter().map(|s| s.position().row + 1).max().unwrap_or(0);
    let width = sites.iter().map(|s| s.position().column + 1).max().unwrap_or(0);

    let mut grid = Grid::new(height, width);
    for site in sites {
        let position = site.position();
        grid.insert(position.row, position.column, site)?;
    }
    Ok(grid)
}
