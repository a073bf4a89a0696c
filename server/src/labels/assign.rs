//! Global object identifiers across the acquisition grid
//!
//! Site label matrices number their objects from 1. Walking the sites in
//! acquisition order with a running offset makes every label unique across the
//! whole grid: a nonzero label `v` becomes `v + offset`, and the offset then
//! advances to the largest remapped label of the site. Background (0) is left
//! alone.

use tracing::{debug, info};

use crate::grid::{Grid, ScanOrder};
use crate::mosaic::Raster;

use super::types::LabelError;

/// Offset bookkeeping for one remapped site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteAssignment {
    pub row: usize,
    pub column: usize,
    /// Offset added to the site's local labels
    pub offset: u32,
    /// Largest global id seen after this site
    pub max_id: u32,
}

impl SiteAssignment {
    /// Global id of a site-local label
    pub fn global_id(&self, local: u32) -> Option<u32> {
        match local {
            0 => None,
            v => v.checked_add(self.offset),
        }
    }
}

/// Remaps site-local labels to grid-wide identifiers with a running offset
#[derive(Debug, Clone)]
pub struct GlobalIdAssigner {
    order: ScanOrder,
    offset: u32,
}

impl GlobalIdAssigner {
    pub fn new(order: ScanOrder) -> Self {
        Self::starting_at(order, 0)
    }

    /// Continue numbering after ids already issued elsewhere
    pub fn starting_at(order: ScanOrder, offset: u32) -> Self {
        Self { order, offset }
    }

    /// Largest id issued so far
    pub fn max_id(&self) -> u32 {
        self.offset
    }

    /// Remap one site in place and advance the offset
    pub fn remap_site(
        &mut self,
        labels: &mut Raster<u32>,
        row: usize,
        column: usize,
    ) -> Result<SiteAssignment, LabelError> {
        let offset = self.offset;
        let mut site_max = offset;

        for pixel in labels.pixels_mut() {
            let local = pixel.0[0];
            if local == 0 {
                continue;
            }
            let global = local
                .checked_add(offset)
                .ok_or(LabelError::IdSpaceExhausted { row, column, offset })?;
            pixel.0[0] = global;
            site_max = site_max.max(global);
        }

        self.offset = self.offset.max(site_max);
        debug!(
            "Site ({}, {}): offset {}, max id {}",
            row, column, offset, self.offset
        );

        Ok(SiteAssignment {
            row,
            column,
            offset,
            max_id: self.offset,
        })
    }

    /// Remap every site of a fully populated grid in acquisition order
    pub fn assign(&mut self, grid: &mut Grid<Raster<u32>>) -> Result<Vec<SiteAssignment>, LabelError> {
        let positions: Vec<(usize, usize)> = self.order.traverse(grid.height(), grid.width()).collect();
        let mut assignments = Vec::with_capacity(positions.len());

        for (row, column) in positions {
            let labels = grid
                .get_mut(row, column)
                .ok_or(LabelError::MissingSite { row, column })?;
            assignments.push(self.remap_site(labels, row, column)?);
        }

        info!(
            "Assigned global ids to {} sites, max id {}",
            assignments.len(),
            self.offset
        );
        Ok(assignments)
    }

    /// Remap a plain sequence of sites, already in acquisition order
    pub fn assign_sequence(&mut self, sites: &mut [Raster<u32>]) -> Result<Vec<SiteAssignment>, LabelError> {
        sites
            .iter_mut()
            .enumerate()
            .map(|(index, labels)| self.remap_site(labels, 0, index))
            .collect()
    }
}
