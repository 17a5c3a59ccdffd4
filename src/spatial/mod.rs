//! Pixel-grid geometry and the label-lookup abstraction the neighbor builder
//! and leaf extraction work over.
//!
//! Pixels are addressed in raster order: column fastest, then row, then
//! slice. One code path serves 1-D, 2-D and 3-D grids; the dimensionality
//! only decides which neighbor offsets exist.

use crate::config::{Dimensionality, RhsegConfig};
use crate::error::RhsegError;

pub mod components;
pub mod neighbors;

pub use components::{extract_regions, LeafRegions};
pub use neighbors::rebuild_neighbor_sets;

/// A pixel coordinate, either section-local or global depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Coord {
    pub col: u32,
    pub row: u32,
    pub slice: u32,
}

impl Coord {
    pub fn new(col: u32, row: u32, slice: u32) -> Self {
        Self { col, row, slice }
    }
}

const OFFSETS_1D: [(i64, i64, i64); 2] = [(-1, 0, 0), (1, 0, 0)];
const OFFSETS_2D: [(i64, i64, i64); 4] = [(-1, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0)];
const OFFSETS_3D: [(i64, i64, i64); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Face-adjacent neighbor offsets for a dimensionality: 2, 4 or 6 of them.
pub fn neighbor_offsets(dims: Dimensionality) -> &'static [(i64, i64, i64)] {
    match dims {
        Dimensionality::One => &OFFSETS_1D,
        Dimensionality::Two => &OFFSETS_2D,
        Dimensionality::Three => &OFFSETS_3D,
    }
}

/// The extent of a raster grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub dims: Dimensionality,
    pub ncols: u32,
    pub nrows: u32,
    pub nslices: u32,
}

impl Grid {
    pub fn new(dims: Dimensionality, ncols: u32, nrows: u32, nslices: u32) -> Self {
        Self { dims, ncols, nrows, nslices }
    }

    /// The grid of one section under `config`.
    pub fn for_section(config: &RhsegConfig) -> Self {
        let shape = config.section_shape;
        Self::new(config.dimensionality, shape.ncols, shape.nrows, shape.nslices)
    }

    /// The grid of the full image under `config`.
    pub fn for_image(config: &RhsegConfig) -> Self {
        Self::new(config.dimensionality, config.ncols, config.nrows, config.nslices)
    }

    pub fn len(&self) -> usize {
        self.ncols as usize * self.nrows as usize * self.nslices as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.col < self.ncols && coord.row < self.nrows && coord.slice < self.nslices
    }

    pub fn index_of(&self, coord: Coord) -> Option<usize> {
        self.contains(coord).then(|| {
            coord.col as usize
                + self.ncols as usize
                    * (coord.row as usize + self.nrows as usize * coord.slice as usize)
        })
    }

    pub fn coord_of(&self, index: usize) -> Coord {
        let ncols = self.ncols.max(1) as usize;
        let nrows = self.nrows.max(1) as usize;
        Coord::new(
            (index % ncols) as u32,
            ((index / ncols) % nrows) as u32,
            (index / (ncols * nrows)) as u32,
        )
    }

    /// `coord` shifted by `offset`, whether or not it lands inside the grid.
    /// `None` only when a coordinate would go negative.
    pub fn shifted(coord: Coord, (dc, dr, ds): (i64, i64, i64)) -> Option<Coord> {
        let shift = |v: u32, d: i64| u32::try_from(i64::from(v) + d).ok();
        Some(Coord::new(
            shift(coord.col, dc)?,
            shift(coord.row, dr)?,
            shift(coord.slice, ds)?,
        ))
    }

    /// Raster indices of the in-grid face neighbors of `index`.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let coord = self.coord_of(index);
        neighbor_offsets(self.dims)
            .iter()
            .filter_map(move |&offset| Self::shifted(coord, offset))
            .filter_map(move |n| self.index_of(n))
    }
}

/// Read/write access to a raster of region labels, indexed in raster order.
pub trait SpatialLabels {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> u32;

    fn set(&mut self, index: usize, label: u32);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A label raster with its grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelField {
    grid: Grid,
    labels: Vec<u32>,
}

impl LabelField {
    /// An all-zero (unlabeled) field.
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            labels: vec![0; grid.len()],
        }
    }

    pub fn from_labels(grid: Grid, labels: Vec<u32>) -> Result<Self, RhsegError> {
        if labels.len() != grid.len() {
            return Err(RhsegError::Internal(format!(
                "{} labels given for a grid of {} pixels",
                labels.len(),
                grid.len()
            )));
        }
        Ok(Self { grid, labels })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<u32> {
        self.labels
    }

    /// Rewrites every nonzero label through `map`; labels beyond the map
    /// become 0.
    pub fn relabel(&mut self, map: &[u32]) {
        for label in self.labels.iter_mut().filter(|l| **l != 0) {
            *label = map.get(*label as usize).copied().unwrap_or(0);
        }
    }
}

impl SpatialLabels for LabelField {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> u32 {
        self.labels.get(index).copied().unwrap_or(0)
    }

    fn set(&mut self, index: usize, label: u32) {
        if let Some(slot) = self.labels.get_mut(index) {
            *slot = label;
        }
    }
}
