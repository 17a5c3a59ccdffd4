//! The full-image label rasters the root assembles from gathered sections.

use bitvec::prelude::*;
use hashbrown::HashSet;

use crate::config::RhsegConfig;
use crate::error::RhsegError;
use crate::protocol::section_data::LabelBlock;
use crate::section::to_global;
use crate::spatial::{Coord, Grid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMap {
    pub grid: Grid,
    pub class_labels: Vec<u32>,
    pub object_labels: Vec<u32>,
}

impl SegmentationMap {
    /// Places every section's labels at its image offset. Every section of
    /// `config` must be present exactly once.
    pub fn from_blocks(config: &RhsegConfig, blocks: &[LabelBlock]) -> Result<Self, RhsegError> {
        let grid = Grid::for_image(config);
        let section_grid = Grid::for_section(config);
        let mut class_labels = vec![0; grid.len()];
        let mut object_labels = vec![0; grid.len()];
        let mut seen = HashSet::new();

        for block in blocks {
            if !seen.insert(block.section) {
                return Err(RhsegError::Protocol(format!(
                    "section {} gathered twice",
                    block.section
                )));
            }
            let npix = block.labels.classes.len();
            if npix != section_grid.len() || block.labels.objects.len() != npix {
                return Err(RhsegError::Protocol(format!(
                    "section {} returned {} labels for {} pixels",
                    block.section,
                    npix,
                    section_grid.len()
                )));
            }
            for local in 0..npix {
                let index = to_global(config, block.section, section_grid.coord_of(local))
                    .and_then(|coord| grid.index_of(coord))
                    .ok_or_else(|| {
                        RhsegError::Protocol(format!("unknown section {}", block.section))
                    })?;
                class_labels[index] = block.labels.classes[local];
                object_labels[index] = block.labels.objects[local];
            }
        }
        if seen.len() != config.nb_sections() {
            return Err(RhsegError::Protocol(format!(
                "gathered {} of {} sections",
                seen.len(),
                config.nb_sections()
            )));
        }
        Ok(Self {
            grid,
            class_labels,
            object_labels,
        })
    }

    pub fn class_at(&self, coord: Coord) -> Option<u32> {
        self.grid.index_of(coord).map(|i| self.class_labels[i])
    }

    pub fn object_at(&self, coord: Coord) -> Option<u32> {
        self.grid.index_of(coord).map(|i| self.object_labels[i])
    }

    /// Distinct nonzero class labels.
    pub fn nb_classes(&self) -> usize {
        self.class_labels
            .iter()
            .filter(|&&c| c != 0)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Pixels with a face neighbor in a different object.
    pub fn boundary_map(&self) -> BitVec {
        let mut boundary = bitvec![0; self.grid.len()];
        for index in 0..self.grid.len() {
            let object = self.object_labels[index];
            if object != 0 && self.grid.neighbors(index).any(|n| self.object_labels[n] != object) {
                boundary.set(index, true);
            }
        }
        boundary
    }

    /// True when some pixel of class `a` touches some pixel of class `b`.
    pub fn classes_adjacent(&self, a: u32, b: u32) -> bool {
        (0..self.grid.len()).any(|index| {
            self.class_labels[index] == a
                && self.grid.neighbors(index).any(|n| self.class_labels[n] == b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dimensionality, FeatureFlags};
    use crate::protocol::section_data::FinalLabels;

    fn config() -> RhsegConfig {
        RhsegConfig::uniform_split(Dimensionality::Two, (2, 4, 1), 1, 2, FeatureFlags::default())
            .unwrap()
    }

    fn block(section: u32, class: u32, object: u32) -> LabelBlock {
        LabelBlock {
            section,
            labels: FinalLabels {
                classes: vec![class; 4],
                objects: vec![object; 4],
            },
        }
    }

    #[test]
    fn test_blocks_land_at_their_offsets() {
        let config = config();
        let map = SegmentationMap::from_blocks(&config, &[block(1, 2, 2), block(0, 1, 1)]).unwrap();
        assert_eq!(map.class_at(Coord::new(1, 0, 0)), Some(1));
        assert_eq!(map.class_at(Coord::new(0, 3, 0)), Some(2));
        assert_eq!(map.class_at(Coord::new(2, 0, 0)), None);
        assert_eq!(map.nb_classes(), 2);
        assert!(map.classes_adjacent(1, 2));
        assert!(!map.classes_adjacent(1, 3));

        let boundary = map.boundary_map();
        assert_eq!(boundary.count_ones(), 4);
        assert!(boundary[2] && boundary[5]);
    }

    #[test]
    fn test_missing_or_repeated_sections_are_rejected() {
        let config = config();
        assert!(SegmentationMap::from_blocks(&config, &[block(0, 1, 1)]).is_err());
        assert!(SegmentationMap::from_blocks(&config, &[block(0, 1, 1), block(0, 1, 1)]).is_err());
        let mut short = block(1, 2, 2);
        short.labels.classes.pop();
        assert!(SegmentationMap::from_blocks(&config, &[block(0, 1, 1), short]).is_err());
    }
}
