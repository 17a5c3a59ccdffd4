//! Rebuilds region adjacency and boundary counts from a label raster.

use bitvec::prelude::*;

use crate::error::RhsegError;
use crate::region::RegionSet;
use crate::spatial::{Grid, SpatialLabels};

/// Clears and recomputes every neighbor set and boundary pixel count of
/// `regions` from the object labels in `labels`.
///
/// Pixels are scanned in raster order. Each labeled pixel's object is
/// resolved through the merge forest, so stale labels left by earlier merges
/// are fine. Unlabeled (0) neighbors are ignored. Returns one bit per pixel,
/// set where the pixel touches a different object.
pub fn rebuild_neighbor_sets(
    level: u16,
    grid: &Grid,
    labels: &impl SpatialLabels,
    regions: &mut RegionSet,
) -> Result<BitVec, RhsegError> {
    if labels.len() != grid.len() {
        return Err(RhsegError::Internal(format!(
            "label raster of {} pixels does not match a grid of {}",
            labels.len(),
            grid.len()
        )));
    }
    regions.clear_neighbors();
    let mut boundary = bitvec![0; grid.len()];

    for index in 0..grid.len() {
        let raw = labels.get(index);
        if raw == 0 {
            continue;
        }
        let object = regions.resolve_object(raw)?;
        let class = class_of(regions, object)?;

        let mut object_boundary = false;
        let mut class_boundary = false;
        for n in grid.neighbors(index) {
            let neighbor_raw = labels.get(n);
            if neighbor_raw == 0 {
                continue;
            }
            let neighbor = regions.resolve_object(neighbor_raw)?;
            if neighbor == object {
                continue;
            }
            object_boundary = true;
            if class_of(regions, neighbor)? != class {
                class_boundary = true;
            }
            regions.link_objects(object, neighbor)?;
        }

        if object_boundary {
            boundary.set(index, true);
            if let Some(o) = regions.object_mut(object) {
                o.stats.nbpix += 1;
            }
        }
        if class_boundary {
            if let Some(c) = regions.class_mut(class) {
                c.stats.nbpix += 1;
            }
        }
    }

    log::debug!(
        "level {}: rebuilt neighbor sets over {} pixels, {} on object boundaries",
        level,
        grid.len(),
        boundary.count_ones()
    );
    Ok(boundary)
}

fn class_of(regions: &mut RegionSet, object: u32) -> Result<u32, RhsegError> {
    let raw = regions
        .object(object)
        .map(|o| o.class_label)
        .ok_or_else(|| RhsegError::Region(format!("unknown region object label {}", object)))?;
    regions.resolve_class(raw)
}
