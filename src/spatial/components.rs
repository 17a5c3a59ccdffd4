//! Leaf-level region extraction: turns a section's pre-labelled pixels into
//! region classes, connected region objects and an object label raster.

use bitvec::prelude::*;
use hashbrown::HashMap;

use crate::error::RhsegError;
use crate::records::layout::RecordLayout;
use crate::records::pixel::Pixel;
use crate::region::{MergeForest, RegionSet};
use crate::spatial::{rebuild_neighbor_sets, Grid, LabelField, SpatialLabels};

/// The regions of one leaf section.
#[derive(Debug, Clone)]
pub struct LeafRegions {
    pub regions: RegionSet,
    /// Object label of each pixel, 0 where the pixel is unlabeled.
    pub objects: LabelField,
    /// Pixels touching a different object.
    pub boundary: BitVec,
}

/// Builds the leaf region set of a section.
///
/// Distinct nonzero `region_label` values become classes `1..`, numbered in
/// the order they are first met in raster order. Objects are the face-
/// connected components of each class, also numbered in first-met order.
/// Statistics, adjacency and boundary counts are filled in.
pub fn extract_regions(
    layout: RecordLayout,
    grid: &Grid,
    pixels: &[Pixel],
) -> Result<LeafRegions, RhsegError> {
    if pixels.len() != grid.len() {
        return Err(RhsegError::Internal(format!(
            "{} pixels given for a section of {} pixels",
            pixels.len(),
            grid.len()
        )));
    }
    let mut regions = RegionSet::new(layout);

    // Compact class label per pixel.
    let mut class_of_label: HashMap<u32, u32> = HashMap::new();
    let mut classes = vec![0u32; pixels.len()];
    for (index, pixel) in pixels.iter().enumerate() {
        if !pixel.is_labeled() {
            continue;
        }
        let class = match class_of_label.get(&pixel.region_label) {
            Some(&class) => class,
            None => {
                let class = regions.add_class()?;
                class_of_label.insert(pixel.region_label, class);
                class
            }
        };
        classes[index] = class;
    }

    // Connected components within a class; pixel index i is forest label i + 1.
    let mut forest = MergeForest::with_len(pixels.len());
    for index in 0..pixels.len() {
        let class = classes[index];
        if class == 0 {
            continue;
        }
        for n in grid.neighbors(index).filter(|&n| n < index) {
            if classes[n] == class {
                forest.union(index as u32 + 1, n as u32 + 1);
            }
        }
    }

    let mut object_of_root: HashMap<u32, u32> = HashMap::new();
    let mut objects = LabelField::new(*grid);
    for (index, pixel) in pixels.iter().enumerate() {
        let class = classes[index];
        if class == 0 {
            continue;
        }
        let root = forest.find(index as u32 + 1).ok_or_else(|| {
            RhsegError::Internal(format!("pixel {} missing from component forest", index))
        })?;
        let object = match object_of_root.get(&root) {
            Some(&object) => object,
            None => {
                let object = regions.add_object(class)?;
                object_of_root.insert(root, object);
                object
            }
        };
        objects.set(index, object);
        if let Some(o) = regions.object_mut(object) {
            o.stats.add_pixel(pixel, &layout);
        }
        if let Some(c) = regions.class_mut(class) {
            c.stats.add_pixel(pixel, &layout);
        }
    }

    let boundary = rebuild_neighbor_sets(0, grid, &objects, &mut regions)?;
    if regions.nb_class_labels() == 0 {
        log::warn!("leaf section of {} pixels holds no labeled pixels", grid.len());
    }
    Ok(LeafRegions {
        regions,
        objects,
        boundary,
    })
}
