//! Spatial state a task carries through the recursion: its own leaf section
//! and the border pixels whose neighbors it has not integrated yet.
//!
//! Pixel data never leaves the task that owns it. What travels up the tree
//! is the region set plus one spatial index record per pixel that is either
//! on a region boundary or faces a section not yet integrated. That is
//! enough for a parent to add adjacency across the seam between its own
//! subtree and a child's, and to recount boundary pixels after merges.

use bitvec::prelude::*;
use hashbrown::{HashMap, HashSet};

use crate::buffer::{
    read_records, sizes_for, write_records, BufferReader, BufferSizes, BufferWriter, WireRecord,
};
use crate::config::RhsegConfig;
use crate::error::RhsegError;
use crate::records::index::{IndexProjection, IndexRecord};
use crate::records::layout::RecordLayout;
use crate::records::pixel::Pixel;
use crate::region::{LabelOffsets, RegionSet};
use crate::section::{section_of, to_global};
use crate::spatial::{extract_regions, Coord, Grid, LabelField, SpatialLabels};

//==================================================================================
// 1. Leaf Section
//==================================================================================

/// The pixels and leaf labelling of the section a task owns.
#[derive(Debug, Clone)]
pub struct SectionData {
    pub section: u32,
    pub grid: Grid,
    pub pixels: Vec<Pixel>,
    /// Leaf object label per pixel.
    pub objects: LabelField,
    /// Leaf class of each leaf object, indexed by object label.
    pub object_classes: Vec<u32>,
    /// Final labels, once the root's label maps have arrived.
    pub final_labels: Option<FinalLabels>,
}

/// Final class and object label per pixel of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalLabels {
    pub classes: Vec<u32>,
    pub objects: Vec<u32>,
}

impl SectionData {
    /// Extracts the leaf regions of `section` and collects its border pixels.
    pub fn build(
        config: &RhsegConfig,
        section: u32,
        pixels: Vec<Pixel>,
    ) -> Result<(Self, RegionSet, BorderStore), RhsegError> {
        let layout = config.layout();
        let grid = Grid::for_section(config);
        for pixel in &pixels {
            if pixel.values.len() != layout.nbands {
                return Err(RhsegError::Config(format!(
                    "section {} pixel has {} bands, configuration has {}",
                    section,
                    pixel.values.len(),
                    layout.nbands
                )));
            }
        }
        let leaf = extract_regions(layout, &grid, &pixels)?;
        let border = BorderStore::from_leaf(config, section, &leaf.objects, &leaf.regions, &leaf.boundary)?;

        let object_classes = std::iter::once(0)
            .chain(leaf.regions.objects().iter().map(|o| o.class_label))
            .collect();
        let data = SectionData {
            section,
            grid,
            pixels,
            objects: leaf.objects,
            object_classes,
            final_labels: None,
        };
        Ok((data, leaf.regions, border))
    }

    /// Rewrites the leaf labelling through the final label maps.
    pub fn apply_label_maps(&mut self, maps: &LabelMaps) {
        let mut classes = vec![0; self.grid.len()];
        let mut objects = vec![0; self.grid.len()];
        for (index, &object) in self.objects.labels().iter().enumerate() {
            if object == 0 {
                continue;
            }
            let class = self.object_classes.get(object as usize).copied().unwrap_or(0);
            objects[index] = maps.objects.get(object as usize).copied().unwrap_or(0);
            classes[index] = maps.classes.get(class as usize).copied().unwrap_or(0);
        }
        self.final_labels = Some(FinalLabels { classes, objects });
    }

    pub(crate) fn final_labels(&self) -> Result<&FinalLabels, RhsegError> {
        self.final_labels.as_ref().ok_or_else(|| {
            RhsegError::Protocol(format!(
                "section {} was asked for labels before receiving its label maps",
                self.section
            ))
        })
    }

    /// The section's pixels with `region_label` set to the final class.
    pub(crate) fn labelled_pixels(&self) -> Result<Vec<Pixel>, RhsegError> {
        let labels = self.final_labels()?;
        Ok(self
            .pixels
            .iter()
            .zip(&labels.classes)
            .map(|(pixel, &class)| pixel.clone().with_label(class))
            .collect())
    }
}

//==================================================================================
// 2. Border Pixels
//==================================================================================

/// Boundary and border pixels keyed by global coordinate. Labels are stored
/// as received and resolved through the region set on use.
///
/// A labeled pixel missing from the store shares its object with every
/// labeled neighbor, so boundary counts can be rebuilt from the store alone.
#[derive(Debug, Clone, Default)]
pub struct BorderStore {
    entries: HashMap<Coord, IndexRecord>,
}

/// Counts from one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeamSummary {
    /// Seam pixel pairs examined.
    pub pairs: usize,
    /// Pixels newly flagged as boundary.
    pub new_boundary: usize,
}

impl BorderStore {
    /// Collects the labeled pixels of a leaf section that lie on an object
    /// boundary or touch another section.
    pub fn from_leaf(
        config: &RhsegConfig,
        section: u32,
        objects: &LabelField,
        regions: &RegionSet,
        boundary: &BitSlice,
    ) -> Result<Self, RhsegError> {
        let grid = *objects.grid();
        let image = Grid::for_image(config);
        let section_id = u16::try_from(section)
            .map_err(|_| RhsegError::Config(format!("section id {} out of range", section)))?;
        let mut entries = HashMap::new();

        for index in 0..grid.len() {
            let object = objects.get(index);
            if object == 0 {
                continue;
            }
            let global = to_global(config, section, grid.coord_of(index))
                .ok_or_else(|| RhsegError::Config(format!("unknown section {}", section)))?;
            let Some(global_index) = image.index_of(global) else {
                continue;
            };
            let on_boundary = boundary.get(index).map(|b| *b).unwrap_or(false);
            let touches_other = image
                .neighbors(global_index)
                .any(|n| section_of(config, image.coord_of(n)) != Some(section));
            if !touches_other && !on_boundary {
                continue;
            }
            let class = regions.object(object).map(|o| o.class_label).unwrap_or(0);
            entries.insert(
                global,
                IndexRecord::spatial(index as u32, section_id, class, object, on_boundary),
            );
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, coord: Coord) -> Option<&IndexRecord> {
        self.entries.get(&coord)
    }

    /// Records ordered by section, then pixel index.
    pub fn records(&self) -> Vec<IndexRecord> {
        let mut records: Vec<IndexRecord> = self.entries.values().copied().collect();
        records.sort_unstable_by_key(|r| (r.pixel_section, r.pixel_index));
        records
    }

    /// Adds a child's records, relabelled by `offsets`, and links every pair
    /// of pixels facing each other across the new seam. Boundary counts are
    /// left to `recount_boundaries`.
    pub fn integrate(
        &mut self,
        config: &RhsegConfig,
        incoming: Vec<IndexRecord>,
        offsets: LabelOffsets,
        regions: &mut RegionSet,
    ) -> Result<SeamSummary, RhsegError> {
        let mut summary = SeamSummary::default();
        let mut added = HashSet::with_capacity(incoming.len());
        for mut record in incoming {
            record.region_class_label += offsets.class_offset;
            if let IndexProjection::Spatial {
                region_object_label,
                ..
            } = &mut record.projection
            {
                *region_object_label += offsets.object_offset;
            }
            let coord = global_coord(config, &record)?;
            self.entries.insert(coord, record);
            added.insert(coord);
        }

        let image = Grid::for_image(config);
        let mut pairs = Vec::new();
        for &coord in &added {
            let Some(index) = image.index_of(coord) else {
                continue;
            };
            for n in image.neighbors(index) {
                let neighbor = image.coord_of(n);
                if !added.contains(&neighbor) && self.entries.contains_key(&neighbor) {
                    pairs.push((coord, neighbor));
                }
            }
        }
        pairs.sort_unstable();

        for (p, q) in pairs {
            summary.pairs += 1;
            let (Some(obj_p), Some(obj_q)) = (self.object_at(p), self.object_at(q)) else {
                continue;
            };
            let obj_p = regions.resolve_object(obj_p)?;
            let obj_q = regions.resolve_object(obj_q)?;
            if obj_p == obj_q {
                continue;
            }
            regions.link_objects(obj_p, obj_q)?;
            for coord in [p, q] {
                if self.set_boundary(coord, true) {
                    summary.new_boundary += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Recomputes the boundary pixel count of every active region, and each
    /// record's boundary flag, from the labels as they now resolve. Returns
    /// the number of object boundary pixels.
    ///
    /// A pixel counts for its object when a labeled neighbor resolves to a
    /// different object, and for its class when such a neighbor also has a
    /// different class.
    pub fn recount_boundaries(
        &mut self,
        config: &RhsegConfig,
        regions: &mut RegionSet,
    ) -> Result<usize, RhsegError> {
        let image = Grid::for_image(config);
        regions.clear_boundary_counts();
        let mut flags = Vec::with_capacity(self.entries.len());

        for (&coord, record) in &self.entries {
            let Some(raw) = record.region_object_label() else {
                continue;
            };
            let object = regions.resolve_object(raw)?;
            let class = object_class(regions, object)?;
            let mut object_boundary = false;
            let mut class_boundary = false;
            if let Some(index) = image.index_of(coord) {
                for n in image.neighbors(index) {
                    let Some(neighbor_raw) = self.object_at(image.coord_of(n)) else {
                        continue;
                    };
                    let neighbor = regions.resolve_object(neighbor_raw)?;
                    if neighbor == object {
                        continue;
                    }
                    object_boundary = true;
                    if object_class(regions, neighbor)? != class {
                        class_boundary = true;
                    }
                }
            }
            if object_boundary {
                if let Some(o) = regions.object_mut(object) {
                    o.stats.nbpix += 1;
                }
            }
            if class_boundary {
                if let Some(c) = regions.class_mut(class) {
                    c.stats.nbpix += 1;
                }
            }
            flags.push((coord, object_boundary));
        }

        let boundary_pixels = flags.iter().filter(|(_, b)| *b).count();
        for (coord, flag) in flags {
            self.set_boundary(coord, flag);
        }
        Ok(boundary_pixels)
    }

    /// Drops pixels that are off every boundary and have no neighbor outside
    /// `covered`. Returns how many were dropped.
    pub fn prune(&mut self, config: &RhsegConfig, covered: &HashSet<u32>) -> usize {
        let image = Grid::for_image(config);
        let before = self.entries.len();
        self.entries.retain(|&coord, record| {
            record.boundary().unwrap_or(false)
                || image.index_of(coord).is_some_and(|index| {
                    image.neighbors(index).any(|n| {
                        section_of(config, image.coord_of(n)).is_some_and(|s| !covered.contains(&s))
                    })
                })
        });
        before - self.entries.len()
    }

    fn object_at(&self, coord: Coord) -> Option<u32> {
        self.entries.get(&coord).and_then(IndexRecord::region_object_label)
    }

    /// Sets the boundary flag; true when the flag changed.
    fn set_boundary(&mut self, coord: Coord, flag: bool) -> bool {
        match self.entries.get_mut(&coord).map(|r| &mut r.projection) {
            Some(IndexProjection::Spatial { boundary, .. }) if *boundary != flag => {
                *boundary = flag;
                true
            }
            _ => false,
        }
    }
}

fn global_coord(config: &RhsegConfig, record: &IndexRecord) -> Result<Coord, RhsegError> {
    let grid = Grid::for_section(config);
    let section = u32::from(record.pixel_section);
    if record.pixel_index as usize >= grid.len() {
        return Err(RhsegError::Protocol(format!(
            "border pixel index {} outside a section of {} pixels",
            record.pixel_index,
            grid.len()
        )));
    }
    to_global(config, section, grid.coord_of(record.pixel_index as usize)).ok_or_else(|| {
        RhsegError::Protocol(format!("border pixel names unknown section {}", section))
    })
}

fn object_class(regions: &mut RegionSet, object: u32) -> Result<u32, RhsegError> {
    let class = regions
        .object(object)
        .map(|o| o.class_label)
        .ok_or_else(|| RhsegError::Region(format!("unknown region object label {}", object)))?;
    regions.resolve_class(class)
}

//==================================================================================
// 3. Payloads
//==================================================================================

/// `RecurData` payload: the region set, then the border records.
pub(crate) fn recur_data_sizes(
    regions: &RegionSet,
    border: &[IndexRecord],
    layout: &RecordLayout,
) -> BufferSizes {
    BufferSizes { ints: 1, ..BufferSizes::ZERO }
        + regions.wire_sizes(layout)
        + sizes_for(border, layout)
}

pub(crate) fn write_recur_data(
    w: &mut BufferWriter<'_>,
    regions: &RegionSet,
    border: &[IndexRecord],
    layout: &RecordLayout,
) -> Result<(), RhsegError> {
    w.put_count(border.len(), "border pixel count")?;
    regions.write_to(w, layout)?;
    write_records(w, border, layout)
}

pub(crate) fn read_recur_data(
    r: &mut BufferReader<'_>,
    layout: &RecordLayout,
) -> Result<(RegionSet, Vec<IndexRecord>), RhsegError> {
    let n_border = r.get_count()?;
    let regions = RegionSet::read_from(r, layout)?;
    let border = read_records(r, n_border, layout)?;
    Ok((regions, border))
}

/// `RecurResponse` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecurResponse {
    pub offsets: LabelOffsets,
    /// Class labels issued by the parent after the merge.
    pub nb_class_labels: u32,
    pub nb_object_labels: u32,
    pub threshold: f32,
}

impl RecurResponse {
    pub(crate) fn sizes() -> BufferSizes {
        BufferSizes { ints: 4, floats: 1, ..BufferSizes::ZERO }
    }

    pub(crate) fn write(&self, w: &mut BufferWriter<'_>) -> Result<(), RhsegError> {
        w.put_u32_slice(&[
            self.offsets.class_offset,
            self.offsets.object_offset,
            self.nb_class_labels,
            self.nb_object_labels,
        ])?;
        w.put_f32(self.threshold)
    }

    pub(crate) fn read(r: &mut BufferReader<'_>) -> Result<Self, RhsegError> {
        let ints = r.get_u32_vec(4)?;
        Ok(Self {
            offsets: LabelOffsets {
                class_offset: ints[0],
                object_offset: ints[1],
            },
            nb_class_labels: ints[2],
            nb_object_labels: ints[3],
            threshold: r.get_f32()?,
        })
    }
}

/// Final labels for a contiguous label space; index 0 maps to 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMaps {
    pub classes: Vec<u32>,
    pub objects: Vec<u32>,
}

impl LabelMaps {
    /// The maps for a child whose labels start after `offsets`.
    pub fn slice_for(
        &self,
        offsets: LabelOffsets,
        class_count: u32,
        object_count: u32,
    ) -> Result<LabelMaps, RhsegError> {
        let take = |map: &[u32], offset: u32, count: u32, what: &str| {
            let start = offset as usize + 1;
            let end = start + count as usize;
            map.get(start..end)
                .map(|labels| std::iter::once(0).chain(labels.iter().copied()).collect::<Vec<u32>>())
                .ok_or_else(|| {
                    RhsegError::Protocol(format!(
                        "{} map of {} entries cannot cover labels {}..{}",
                        what,
                        map.len(),
                        start,
                        end
                    ))
                })
        };
        Ok(LabelMaps {
            classes: take(&self.classes, offsets.class_offset, class_count, "class")?,
            objects: take(&self.objects, offsets.object_offset, object_count, "object")?,
        })
    }

    pub(crate) fn sizes(&self) -> BufferSizes {
        BufferSizes {
            ints: 2 + self.classes.len().saturating_sub(1) + self.objects.len().saturating_sub(1),
            ..BufferSizes::ZERO
        }
    }

    pub(crate) fn write(&self, w: &mut BufferWriter<'_>) -> Result<(), RhsegError> {
        let classes = self.classes.get(1..).unwrap_or(&[]);
        let objects = self.objects.get(1..).unwrap_or(&[]);
        w.put_count(classes.len(), "class map length")?;
        w.put_count(objects.len(), "object map length")?;
        w.put_u32_slice(classes)?;
        w.put_u32_slice(objects)
    }

    pub(crate) fn read(r: &mut BufferReader<'_>) -> Result<Self, RhsegError> {
        let n_classes = r.get_count()?;
        let n_objects = r.get_count()?;
        let classes = std::iter::once(0).chain(r.get_u32_vec(n_classes)?).collect();
        let objects = std::iter::once(0).chain(r.get_u32_vec(n_objects)?).collect();
        Ok(Self { classes, objects })
    }
}

/// Final labels of one section, as gathered by `CollectLabels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelBlock {
    pub section: u32,
    pub labels: FinalLabels,
}

pub(crate) fn label_blocks_sizes(blocks: &[LabelBlock]) -> BufferSizes {
    let ints = 1 + blocks
        .iter()
        .map(|b| 2 + b.labels.classes.len() + b.labels.objects.len())
        .sum::<usize>();
    BufferSizes { ints, ..BufferSizes::ZERO }
}

pub(crate) fn write_label_blocks(
    w: &mut BufferWriter<'_>,
    blocks: &[LabelBlock],
) -> Result<(), RhsegError> {
    w.put_count(blocks.len(), "label block count")?;
    for block in blocks {
        w.put_u32(block.section)?;
        w.put_count(block.labels.classes.len(), "label block length")?;
        w.put_u32_slice(&block.labels.classes)?;
        w.put_u32_slice(&block.labels.objects)?;
    }
    Ok(())
}

pub(crate) fn read_label_blocks(r: &mut BufferReader<'_>) -> Result<Vec<LabelBlock>, RhsegError> {
    let n = r.get_count()?;
    (0..n)
        .map(|_| {
            let section = r.get_u32()?;
            let npix = r.get_count()?;
            let classes = r.get_u32_vec(npix)?;
            let objects = r.get_u32_vec(npix)?;
            Ok(LabelBlock {
                section,
                labels: FinalLabels { classes, objects },
            })
        })
        .collect()
}

/// Pixels of one section, as gathered by `CollectPixels`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBlock {
    pub section: u32,
    pub pixels: Vec<Pixel>,
}

pub(crate) fn pixel_blocks_sizes(blocks: &[PixelBlock], layout: &RecordLayout) -> BufferSizes {
    BufferSizes { ints: 1 + 2 * blocks.len(), ..BufferSizes::ZERO }
        + blocks
            .iter()
            .map(|b| sizes_for(&b.pixels, layout))
            .sum::<BufferSizes>()
}

pub(crate) fn write_pixel_blocks(
    w: &mut BufferWriter<'_>,
    blocks: &[PixelBlock],
    layout: &RecordLayout,
) -> Result<(), RhsegError> {
    w.put_count(blocks.len(), "pixel block count")?;
    for block in blocks {
        w.put_u32(block.section)?;
        w.put_count(block.pixels.len(), "pixel block length")?;
        write_records(w, &block.pixels, layout)?;
    }
    Ok(())
}

pub(crate) fn read_pixel_blocks(
    r: &mut BufferReader<'_>,
    layout: &RecordLayout,
) -> Result<Vec<PixelBlock>, RhsegError> {
    let n = r.get_count()?;
    (0..n)
        .map(|_| {
            let section = r.get_u32()?;
            let npix = r.get_count()?;
            let pixels = read_records(r, npix, layout)?;
            Ok(PixelBlock { section, pixels })
        })
        .collect()
}
