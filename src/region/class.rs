//! Region classes: spectral clusters that may span several disconnected
//! region objects.

use hashbrown::HashSet;

use crate::buffer::{BufferReader, BufferSizes, BufferWriter, FieldDescriptor, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::region::{shifted, sorted, LabelOffsets, Region, RegionStats};

#[derive(Debug, Clone, PartialEq)]
pub struct RegionClass {
    pub label: u32,
    pub active: bool,
    pub merge_region_label: u32,
    pub stats: RegionStats,
    pub neighbor_classes: HashSet<u32>,
    /// Active region objects belonging to this class.
    pub region_objects: HashSet<u32>,
}

impl RegionClass {
    pub fn new(label: u32, layout: &RecordLayout) -> Self {
        Self {
            label,
            active: true,
            merge_region_label: 0,
            stats: RegionStats::new(layout),
            neighbor_classes: HashSet::new(),
            region_objects: HashSet::new(),
        }
    }
}

impl Region for RegionClass {
    fn label(&self) -> u32 {
        self.label
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn merge_region_label(&self) -> u32 {
        self.merge_region_label
    }

    fn stats(&self) -> &RegionStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut RegionStats {
        &mut self.stats
    }

    fn neighbor_classes(&self) -> &HashSet<u32> {
        &self.neighbor_classes
    }

    fn retire(&mut self, into: u32) {
        self.active = false;
        self.merge_region_label = into;
    }

    fn offset_labels(&mut self, offsets: LabelOffsets) {
        self.label += offsets.class_offset;
        if !self.active {
            self.merge_region_label += offsets.class_offset;
        }
        self.neighbor_classes = shifted(&self.neighbor_classes, offsets.class_offset);
        self.region_objects = shifted(&self.region_objects, offsets.object_offset);
    }

    fn clear_neighbors(&mut self) {
        self.neighbor_classes.clear();
        self.stats.nbpix = 0;
    }
}

impl WireRecord for RegionClass {
    fn fixed_fields(layout: &RecordLayout) -> Vec<FieldDescriptor> {
        let mut fields = vec![
            FieldDescriptor::new("active", BufferKind::Byte, 1),
            FieldDescriptor::new("label", BufferKind::Int, 1),
            FieldDescriptor::new("merge_region_label", BufferKind::Int, 1),
            FieldDescriptor::new("n_neighbor_classes", BufferKind::Int, 1),
            FieldDescriptor::new("n_region_objects", BufferKind::Int, 1),
        ];
        fields.extend(RegionStats::fields(layout));
        fields
    }

    fn wire_sizes(&self, layout: &RecordLayout) -> BufferSizes {
        BufferSizes::from_fields(&Self::fixed_fields(layout))
            + BufferSizes {
                ints: self.neighbor_classes.len() + self.region_objects.len(),
                ..BufferSizes::ZERO
            }
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError> {
        w.put_bool(self.active)?;
        w.put_u32(self.label)?;
        w.put_u32(self.merge_region_label)?;
        w.put_count(self.neighbor_classes.len(), "neighbor class count")?;
        w.put_count(self.region_objects.len(), "region object count")?;
        self.stats.write_to(w, layout)?;
        w.put_u32_slice(&sorted(&self.neighbor_classes))?;
        w.put_u32_slice(&sorted(&self.region_objects))?;
        Ok(())
    }

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError> {
        let active = r.get_bool()?;
        let label = r.get_u32()?;
        let merge_region_label = r.get_u32()?;
        let n_neighbor_classes = r.get_count()?;
        let n_region_objects = r.get_count()?;
        let stats = RegionStats::read_from(r, layout)?;
        let neighbor_classes = r.get_u32_vec(n_neighbor_classes)?.into_iter().collect();
        let region_objects = r.get_u32_vec(n_region_objects)?.into_iter().collect();
        Ok(RegionClass {
            label,
            active,
            merge_region_label,
            stats,
            neighbor_classes,
            region_objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::records::pixel::Pixel;
    use crate::records::tests::all_layouts;

    fn sample(layout: &RecordLayout) -> RegionClass {
        let mut class = RegionClass::new(3, layout);
        let mut pixel = Pixel::new(vec![2.0; layout.nbands], layout);
        if layout.edge_enabled() {
            pixel = pixel.with_edge(1.25);
        }
        if layout.std_dev_enabled() {
            pixel = pixel.with_std_dev(vec![0.5; layout.nbands]);
        }
        class.stats.add_pixel(&pixel, layout);
        class.stats.nbpix = 1;
        class.neighbor_classes.extend([7, 1, 4]);
        class.region_objects.extend([9, 2]);
        class
    }

    #[test]
    fn test_class_roundtrip_for_every_layout() {
        for layout in all_layouts(2) {
            let class = sample(&layout);
            let sizes = class.wire_sizes(&layout);
            assert_eq!(sizes.ints, 4 + 2 + 3 + 2);
            let mut buf = MessageBuffer::with_sizes(sizes);
            let mut w = buf.writer();
            class.write_to(&mut w, &layout).unwrap();
            w.finish().unwrap();

            let mut r = buf.reader();
            let restored = RegionClass::read_from(&mut r, &layout).unwrap();
            r.finish().unwrap();
            assert_eq!(restored, class, "layout {:?}", layout);
        }
    }

    #[test]
    fn test_adjacency_lists_are_written_sorted() {
        let layout = all_layouts(1)[0];
        let class = sample(&layout);
        let mut buf = MessageBuffer::with_sizes(class.wire_sizes(&layout));
        let mut w = buf.writer();
        class.write_to(&mut w, &layout).unwrap();
        w.finish().unwrap();
        let tail = &buf.ints[buf.ints.len() - 5..];
        assert_eq!(tail, &[1, 4, 7, 2, 9]);
    }

    #[test]
    fn test_offset_labels_shifts_everything() {
        let layout = all_layouts(1)[0];
        let mut class = sample(&layout);
        class.retire(5);
        class.offset_labels(LabelOffsets { class_offset: 10, object_offset: 100 });
        assert_eq!(class.label, 13);
        assert_eq!(class.merge_region_label, 15);
        assert!(class.neighbor_classes.contains(&17));
        assert!(class.region_objects.contains(&109));
    }
}
