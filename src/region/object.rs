//! Region objects: spatially connected components of one region class.

use hashbrown::HashSet;

use crate::buffer::{BufferReader, BufferSizes, BufferWriter, FieldDescriptor, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::region::{shifted, sorted, LabelOffsets, Region, RegionStats};

#[derive(Debug, Clone, PartialEq)]
pub struct RegionObject {
    pub label: u32,
    pub active: bool,
    pub merge_region_label: u32,
    pub class_label: u32,
    pub stats: RegionStats,
    /// Classes of adjacent objects, excluding this object's own class.
    pub neighbor_classes: HashSet<u32>,
    pub neighbor_objects: HashSet<u32>,
}

impl RegionObject {
    pub fn new(label: u32, class_label: u32, layout: &RecordLayout) -> Self {
        Self {
            label,
            active: true,
            merge_region_label: 0,
            class_label,
            stats: RegionStats::new(layout),
            neighbor_classes: HashSet::new(),
            neighbor_objects: HashSet::new(),
        }
    }
}

impl Region for RegionObject {
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
        self.label += offsets.object_offset;
        if !self.active {
            self.merge_region_label += offsets.object_offset;
        }
        self.class_label += offsets.class_offset;
        self.neighbor_classes = shifted(&self.neighbor_classes, offsets.class_offset);
        self.neighbor_objects = shifted(&self.neighbor_objects, offsets.object_offset);
    }

    fn clear_neighbors(&mut self) {
        self.neighbor_classes.clear();
        self.neighbor_objects.clear();
        self.stats.nbpix = 0;
    }
}

impl WireRecord for RegionObject {
    fn fixed_fields(layout: &RecordLayout) -> Vec<FieldDescriptor> {
        let mut fields = vec![
            FieldDescriptor::new("active", BufferKind::Byte, 1),
            FieldDescriptor::new("label", BufferKind::Int, 1),
            FieldDescriptor::new("merge_region_label", BufferKind::Int, 1),
            FieldDescriptor::new("class_label", BufferKind::Int, 1),
            FieldDescriptor::new("n_neighbor_classes", BufferKind::Int, 1),
            FieldDescriptor::new("n_neighbor_objects", BufferKind::Int, 1),
        ];
        fields.extend(RegionStats::fields(layout));
        fields
    }

    fn wire_sizes(&self, layout: &RecordLayout) -> BufferSizes {
        BufferSizes::from_fields(&Self::fixed_fields(layout))
            + BufferSizes {
                ints: self.neighbor_classes.len() + self.neighbor_objects.len(),
                ..BufferSizes::ZERO
            }
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError> {
        w.put_bool(self.active)?;
        w.put_u32(self.label)?;
        w.put_u32(self.merge_region_label)?;
        w.put_u32(self.class_label)?;
        w.put_count(self.neighbor_classes.len(), "neighbor class count")?;
        w.put_count(self.neighbor_objects.len(), "neighbor object count")?;
        self.stats.write_to(w, layout)?;
        w.put_u32_slice(&sorted(&self.neighbor_classes))?;
        w.put_u32_slice(&sorted(&self.neighbor_objects))?;
        Ok(())
    }

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError> {
        let active = r.get_bool()?;
        let label = r.get_u32()?;
        let merge_region_label = r.get_u32()?;
        let class_label = r.get_u32()?;
        let n_neighbor_classes = r.get_count()?;
        let n_neighbor_objects = r.get_count()?;
        let stats = RegionStats::read_from(r, layout)?;
        let neighbor_classes = r.get_u32_vec(n_neighbor_classes)?.into_iter().collect();
        let neighbor_objects = r.get_u32_vec(n_neighbor_objects)?.into_iter().collect();
        Ok(RegionObject {
            label,
            active,
            merge_region_label,
            class_label,
            stats,
            neighbor_classes,
            neighbor_objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{read_records, sizes_for, write_records, MessageBuffer};
    use crate::records::tests::all_layouts;

    #[test]
    fn test_object_roundtrip_for_every_layout() {
        for layout in all_layouts(3) {
            let mut first = RegionObject::new(1, 1, &layout);
            first.stats.npix = 4;
            first.stats.sum = vec![1.0, 2.0, 3.0];
            first.neighbor_objects.insert(2);
            first.neighbor_classes.insert(2);
            let mut second = RegionObject::new(2, 2, &layout);
            second.retire(1);
            let objects = vec![first, second];

            let mut buf = MessageBuffer::with_sizes(sizes_for(&objects, &layout));
            let mut w = buf.writer();
            write_records(&mut w, &objects, &layout).unwrap();
            w.finish().unwrap();

            let mut r = buf.reader();
            let restored: Vec<RegionObject> = read_records(&mut r, 2, &layout).unwrap();
            r.finish().unwrap();
            assert_eq!(restored, objects, "layout {:?}", layout);
        }
    }

    #[test]
    fn test_truncated_buffer_overruns() {
        let layout = all_layouts(1)[0];
        let mut object = RegionObject::new(1, 1, &layout);
        object.neighbor_objects.extend([2, 3]);
        let mut short = object.wire_sizes(&layout);
        short.ints -= 1;
        let mut buf = MessageBuffer::with_sizes(short);
        let mut w = buf.writer();
        assert!(matches!(
            object.write_to(&mut w, &layout),
            Err(RhsegError::BufferOverrun { kind: BufferKind::Int, .. })
        ));
    }

    #[test]
    fn test_clear_neighbors_resets_boundary_count() {
        let layout = all_layouts(1)[0];
        let mut object = RegionObject::new(1, 1, &layout);
        object.stats.nbpix = 3;
        object.neighbor_objects.insert(4);
        object.neighbor_classes.insert(2);
        object.clear_neighbors();
        assert_eq!(object.stats.nbpix, 0);
        assert!(object.neighbor_objects.is_empty());
        assert!(object.neighbor_classes.is_empty());
    }
}
