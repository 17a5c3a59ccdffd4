//! The per-pixel record held by the task owning a spatial section.

use crate::buffer::{BufferReader, BufferWriter, FieldDescriptor, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;

/// One pixel: its region label, spectral values and optional feature fields.
///
/// `local_std_dev` is empty unless the layout enables local std-dev; the edge
/// fields are ignored on the wire unless the layout enables the edge image.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixel {
    /// Region class label; 0 means unlabeled.
    pub region_label: u32,
    pub values: Vec<f32>,
    pub std_dev_mask: bool,
    pub local_std_dev: Vec<f32>,
    pub edge_mask: bool,
    pub edge_value: f32,
}

impl Pixel {
    /// An unlabeled pixel with the given band values and feature fields sized
    /// for `layout`.
    pub fn new(values: Vec<f32>, layout: &RecordLayout) -> Self {
        let local_std_dev = if layout.std_dev_enabled() {
            vec![0.0; layout.nbands]
        } else {
            Vec::new()
        };
        Self {
            region_label: 0,
            values,
            std_dev_mask: false,
            local_std_dev,
            edge_mask: false,
            edge_value: 0.0,
        }
    }

    pub fn with_label(mut self, label: u32) -> Self {
        self.region_label = label;
        self
    }

    pub fn with_std_dev(mut self, std_dev: Vec<f32>) -> Self {
        self.std_dev_mask = true;
        self.local_std_dev = std_dev;
        self
    }

    pub fn with_edge(mut self, edge_value: f32) -> Self {
        self.edge_mask = true;
        self.edge_value = edge_value;
        self
    }

    pub fn is_labeled(&self) -> bool {
        self.region_label != 0
    }

    fn check_bands(&self, layout: &RecordLayout) -> Result<(), RhsegError> {
        if self.values.len() != layout.nbands {
            return Err(RhsegError::Internal(format!(
                "pixel carries {} band values, layout expects {}",
                self.values.len(),
                layout.nbands
            )));
        }
        if layout.std_dev_enabled() && self.local_std_dev.len() != layout.nbands {
            return Err(RhsegError::Internal(format!(
                "pixel carries {} std-dev values, layout expects {}",
                self.local_std_dev.len(),
                layout.nbands
            )));
        }
        Ok(())
    }
}

impl WireRecord for Pixel {
    fn fixed_fields(layout: &RecordLayout) -> Vec<FieldDescriptor> {
        let mut fields = Vec::with_capacity(6);
        if layout.std_dev_enabled() {
            fields.push(FieldDescriptor::new("std_dev_mask", BufferKind::Byte, 1));
        }
        if layout.edge_enabled() {
            fields.push(FieldDescriptor::new("edge_mask", BufferKind::Byte, 1));
        }
        fields.push(FieldDescriptor::new("region_label", BufferKind::Int, 1));
        fields.push(FieldDescriptor::new("values", BufferKind::Float, layout.nbands));
        if layout.std_dev_enabled() {
            fields.push(FieldDescriptor::new("local_std_dev", BufferKind::Float, layout.nbands));
        }
        if layout.edge_enabled() {
            fields.push(FieldDescriptor::new("edge_value", BufferKind::Float, 1));
        }
        fields
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError> {
        self.check_bands(layout)?;
        if layout.std_dev_enabled() {
            w.put_bool(self.std_dev_mask)?;
        }
        if layout.edge_enabled() {
            w.put_bool(self.edge_mask)?;
        }
        w.put_u32(self.region_label)?;
        w.put_f32_slice(&self.values)?;
        if layout.std_dev_enabled() {
            w.put_f32_slice(&self.local_std_dev)?;
        }
        if layout.edge_enabled() {
            w.put_f32(self.edge_value)?;
        }
        Ok(())
    }

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError> {
        let std_dev_mask = if layout.std_dev_enabled() { r.get_bool()? } else { false };
        let edge_mask = if layout.edge_enabled() { r.get_bool()? } else { false };
        let region_label = r.get_u32()?;
        let values = r.get_f32_vec(layout.nbands)?;
        let local_std_dev = if layout.std_dev_enabled() {
            r.get_f32_vec(layout.nbands)?
        } else {
            Vec::new()
        };
        let edge_value = if layout.edge_enabled() { r.get_f32()? } else { 0.0 };
        Ok(Pixel {
            region_label,
            values,
            std_dev_mask,
            local_std_dev,
            edge_mask,
            edge_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{read_records, sizes_for, write_records, MessageBuffer};
    use crate::records::tests::all_layouts;

    fn sample_pixels(layout: &RecordLayout) -> Vec<Pixel> {
        let bands = |base: f32| (0..layout.nbands).map(|b| base + b as f32).collect::<Vec<_>>();
        let mut first = Pixel::new(bands(10.0), layout).with_label(4);
        let mut second = Pixel::new(bands(-3.5), layout);
        if layout.std_dev_enabled() {
            first = first.with_std_dev(bands(0.25));
        }
        if layout.edge_enabled() {
            second = second.with_edge(7.75);
        }
        vec![first, second]
    }

    #[test]
    fn test_pixel_roundtrip_for_every_layout() {
        for layout in all_layouts(3) {
            let pixels = sample_pixels(&layout);
            let mut buf = MessageBuffer::with_sizes(sizes_for(&pixels, &layout));
            let mut w = buf.writer();
            write_records(&mut w, &pixels, &layout).unwrap();
            w.finish().unwrap();

            let mut r = buf.reader();
            let restored: Vec<Pixel> = read_records(&mut r, pixels.len(), &layout).unwrap();
            r.finish().unwrap();
            assert_eq!(restored, pixels, "layout {:?}", layout);
        }
    }

    #[test]
    fn test_pixel_sizes_follow_flags() {
        for layout in all_layouts(2) {
            let sizes = Pixel::new(vec![0.0; 2], &layout).wire_sizes(&layout);
            let flags = layout.flags;
            assert_eq!(sizes.bytes, usize::from(flags.edge_image) + usize::from(flags.local_std_dev));
            assert_eq!(sizes.ints, 1);
            assert_eq!(
                sizes.floats,
                2 + if flags.local_std_dev { 2 } else { 0 } + usize::from(flags.edge_image)
            );
        }
    }

    #[test]
    fn test_band_count_mismatch_is_rejected() {
        let layout = all_layouts(2)[0];
        let pixel = Pixel::new(vec![1.0], &layout);
        let mut buf = MessageBuffer::with_sizes(Pixel::new(vec![0.0; 2], &layout).wire_sizes(&layout));
        let mut w = buf.writer();
        assert!(matches!(pixel.write_to(&mut w, &layout), Err(RhsegError::Internal(_))));
    }
}
