//! Cross-reference index records: per-pixel payload used when one task tells
//! another where a pixel lives and which regions it belongs to.
//!
//! Two projections exist. The spatial projection carries the region object
//! label and boundary flag; the non-spatial projection carries the edge
//! fields. Both carry the region class label. Index records are exchange
//! payload only and are never persisted.

use crate::buffer::{BufferReader, BufferSizes, BufferWriter, FieldDescriptor, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::utils::checked_i16;

const TAG_SPATIAL: u8 = 0;
const TAG_NON_SPATIAL: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexProjection {
    Spatial {
        region_object_label: u32,
        boundary: bool,
    },
    NonSpatial {
        edge_mask: bool,
        edge_value: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexRecord {
    /// Position inside the owning section's flattened grid.
    pub pixel_index: u32,
    /// Owning section id.
    pub pixel_section: u16,
    pub projection: IndexProjection,
    pub region_class_label: u32,
}

impl IndexRecord {
    pub fn spatial(
        pixel_index: u32,
        pixel_section: u16,
        region_class_label: u32,
        region_object_label: u32,
        boundary: bool,
    ) -> Self {
        Self {
            pixel_index,
            pixel_section,
            projection: IndexProjection::Spatial {
                region_object_label,
                boundary,
            },
            region_class_label,
        }
    }

    pub fn non_spatial(
        pixel_index: u32,
        pixel_section: u16,
        region_class_label: u32,
        edge_mask: bool,
        edge_value: f32,
    ) -> Self {
        Self {
            pixel_index,
            pixel_section,
            projection: IndexProjection::NonSpatial {
                edge_mask,
                edge_value,
            },
            region_class_label,
        }
    }

    /// The region object label, for spatial records.
    pub fn region_object_label(&self) -> Option<u32> {
        match self.projection {
            IndexProjection::Spatial {
                region_object_label,
                ..
            } => Some(region_object_label),
            IndexProjection::NonSpatial { .. } => None,
        }
    }

    /// The boundary flag, for spatial records.
    pub fn boundary(&self) -> Option<bool> {
        match self.projection {
            IndexProjection::Spatial { boundary, .. } => Some(boundary),
            IndexProjection::NonSpatial { .. } => None,
        }
    }

    fn projection_fields(&self, layout: &RecordLayout) -> Vec<FieldDescriptor> {
        match self.projection {
            IndexProjection::Spatial { .. } => vec![
                FieldDescriptor::new("boundary", BufferKind::Byte, 1),
                FieldDescriptor::new("region_object_label", BufferKind::Int, 1),
            ],
            IndexProjection::NonSpatial { .. } if layout.edge_enabled() => vec![
                FieldDescriptor::new("edge_mask", BufferKind::Byte, 1),
                FieldDescriptor::new("edge_value", BufferKind::Float, 1),
            ],
            IndexProjection::NonSpatial { .. } => Vec::new(),
        }
    }
}

impl WireRecord for IndexRecord {
    fn fixed_fields(_layout: &RecordLayout) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("projection", BufferKind::Byte, 1),
            FieldDescriptor::new("pixel_section", BufferKind::Short, 1),
            FieldDescriptor::new("pixel_index", BufferKind::Int, 1),
            FieldDescriptor::new("region_class_label", BufferKind::Int, 1),
        ]
    }

    fn wire_sizes(&self, layout: &RecordLayout) -> BufferSizes {
        BufferSizes::from_fields(&Self::fixed_fields(layout))
            + BufferSizes::from_fields(&self.projection_fields(layout))
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError> {
        match self.projection {
            IndexProjection::Spatial { .. } => w.put_u8(TAG_SPATIAL)?,
            IndexProjection::NonSpatial { .. } => w.put_u8(TAG_NON_SPATIAL)?,
        }
        w.put_i16(checked_i16(self.pixel_section, "pixel_section")?)?;
        w.put_u32(self.pixel_index)?;
        w.put_u32(self.region_class_label)?;
        match self.projection {
            IndexProjection::Spatial {
                region_object_label,
                boundary,
            } => {
                w.put_bool(boundary)?;
                w.put_u32(region_object_label)?;
            }
            IndexProjection::NonSpatial {
                edge_mask,
                edge_value,
            } => {
                if layout.edge_enabled() {
                    w.put_bool(edge_mask)?;
                    w.put_f32(edge_value)?;
                }
            }
        }
        Ok(())
    }

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError> {
        let tag = r.get_u8()?;
        let section = r.get_i16()?;
        let pixel_section = u16::try_from(section).map_err(|_| {
            RhsegError::FrameFormat(format!("negative section id {} in index record", section))
        })?;
        let pixel_index = r.get_u32()?;
        let region_class_label = r.get_u32()?;
        let projection = match tag {
            TAG_SPATIAL => {
                let boundary = r.get_bool()?;
                let region_object_label = r.get_u32()?;
                IndexProjection::Spatial {
                    region_object_label,
                    boundary,
                }
            }
            TAG_NON_SPATIAL => {
                let (edge_mask, edge_value) = if layout.edge_enabled() {
                    (r.get_bool()?, r.get_f32()?)
                } else {
                    (false, 0.0)
                };
                IndexProjection::NonSpatial {
                    edge_mask,
                    edge_value,
                }
            }
            other => {
                return Err(RhsegError::FrameFormat(format!(
                    "unknown index projection tag {}",
                    other
                )))
            }
        };
        Ok(IndexRecord {
            pixel_index,
            pixel_section,
            projection,
            region_class_label,
        })
    }
}
