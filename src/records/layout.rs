//! The record layout: everything about the configuration that changes which
//! fields a pixel, index or region record carries on the wire.

use crate::config::{Dimensionality, FeatureFlags};

/// Field-layout parameters shared by both ends of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub dims: Dimensionality,
    pub nbands: usize,
    pub flags: FeatureFlags,
}

impl RecordLayout {
    pub fn new(dims: Dimensionality, nbands: usize, flags: FeatureFlags) -> Self {
        Self { dims, nbands, flags }
    }

    pub fn edge_enabled(&self) -> bool {
        self.flags.edge_image
    }

    pub fn std_dev_enabled(&self) -> bool {
        self.flags.local_std_dev
    }

    /// A compact identifier of this layout, carried in every envelope header
    /// so a receiver can refuse a buffer packed under a different layout.
    ///
    /// Bits 31..28 hold the dimensionality, bit 27 the edge flag, bit 26 the
    /// std-dev flag and the low 26 bits the band count.
    pub fn fingerprint(&self) -> u32 {
        ((self.dims.rank() as u32) << 28)
            | (u32::from(self.flags.edge_image) << 27)
            | (u32::from(self.flags.local_std_dev) << 26)
            | (self.nbands as u32 & 0x03FF_FFFF)
    }
}
