//! Aggregate statistics carried by every region class and region object.

use crate::buffer::{BufferReader, BufferWriter, FieldDescriptor};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::records::pixel::Pixel;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionStats {
    /// Number of pixels in the region.
    pub npix: u32,
    /// Number of those pixels on the region boundary.
    pub nbpix: u32,
    /// Per-band sum of pixel values.
    pub sum: Vec<f64>,
    /// Per-band sum of squared pixel values.
    pub sumsq: Vec<f64>,
    /// Per-band sum of local standard deviations (std-dev layouts only).
    pub sum_std_dev: Vec<f64>,
    /// Largest edge value of any member pixel (edge layouts only).
    pub max_edge_value: f32,
}

impl RegionStats {
    pub fn new(layout: &RecordLayout) -> Self {
        Self {
            npix: 0,
            nbpix: 0,
            sum: vec![0.0; layout.nbands],
            sumsq: vec![0.0; layout.nbands],
            sum_std_dev: if layout.std_dev_enabled() {
                vec![0.0; layout.nbands]
            } else {
                Vec::new()
            },
            max_edge_value: 0.0,
        }
    }

    pub fn add_pixel(&mut self, pixel: &Pixel, layout: &RecordLayout) {
        self.npix += 1;
        for (band, &value) in pixel.values.iter().enumerate().take(layout.nbands) {
            let value = f64::from(value);
            self.sum[band] += value;
            self.sumsq[band] += value * value;
        }
        if layout.std_dev_enabled() && pixel.std_dev_mask {
            for (acc, &sd) in self.sum_std_dev.iter_mut().zip(&pixel.local_std_dev) {
                *acc += f64::from(sd);
            }
        }
        if layout.edge_enabled() && pixel.edge_mask {
            self.max_edge_value = self.max_edge_value.max(pixel.edge_value);
        }
    }

    /// Folds another region's statistics into this one.
    pub fn absorb(&mut self, other: &RegionStats) {
        self.npix += other.npix;
        self.nbpix += other.nbpix;
        for (acc, v) in self.sum.iter_mut().zip(&other.sum) {
            *acc += v;
        }
        for (acc, v) in self.sumsq.iter_mut().zip(&other.sumsq) {
            *acc += v;
        }
        for (acc, v) in self.sum_std_dev.iter_mut().zip(&other.sum_std_dev) {
            *acc += v;
        }
        self.max_edge_value = self.max_edge_value.max(other.max_edge_value);
    }

    pub fn mean(&self, band: usize) -> f64 {
        if self.npix == 0 {
            return 0.0;
        }
        self.sum.get(band).copied().unwrap_or(0.0) / f64::from(self.npix)
    }

    pub fn means(&self) -> Vec<f64> {
        (0..self.sum.len()).map(|band| self.mean(band)).collect()
    }

    /// Population variance of one band.
    pub fn variance(&self, band: usize) -> f64 {
        if self.npix == 0 {
            return 0.0;
        }
        let n = f64::from(self.npix);
        let mean = self.mean(band);
        let sumsq = self.sumsq.get(band).copied().unwrap_or(0.0);
        (sumsq / n - mean * mean).max(0.0)
    }

    //==============================================================================
    // Wire helpers, embedded in region class/object records.
    //==============================================================================

    pub(crate) fn fields(layout: &RecordLayout) -> Vec<FieldDescriptor> {
        let mut fields = vec![
            FieldDescriptor::new("npix", BufferKind::Int, 1),
            FieldDescriptor::new("nbpix", BufferKind::Int, 1),
            FieldDescriptor::new("sum", BufferKind::Double, layout.nbands),
            FieldDescriptor::new("sumsq", BufferKind::Double, layout.nbands),
        ];
        if layout.std_dev_enabled() {
            fields.push(FieldDescriptor::new("sum_std_dev", BufferKind::Double, layout.nbands));
        }
        if layout.edge_enabled() {
            fields.push(FieldDescriptor::new("max_edge_value", BufferKind::Float, 1));
        }
        fields
    }

    pub(crate) fn write_to(
        &self,
        w: &mut BufferWriter<'_>,
        layout: &RecordLayout,
    ) -> Result<(), RhsegError> {
        if self.sum.len() != layout.nbands || self.sumsq.len() != layout.nbands {
            return Err(RhsegError::Internal(format!(
                "region statistics carry {} bands, layout expects {}",
                self.sum.len(),
                layout.nbands
            )));
        }
        w.put_u32(self.npix)?;
        w.put_u32(self.nbpix)?;
        w.put_f64_slice(&self.sum)?;
        w.put_f64_slice(&self.sumsq)?;
        if layout.std_dev_enabled() {
            if self.sum_std_dev.len() != layout.nbands {
                return Err(RhsegError::Internal(
                    "region statistics are missing std-dev sums".to_string(),
                ));
            }
            w.put_f64_slice(&self.sum_std_dev)?;
        }
        if layout.edge_enabled() {
            w.put_f32(self.max_edge_value)?;
        }
        Ok(())
    }

    pub(crate) fn read_from(
        r: &mut BufferReader<'_>,
        layout: &RecordLayout,
    ) -> Result<Self, RhsegError> {
        let npix = r.get_u32()?;
        let nbpix = r.get_u32()?;
        let sum = r.get_f64_vec(layout.nbands)?;
        let sumsq = r.get_f64_vec(layout.nbands)?;
        let sum_std_dev = if layout.std_dev_enabled() {
            r.get_f64_vec(layout.nbands)?
        } else {
            Vec::new()
        };
        let max_edge_value = if layout.edge_enabled() { r.get_f32()? } else { 0.0 };
        Ok(Self {
            npix,
            nbpix,
            sum,
            sumsq,
            sum_std_dev,
            max_edge_value,
        })
    }
}
