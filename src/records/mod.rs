//! Per-pixel records exchanged between tasks, and the layout that decides
//! which optional fields they carry.

pub mod index;
pub mod layout;
pub mod pixel;

pub use index::{IndexProjection, IndexRecord};
pub use layout::RecordLayout;
pub use pixel::Pixel;

#[cfg(test)]
pub(crate) mod tests {
    use crate::config::{Dimensionality, FeatureFlags};
    use crate::records::layout::RecordLayout;

    /// Every combination of edge on/off, std-dev on/off and 1-D/2-D/3-D.
    pub(crate) fn all_layouts(nbands: usize) -> Vec<RecordLayout> {
        let mut layouts = Vec::with_capacity(12);
        for dims in [Dimensionality::One, Dimensionality::Two, Dimensionality::Three] {
            for edge_image in [false, true] {
                for local_std_dev in [false, true] {
                    layouts.push(RecordLayout::new(
                        dims,
                        nbands,
                        FeatureFlags {
                            edge_image,
                            local_std_dev,
                        },
                    ));
                }
            }
        }
        layouts
    }
}
