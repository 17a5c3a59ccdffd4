//! The seam between the protocol and the region-growing heuristic.
//!
//! The heuristic that decides which regions to merge lives outside this
//! crate. After every integration the protocol hands the combined region set
//! to a `MergeDecision` and applies the plan it returns.

use crate::error::RhsegError;
use crate::region::RegionSet;

/// The merges chosen at one level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// `(absorbed, into)` class pairs, applied in order.
    pub class_merges: Vec<(u32, u32)>,
    /// The dissimilarity threshold reached; reported back to children.
    pub threshold: f32,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.class_merges.is_empty()
    }

    /// Merges the planned classes. Adjacent objects that end up sharing a
    /// class are merged as well. Returns the number of merges applied.
    pub fn apply(&self, regions: &mut RegionSet) -> Result<usize, RhsegError> {
        regions.apply_class_merges(&self.class_merges)
    }
}

pub trait MergeDecision: Send {
    fn select_merges(&mut self, level: u16, regions: &RegionSet) -> MergePlan;
}

/// Never merges anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMerge;

impl MergeDecision for NoMerge {
    fn select_merges(&mut self, _level: u16, _regions: &RegionSet) -> MergePlan {
        MergePlan::default()
    }
}

impl<F> MergeDecision for F
where
    F: FnMut(u16, &RegionSet) -> MergePlan + Send,
{
    fn select_merges(&mut self, level: u16, regions: &RegionSet) -> MergePlan {
        self(level, regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dimensionality, FeatureFlags};
    use crate::records::layout::RecordLayout;

    fn two_touching_classes() -> RegionSet {
        let mut set = RegionSet::new(RecordLayout::new(
            Dimensionality::One,
            1,
            FeatureFlags::default(),
        ));
        for _ in 0..2 {
            let class = set.add_class().unwrap();
            set.add_object(class).unwrap();
        }
        set.link_objects(1, 2).unwrap();
        set
    }

    #[test]
    fn test_no_merge_plans_nothing() {
        let set = two_touching_classes();
        let plan = NoMerge.select_merges(0, &set);
        assert!(plan.is_empty());
        assert_eq!(plan.threshold, 0.0);
    }

    #[test]
    fn test_closure_decisions_apply_and_merge_objects() {
        let mut set = two_touching_classes();
        let mut decide = |_level: u16, regions: &RegionSet| MergePlan {
            class_merges: vec![(2, 1)],
            threshold: regions.active_class_count() as f32,
        };
        let plan = decide.select_merges(3, &set);
        assert_eq!(plan.threshold, 2.0);
        assert_eq!(plan.apply(&mut set).unwrap(), 1);
        assert_eq!(set.active_class_count(), 1);
        assert_eq!(set.active_object_count(), 1);
    }
}
