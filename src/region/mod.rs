//! Region classes (spectral clusters) and region objects (connected
//! components within a class), plus the bookkeeping that keeps their
//! adjacency sets and merge redirects consistent.

use hashbrown::HashSet;

use crate::buffer::WireRecord;
use crate::error::RhsegError;

pub mod class;
pub mod forest;
pub mod object;
pub mod set;
pub mod stats;

pub use class::RegionClass;
pub use forest::MergeForest;
pub use object::RegionObject;
pub use set::RegionSet;
pub use stats::RegionStats;

/// Offsets added to a child's class and object labels when its regions are
/// appended to a parent's set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelOffsets {
    pub class_offset: u32,
    pub object_offset: u32,
}

/// Behavior shared by region classes and region objects.
pub trait Region: WireRecord + Clone + std::fmt::Debug {
    fn label(&self) -> u32;
    fn is_active(&self) -> bool;
    /// The label this region was merged into; 0 while active.
    fn merge_region_label(&self) -> u32;
    fn stats(&self) -> &RegionStats;
    fn stats_mut(&mut self) -> &mut RegionStats;
    fn neighbor_classes(&self) -> &HashSet<u32>;
    /// Marks the region inactive, redirecting it to `into`.
    fn retire(&mut self, into: u32);
    /// Shifts every label this region stores.
    fn offset_labels(&mut self, offsets: LabelOffsets);
    /// Empties the adjacency sets and the boundary pixel count.
    fn clear_neighbors(&mut self);
}

/// Adds `offset` to every label of a set.
pub(crate) fn shifted(set: &HashSet<u32>, offset: u32) -> HashSet<u32> {
    set.iter().map(|&label| label + offset).collect()
}

/// A set in ascending order, so wire output is deterministic.
pub(crate) fn sorted(set: &HashSet<u32>) -> Vec<u32> {
    let mut labels: Vec<u32> = set.iter().copied().collect();
    labels.sort_unstable();
    labels
}

/// Dense storage of one kind of region, indexed by label, with its merge
/// forest.
#[derive(Debug, Clone)]
pub struct RegionTable<R> {
    regions: Vec<R>,
    forest: MergeForest,
}

impl<R: Region> Default for RegionTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Region> RegionTable<R> {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            forest: MergeForest::new(),
        }
    }

    /// Number of labels ever issued, active or not.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_active()).count()
    }

    /// The label the next pushed region must carry.
    pub fn next_label(&self) -> u32 {
        self.regions.len() as u32 + 1
    }

    /// Appends a region. Its label must be `next_label()`.
    pub fn push(&mut self, region: R) -> Result<u32, RhsegError> {
        let expected = self.next_label();
        if region.label() != expected {
            return Err(RhsegError::Region(format!(
                "region label {} pushed where {} was expected",
                region.label(),
                expected
            )));
        }
        self.forest.push();
        self.regions.push(region);
        Ok(expected)
    }

    /// Re-creates forest links for retired regions with labels `>= from`,
    /// then checks that every chain terminates.
    pub(crate) fn relink_from(&mut self, from: u32) -> Result<(), RhsegError> {
        for region in self.regions.iter().skip(from.saturating_sub(1) as usize) {
            if !region.is_active() {
                self.forest.attach(region.label(), region.merge_region_label())?;
            }
        }
        self.forest.check_acyclic()?;
        for label in from.max(1)..=self.regions.len() as u32 {
            let root = self.forest.find_const(label).unwrap_or(0);
            if !self.get(root).is_some_and(|r| r.is_active()) {
                return Err(RhsegError::Region(format!(
                    "label {} redirects to inactive label {}",
                    label, root
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, label: u32) -> Option<&R> {
        self.regions.get((label as usize).checked_sub(1)?)
    }

    pub fn get_mut(&mut self, label: u32) -> Option<&mut R> {
        self.regions.get_mut((label as usize).checked_sub(1)?)
    }

    /// The active label `label` currently stands for.
    pub fn resolve(&mut self, label: u32) -> Option<u32> {
        self.forest.find(label)
    }

    pub fn resolve_const(&self, label: u32) -> Option<u32> {
        self.forest.find_const(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.regions.iter()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &R> {
        self.regions.iter().filter(|r| r.is_active())
    }

    pub fn into_regions(self) -> Vec<R> {
        self.regions
    }

    /// Links the root of `absorbed` into the root of `into` and retires it.
    pub(crate) fn retire(&mut self, absorbed: u32, into: u32) -> Result<u32, RhsegError> {
        let a = self.resolve(absorbed);
        let root = self.forest.union(absorbed, into);
        match (a, root) {
            (Some(a), Some(root)) => {
                if a != root {
                    if let Some(region) = self.get_mut(a) {
                        region.retire(root);
                    }
                }
                Ok(root)
            }
            _ => Err(RhsegError::Region(format!(
                "cannot merge label {} into label {}",
                absorbed, into
            ))),
        }
    }

    /// Follows the stored `merge_region_label` fields from `label` until an
    /// active region, failing after `len()` hops.
    pub fn redirect_chain(&self, label: u32) -> Result<Vec<u32>, RhsegError> {
        let mut chain = vec![label];
        let mut current = label;
        for _ in 0..=self.len() {
            let region = self.get(current).ok_or_else(|| {
                RhsegError::Region(format!("redirect to unknown label {}", current))
            })?;
            if region.is_active() {
                return Ok(chain);
            }
            current = region.merge_region_label();
            chain.push(current);
        }
        Err(RhsegError::Region(format!(
            "redirect chain from label {} exceeds {} hops",
            label,
            self.len()
        )))
    }

    /// `map[label]` is the active label `label` resolves to; `map[0] == 0`.
    pub fn label_map(&self) -> Vec<u32> {
        (0..=self.len() as u32)
            .map(|label| self.resolve_const(label).unwrap_or(0))
            .collect()
    }

    pub(crate) fn clear_neighbors(&mut self) {
        for region in self.regions.iter_mut().filter(|r| r.is_active()) {
            region.clear_neighbors();
        }
    }

    pub(crate) fn clear_boundary_counts(&mut self) {
        for region in self.regions.iter_mut().filter(|r| r.is_active()) {
            region.stats_mut().nbpix = 0;
        }
    }
}
