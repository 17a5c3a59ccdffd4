//! The region set held by one task: every region class and region object it
//! knows about, active or merged away.
//!
//! Adjacency is kept symmetric eagerly. Merging two classes rewrites every
//! neighbor reference to the absorbed class, and then merges any adjacent
//! objects that have come to share a class. Object `neighbor_classes` are
//! derived from `neighbor_objects` and refreshed after each merge.

use hashbrown::HashSet;

use crate::buffer::{BufferReader, BufferSizes, BufferWriter, FieldDescriptor, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::region::{LabelOffsets, Region, RegionClass, RegionObject, RegionTable};

#[derive(Debug, Clone)]
pub struct RegionSet {
    layout: RecordLayout,
    classes: RegionTable<RegionClass>,
    objects: RegionTable<RegionObject>,
}

fn unknown(kind: &str, label: u32) -> RhsegError {
    RhsegError::Region(format!("unknown region {} label {}", kind, label))
}

impl RegionSet {
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            classes: RegionTable::new(),
            objects: RegionTable::new(),
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn classes(&self) -> &RegionTable<RegionClass> {
        &self.classes
    }

    pub fn objects(&self) -> &RegionTable<RegionObject> {
        &self.objects
    }

    //==============================================================================
    // Construction & lookup
    //==============================================================================

    /// Issues a new, empty, active class.
    pub fn add_class(&mut self) -> Result<u32, RhsegError> {
        let label = self.classes.next_label();
        self.classes.push(RegionClass::new(label, &self.layout))
    }

    /// Issues a new, empty, active object belonging to `class_label`.
    pub fn add_object(&mut self, class_label: u32) -> Result<u32, RhsegError> {
        let label = self.objects.next_label();
        let class = self
            .classes
            .get_mut(class_label)
            .filter(|c| c.active)
            .ok_or_else(|| unknown("class", class_label))?;
        class.region_objects.insert(label);
        self.objects
            .push(RegionObject::new(label, class_label, &self.layout))
    }

    pub fn class(&self, label: u32) -> Option<&RegionClass> {
        self.classes.get(label)
    }

    pub fn class_mut(&mut self, label: u32) -> Option<&mut RegionClass> {
        self.classes.get_mut(label)
    }

    pub fn object(&self, label: u32) -> Option<&RegionObject> {
        self.objects.get(label)
    }

    pub fn object_mut(&mut self, label: u32) -> Option<&mut RegionObject> {
        self.objects.get_mut(label)
    }

    pub fn resolve_class(&mut self, label: u32) -> Result<u32, RhsegError> {
        self.classes.resolve(label).ok_or_else(|| unknown("class", label))
    }

    pub fn resolve_object(&mut self, label: u32) -> Result<u32, RhsegError> {
        self.objects.resolve(label).ok_or_else(|| unknown("object", label))
    }

    pub fn nb_class_labels(&self) -> u32 {
        self.classes.len() as u32
    }

    pub fn nb_object_labels(&self) -> u32 {
        self.objects.len() as u32
    }

    pub fn active_class_count(&self) -> usize {
        self.classes.active_count()
    }

    pub fn active_object_count(&self) -> usize {
        self.objects.active_count()
    }

    /// `map[label]` is the active class that `label` resolves to.
    pub fn class_label_map(&self) -> Vec<u32> {
        self.classes.label_map()
    }

    pub fn object_label_map(&self) -> Vec<u32> {
        self.objects.label_map()
    }

    //==============================================================================
    // Adjacency
    //==============================================================================

    pub fn clear_neighbors(&mut self) {
        self.classes.clear_neighbors();
        self.objects.clear_neighbors();
    }

    /// Zeroes the boundary pixel count of every active region.
    pub fn clear_boundary_counts(&mut self) {
        self.classes.clear_boundary_counts();
        self.objects.clear_boundary_counts();
    }

    /// Records that objects `a` and `b` touch, in both directions, along with
    /// the class adjacency this implies.
    pub fn link_objects(&mut self, a: u32, b: u32) -> Result<(), RhsegError> {
        let a = self.resolve_object(a)?;
        let b = self.resolve_object(b)?;
        if a == b {
            return Ok(());
        }
        let class_a = self.object(a).map(|o| o.class_label).ok_or_else(|| unknown("object", a))?;
        let class_b = self.object(b).map(|o| o.class_label).ok_or_else(|| unknown("object", b))?;

        if let Some(object) = self.objects.get_mut(a) {
            object.neighbor_objects.insert(b);
            if class_a != class_b {
                object.neighbor_classes.insert(class_b);
            }
        }
        if let Some(object) = self.objects.get_mut(b) {
            object.neighbor_objects.insert(a);
            if class_a != class_b {
                object.neighbor_classes.insert(class_a);
            }
        }
        if class_a != class_b {
            self.link_classes(class_a, class_b)?;
        }
        Ok(())
    }

    fn link_classes(&mut self, a: u32, b: u32) -> Result<(), RhsegError> {
        self.classes
            .get_mut(a)
            .ok_or_else(|| unknown("class", a))?
            .neighbor_classes
            .insert(b);
        self.classes
            .get_mut(b)
            .ok_or_else(|| unknown("class", b))?
            .neighbor_classes
            .insert(a);
        Ok(())
    }

    /// Recomputes an object's `neighbor_classes` from its neighbor objects.
    fn refresh_object_neighbor_classes(&mut self, label: u32) {
        let Some(object) = self.objects.get(label) else {
            return;
        };
        let own = object.class_label;
        let classes: HashSet<u32> = object
            .neighbor_objects
            .iter()
            .filter_map(|&n| self.objects.get(n))
            .map(|n| n.class_label)
            .filter(|&c| c != own)
            .collect();
        if let Some(object) = self.objects.get_mut(label) {
            object.neighbor_classes = classes;
        }
    }

    /// Verifies that every adjacency is recorded on both sides and points at
    /// an active region.
    pub fn check_neighbor_symmetry(&self) -> Result<(), RhsegError> {
        let broken = |what: String| Err(RhsegError::Region(format!("asymmetric adjacency: {}", what)));

        for object in self.objects.iter_active() {
            for &n in &object.neighbor_objects {
                match self.objects.get(n) {
                    Some(other) if other.active && other.neighbor_objects.contains(&object.label) => {}
                    _ => return broken(format!("object {} -> object {}", object.label, n)),
                }
            }
            for &c in &object.neighbor_classes {
                let reciprocated = self.classes.get(c).is_some_and(|class| {
                    class.active && class.neighbor_classes.contains(&object.class_label)
                });
                if c == object.class_label || !reciprocated {
                    return broken(format!("object {} -> class {}", object.label, c));
                }
            }
        }
        for class in self.classes.iter_active() {
            for &n in &class.neighbor_classes {
                match self.classes.get(n) {
                    Some(other) if other.active && other.neighbor_classes.contains(&class.label) => {}
                    _ => return broken(format!("class {} -> class {}", class.label, n)),
                }
            }
            for &o in &class.region_objects {
                match self.objects.get(o) {
                    Some(object) if object.active && object.class_label == class.label => {}
                    _ => return broken(format!("class {} does not own object {}", class.label, o)),
                }
            }
        }
        Ok(())
    }

    //==============================================================================
    // Merging
    //==============================================================================

    /// Merges class `absorbed` into class `into` (after resolving both), then
    /// merges any adjacent objects that now share the surviving class.
    /// Returns the surviving class label.
    pub fn merge_classes(&mut self, absorbed: u32, into: u32) -> Result<u32, RhsegError> {
        let a = self.resolve_class(absorbed)?;
        let b = self.resolve_class(into)?;
        if a == b {
            return Ok(b);
        }

        let (stats, neighbors, members) = {
            let class = self.classes.get_mut(a).ok_or_else(|| unknown("class", a))?;
            (
                class.stats.clone(),
                std::mem::take(&mut class.neighbor_classes),
                std::mem::take(&mut class.region_objects),
            )
        };
        self.classes.retire(a, b)?;

        {
            let target = self.classes.get_mut(b).ok_or_else(|| unknown("class", b))?;
            target.stats.absorb(&stats);
            target.neighbor_classes.remove(&a);
            target
                .neighbor_classes
                .extend(neighbors.iter().copied().filter(|&n| n != a && n != b));
            target.region_objects.extend(members.iter().copied());
        }
        for &n in neighbors.iter().filter(|&&n| n != a && n != b) {
            if let Some(class) = self.classes.get_mut(n) {
                class.neighbor_classes.remove(&a);
                class.neighbor_classes.insert(b);
            }
        }

        let mut touched: HashSet<u32> = members.clone();
        for &o in &members {
            if let Some(object) = self.objects.get_mut(o) {
                object.class_label = b;
                touched.extend(object.neighbor_objects.iter().copied());
            }
        }
        for o in touched {
            self.refresh_object_neighbor_classes(o);
        }

        self.absorb_adjacent_objects(b)?;
        log::debug!("merged class {} into class {}", a, b);
        Ok(b)
    }

    /// Merges object pairs of `class_label` that touch until none remain.
    fn absorb_adjacent_objects(&mut self, class_label: u32) -> Result<(), RhsegError> {
        loop {
            let pair = {
                let class = self
                    .classes
                    .get(class_label)
                    .ok_or_else(|| unknown("class", class_label))?;
                class.region_objects.iter().find_map(|&o| {
                    let object = self.objects.get(o)?;
                    object
                        .neighbor_objects
                        .iter()
                        .find(|&&n| {
                            self.objects
                                .get(n)
                                .is_some_and(|other| other.class_label == class_label)
                        })
                        .map(|&n| (n, o))
                })
            };
            match pair {
                Some((absorbed, into)) => {
                    self.merge_objects(absorbed, into)?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Merges object `absorbed` into object `into`. Both must belong to the
    /// same class.
    pub fn merge_objects(&mut self, absorbed: u32, into: u32) -> Result<u32, RhsegError> {
        let a = self.resolve_object(absorbed)?;
        let b = self.resolve_object(into)?;
        if a == b {
            return Ok(b);
        }
        let class_a = self.object(a).map(|o| o.class_label).ok_or_else(|| unknown("object", a))?;
        let class_b = self.object(b).map(|o| o.class_label).ok_or_else(|| unknown("object", b))?;
        if class_a != class_b {
            return Err(RhsegError::Region(format!(
                "objects {} and {} belong to different classes ({} and {})",
                a, b, class_a, class_b
            )));
        }

        let (stats, neighbors) = {
            let object = self.objects.get_mut(a).ok_or_else(|| unknown("object", a))?;
            object.neighbor_classes.clear();
            (object.stats.clone(), std::mem::take(&mut object.neighbor_objects))
        };
        self.objects.retire(a, b)?;

        {
            let target = self.objects.get_mut(b).ok_or_else(|| unknown("object", b))?;
            target.stats.absorb(&stats);
            target.neighbor_objects.remove(&a);
            target
                .neighbor_objects
                .extend(neighbors.iter().copied().filter(|&n| n != a && n != b));
        }
        for &n in neighbors.iter().filter(|&&n| n != a && n != b) {
            if let Some(object) = self.objects.get_mut(n) {
                object.neighbor_objects.remove(&a);
                object.neighbor_objects.insert(b);
            }
        }
        if let Some(class) = self.classes.get_mut(class_b) {
            class.region_objects.remove(&a);
        }
        self.refresh_object_neighbor_classes(b);
        Ok(b)
    }

    /// Applies a list of `(absorbed, into)` class merges in order. Returns the
    /// number of merges that changed the set.
    pub fn apply_class_merges(&mut self, merges: &[(u32, u32)]) -> Result<usize, RhsegError> {
        let mut applied = 0;
        for &(absorbed, into) in merges {
            if self.resolve_class(absorbed)? != self.resolve_class(into)? {
                self.merge_classes(absorbed, into)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    //==============================================================================
    // Combining sets
    //==============================================================================

    /// Appends every region of `other`, shifting its labels past this set's
    /// labels. Inactive regions are kept so redirect chains survive.
    pub fn append(&mut self, other: RegionSet) -> Result<LabelOffsets, RhsegError> {
        if other.layout != self.layout {
            return Err(RhsegError::LayoutMismatch {
                sent: other.layout.fingerprint(),
                expected: self.layout.fingerprint(),
            });
        }
        let offsets = LabelOffsets {
            class_offset: self.nb_class_labels(),
            object_offset: self.nb_object_labels(),
        };
        let first_class = self.classes.next_label();
        let first_object = self.objects.next_label();

        for mut class in other.classes.into_regions() {
            class.offset_labels(offsets);
            self.classes.push(class)?;
        }
        for mut object in other.objects.into_regions() {
            object.offset_labels(offsets);
            self.objects.push(object)?;
        }
        self.classes.relink_from(first_class)?;
        self.objects.relink_from(first_object)?;
        Ok(offsets)
    }
}

//==================================================================================
// Wire format: class count, object count, then every class and every object.
//==================================================================================

impl WireRecord for RegionSet {
    fn fixed_fields(_layout: &RecordLayout) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("n_classes", BufferKind::Int, 1),
            FieldDescriptor::new("n_objects", BufferKind::Int, 1),
        ]
    }

    fn wire_sizes(&self, layout: &RecordLayout) -> BufferSizes {
        BufferSizes::from_fields(&Self::fixed_fields(layout))
            + crate::buffer::sizes_for(self.classes.iter(), layout)
            + crate::buffer::sizes_for(self.objects.iter(), layout)
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError> {
        w.put_count(self.classes.len(), "class count")?;
        w.put_count(self.objects.len(), "object count")?;
        crate::buffer::write_records(w, self.classes.iter(), layout)?;
        crate::buffer::write_records(w, self.objects.iter(), layout)?;
        Ok(())
    }

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError> {
        let n_classes = r.get_count()?;
        let n_objects = r.get_count()?;
        let mut set = RegionSet::new(*layout);
        for class in crate::buffer::read_records::<RegionClass>(r, n_classes, layout)? {
            set.classes.push(class)?;
        }
        for object in crate::buffer::read_records::<RegionObject>(r, n_objects, layout)? {
            set.objects.push(object)?;
        }
        set.classes.relink_from(1)?;
        set.objects.relink_from(1)?;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::config::{Dimensionality, FeatureFlags};

    fn layout() -> RecordLayout {
        RecordLayout::new(Dimensionality::Two, 1, FeatureFlags::default())
    }

    /// Three classes in a row, one object each, with a second object of
    /// class 1 touching class 3's object: o1(c1) - o2(c2) - o3(c3) - o4(c1).
    fn chain() -> RegionSet {
        let mut set = RegionSet::new(layout());
        for _ in 0..3 {
            set.add_class().unwrap();
        }
        for class in [1, 2, 3, 1] {
            let object = set.add_object(class).unwrap();
            set.object_mut(object).unwrap().stats.npix = 1;
        }
        set.link_objects(1, 2).unwrap();
        set.link_objects(2, 3).unwrap();
        set.link_objects(3, 4).unwrap();
        set
    }

    #[test]
    fn test_link_objects_is_symmetric() {
        let set = chain();
        set.check_neighbor_symmetry().unwrap();
        assert!(set.class(1).unwrap().neighbor_classes.contains(&2));
        assert!(set.class(1).unwrap().neighbor_classes.contains(&3));
        assert!(set.object(4).unwrap().neighbor_classes.contains(&3));
    }

    #[test]
    fn test_merge_classes_rewrites_neighbors() {
        let mut set = chain();
        assert_eq!(set.merge_classes(3, 1).unwrap(), 1);
        assert_eq!(set.active_class_count(), 2);
        assert!(!set.class(3).unwrap().active);
        assert_eq!(set.class(3).unwrap().merge_region_label, 1);
        assert_eq!(set.resolve_class(3).unwrap(), 1);

        // Objects 3 and 4 now share class 1 and touch, so they merged.
        assert_eq!(set.active_object_count(), 3);
        assert_eq!(set.resolve_object(4).unwrap(), set.resolve_object(3).unwrap());
        let survivor = set.resolve_object(3).unwrap();
        assert_eq!(set.object(survivor).unwrap().stats.npix, 2);

        let class2 = set.class(2).unwrap();
        assert_eq!(class2.neighbor_classes.iter().copied().collect::<Vec<_>>(), vec![1]);
        set.check_neighbor_symmetry().unwrap();
    }

    #[test]
    fn test_merge_objects_across_classes_is_rejected() {
        let mut set = chain();
        assert!(matches!(set.merge_objects(1, 2), Err(RhsegError::Region(_))));
    }

    #[test]
    fn test_redirect_chains_end_at_active_region() {
        let mut set = chain();
        set.merge_classes(1, 2).unwrap();
        set.merge_classes(2, 3).unwrap();
        for label in 1..=3 {
            let chain = set.classes().redirect_chain(label).unwrap();
            assert!(chain.len() <= set.nb_class_labels() as usize);
            let last = *chain.last().unwrap();
            assert!(set.class(last).unwrap().active);
            assert_eq!(last, 3);
        }
        assert_eq!(set.class_label_map(), vec![0, 3, 3, 3]);
    }

    #[test]
    fn test_append_offsets_labels_and_keeps_redirects() {
        let mut parent = chain();
        let mut child = chain();
        child.merge_classes(2, 1).unwrap();
        let offsets = parent.append(child).unwrap();
        assert_eq!(offsets, LabelOffsets { class_offset: 3, object_offset: 4 });
        assert_eq!(parent.nb_class_labels(), 6);
        assert_eq!(parent.resolve_class(5).unwrap(), 4);
        assert_eq!(parent.object(5).unwrap().class_label, 4);
        parent.check_neighbor_symmetry().unwrap();
    }

    #[test]
    fn test_set_roundtrip_preserves_forest() {
        let layout = layout();
        let mut set = chain();
        set.merge_classes(3, 2).unwrap();
        let mut buf = MessageBuffer::with_sizes(set.wire_sizes(&layout));
        let mut w = buf.writer();
        set.write_to(&mut w, &layout).unwrap();
        w.finish().unwrap();

        let mut r = buf.reader();
        let mut restored = RegionSet::read_from(&mut r, &layout).unwrap();
        r.finish().unwrap();
        assert_eq!(restored.nb_class_labels(), 3);
        assert_eq!(restored.resolve_class(3).unwrap(), 2);
        assert_eq!(restored.class_label_map(), set.class_label_map());
        restored.check_neighbor_symmetry().unwrap();
    }

    #[test]
    fn test_apply_class_merges_skips_noops() {
        let mut set = chain();
        let applied = set.apply_class_merges(&[(1, 2), (2, 1), (3, 3)]).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(set.active_class_count(), 2);
    }
}
