//! Merge redirects as a union-find forest over 1-based region labels.
//!
//! Label 0 is the "no region" sentinel and is never a member. Only roots are
//! ever linked, so every chain is acyclic and ends at a root (an active
//! region); `find` compresses the path it walks.

use crate::error::RhsegError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeForest {
    /// `parent[label]`; `parent[0]` is the unused sentinel slot.
    parent: Vec<u32>,
}

impl Default for MergeForest {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeForest {
    pub fn new() -> Self {
        Self { parent: vec![0] }
    }

    /// A forest of `n` singleton labels `1..=n`.
    pub fn with_len(n: usize) -> Self {
        Self {
            parent: (0..=n as u32).collect(),
        }
    }

    /// Number of labels in the forest.
    pub fn len(&self) -> usize {
        self.parent.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a new singleton label and returns it.
    pub fn push(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        label
    }

    pub fn contains(&self, label: u32) -> bool {
        label != 0 && (label as usize) < self.parent.len()
    }

    pub fn is_root(&self, label: u32) -> bool {
        self.contains(label) && self.parent[label as usize] == label
    }

    /// The root of `label`, compressing the walked path.
    pub fn find(&mut self, label: u32) -> Option<u32> {
        let root = self.find_const(label)?;
        let mut current = label;
        while current != root {
            let next = self.parent[current as usize];
            self.parent[current as usize] = root;
            current = next;
        }
        Some(root)
    }

    /// The root of `label` without mutating the forest.
    pub fn find_const(&self, label: u32) -> Option<u32> {
        if !self.contains(label) {
            return None;
        }
        let mut current = label;
        // A well-formed forest never needs more than len() hops.
        for _ in 0..=self.len() {
            let parent = self.parent[current as usize];
            if parent == current {
                return Some(current);
            }
            current = parent;
        }
        None
    }

    /// Links the root of `absorbed` under the root of `into` and returns the
    /// surviving root.
    pub fn union(&mut self, absorbed: u32, into: u32) -> Option<u32> {
        let a = self.find(absorbed)?;
        let b = self.find(into)?;
        if a != b {
            self.parent[a as usize] = b;
        }
        Some(b)
    }

    /// Points the root `child` at `parent` directly. Used when rebuilding a
    /// forest from received region records; `check_acyclic` must follow.
    pub(crate) fn attach(&mut self, child: u32, parent: u32) -> Result<(), RhsegError> {
        if !self.contains(child) || !self.contains(parent) || child == parent {
            return Err(RhsegError::Region(format!(
                "cannot redirect label {} to label {}",
                child, parent
            )));
        }
        self.parent[child as usize] = parent;
        Ok(())
    }

    /// Fails if some chain does not reach a root within `len()` hops.
    pub fn check_acyclic(&self) -> Result<(), RhsegError> {
        for label in 1..=self.len() as u32 {
            if self.find_const(label).is_none() {
                return Err(RhsegError::Region(format!(
                    "merge redirect chain from label {} does not terminate",
                    label
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_union_and_find() {
        let mut forest = MergeForest::with_len(5);
        assert_eq!(forest.union(1, 2), Some(2));
        assert_eq!(forest.union(2, 3), Some(3));
        assert_eq!(forest.find(1), Some(3));
        assert!(forest.is_root(3));
        assert!(!forest.is_root(1));
        assert_eq!(forest.union(3, 1), Some(3));
        assert_eq!(forest.find(0), None);
        assert_eq!(forest.find(6), None);
    }

    #[test]
    fn test_find_compresses_path() {
        let mut forest = MergeForest::with_len(4);
        forest.attach(1, 2).unwrap();
        forest.attach(2, 3).unwrap();
        forest.attach(3, 4).unwrap();
        assert_eq!(forest.find(1), Some(4));
        assert_eq!(forest.parent[1], 4);
        assert_eq!(forest.parent[2], 4);
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut forest = MergeForest::with_len(3);
        forest.attach(1, 2).unwrap();
        forest.attach(2, 1).unwrap();
        assert!(forest.check_acyclic().is_err());
        assert!(forest.attach(3, 3).is_err());
    }

    #[test]
    fn test_random_unions_stay_acyclic() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let n = rng.random_range(2..64usize);
            let mut forest = MergeForest::with_len(n);
            for _ in 0..n * 2 {
                let a = rng.random_range(1..=n as u32);
                let b = rng.random_range(1..=n as u32);
                forest.union(a, b).unwrap();
            }
            forest.check_acyclic().unwrap();
            for label in 1..=n as u32 {
                let root = forest.find_const(label).unwrap();
                assert!(forest.is_root(root));
            }
        }
    }
}
