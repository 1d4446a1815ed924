//! The four node-status index-sets: preference, dead, disabled, retiring
//! (spec section 3, section 4.1).
//!
//! Cyclic references into the node table are resolved as plain indices;
//! `NodeRegistry::remove` is responsible for remapping every list when a
//! node's index shifts (design note: "cyclic references").

use std::collections::BTreeSet;

/// Which of the three mutually exclusive outage states a node is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Live,
    Dead,
    Disabled,
    Retiring,
}

#[derive(Debug, Clone, Default)]
pub struct NodeStatusLists {
    pub preference: Vec<usize>,
    dead: BTreeSet<usize>,
    disabled: BTreeSet<usize>,
    retiring: BTreeSet<usize>,
}

impl NodeStatusLists {
    pub fn new(node_count: usize) -> Self {
        NodeStatusLists {
            preference: (0..node_count).collect(),
            ..Default::default()
        }
    }

    pub fn state_of(&self, idx: usize) -> NodeState {
        if self.dead.contains(&idx) {
            NodeState::Dead
        } else if self.disabled.contains(&idx) {
            NodeState::Disabled
        } else if self.retiring.contains(&idx) {
            NodeState::Retiring
        } else {
            NodeState::Live
        }
    }

    pub fn is_dead(&self, idx: usize) -> bool {
        self.dead.contains(&idx)
    }
    pub fn is_disabled(&self, idx: usize) -> bool {
        self.disabled.contains(&idx)
    }
    pub fn is_retiring(&self, idx: usize) -> bool {
        self.retiring.contains(&idx)
    }

    /// A node usable for new placement: not dead, disabled, or retiring.
    pub fn is_live(&self, idx: usize) -> bool {
        self.state_of(idx) == NodeState::Live
    }

    fn clear_mutually_exclusive(&mut self, idx: usize) {
        self.dead.remove(&idx);
        self.disabled.remove(&idx);
        self.retiring.remove(&idx);
    }

    pub fn add_to_dead(&mut self, idx: usize) {
        self.clear_mutually_exclusive(idx);
        self.dead.insert(idx);
    }
    pub fn remove_from_dead(&mut self, idx: usize) {
        self.dead.remove(&idx);
    }
    pub fn add_to_disabled(&mut self, idx: usize) {
        self.clear_mutually_exclusive(idx);
        self.disabled.insert(idx);
    }
    pub fn remove_from_disabled(&mut self, idx: usize) {
        self.disabled.remove(&idx);
    }
    pub fn add_to_retiring(&mut self, idx: usize) {
        self.clear_mutually_exclusive(idx);
        self.retiring.insert(idx);
    }
    pub fn remove_from_retiring(&mut self, idx: usize) {
        self.retiring.remove(&idx);
    }

    pub fn dead_indices(&self) -> impl Iterator<Item = &usize> {
        self.dead.iter()
    }
    pub fn disabled_indices(&self) -> impl Iterator<Item = &usize> {
        self.disabled.iter()
    }
    pub fn retiring_indices(&self) -> impl Iterator<Item = &usize> {
        self.retiring.iter()
    }

    /// Invariant check (spec section 8): dead/disabled/retiring are
    /// pairwise disjoint by construction, since each insert clears the
    /// other two; this asserts that construction invariant still holds.
    pub fn pairwise_disjoint(&self) -> bool {
        self.dead.is_disjoint(&self.disabled)
            && self.dead.is_disjoint(&self.retiring)
            && self.disabled.is_disjoint(&self.retiring)
    }

    /// Remaps every index after node `removed_idx` is deleted from the
    /// table: every index greater than `removed_idx` shifts down by one,
    /// and any occurrence of `removed_idx` itself is dropped.
    pub fn remap_after_removal(&mut self, removed_idx: usize) {
        let shift = |set: &BTreeSet<usize>| -> BTreeSet<usize> {
            set.iter()
                .filter(|&&i| i != removed_idx)
                .map(|&i| if i > removed_idx { i - 1 } else { i })
                .collect()
        };
        self.dead = shift(&self.dead);
        self.disabled = shift(&self.disabled);
        self.retiring = shift(&self.retiring);
        self.preference = self
            .preference
            .iter()
            .filter(|&&i| i != removed_idx)
            .map(|&i| if i > removed_idx { i - 1 } else { i })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_mutually_exclusive() {
        let mut lists = NodeStatusLists::new(3);
        lists.add_to_dead(0);
        lists.add_to_disabled(0);
        assert!(lists.is_disabled(0));
        assert!(!lists.is_dead(0));
        assert!(lists.pairwise_disjoint());
    }

    #[test]
    fn removal_shifts_successor_indices() {
        let mut lists = NodeStatusLists::new(4);
        lists.add_to_dead(1);
        lists.add_to_retiring(3);
        lists.remap_after_removal(1);
        assert!(!lists.is_dead(1));
        assert!(lists.is_retiring(2));
        assert_eq!(lists.preference, vec![0, 1, 2]);
    }
}
