// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The signing tree.
//!
//! A run spans a roster of N public keys. The node at roster position 0 is
//! the root; the remaining positions are split into contiguous chunks, one
//! per subtree. The first member of each chunk is the subtree's sub-leader
//! and the rest are its direct children, giving the root → sub-leader →
//! leaves shape the protocol's timeout ratios are designed around.
//!
//! Roster position is the only node identity: it indexes the attendance
//! mask, addresses message envelopes, and orders the public keys that the
//! verification equation aggregates.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::errors::ConfigError;

/// A node's position in the roster, and its sole identity in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// The overall root's roster position.
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// This position as a roster offset.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for NodeIndex {
    fn from(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// A direct child of a node, along with every position beneath it.
///
/// When a child times out, its whole descendant set is unreachable and must
/// be marked absent by the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChildLink {
    pub(crate) index: NodeIndex,
    pub(crate) descendants: Vec<NodeIndex>,
}

impl ChildLink {
    /// The child and everything beneath it.
    pub(crate) fn covered(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::once(self.index).chain(self.descendants.iter().copied())
    }
}

/// One node's view of a subtree: who it reports to and who reports to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePosition {
    pub(crate) me: NodeIndex,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: Vec<ChildLink>,
}

impl TreePosition {
    /// True iff this node is the sub-protocol root (the overall root).
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True iff this node has no children in the subtree.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// This node's roster position.
    pub fn index(&self) -> NodeIndex {
        self.me
    }

    pub(crate) fn child(&self, index: NodeIndex) -> Option<&ChildLink> {
        self.children.iter().find(|c| c.index == index)
    }
}

/// One subtree of the signing tree: the overall root, a sub-leader, and the
/// sub-leader's direct children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTree {
    root: NodeIndex,
    subleader: NodeIndex,
    leaves: Vec<NodeIndex>,
}

impl SubTree {
    pub(crate) fn new(root: NodeIndex, subleader: NodeIndex, leaves: Vec<NodeIndex>) -> Self {
        Self {
            root,
            subleader,
            leaves,
        }
    }

    /// The overall root (the sub-protocol root of this subtree).
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// The sub-leader: the root's only direct child in this subtree.
    pub fn subleader(&self) -> NodeIndex {
        self.subleader
    }

    /// The sub-leader's direct children.
    pub fn leaves(&self) -> &[NodeIndex] {
        &self.leaves
    }

    /// Every position in this subtree except the root.
    pub fn members(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::once(self.subleader).chain(self.leaves.iter().copied())
    }

    /// A node's view of this subtree, or `None` for non-members.
    pub fn position(&self, node: NodeIndex) -> Option<TreePosition> {
        if node == self.root {
            Some(TreePosition {
                me: node,
                parent: None,
                children: vec![ChildLink {
                    index: self.subleader,
                    descendants: self.leaves.clone(),
                }],
            })
        } else if node == self.subleader {
            Some(TreePosition {
                me: node,
                parent: Some(self.root),
                children: self
                    .leaves
                    .iter()
                    .map(|&leaf| ChildLink {
                        index: leaf,
                        descendants: Vec::new(),
                    })
                    .collect(),
            })
        } else if self.leaves.contains(&node) {
            Some(TreePosition {
                me: node,
                parent: Some(self.subleader),
                children: Vec::new(),
            })
        } else {
            None
        }
    }

    /// The same membership with the first leaf promoted to sub-leader.
    ///
    /// Used when the sub-leader failed to deliver a commitment: the failed
    /// node is demoted to a leaf, so if it is still silent the retried run
    /// simply records it absent instead of losing the whole subtree.
    /// Returns `None` when there is no leaf to promote.
    pub fn with_replacement_subleader(&self) -> Option<SubTree> {
        let (&promoted, rest) = self.leaves.split_first()?;
        let mut leaves = vec![self.subleader];
        leaves.extend_from_slice(rest);
        Some(SubTree {
            root: self.root,
            subleader: promoted,
            leaves,
        })
    }
}

/// The full spanning structure for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningTree {
    roster_len: usize,
    subtrees: Vec<SubTree>,
}

impl SigningTree {
    /// Split a roster into `subtrees` chunks under the root.
    ///
    /// Positions `1..roster_len` are split into contiguous chunks as evenly
    /// as possible; earlier chunks take the remainder. A roster of just the
    /// root yields no subtrees (the root signs alone).
    pub fn partition(roster_len: usize, subtrees: usize) -> Result<Self, ConfigError> {
        if roster_len == 0 {
            return Err(ConfigError::EmptyRoster);
        }
        if roster_len == 1 {
            return Ok(Self {
                roster_len,
                subtrees: Vec::new(),
            });
        }
        let members = roster_len - 1;
        if subtrees == 0 || subtrees > members {
            return Err(ConfigError::InvalidSubtreeCount {
                subtrees,
                roster_len,
            });
        }

        let base = members / subtrees;
        let extra = members % subtrees;
        let mut next = 1;
        let mut chunks = Vec::with_capacity(subtrees);
        for chunk in 0..subtrees {
            let size = base + usize::from(chunk < extra);
            let indices: Vec<NodeIndex> = (next..next + size).map(NodeIndex::from).collect();
            next += size;
            let (&subleader, leaves) = indices
                .split_first()
                .expect("chunk sizes are always positive");
            chunks.push(SubTree::new(NodeIndex::ROOT, subleader, leaves.to_vec()));
        }
        Ok(Self {
            roster_len,
            subtrees: chunks,
        })
    }

    /// The default sub-leader count for a roster: ⌈√(N−1)⌉.
    ///
    /// Balances subtree width against the number of sub-protocols the root
    /// tracks. Returns 0 for a roster of just the root.
    pub fn default_subtree_count(roster_len: usize) -> usize {
        let members = roster_len.saturating_sub(1);
        if members == 0 {
            return 0;
        }
        let mut count = 1;
        while count * count < members {
            count += 1;
        }
        count
    }

    /// The number of roster positions this tree spans.
    pub fn roster_len(&self) -> usize {
        self.roster_len
    }

    /// The subtrees under the root.
    pub fn subtrees(&self) -> &[SubTree] {
        &self.subtrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_splits_evenly() {
        let tree = SigningTree::partition(7, 2).unwrap();
        assert_eq!(tree.subtrees().len(), 2);

        let first = &tree.subtrees()[0];
        assert_eq!(first.subleader(), NodeIndex::from(1));
        assert_eq!(first.leaves(), &[NodeIndex::from(2), NodeIndex::from(3)]);

        let second = &tree.subtrees()[1];
        assert_eq!(second.subleader(), NodeIndex::from(4));
        assert_eq!(second.leaves(), &[NodeIndex::from(5), NodeIndex::from(6)]);
    }

    #[test]
    fn partition_spreads_remainder_to_early_chunks() {
        let tree = SigningTree::partition(6, 2).unwrap();
        assert_eq!(tree.subtrees()[0].members().count(), 3);
        assert_eq!(tree.subtrees()[1].members().count(), 2);
    }

    #[test]
    fn partition_rejects_bad_inputs() {
        assert_eq!(
            SigningTree::partition(0, 1),
            Err(ConfigError::EmptyRoster)
        );
        assert!(matches!(
            SigningTree::partition(5, 0),
            Err(ConfigError::InvalidSubtreeCount { .. })
        ));
        assert!(matches!(
            SigningTree::partition(3, 5),
            Err(ConfigError::InvalidSubtreeCount { .. })
        ));
    }

    #[test]
    fn singleton_roster_has_no_subtrees() {
        let tree = SigningTree::partition(1, 1).unwrap();
        assert!(tree.subtrees().is_empty());
    }

    #[test]
    fn positions_agree_with_shape() {
        let tree = SigningTree::partition(7, 2).unwrap();
        let subtree = &tree.subtrees()[0];

        let root = subtree.position(NodeIndex::ROOT).unwrap();
        assert!(root.is_root());
        assert!(!root.is_leaf());
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].index, NodeIndex::from(1));
        assert_eq!(
            root.children[0].descendants,
            vec![NodeIndex::from(2), NodeIndex::from(3)]
        );

        let subleader = subtree.position(NodeIndex::from(1)).unwrap();
        assert_eq!(subleader.parent, Some(NodeIndex::ROOT));
        assert_eq!(subleader.children.len(), 2);

        let leaf = subtree.position(NodeIndex::from(3)).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.parent, Some(NodeIndex::from(1)));

        // Members of the other subtree are strangers here.
        assert!(subtree.position(NodeIndex::from(5)).is_none());
    }

    #[test]
    fn replacement_promotes_first_leaf() {
        let tree = SigningTree::partition(7, 2).unwrap();
        let replaced = tree.subtrees()[0].with_replacement_subleader().unwrap();

        assert_eq!(replaced.subleader(), NodeIndex::from(2));
        assert_eq!(replaced.leaves(), &[NodeIndex::from(1), NodeIndex::from(3)]);

        // A sub-leader with no leaves has nobody to promote.
        let lonely = SubTree::new(NodeIndex::ROOT, NodeIndex::from(1), Vec::new());
        assert!(lonely.with_replacement_subleader().is_none());
    }

    #[test]
    fn default_subtree_count_is_sqrtish() {
        assert_eq!(SigningTree::default_subtree_count(1), 0);
        assert_eq!(SigningTree::default_subtree_count(2), 1);
        assert_eq!(SigningTree::default_subtree_count(5), 2);
        assert_eq!(SigningTree::default_subtree_count(7), 3);
        assert_eq!(SigningTree::default_subtree_count(17), 4);
    }
}
