//! Fixed-depth binary Merkle tree over Poseidon.
//!
//! Circuits are compiled for a fixed path length, so the tree is always
//! padded to exactly `2^depth` leaves with zeros rather than to the next
//! power of two.

use ark_bn254::Fr;
use ark_std::vec::Vec;
use std::collections::HashMap;

use super::hash::PoseidonHasher;
use crate::field::{field_to_bytes, FIELD_BYTES};

/// Largest depth a tree may be built with.
pub const MAX_DEPTH: usize = 20;

/// A Merkle path (proof) for membership verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    /// Sibling hashes along the path from leaf to root.
    pub siblings: Vec<Fr>,
    /// Path indices: false = left child, true = right child.
    pub indices: Vec<bool>,
    /// The leaf value being proven.
    pub leaf: Fr,
}

impl MerklePath {
    /// A path of all-zero siblings; used to fill disabled circuit sections.
    pub fn zeroed(depth: usize) -> Self {
        Self {
            siblings: vec![Fr::from(0u64); depth],
            indices: vec![false; depth],
            leaf: Fr::from(0u64),
        }
    }

    pub fn verify(&self, root: &Fr, hasher: &PoseidonHasher) -> bool {
        &self.compute_root(hasher) == root
    }

    pub fn compute_root(&self, hasher: &PoseidonHasher) -> Fr {
        self.siblings
            .iter()
            .zip(self.indices.iter())
            .fold(self.leaf, |current, (sibling, is_right)| {
                if *is_right {
                    hasher.hash_two(sibling, &current)
                } else {
                    hasher.hash_two(&current, sibling)
                }
            })
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Binary Merkle tree with Poseidon internal nodes.
#[derive(Clone)]
pub struct MerkleTree {
    /// Level-order node array; index 0 is the root.
    nodes: Vec<Fr>,
    depth: usize,
    num_leaves: usize,
    hasher: PoseidonHasher,
    leaf_index: HashMap<[u8; FIELD_BYTES], usize>,
}

impl MerkleTree {
    /// Build a tree of exactly `depth` levels below the root.
    pub fn with_depth(leaves: Vec<Fr>, depth: usize) -> Result<Self, TreeError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth(depth));
        }
        let padded_size = 1usize << depth;
        if leaves.len() > padded_size {
            return Err(TreeError::CapacityExceeded {
                leaves: leaves.len(),
                capacity: padded_size,
            });
        }

        let hasher = PoseidonHasher::new();
        let num_leaves = leaves.len();

        let mut leaf_index = HashMap::with_capacity(num_leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            leaf_index.entry(field_to_bytes(leaf)).or_insert(i);
        }

        let leaf_start = padded_size - 1;
        let mut nodes = vec![Fr::from(0u64); 2 * padded_size - 1];
        nodes[leaf_start..leaf_start + num_leaves].copy_from_slice(&leaves);

        for i in (0..leaf_start).rev() {
            nodes[i] = hasher.hash_two(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }

        Ok(Self {
            nodes,
            depth,
            num_leaves,
            hasher,
            leaf_index,
        })
    }

    pub fn root(&self) -> Fr {
        self.nodes[0]
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of actual (non-padding) leaves.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn hasher(&self) -> &PoseidonHasher {
        &self.hasher
    }

    pub fn find_leaf(&self, leaf: &Fr) -> Option<usize> {
        self.leaf_index.get(&field_to_bytes(leaf)).copied()
    }

    pub fn contains(&self, leaf: &Fr) -> bool {
        self.find_leaf(leaf).is_some()
    }

    /// Merkle path for the leaf at `leaf_index`, or `None` past the real leaves.
    pub fn get_path(&self, leaf_index: usize) -> Option<MerklePath> {
        if leaf_index >= self.num_leaves {
            return None;
        }

        let leaf_start = (1usize << self.depth) - 1;
        let mut node_index = leaf_start + leaf_index;

        let leaf = self.nodes[node_index];
        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);

        while node_index > 0 {
            let is_right = node_index % 2 == 0;
            let sibling_index = if is_right {
                node_index - 1
            } else {
                node_index + 1
            };

            siblings.push(self.nodes[sibling_index]);
            indices.push(is_right);
            node_index = (node_index - 1) / 2;
        }

        Some(MerklePath {
            siblings,
            indices,
            leaf,
        })
    }

    pub fn get_path_for_leaf(&self, leaf: &Fr) -> Option<MerklePath> {
        self.get_path(self.find_leaf(leaf)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree depth {0} outside 1..={MAX_DEPTH}")]
    InvalidDepth(usize),

    #[error("{leaves} leaves exceed tree capacity {capacity}")]
    CapacityExceeded { leaves: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<Fr> {
        (0..n).map(|i| Fr::from(i + 100)).collect()
    }

    #[test]
    fn test_single_leaf() {
        let leaf = Fr::from(42u64);
        let tree = MerkleTree::with_depth(vec![leaf], 4).unwrap();

        assert_eq!(tree.num_leaves(), 1);
        assert!(tree.contains(&leaf));

        let path = tree.get_path(0).unwrap();
        assert_eq!(path.depth(), 4);
        assert!(path.verify(&tree.root(), tree.hasher()));
    }

    #[test]
    fn test_fixed_depth_paths() {
        let leaves = leaves(5);
        let tree = MerkleTree::with_depth(leaves.clone(), 8).unwrap();

        assert_eq!(tree.depth(), 8);
        for leaf in &leaves {
            let path = tree.get_path_for_leaf(leaf).unwrap();
            assert_eq!(path.depth(), 8);
            assert!(path.verify(&tree.root(), tree.hasher()));
        }
    }

    #[test]
    fn test_padding_is_not_a_leaf() {
        let tree = MerkleTree::with_depth(leaves(3), 2).unwrap();
        assert!(tree.get_path(3).is_none());
        assert!(!tree.contains(&Fr::from(0u64)));
    }

    #[test]
    fn test_capacity_and_depth_limits() {
        assert_eq!(
            MerkleTree::with_depth(leaves(5), 2).err(),
            Some(TreeError::CapacityExceeded { leaves: 5, capacity: 4 })
        );
        assert_eq!(
            MerkleTree::with_depth(leaves(1), 0).err(),
            Some(TreeError::InvalidDepth(0))
        );
    }

    #[test]
    fn test_invalid_path_fails() {
        let tree = MerkleTree::with_depth(leaves(4), 3).unwrap();

        let mut path = tree.get_path(0).unwrap();
        path.siblings[0] = Fr::from(999u64);

        assert!(!path.verify(&tree.root(), tree.hasher()));
    }

    #[test]
    fn test_root_depends_on_order() {
        let a = MerkleTree::with_depth(leaves(2), 2).unwrap();
        let mut rev = leaves(2);
        rev.reverse();
        let b = MerkleTree::with_depth(rev, 2).unwrap();
        assert_ne!(a.root(), b.root());
    }
}
