//! # Merkle Tree
//!
//! Hierarchical content hash over an SSTable's data segment.
//!
//! The data is cut into fixed-size chunks; each chunk's blake3 hash is a
//! leaf. Adjacent nodes are paired and hashed (`blake3(left || right)`) level
//! by level until a single root remains. Any level with an odd number of
//! nodes (other than the root level) is padded with an all-zero hash.
//!
//! ```text
//!                root
//!             /        \
//!         h(01)         h(23)
//!        /    \        /    \
//!      L0      L1    L2     ZERO      <- 3 chunks, padded to 4
//! ```
//!
//! Comparing two trees walks only the branches whose hashes differ, so the
//! corrupted chunk indices of a data segment are found without rehashing the
//! whole tree twice.
//!
//! ## Serialized form
//!
//! Nodes are written breadth-first from the root, each prefixed with its
//! depth (root = 0):
//!
//! ```text
//! [depth: u8][hash: 32 bytes]  ... repeated for every node
//! ```
//!
//! The depth byte lets a reader recover level boundaries without storing
//! level widths. A level is either twice as wide as its parent, or two nodes
//! short of that when the parent ends in a padding hash.

use std::collections::VecDeque;
use thiserror::Error;

/// A 32-byte blake3 digest.
pub type Hash = [u8; 32];

/// Hash used to pad odd levels.
pub const ZERO_HASH: Hash = [0u8; 32];

const NODE_BYTES: usize = 1 + 32;

/// Errors raised while decoding a serialized tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("serialized merkle tree is empty")]
    Empty,

    #[error("serialized merkle tree is truncated ({0} trailing bytes)")]
    Truncated(usize),

    #[error("merkle node depth {found} out of order after depth {expected}")]
    DepthOutOfOrder { expected: u8, found: u8 },

    #[error("merkle level {depth} has {found} nodes, expected {expected}")]
    BadLevelWidth {
        depth: usize,
        expected: usize,
        found: usize,
    },
}

/// An immutable Merkle tree stored as a vector of levels.
///
/// `levels[0]` holds the leaves (including padding), the last level holds
/// the root. Children of node `i` on level `l + 1` are `2i` and `2i + 1` on
/// level `l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Builds a tree over `data` cut into `chunk_size`-byte chunks. The last
    /// chunk may be shorter.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is 0.
    pub fn build(data: &[u8], chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        let leaves = data
            .chunks(chunk_size)
            .map(|chunk| *blake3::hash(chunk).as_bytes())
            .collect();
        Self::from_leaves(leaves)
    }

    /// Builds a tree from precomputed leaf hashes.
    pub fn from_leaves(mut leaves: Vec<Hash>) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: vec![vec![ZERO_HASH]],
            };
        }

        let mut levels = Vec::new();
        loop {
            if leaves.len() > 1 && leaves.len() % 2 == 1 {
                leaves.push(ZERO_HASH);
            }
            if leaves.len() == 1 {
                levels.push(leaves);
                break;
            }
            let parents: Vec<Hash> = leaves
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(leaves);
            leaves = parents;
        }
        Self { levels }
    }

    /// The root hash.
    #[must_use]
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(ZERO_HASH)
    }

    /// Number of leaves, padding included.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Number of levels (a single-leaf tree has height 1).
    #[must_use]
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Leaf hashes, padding included.
    #[must_use]
    pub fn leaves(&self) -> &[Hash] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Serializes breadth-first with a depth byte before every node.
    pub fn serialize(&self) -> Vec<u8> {
        let node_count: usize = self.levels.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(node_count * NODE_BYTES);
        for (depth, level) in self.levels.iter().rev().enumerate() {
            for hash in level {
                out.push(depth as u8);
                out.extend_from_slice(hash);
            }
        }
        out
    }

    /// Rebuilds a tree from [`serialize`](Self::serialize) output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, MerkleError> {
        if bytes.is_empty() {
            return Err(MerkleError::Empty);
        }
        if bytes.len() % NODE_BYTES != 0 {
            return Err(MerkleError::Truncated(bytes.len() % NODE_BYTES));
        }

        let mut by_depth: Vec<Vec<Hash>> = Vec::new();
        for node in bytes.chunks_exact(NODE_BYTES) {
            let depth = node[0];
            let expected = by_depth.len().saturating_sub(1) as u8;
            if by_depth.is_empty() {
                if depth != 0 {
                    return Err(MerkleError::DepthOutOfOrder { expected: 0, found: depth });
                }
                by_depth.push(Vec::new());
            } else if depth == expected + 1 {
                by_depth.push(Vec::new());
            } else if depth != expected {
                return Err(MerkleError::DepthOutOfOrder { expected, found: depth });
            }

            let mut hash = ZERO_HASH;
            hash.copy_from_slice(&node[1..]);
            if let Some(level) = by_depth.last_mut() {
                level.push(hash);
            }
        }

        for (depth, level) in by_depth.iter().enumerate() {
            let expected = if depth == 0 {
                1
            } else {
                expected_width(&by_depth[depth - 1], level.len())
            };
            if level.len() != expected {
                return Err(MerkleError::BadLevelWidth {
                    depth,
                    expected,
                    found: level.len(),
                });
            }
        }

        by_depth.reverse();
        Ok(Self { levels: by_depth })
    }

    /// Returns the leaf indices at which `a` and `b` diverge, in ascending
    /// order. Identical roots short-circuit to an empty result.
    ///
    /// Only branches whose hashes differ are expanded. Trees of different
    /// shape cannot be aligned, so every leaf index of the larger one is
    /// reported.
    pub fn compare(a: &MerkleTree, b: &MerkleTree) -> Vec<usize> {
        if a.root() == b.root() {
            return Vec::new();
        }
        if a.height() != b.height() || a.leaf_count() != b.leaf_count() {
            return (0..a.leaf_count().max(b.leaf_count())).collect();
        }

        let height = a.height();
        let mut diverged = Vec::new();
        let mut queue = VecDeque::from([(0usize, 0usize)]);

        while let Some((depth, idx)) = queue.pop_front() {
            let level = height - 1 - depth;
            if level == 0 {
                diverged.push(idx);
                continue;
            }
            for child in [2 * idx, 2 * idx + 1] {
                let left = a.levels[level - 1].get(child);
                let right = b.levels[level - 1].get(child);
                if left != right {
                    queue.push_back((depth + 1, child));
                }
            }
        }

        diverged.sort_unstable();
        diverged
    }
}

/// Width a level must have under `parent`. A parent level that was padded
/// ends in [`ZERO_HASH`] and has no children under that last node.
fn expected_width(parent: &[Hash], found: usize) -> usize {
    let full = parent.len() * 2;
    let padded = parent.len() > 2
        && parent.len() % 2 == 0
        && parent.last() == Some(&ZERO_HASH);
    if padded && found == full - 2 {
        full - 2
    } else {
        full
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests;
