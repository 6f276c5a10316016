//! Standalone proof verification.
//!
//! Verifiers take only the proof, the claimed roots and the coordinates, so
//! clients and tests can check server output without a tree instance.

use crate::hasher::{Hash32, TreeHasher, DIGEST_BITS};
use crate::sparse::Path;

/// Checks an audit path (RFC 6962 §2.1.1) for `leaf_hash` at `leaf_index`
/// against `root` over `tree_size` leaves.
pub fn verify_inclusion(
    hasher: &TreeHasher,
    leaf_hash: &Hash32,
    leaf_index: u64,
    tree_size: u64,
    path: &[Hash32],
    root: &Hash32,
) -> bool {
    if leaf_index >= tree_size {
        return false;
    }
    let mut fnode = leaf_index;
    let mut snode = tree_size - 1;
    let mut hash = *leaf_hash;
    for sibling in path {
        if snode == 0 {
            return false;
        }
        if fnode & 1 == 1 || fnode == snode {
            hash = hasher.hash_children(sibling, &hash);
            if fnode & 1 == 0 {
                while fnode & 1 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            hash = hasher.hash_children(&hash, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }
    snode == 0 && hash == *root
}

/// Checks a consistency proof (RFC 6962 §2.1.2) between the snapshot of
/// `first` leaves with root `first_root` and the snapshot of `second` leaves
/// with root `second_root`.
pub fn verify_consistency(
    hasher: &TreeHasher,
    first: u64,
    second: u64,
    proof: &[Hash32],
    first_root: &Hash32,
    second_root: &Hash32,
) -> bool {
    if first > second {
        return false;
    }
    if first == second {
        return proof.is_empty() && first_root == second_root;
    }
    if first == 0 {
        // Every tree is consistent with the empty tree.
        return proof.is_empty();
    }

    // When `first` is a power of two its root is a node of the second tree
    // and the proof omits it.
    let mut nodes = proof.iter();
    let first_node = if first.is_power_of_two() { first_root } else {
        match nodes.next() {
            Some(h) => h,
            None => return false,
        }
    };

    let mut fnode = first - 1;
    let mut snode = second - 1;
    while fnode & 1 == 1 {
        fnode >>= 1;
        snode >>= 1;
    }

    let mut first_hash = *first_node;
    let mut second_hash = *first_node;
    for sibling in nodes {
        if snode == 0 {
            return false;
        }
        if fnode & 1 == 1 || fnode == snode {
            first_hash = hasher.hash_children(sibling, &first_hash);
            second_hash = hasher.hash_children(sibling, &second_hash);
            if fnode & 1 == 0 {
                while fnode & 1 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            second_hash = hasher.hash_children(&second_hash, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }
    snode == 0 && first_hash == *first_root && second_hash == *second_root
}

/// Checks a sparse-tree inclusion proof: 256 sibling hashes ordered from the
/// leaf level up, folded along the bits of `path` from the LSB end.
pub fn verify_sparse_inclusion(
    hasher: &TreeHasher,
    path: &Path,
    data: &[u8],
    proof: &[Hash32],
    root: &Hash32,
) -> bool {
    if proof.len() != DIGEST_BITS {
        return false;
    }
    let mut hash = hasher.hash_leaf(data);
    for (level, sibling) in proof.iter().enumerate() {
        let depth = DIGEST_BITS - 1 - level;
        hash = if path.nth_msb(depth) {
            hasher.hash_children(sibling, &hash)
        } else {
            hasher.hash_children(&hash, sibling)
        };
    }
    hash == *root
}
