//! Sparse Merkle tree: an authenticated map over 256-bit paths.
//!
//! The tree is a fixed-height binary tree whose leaves are addressed by a
//! 256-bit path, most significant bit first. Only non-empty subtrees are
//! materialized: a leaf is stored at the first depth where its path prefix is
//! unique, and every absent node hashes to the precomputed null hash for its
//! depth. Level 2 nodes therefore look like
//! `H(0x01 || H(0x00 || valueL) || H(0x00 || valueR))`, and so on up.
//!
//! Inserting a path whose prefix collides with a stored leaf pushes the
//! existing leaf down one level at a time until the two prefixes diverge.
//!
//! This structure is not thread-safe; it is owned by a single writer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::hasher::{Hash32, TreeHasher, DIGEST_BITS};

/// A path into the sparse tree. The MSB of byte 0 selects the child of the
/// root, and so on down to the LSB of the final byte, which names the leaf.
/// Read as one 256-bit word, a path equals the index of the leaf it names.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Path([u8; 32]);

impl Path {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Path(bytes)
    }

    /// Path whose low 64 bits are `lsb`, the rest zero.
    pub fn from_lsb(lsb: u64) -> Self {
        let mut b = [0u8; 32];
        b[24..].copy_from_slice(&lsb.to_be_bytes());
        Path(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn nth_msb(&self, n: usize) -> bool {
        debug_assert!(n < DIGEST_BITS);
        self.0[n / 8] & (0x80 >> (n % 8)) != 0
    }

    fn set_nth_msb(&mut self, n: usize, set: bool) {
        debug_assert!(n < DIGEST_BITS);
        let mask = 0x80 >> (n % 8);
        if set {
            self.0[n / 8] |= mask;
        } else {
            self.0[n / 8] &= !mask;
        }
    }

    /// First `bits` bits kept, the rest zeroed.
    fn prefix(&self, bits: usize) -> Path {
        let mut out = [0u8; 32];
        let full = bits / 8;
        out[..full].copy_from_slice(&self.0[..full]);
        let rem = bits % 8;
        if rem != 0 {
            out[full] = self.0[full] & (0xFFu8 << (8 - rem));
        }
        Path(out)
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

enum TreeNode {
    Leaf { path: Path, hash: Hash32 },
    /// `hash` is `None` while dirty; recomputed and cached on demand.
    Internal { hash: Option<Hash32> },
}

enum SetAction {
    Inserted,
    Descend,
    PushDown { path: Path, hash: Hash32 },
}

pub struct SparseMerkleTree {
    hasher: TreeHasher,
    /// One map per depth; a node at depth `d` is keyed by the first `d + 1`
    /// bits of its path prefix. Depths grow on demand.
    levels: Vec<HashMap<Path, TreeNode>>,
    root_hash: Option<Hash32>,
}

impl SparseMerkleTree {
    pub fn new(hasher: TreeHasher) -> Self {
        Self { hasher, levels: Vec::new(), root_hash: None }
    }

    /// The leaf hash of `data`, without inserting it.
    pub fn leaf_hash(&self, data: &[u8]) -> Hash32 {
        self.hasher.hash_leaf(data)
    }

    /// Sets the leaf at `path` to `H(0x00 || data)`, restructuring colliding
    /// leaves downward until prefixes diverge.
    ///
    /// Panics if two identical paths fail to resolve before the bottom of the
    /// tree; distinct paths cannot agree on all 256 bits, so reaching it is a
    /// structural invariant violation.
    pub fn set_leaf(&mut self, path: Path, data: &[u8]) {
        self.root_hash = None;
        let leaf_hash = self.hasher.hash_leaf(data);

        let mut index = Path::default();
        for depth in 0..DIGEST_BITS {
            index.set_nth_msb(depth, path.nth_msb(depth));
            self.ensure_level(depth);

            let action = match self.levels[depth].entry(index) {
                Entry::Vacant(slot) => {
                    slot.insert(TreeNode::Leaf { path, hash: leaf_hash });
                    SetAction::Inserted
                }
                Entry::Occupied(mut slot) => match slot.get_mut() {
                    TreeNode::Internal { hash } => {
                        *hash = None;
                        SetAction::Descend
                    }
                    TreeNode::Leaf { path: existing, hash } if *existing == path => {
                        *hash = leaf_hash;
                        SetAction::Inserted
                    }
                    TreeNode::Leaf { path: existing, hash } => {
                        SetAction::PushDown { path: *existing, hash: *hash }
                    }
                },
            };

            match action {
                SetAction::Inserted => return,
                SetAction::Descend => {}
                SetAction::PushDown { path: existing_path, hash: existing_hash } => {
                    assert!(
                        depth < DIGEST_BITS - 1,
                        "distinct paths {path:?} and {existing_path:?} collide at the bottom of the tree"
                    );
                    // The occupant moves one level down under its next path
                    // bit; this slot becomes an internal node. The new leaf
                    // may collide with it again on the next iteration.
                    let mut child_index = index;
                    child_index.set_nth_msb(depth + 1, existing_path.nth_msb(depth + 1));
                    self.levels[depth].insert(index, TreeNode::Internal { hash: None });
                    self.ensure_level(depth + 1);
                    self.levels[depth + 1]
                        .insert(child_index, TreeNode::Leaf { path: existing_path, hash: existing_hash });
                }
            }
        }
        unreachable!("leaf at {path:?} never settled");
    }

    /// Root over the whole tree; cached until the next `set_leaf`.
    pub fn current_root(&mut self) -> Hash32 {
        if let Some(h) = self.root_hash {
            return h;
        }
        let left = self.subtree_hash(0, Path::default());
        let mut right_index = Path::default();
        right_index.set_nth_msb(0, true);
        let right = self.subtree_hash(0, right_index);
        let root = self.hasher.hash_children(&left, &right);
        self.root_hash = Some(root);
        root
    }

    /// Sibling hashes along `path`, ordered from the leaf level up to the
    /// children of the root. Siblings of empty subtrees come from the
    /// null-hash cache.
    pub fn inclusion_proof(&mut self, path: &Path) -> Vec<Hash32> {
        let mut proof = Vec::with_capacity(DIGEST_BITS);
        for depth in (0..DIGEST_BITS).rev() {
            let mut index = path.prefix(depth + 1);
            index.set_nth_msb(depth, !path.nth_msb(depth));
            proof.push(self.subtree_hash(depth, index));
        }
        proof
    }

    pub fn hasher(&self) -> &TreeHasher {
        &self.hasher
    }

    fn ensure_level(&mut self, depth: usize) {
        if self.levels.len() < depth + 1 {
            self.levels.resize_with(depth + 1, HashMap::new);
        }
    }

    fn subtree_hash(&mut self, depth: usize, index: Path) -> Hash32 {
        if self.levels.len() <= depth {
            return self.hasher.null_hash(depth);
        }

        // A stored leaf stands in for the whole subtree beneath it; fold its
        // hash up through null siblings. Internal nodes recurse and memoize.
        let leaf = match self.levels[depth].get(&index) {
            None => return self.hasher.null_hash(depth),
            Some(TreeNode::Internal { hash: Some(h) }) => return *h,
            Some(TreeNode::Internal { hash: None }) => None,
            Some(TreeNode::Leaf { path, hash }) => Some((*path, *hash)),
        };

        if let Some((path, leaf_hash)) = leaf {
            let mut ret = leaf_hash;
            for i in (depth + 1..DIGEST_BITS).rev() {
                let null = self.hasher.null_hash(i);
                ret = if path.nth_msb(i) {
                    self.hasher.hash_children(&null, &ret)
                } else {
                    self.hasher.hash_children(&ret, &null)
                };
            }
            return ret;
        }

        let left_index = index;
        let mut right_index = index;
        right_index.set_nth_msb(depth + 1, true);
        let left = self.subtree_hash(depth + 1, left_index);
        let right = self.subtree_hash(depth + 1, right_index);
        let hash = self.hasher.hash_children(&left, &right);
        if let Some(TreeNode::Internal { hash: cached }) = self.levels[depth].get_mut(&index) {
            *cached = Some(hash);
        }
        hash
    }
}
