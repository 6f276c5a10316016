//! Domain-separated tree hashing.

use sha2::{Digest, Sha256};

/// 32-byte hash.
pub type Hash32 = [u8; 32];

/// Bits in a digest; also the height of the sparse tree.
pub const DIGEST_BITS: usize = 256;

const DOMAIN_LEAF: u8 = 0x00;
const DOMAIN_INTERNAL: u8 = 0x01;

/// RFC 6962 tree hasher over SHA-256.
///
/// Leaf and internal preimages are prefixed with distinct domain bytes, so a
/// leaf hash can never collide with an internal node hash. The null-hash
/// cache (hashes of entirely empty subtrees, one per depth) is computed once
/// here and shared by the sparse tree.
#[derive(Clone)]
pub struct TreeHasher {
    null_hashes: Vec<Hash32>,
}

impl TreeHasher {
    pub fn new() -> Self {
        let mut hasher = TreeHasher { null_hashes: Vec::new() };
        let mut hashes = Vec::with_capacity(DIGEST_BITS);
        hashes.push(hasher.hash_leaf(b""));
        for i in 1..DIGEST_BITS {
            let prev = hashes[i - 1];
            hashes.push(hasher.hash_children(&prev, &prev));
        }
        // Built bottom-up; stored indexed by depth, so null_hashes[0] is the
        // tallest empty subtree and null_hashes[DIGEST_BITS - 1] is an empty
        // leaf.
        hashes.reverse();
        hasher.null_hashes = hashes;
        hasher
    }

    /// `H(0x00 || data)`
    pub fn hash_leaf(&self, data: &[u8]) -> Hash32 {
        let mut h = Sha256::new();
        h.update([DOMAIN_LEAF]);
        h.update(data);
        h.finalize().into()
    }

    /// `H(0x01 || left || right)`
    pub fn hash_children(&self, left: &Hash32, right: &Hash32) -> Hash32 {
        let mut h = Sha256::new();
        h.update([DOMAIN_INTERNAL]);
        h.update(left);
        h.update(right);
        h.finalize().into()
    }

    /// Root of a log with no entries (RFC 6962: the hash of an empty string).
    pub fn empty_root(&self) -> Hash32 {
        Sha256::digest([]).into()
    }

    /// Hash of an empty subtree rooted at `depth` in the sparse tree.
    pub fn null_hash(&self, depth: usize) -> Hash32 {
        self.null_hashes[depth]
    }

    pub fn null_hashes(&self) -> &[Hash32] {
        &self.null_hashes
    }
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}
