//! Read-side authority: a frozen STH and the tree snapshot it signs.
//!
//! Proof endpoints never read the mutable append path. The integrator
//! publishes immutable snapshots through [`LookupHandle`]; readers clone the
//! current `Arc` and compute proofs that are consistent with the STH being
//! served, whatever the writers do meanwhile.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use merkle::{DenseMerkleTree, Hash32, MerkleError, TreeHasher};
use thiserror::Error;

use crate::types::SignedTreeHead;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("hash not found at the requested tree size")]
    NotFound,

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// Audit proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortMerkleAuditProof {
    pub leaf_index: u64,
    pub path: Vec<Hash32>,
}

pub struct LogLookup {
    sth: SignedTreeHead,
    tree: DenseMerkleTree,
    leaf_index: HashMap<Hash32, u64>,
}

impl LogLookup {
    /// Snapshot pairing `sth` with the tree state it signs. The tree must
    /// hold exactly `sth.tree_size` leaves.
    pub fn new(sth: SignedTreeHead, tree: DenseMerkleTree, leaf_index: HashMap<Hash32, u64>) -> Self {
        assert_eq!(sth.tree_size, tree.size(), "STH does not match the tree snapshot");
        Self { sth, tree, leaf_index }
    }

    /// Empty-log snapshot for bootstrap, before the first integration.
    pub fn empty(hasher: TreeHasher, sth: SignedTreeHead) -> Self {
        Self::new(sth, DenseMerkleTree::new(hasher), HashMap::new())
    }

    pub fn sth(&self) -> &SignedTreeHead {
        &self.sth
    }

    /// Audit proof for `leaf_hash` within the snapshot truncated to
    /// `tree_size` leaves. `NotFound` when the hash does not name an entry
    /// sequenced below `tree_size`.
    pub fn audit_proof(&self, leaf_hash: &Hash32, tree_size: u64) -> Result<ShortMerkleAuditProof, LookupError> {
        let leaf_index = *self.leaf_index.get(leaf_hash).ok_or(LookupError::NotFound)?;
        if leaf_index >= tree_size {
            return Err(LookupError::NotFound);
        }
        let path = self.tree.audit_path(leaf_index, tree_size)?;
        Ok(ShortMerkleAuditProof { leaf_index, path })
    }

    /// Consistency proof between the snapshots at `first` and `second`
    /// entries; empty iff `first == 0` or `first == second`.
    pub fn consistency_proof(&self, first: u64, second: u64) -> Result<Vec<Hash32>, LookupError> {
        Ok(self.tree.consistency_proof(first, second)?)
    }
}

/// Copy-on-publish handle shared between the integrator and the serving
/// handlers. The lock is held only across the pointer swap or clone.
pub struct LookupHandle {
    current: RwLock<Arc<LogLookup>>,
}

impl LookupHandle {
    pub fn new(initial: LogLookup) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    pub fn snapshot(&self) -> Arc<LogLookup> {
        self.current.read().unwrap().clone()
    }

    pub fn publish(&self, next: LogLookup) {
        let mut current = self.current.write().unwrap();
        debug_assert!(next.sth.tree_size >= current.sth.tree_size, "STH tree size went backwards");
        *current = Arc::new(next);
    }
}
