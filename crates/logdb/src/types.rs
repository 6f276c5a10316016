//! Log value types and their CT v1 binary encodings.

use merkle::{Hash32, TreeHasher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// CT v1 entry type for an X.509 certificate submission.
pub const ENTRY_TYPE_X509: u16 = 0;
/// CT v1 entry type for a pre-certificate submission.
pub const ENTRY_TYPE_PRECERT: u16 = 1;

/// A queued or sequenced log entry.
///
/// `leaf_input` is the canonical MerkleTreeLeaf serialization hashed into the
/// tree; `extra_data` carries the rest of the submitted chain, retrievable
/// but never hashed. `sequence_number` stays `None` until the integrator
/// sequences the entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub leaf_input: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub sct: Sct,
    pub sequence_number: Option<u64>,
}

impl LeafEntry {
    /// Tree leaf hash: `H(0x00 || leaf_input)`.
    pub fn merkle_leaf_hash(&self, hasher: &TreeHasher) -> Hash32 {
        hasher.hash_leaf(&self.leaf_input)
    }
}

/// Signed Certificate Timestamp: the log's promise to eventually include
/// `leaf_input`. Version is implicitly v1 (0).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sct {
    pub log_id: Hash32,
    pub timestamp_ms: u64,
    pub extensions: Vec<u8>,
    /// TLS `DigitallySigned` block.
    pub signature: Vec<u8>,
}

impl Sct {
    /// TLS wire form: version, log id, timestamp, extensions, signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 8 + 2 + self.extensions.len() + self.signature.len());
        out.push(0);
        out.extend_from_slice(&self.log_id);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        push_u16_prefixed(&mut out, &self.extensions);
        out.extend_from_slice(&self.signature);
        out
    }
}

/// Signed Tree Head over the dense tree at exactly `tree_size` entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp_ms: u64,
    pub root_hash: Hash32,
    /// TLS `DigitallySigned` block.
    pub signature: Vec<u8>,
}

/// CT v1 MerkleTreeLeaf for a timestamped entry.
pub fn merkle_tree_leaf(timestamp_ms: u64, entry_type: u16, cert_der: &[u8], extensions: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(15 + cert_der.len() + 2 + extensions.len());
    out.push(0); // version: v1
    out.push(0); // leaf type: timestamped_entry
    out.extend_from_slice(&timestamp_ms.to_be_bytes());
    out.extend_from_slice(&entry_type.to_be_bytes());
    push_u24_prefixed(&mut out, cert_der);
    push_u16_prefixed(&mut out, extensions);
    out
}

/// Extracts `(entry_type, certificate)` back out of a MerkleTreeLeaf.
pub fn parse_timestamped_entry(leaf_input: &[u8]) -> Option<(u16, &[u8])> {
    if leaf_input.len() < 15 || leaf_input[0] != 0 || leaf_input[1] != 0 {
        return None;
    }
    let entry_type = u16::from_be_bytes([leaf_input[10], leaf_input[11]]);
    let len = u32::from_be_bytes([0, leaf_input[12], leaf_input[13], leaf_input[14]]) as usize;
    let cert = leaf_input.get(15..15 + len)?;
    Some((entry_type, cert))
}

/// Dedupe key for admission: a digest over the entry type and certificate
/// carried in `leaf_input`, deliberately excluding the issuance timestamp so
/// that resubmissions of the same chain collapse onto the already-issued SCT.
pub fn dedupe_hash(leaf_input: &[u8]) -> Hash32 {
    match parse_timestamped_entry(leaf_input) {
        Some((entry_type, cert)) => {
            let mut h = Sha256::new();
            h.update(entry_type.to_be_bytes());
            h.update(cert);
            h.finalize().into()
        }
        None => Sha256::digest(leaf_input).into(),
    }
}

/// `extra_data` encoding: the submitted chain past the leaf, each certificate
/// with a 24-bit length prefix.
pub fn encode_chain(certs: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for cert in certs {
        push_u24_prefixed(&mut out, cert);
    }
    out
}

/// Input for the SCT signature: the CT v1 digitally-signed struct body for a
/// certificate timestamp.
pub fn sct_signature_input(timestamp_ms: u64, entry_type: u16, cert_der: &[u8], extensions: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(15 + cert_der.len() + 2 + extensions.len());
    out.push(0); // version: v1
    out.push(0); // signature type: certificate_timestamp
    out.extend_from_slice(&timestamp_ms.to_be_bytes());
    out.extend_from_slice(&entry_type.to_be_bytes());
    push_u24_prefixed(&mut out, cert_der);
    push_u16_prefixed(&mut out, extensions);
    out
}

/// Input for the STH signature: the CT v1 digitally-signed struct body for a
/// tree head.
pub fn sth_signature_input(timestamp_ms: u64, tree_size: u64, root_hash: &Hash32) -> Vec<u8> {
    let mut out = Vec::with_capacity(50);
    out.push(0); // version: v1
    out.push(1); // signature type: tree_hash
    out.extend_from_slice(&timestamp_ms.to_be_bytes());
    out.extend_from_slice(&tree_size.to_be_bytes());
    out.extend_from_slice(root_hash);
    out
}

fn push_u24_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() < 1 << 24);
    let len = (data.len() as u32).to_be_bytes();
    out.extend_from_slice(&len[1..]);
    out.extend_from_slice(data);
}

fn push_u16_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() < 1 << 16);
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}
