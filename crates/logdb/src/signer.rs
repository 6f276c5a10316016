//! SCT and STH signing.

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use merkle::Hash32;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::types::{sct_signature_input, sth_signature_input, Sct, SignedTreeHead};

// TLS SignatureAndHashAlgorithm ids carried in the DigitallySigned block.
const HASH_ALG_SHA256: u8 = 4;
const SIG_ALG_ED25519: u8 = 7;

/// Signs SCTs and tree heads on behalf of the log. The log id is the SHA-256
/// of the public key.
pub struct LogSigner {
    signing_key: SigningKey,
    log_id: Hash32,
}

impl LogSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        let log_id = Sha256::digest(signing_key.verifying_key().as_bytes()).into();
        Self { signing_key, log_id }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    pub fn log_id(&self) -> Hash32 {
        self.log_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Issues an SCT over the given certificate at `timestamp_ms`.
    pub fn sign_sct(&self, timestamp_ms: u64, entry_type: u16, cert_der: &[u8], extensions: &[u8]) -> Sct {
        let input = sct_signature_input(timestamp_ms, entry_type, cert_der, extensions);
        let signature = self.signing_key.sign(&input);
        Sct {
            log_id: self.log_id,
            timestamp_ms,
            extensions: extensions.to_vec(),
            signature: digitally_signed(&signature.to_bytes()),
        }
    }

    /// Signs the tree head over `root_hash` at exactly `tree_size` entries.
    pub fn sign_tree_head(&self, tree_size: u64, timestamp_ms: u64, root_hash: Hash32) -> SignedTreeHead {
        let input = sth_signature_input(timestamp_ms, tree_size, &root_hash);
        let signature = self.signing_key.sign(&input);
        SignedTreeHead {
            tree_size,
            timestamp_ms,
            root_hash,
            signature: digitally_signed(&signature.to_bytes()),
        }
    }
}

/// TLS `DigitallySigned`: algorithm ids, then the raw signature with a 16-bit
/// length prefix.
fn digitally_signed(signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + signature.len());
    out.push(HASH_ALG_SHA256);
    out.push(SIG_ALG_ED25519);
    out.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    out.extend_from_slice(signature);
    out
}
