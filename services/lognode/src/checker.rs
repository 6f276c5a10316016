//! Chain validation against the configured trusted roots.
//!
//! Certificate parsing proper lives behind this seam; the built-in store
//! only does DER framing sanity and byte-level linkage checks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// CT poison extension OID (1.3.6.1.4.1.11129.2.4.3), DER-encoded. Its
/// presence marks a pre-certificate.
const POISON_OID: &[u8] = &[0x06, 0x0A, 0x2B, 0x06, 0x01, 0x04, 0x01, 0xD6, 0x79, 0x02, 0x04, 0x03];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("Empty submission.")]
    EmptyChain,

    #[error("Unable to parse provided chain.")]
    MalformedCert,

    #[error("Certificate chain does not link to a trusted root.")]
    UntrustedRoot,

    #[error("Leaf certificate is not a CT pre-certificate.")]
    NotPreCert,
}

/// Validates submitted chains and exposes the trusted roots for `get-roots`.
pub trait CertChecker: Send + Sync {
    /// Checks that `chain` is well-formed and links to a trusted root.
    fn check_cert_chain(&self, chain: &[Vec<u8>]) -> Result<(), CheckError>;

    /// Like [`CertChecker::check_cert_chain`], but additionally requires the
    /// leaf to be a CT pre-certificate.
    fn check_pre_cert_chain(&self, chain: &[Vec<u8>]) -> Result<(), CheckError>;

    /// DER encodings of the trusted roots.
    fn trusted_roots(&self) -> &[Vec<u8>];
}

/// Root store working on raw DER: each chain element must carry DER framing,
/// and the terminal certificate must be one of the configured roots.
pub struct RootStore {
    roots: Vec<Vec<u8>>,
}

impl RootStore {
    pub fn new(roots: Vec<Vec<u8>>) -> Self {
        Self { roots }
    }

    /// Loads every `*.der` file under `dir`, in filename order.
    pub fn from_dir(dir: &Path) -> io::Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("der"))
            .collect();
        paths.sort();
        let roots = paths.iter().map(fs::read).collect::<io::Result<Vec<_>>>()?;
        Ok(Self::new(roots))
    }
}

impl CertChecker for RootStore {
    fn check_cert_chain(&self, chain: &[Vec<u8>]) -> Result<(), CheckError> {
        let terminal = chain.last().ok_or(CheckError::EmptyChain)?;
        if chain.iter().any(|cert| !looks_like_der(cert)) {
            return Err(CheckError::MalformedCert);
        }
        if !self.roots.iter().any(|root| root == terminal) {
            return Err(CheckError::UntrustedRoot);
        }
        Ok(())
    }

    fn check_pre_cert_chain(&self, chain: &[Vec<u8>]) -> Result<(), CheckError> {
        self.check_cert_chain(chain)?;
        let leaf = &chain[0];
        if !contains_poison(leaf) {
            return Err(CheckError::NotPreCert);
        }
        Ok(())
    }

    fn trusted_roots(&self) -> &[Vec<u8>] {
        &self.roots
    }
}

fn looks_like_der(cert: &[u8]) -> bool {
    cert.len() >= 4 && cert[0] == 0x30
}

fn contains_poison(cert: &[u8]) -> bool {
    cert.windows(POISON_OID.len()).any(|window| window == POISON_OID)
}
