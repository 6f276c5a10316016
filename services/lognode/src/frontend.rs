//! Admission: validate the chain, issue the SCT, queue durably.
//!
//! Everything here blocks (validation and the database write), so handlers
//! call it through the worker pool.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use logdb::{
    encode_chain, merkle_tree_leaf, AppendOutcome, Database, DbError, LeafEntry, LogSigner, Sct,
    ENTRY_TYPE_PRECERT, ENTRY_TYPE_X509,
};
use thiserror::Error;

use crate::checker::{CertChecker, CheckError};

#[derive(Debug, Error)]
pub enum AddEntryError {
    #[error(transparent)]
    InvalidChain(#[from] CheckError),

    #[error("Log is over capacity.")]
    OverCapacity,

    #[error("storage error: {0}")]
    Storage(String),
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

pub struct Frontend {
    checker: Arc<dyn CertChecker>,
    signer: Arc<LogSigner>,
    db: Arc<dyn Database>,
}

impl Frontend {
    pub fn new(checker: Arc<dyn CertChecker>, signer: Arc<LogSigner>, db: Arc<dyn Database>) -> Self {
        Self { checker, signer, db }
    }

    pub fn queue_x509_entry(&self, chain: Vec<Vec<u8>>) -> Result<Sct, AddEntryError> {
        self.checker.check_cert_chain(&chain)?;
        self.queue(ENTRY_TYPE_X509, chain)
    }

    pub fn queue_pre_cert_entry(&self, chain: Vec<Vec<u8>>) -> Result<Sct, AddEntryError> {
        self.checker.check_pre_cert_chain(&chain)?;
        self.queue(ENTRY_TYPE_PRECERT, chain)
    }

    fn queue(&self, entry_type: u16, chain: Vec<Vec<u8>>) -> Result<Sct, AddEntryError> {
        let (leaf, rest) = match chain.split_first() {
            Some(parts) => parts,
            None => return Err(CheckError::EmptyChain.into()),
        };

        // The SCT timestamp is the queue-time wall clock; the database makes
        // the entry durable before we promise anything to the client.
        let timestamp_ms = now_ms();
        let sct = self.signer.sign_sct(timestamp_ms, entry_type, leaf, b"");
        let entry = LeafEntry {
            leaf_input: merkle_tree_leaf(timestamp_ms, entry_type, leaf, b""),
            extra_data: encode_chain(rest),
            sct: sct.clone(),
            sequence_number: None,
        };

        match self.db.append(entry) {
            Ok(AppendOutcome::Queued) => Ok(sct),
            // Resubmission: reply with the SCT issued the first time around.
            Ok(AppendOutcome::Duplicate(existing)) => Ok(existing.sct),
            Err(DbError::OverCapacity) => Err(AddEntryError::OverCapacity),
            Err(e) => Err(AddEntryError::Storage(e.to_string())),
        }
    }
}
