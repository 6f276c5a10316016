//! Entry storage and read-side lookup for the log node.
//!
//! Defines the log's value types (entries, SCTs, tree heads) with their CT v1
//! binary encodings, the signer, the database contract with its three
//! backends, and the frozen read-side snapshot that proof endpoints serve
//! from.

mod db;
mod lookup;
mod signer;
mod types;

pub use db::{AppendOutcome, Database, DbError, FileDatabase, InMemoryDatabase, LookupOutcome, SqliteDatabase};
pub use lookup::{LogLookup, LookupError, LookupHandle, ShortMerkleAuditProof};
pub use signer::LogSigner;
pub use types::{
    dedupe_hash, encode_chain, merkle_tree_leaf, parse_timestamped_entry, sct_signature_input,
    sth_signature_input, LeafEntry, Sct, SignedTreeHead, ENTRY_TYPE_PRECERT, ENTRY_TYPE_X509,
};
