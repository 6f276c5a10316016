//! Database contract and backends.
//!
//! The log core consumes one storage contract: durable, deduplicating append
//! of queued entries, sequence-ordered scans, and leaf-hash lookup. Three
//! interchangeable backends implement it: in-memory (tests and demos),
//! file-backed (JSON snapshot with atomic replace), and SQLite.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use merkle::{Hash32, TreeHasher};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::{dedupe_hash, LeafEntry, Sct};

const DEFAULT_MAX_PENDING: usize = 10_000;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("pending queue is full")]
    OverCapacity,

    #[error("no entry with the given leaf hash")]
    UnknownLeaf,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        DbError::Storage(e.to_string())
    }
}

impl From<io::Error> for DbError {
    fn from(e: io::Error) -> Self {
        DbError::Storage(e.to_string())
    }
}

/// Outcome of queueing an entry.
#[derive(Debug)]
pub enum AppendOutcome {
    /// Queued and durable.
    Queued,
    /// An equal submission was queued before; the stored entry, original SCT
    /// included, is returned so the caller can re-issue it.
    Duplicate(LeafEntry),
}

/// Outcome of a leaf-hash lookup.
#[derive(Debug)]
pub enum LookupOutcome {
    /// Sequenced into the tree.
    Found(LeafEntry),
    /// Queued but not yet integrated.
    Pending(LeafEntry),
    NotFound,
}

/// Storage contract consumed by the log core.
///
/// Implementations are blocking; callers bridge onto the worker pool. All
/// methods take `&self`, so implementations synchronize internally.
pub trait Database: Send + Sync {
    /// Durably queues `entry`. Submissions deduplicate on the certificate
    /// carried in `leaf_input` (see [`dedupe_hash`]); a duplicate returns the
    /// stored entry instead of queueing.
    fn append(&self, entry: LeafEntry) -> Result<AppendOutcome, DbError>;

    /// Sequenced entries in sequence-number order starting at `from`. The
    /// iterator ends when the log does.
    fn scan_entries(&self, from: u64) -> Box<dyn Iterator<Item = LeafEntry> + Send>;

    /// Looks an entry up by its Merkle leaf hash.
    fn lookup_by_hash(&self, leaf_hash: &Hash32) -> LookupOutcome;

    /// Queued entries not yet sequenced, in queue order.
    fn pending_entries(&self) -> Vec<LeafEntry>;

    /// Marks the entry with `leaf_hash` as sequenced at `sequence_number`.
    /// Sequence numbers are assigned in commit order by the single
    /// integrator.
    fn assign_sequence_number(&self, leaf_hash: &Hash32, sequence_number: u64) -> Result<(), DbError>;

    /// Number of sequenced entries.
    fn tree_size(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Shared in-memory representation (memory and file backends)

#[derive(Default)]
struct Inner {
    /// Every entry, keyed by its dedupe hash.
    entries: HashMap<Hash32, LeafEntry>,
    /// Merkle leaf hash -> dedupe hash.
    by_leaf_hash: HashMap<Hash32, Hash32>,
    /// Dedupe hashes in queue order, not yet sequenced.
    pending: Vec<Hash32>,
    /// Dedupe hashes indexed by sequence number.
    sequenced: Vec<Hash32>,
}

impl Inner {
    fn append(&mut self, hasher: &TreeHasher, max_pending: usize, mut entry: LeafEntry) -> Result<AppendOutcome, DbError> {
        let key = dedupe_hash(&entry.leaf_input);
        if let Some(existing) = self.entries.get(&key) {
            return Ok(AppendOutcome::Duplicate(existing.clone()));
        }
        if self.pending.len() >= max_pending {
            return Err(DbError::OverCapacity);
        }
        entry.sequence_number = None;
        self.by_leaf_hash.insert(entry.merkle_leaf_hash(hasher), key);
        self.entries.insert(key, entry);
        self.pending.push(key);
        Ok(AppendOutcome::Queued)
    }

    fn lookup_by_hash(&self, leaf_hash: &Hash32) -> LookupOutcome {
        match self.by_leaf_hash.get(leaf_hash).and_then(|key| self.entries.get(key)) {
            Some(entry) if entry.sequence_number.is_some() => LookupOutcome::Found(entry.clone()),
            Some(entry) => LookupOutcome::Pending(entry.clone()),
            None => LookupOutcome::NotFound,
        }
    }

    fn scan_entries(&self, from: u64) -> Vec<LeafEntry> {
        let from = from.min(self.sequenced.len() as u64) as usize;
        self.sequenced[from..]
            .iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    fn pending_entries(&self) -> Vec<LeafEntry> {
        self.pending.iter().filter_map(|key| self.entries.get(key).cloned()).collect()
    }

    fn assign_sequence_number(&mut self, leaf_hash: &Hash32, sequence_number: u64) -> Result<(), DbError> {
        let key = *self.by_leaf_hash.get(leaf_hash).ok_or(DbError::UnknownLeaf)?;
        if sequence_number != self.sequenced.len() as u64 {
            return Err(DbError::Storage(format!(
                "sequence number {sequence_number} out of commit order, expected {}",
                self.sequenced.len()
            )));
        }
        let entry = self.entries.get_mut(&key).ok_or(DbError::UnknownLeaf)?;
        entry.sequence_number = Some(sequence_number);
        self.pending.retain(|k| *k != key);
        self.sequenced.push(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend

pub struct InMemoryDatabase {
    hasher: TreeHasher,
    max_pending: usize,
    inner: RwLock<Inner>,
}

impl InMemoryDatabase {
    pub fn new(hasher: TreeHasher) -> Self {
        Self::with_max_pending(hasher, DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(hasher: TreeHasher, max_pending: usize) -> Self {
        Self { hasher, max_pending, inner: RwLock::new(Inner::default()) }
    }
}

impl Database for InMemoryDatabase {
    fn append(&self, entry: LeafEntry) -> Result<AppendOutcome, DbError> {
        self.inner.write().unwrap().append(&self.hasher, self.max_pending, entry)
    }

    fn scan_entries(&self, from: u64) -> Box<dyn Iterator<Item = LeafEntry> + Send> {
        Box::new(self.inner.read().unwrap().scan_entries(from).into_iter())
    }

    fn lookup_by_hash(&self, leaf_hash: &Hash32) -> LookupOutcome {
        self.inner.read().unwrap().lookup_by_hash(leaf_hash)
    }

    fn pending_entries(&self) -> Vec<LeafEntry> {
        self.inner.read().unwrap().pending_entries()
    }

    fn assign_sequence_number(&self, leaf_hash: &Hash32, sequence_number: u64) -> Result<(), DbError> {
        self.inner.write().unwrap().assign_sequence_number(leaf_hash, sequence_number)
    }

    fn tree_size(&self) -> u64 {
        self.inner.read().unwrap().sequenced.len() as u64
    }
}

// ---------------------------------------------------------------------------
// File-backed backend

#[derive(Serialize, Deserialize)]
struct Persisted {
    pending: Vec<LeafEntry>,
    sequenced: Vec<LeafEntry>,
}

/// JSON-snapshot backend. Every successful mutation is flushed with the
/// write-temp, fsync, rename dance before returning, which keeps the
/// durability promise of [`Database::append`].
pub struct FileDatabase {
    hasher: TreeHasher,
    max_pending: usize,
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl FileDatabase {
    pub fn open(hasher: TreeHasher, path: PathBuf) -> Result<Self, DbError> {
        Self::open_with_max_pending(hasher, path, DEFAULT_MAX_PENDING)
    }

    pub fn open_with_max_pending(hasher: TreeHasher, path: PathBuf, max_pending: usize) -> Result<Self, DbError> {
        let mut inner = Inner::default();
        if path.exists() {
            let bytes = fs::read(&path)?;
            let persisted: Persisted =
                serde_json::from_slice(&bytes).map_err(|e| DbError::Serialization(e.to_string()))?;
            for entry in persisted.sequenced {
                let key = dedupe_hash(&entry.leaf_input);
                inner.by_leaf_hash.insert(entry.merkle_leaf_hash(&hasher), key);
                inner.sequenced.push(key);
                inner.entries.insert(key, entry);
            }
            for entry in persisted.pending {
                let key = dedupe_hash(&entry.leaf_input);
                inner.by_leaf_hash.insert(entry.merkle_leaf_hash(&hasher), key);
                inner.pending.push(key);
                inner.entries.insert(key, entry);
            }
        }
        Ok(Self { hasher, max_pending, path, inner: RwLock::new(inner) })
    }

    fn flush(&self, inner: &Inner) -> Result<(), DbError> {
        let persisted = Persisted {
            pending: inner.pending_entries(),
            sequenced: inner.scan_entries(0),
        };
        let json = serde_json::to_vec(&persisted).map_err(|e| DbError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Database for FileDatabase {
    fn append(&self, entry: LeafEntry) -> Result<AppendOutcome, DbError> {
        let mut inner = self.inner.write().unwrap();
        let outcome = inner.append(&self.hasher, self.max_pending, entry)?;
        if matches!(outcome, AppendOutcome::Queued) {
            self.flush(&inner)?;
        }
        Ok(outcome)
    }

    fn scan_entries(&self, from: u64) -> Box<dyn Iterator<Item = LeafEntry> + Send> {
        Box::new(self.inner.read().unwrap().scan_entries(from).into_iter())
    }

    fn lookup_by_hash(&self, leaf_hash: &Hash32) -> LookupOutcome {
        self.inner.read().unwrap().lookup_by_hash(leaf_hash)
    }

    fn pending_entries(&self) -> Vec<LeafEntry> {
        self.inner.read().unwrap().pending_entries()
    }

    fn assign_sequence_number(&self, leaf_hash: &Hash32, sequence_number: u64) -> Result<(), DbError> {
        let mut inner = self.inner.write().unwrap();
        inner.assign_sequence_number(leaf_hash, sequence_number)?;
        self.flush(&inner)
    }

    fn tree_size(&self) -> u64 {
        self.inner.read().unwrap().sequenced.len() as u64
    }
}

// ---------------------------------------------------------------------------
// SQLite backend

/// Embedded-SQL backend. Queue order is the insertion rowid; the SCT is
/// stored as a JSON blob alongside the raw entry bytes.
pub struct SqliteDatabase {
    hasher: TreeHasher,
    max_pending: usize,
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(hasher: TreeHasher, path: PathBuf) -> Result<Self, DbError> {
        Self::open_with_max_pending(hasher, path, DEFAULT_MAX_PENDING)
    }

    pub fn open_with_max_pending(hasher: TreeHasher, path: PathBuf, max_pending: usize) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                dedupe_hash BLOB PRIMARY KEY,
                leaf_hash BLOB NOT NULL UNIQUE,
                leaf_input BLOB NOT NULL,
                extra_data BLOB NOT NULL,
                sct BLOB NOT NULL,
                sequence_number INTEGER
            )",
            [],
        )?;
        Ok(Self { hasher, max_pending, conn: Mutex::new(conn) })
    }

    fn entry_from_columns(
        leaf_input: Vec<u8>,
        extra_data: Vec<u8>,
        sct: Vec<u8>,
        sequence_number: Option<i64>,
    ) -> Result<LeafEntry, DbError> {
        let sct: Sct = serde_json::from_slice(&sct).map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(LeafEntry {
            leaf_input,
            extra_data,
            sct,
            sequence_number: sequence_number.map(|n| n as u64),
        })
    }
}

type EntryColumns = (Vec<u8>, Vec<u8>, Vec<u8>, Option<i64>);

fn columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl Database for SqliteDatabase {
    fn append(&self, entry: LeafEntry) -> Result<AppendOutcome, DbError> {
        let key = dedupe_hash(&entry.leaf_input);
        let conn = self.conn.lock().unwrap();

        let existing = conn
            .query_row(
                "SELECT leaf_input, extra_data, sct, sequence_number FROM entries WHERE dedupe_hash = ?1",
                params![key.as_slice()],
                columns,
            )
            .optional()?;
        if let Some((leaf_input, extra_data, sct, seq)) = existing {
            return Ok(AppendOutcome::Duplicate(Self::entry_from_columns(leaf_input, extra_data, sct, seq)?));
        }

        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE sequence_number IS NULL",
            [],
            |row| row.get(0),
        )?;
        if pending as usize >= self.max_pending {
            return Err(DbError::OverCapacity);
        }

        let leaf_hash = entry.merkle_leaf_hash(&self.hasher);
        let sct = serde_json::to_vec(&entry.sct).map_err(|e| DbError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO entries (dedupe_hash, leaf_hash, leaf_input, extra_data, sct, sequence_number)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![key.as_slice(), leaf_hash.as_slice(), entry.leaf_input, entry.extra_data, sct],
        )?;
        Ok(AppendOutcome::Queued)
    }

    fn scan_entries(&self, from: u64) -> Box<dyn Iterator<Item = LeafEntry> + Send> {
        let conn = self.conn.lock().unwrap();
        let mut entries = Vec::new();
        let result = conn
            .prepare(
                "SELECT leaf_input, extra_data, sct, sequence_number FROM entries
                 WHERE sequence_number >= ?1 ORDER BY sequence_number",
            )
            .and_then(|mut stmt| {
                let rows = stmt.query_map(params![from as i64], columns)?;
                for row in rows {
                    let (leaf_input, extra_data, sct, seq) = row?;
                    match Self::entry_from_columns(leaf_input, extra_data, sct, seq) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!("skipping undecodable entry in scan: {e}"),
                    }
                }
                Ok(())
            });
        // A storage error ends the scan early; the contract only promises
        // termination.
        if let Err(e) = result {
            warn!(from, "sqlite entry scan failed: {e}");
        }
        Box::new(entries.into_iter())
    }

    fn lookup_by_hash(&self, leaf_hash: &Hash32) -> LookupOutcome {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT leaf_input, extra_data, sct, sequence_number FROM entries WHERE leaf_hash = ?1",
                params![leaf_hash.as_slice()],
                columns,
            )
            .optional();
        match found {
            Ok(Some((leaf_input, extra_data, sct, seq))) => {
                match Self::entry_from_columns(leaf_input, extra_data, sct, seq) {
                    Ok(entry) if entry.sequence_number.is_some() => LookupOutcome::Found(entry),
                    Ok(entry) => LookupOutcome::Pending(entry),
                    Err(e) => {
                        warn!("undecodable entry for leaf hash lookup: {e}");
                        LookupOutcome::NotFound
                    }
                }
            }
            Ok(None) => LookupOutcome::NotFound,
            Err(e) => {
                warn!("sqlite leaf hash lookup failed: {e}");
                LookupOutcome::NotFound
            }
        }
    }

    fn pending_entries(&self) -> Vec<LeafEntry> {
        let conn = self.conn.lock().unwrap();
        let mut entries = Vec::new();
        let result = conn
            .prepare(
                "SELECT leaf_input, extra_data, sct, sequence_number FROM entries
                 WHERE sequence_number IS NULL ORDER BY rowid",
            )
            .and_then(|mut stmt| {
                let rows = stmt.query_map([], columns)?;
                for row in rows {
                    let (leaf_input, extra_data, sct, seq) = row?;
                    match Self::entry_from_columns(leaf_input, extra_data, sct, seq) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!("skipping undecodable pending entry: {e}"),
                    }
                }
                Ok(())
            });
        if let Err(e) = result {
            warn!("sqlite pending scan failed: {e}");
        }
        entries
    }

    fn assign_sequence_number(&self, leaf_hash: &Hash32, sequence_number: u64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE entries SET sequence_number = ?1 WHERE leaf_hash = ?2 AND sequence_number IS NULL",
            params![sequence_number as i64, leaf_hash.as_slice()],
        )?;
        if changed == 0 {
            return Err(DbError::UnknownLeaf);
        }
        Ok(())
    }

    fn tree_size(&self) -> u64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM entries WHERE sequence_number IS NOT NULL", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .unwrap_or_else(|e| {
            warn!("sqlite size query failed: {e}");
            0
        })
    }
}
