//! Tree integration: sequencing queued entries and publishing signed tree
//! heads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use logdb::{Database, DbError, LogLookup, LogSigner, LookupHandle};
use merkle::{DenseMerkleTree, Hash32, TreeHasher};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Single writer over the incremental dense tree and its leaf-hash index.
/// Drains the pending queue, assigns sequence numbers in commit order, and
/// publishes immutable lookup snapshots.
pub struct Integrator {
    db: Arc<dyn Database>,
    signer: Arc<LogSigner>,
    hasher: TreeHasher,
    lookup: Arc<LookupHandle>,
    tree: DenseMerkleTree,
    leaf_index: HashMap<Hash32, u64>,
    last_sth_timestamp: u64,
}

impl Integrator {
    /// Rebuilds the tree from the database (a restart replays the same
    /// deterministic entry sequence) and publishes the initial snapshot.
    pub fn bootstrap(
        db: Arc<dyn Database>,
        signer: Arc<LogSigner>,
        hasher: TreeHasher,
        lookup: Arc<LookupHandle>,
    ) -> Self {
        let mut tree = DenseMerkleTree::new(hasher.clone());
        let mut leaf_index = HashMap::new();
        for entry in db.scan_entries(0) {
            let leaf_hash = entry.merkle_leaf_hash(&hasher);
            let sequence_number = tree.add_leaf_hash(leaf_hash);
            leaf_index.insert(leaf_hash, sequence_number);
        }
        let mut integrator =
            Self { db, signer, hasher, lookup, tree, leaf_index, last_sth_timestamp: 0 };
        integrator.publish();
        integrator
    }

    /// One integration round. Returns the number of entries sequenced.
    pub fn integrate_once(&mut self) -> Result<u64, DbError> {
        let pending = self.db.pending_entries();
        let mut appended = 0;
        for entry in pending {
            let leaf_hash = entry.merkle_leaf_hash(&self.hasher);
            let sequence_number = self.tree.size();
            // Durable sequence assignment first, then the in-memory tree.
            self.db.assign_sequence_number(&leaf_hash, sequence_number)?;
            self.tree.add_leaf_hash(leaf_hash);
            self.leaf_index.insert(leaf_hash, sequence_number);
            appended += 1;
        }
        if appended > 0 {
            self.publish();
        }
        Ok(appended)
    }

    fn publish(&mut self) {
        // STH timestamps never step backwards, whatever the wall clock does.
        let timestamp_ms = now_ms().max(self.last_sth_timestamp);
        self.last_sth_timestamp = timestamp_ms;
        let sth = self.signer.sign_tree_head(self.tree.size(), timestamp_ms, self.tree.root());
        self.lookup.publish(LogLookup::new(sth, self.tree.clone(), self.leaf_index.clone()));
    }
}

/// Periodic integration driven off the I/O threads.
pub async fn run_integration_loop(
    integrator: Arc<Mutex<Integrator>>,
    period: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {
                let integrator = integrator.clone();
                let result =
                    tokio::task::spawn_blocking(move || integrator.lock().unwrap().integrate_once()).await;
                match result {
                    Ok(Ok(appended)) if appended > 0 => info!(appended, "integrated queued entries"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("integration failed: {e}"),
                    Err(e) => error!("integration task failed: {e}"),
                }
            }
        }
    }
}
