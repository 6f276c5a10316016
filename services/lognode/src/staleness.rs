//! Node freshness: the cluster view, the cached staleness flag, and the
//! periodic refresh task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cluster view consumed by the node. `node_is_stale` may block briefly on
/// an internal lock, so it must never be called on the I/O threads.
pub trait ClusterStateController: Send + Sync {
    /// Whether the local serving STH lags the cluster's authoritative one.
    fn node_is_stale(&self) -> bool;

    /// Addresses of peers currently serving a fresh STH.
    fn fresh_peers(&self) -> Vec<String>;
}

/// Fixed cluster view for single-node deployments and tests.
pub struct StaticClusterState {
    stale: AtomicBool,
    peers: Vec<String>,
}

impl StaticClusterState {
    pub fn new(peers: Vec<String>) -> Self {
        Self { stale: AtomicBool::new(false), peers }
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Relaxed);
    }
}

impl ClusterStateController for StaticClusterState {
    fn node_is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    fn fresh_peers(&self) -> Vec<String> {
        self.peers.clone()
    }
}

/// Cached staleness decision. The mutex is held only across the read or
/// write of the flag itself.
pub struct StalenessFlag {
    stale: Mutex<bool>,
}

impl StalenessFlag {
    pub fn new(initial: bool) -> Self {
        Self { stale: Mutex::new(initial) }
    }

    pub fn is_stale(&self) -> bool {
        *self.stale.lock().unwrap()
    }

    pub fn set(&self, stale: bool) {
        *self.stale.lock().unwrap() = stale;
    }
}

/// Periodic refresh: delay, re-query the controller on the blocking pool,
/// cache the answer, re-arm. Cancelling the token is the only shutdown
/// interlock the loop needs; it is checked before every re-arm.
pub async fn run_staleness_loop(
    flag: Arc<StalenessFlag>,
    controller: Arc<dyn ClusterStateController>,
    period: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {
                let controller = controller.clone();
                match tokio::task::spawn_blocking(move || controller.node_is_stale()).await {
                    Ok(stale) => flag.set(stale),
                    Err(e) => warn!("staleness check failed: {e}"),
                }
            }
        }
    }
}
