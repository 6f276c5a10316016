use std::path::PathBuf;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Upper bound on `end - start + 1` for `get-entries`.
    pub max_leaf_entries_per_response: i64,
    /// Period of the node-freshness check.
    pub staleness_check_delay_secs: u64,
    /// Period of the tree integration / STH signing task.
    pub tree_sign_delay_secs: u64,
    /// File or SQLite database path; in-memory when unset.
    pub db_path: Option<PathBuf>,
    /// 32-byte Ed25519 seed; a throwaway key is generated when unset.
    pub private_key_path: Option<PathBuf>,
    /// Directory of trusted root certificates (`*.der`).
    pub trusted_roots_dir: Option<PathBuf>,
    /// Peer addresses requests are forwarded to while this node is stale.
    pub peers: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("LOG_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let max_leaf_entries_per_response = get_or("MAX_LEAF_ENTRIES_PER_RESPONSE", 1000)?;
        let staleness_check_delay_secs = get_or("STALENESS_CHECK_DELAY_SECS", 5)?;
        let tree_sign_delay_secs = get_or("TREE_SIGN_DELAY_SECS", 1)?;
        let db_path = std::env::var("LOG_DB_PATH").ok().map(PathBuf::from);
        let private_key_path = std::env::var("LOG_PRIVATE_KEY_PATH").ok().map(PathBuf::from);
        let trusted_roots_dir = std::env::var("TRUSTED_ROOTS_DIR").ok().map(PathBuf::from);
        let peers = std::env::var("LOG_PEERS")
            .map(|v| v.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        // Fail fast, fail loud.
        if max_leaf_entries_per_response <= 0 {
            bail!("MAX_LEAF_ENTRIES_PER_RESPONSE must be positive");
        }
        if staleness_check_delay_secs == 0 {
            bail!("STALENESS_CHECK_DELAY_SECS must be positive");
        }

        Ok(Self {
            bind_addr,
            max_leaf_entries_per_response,
            staleness_check_delay_secs,
            tree_sign_delay_secs,
            db_path,
            private_key_path,
            trusted_roots_dir,
            peers,
        })
    }
}

fn get_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Invalid value for {key}")),
        Err(_) => Ok(default),
    }
}
