use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use tokio_util::sync::CancellationToken;
use tracing::info;

use logdb::{Database, FileDatabase, InMemoryDatabase, LogLookup, LogSigner, LookupHandle, SqliteDatabase};
use lognode::checker::{CertChecker, RootStore};
use lognode::config::AppConfig;
use lognode::frontend::Frontend;
use lognode::integrator::{run_integration_loop, Integrator};
use lognode::proxy::Proxy;
use lognode::staleness::{run_staleness_loop, ClusterStateController, StalenessFlag, StaticClusterState};
use lognode::state::{AppState, SharedState};
use merkle::TreeHasher;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    let hasher = TreeHasher::new();

    let db: Arc<dyn Database> = match &cfg.db_path {
        Some(path) if path.extension().and_then(|e| e.to_str()) == Some("sqlite3") => {
            Arc::new(SqliteDatabase::open(hasher.clone(), path.clone()).context("Failed to open SQLite database")?)
        }
        Some(path) => {
            Arc::new(FileDatabase::open(hasher.clone(), path.clone()).context("Failed to open file database")?)
        }
        None => Arc::new(InMemoryDatabase::new(hasher.clone())),
    };

    let signer = match &cfg.private_key_path {
        Some(path) => {
            let bytes = std::fs::read(path).context("Failed to read private key")?;
            let seed: [u8; 32] =
                bytes.as_slice().try_into().map_err(|_| anyhow!("private key must be a 32-byte seed"))?;
            Arc::new(LogSigner::new(SigningKey::from_bytes(&seed)))
        }
        None => Arc::new(LogSigner::generate()),
    };

    let checker: Arc<dyn CertChecker> = match &cfg.trusted_roots_dir {
        Some(dir) => Arc::new(RootStore::from_dir(dir).context("Failed to load trusted roots")?),
        None => Arc::new(RootStore::new(Vec::new())),
    };

    // Bootstrap the read path from whatever the database already holds; the
    // placeholder snapshot is replaced before the listener opens.
    let lookup = Arc::new(LookupHandle::new(LogLookup::empty(
        hasher.clone(),
        signer.sign_tree_head(0, 0, hasher.empty_root()),
    )));
    let integrator = Integrator::bootstrap(db.clone(), signer.clone(), hasher.clone(), lookup.clone());

    let controller: Arc<dyn ClusterStateController> = Arc::new(StaticClusterState::new(cfg.peers.clone()));
    let initial_stale = {
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || controller.node_is_stale()).await?
    };
    let staleness = Arc::new(StalenessFlag::new(initial_stale));

    let frontend = Arc::new(Frontend::new(checker.clone(), signer.clone(), db.clone()));
    let state: SharedState = Arc::new(AppState {
        cfg: cfg.clone(),
        db,
        frontend,
        lookup,
        checker,
        staleness: staleness.clone(),
        proxy: Arc::new(Proxy::new(controller.clone())),
    });

    let cancel = CancellationToken::new();
    tokio::spawn(run_staleness_loop(
        staleness,
        controller,
        Duration::from_secs(cfg.staleness_check_delay_secs),
        cancel.clone(),
    ));
    tokio::spawn(run_integration_loop(
        Arc::new(Mutex::new(integrator)),
        Duration::from_secs(cfg.tree_sign_delay_secs),
        cancel.clone(),
    ));

    let app = lognode::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "log node listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        }
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    cancel.cancel();

    Ok(())
}
