//! CT v1 log node: HTTP serving, admission, and tree integration.

pub mod checker;
pub mod config;
pub mod db_exec;
pub mod frontend;
pub mod integrator;
pub mod interceptors;
pub mod proxy;
pub mod reply;
pub mod routes_log;
pub mod routes_submit;
pub mod staleness;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::SharedState;

/// CT v1 dispatch table. The latency sampler wraps everything; the
/// staleness/proxy decision runs inside each handler, after axum has
/// resolved method and path and the handler has validated its parameters,
/// so method errors and parameter errors are answered locally even on a
/// stale node.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/ct/v1/get-sth", get(routes_log::get_sth))
        .route("/ct/v1/get-sth-consistency", get(routes_log::get_consistency))
        .route("/ct/v1/get-proof-by-hash", get(routes_log::get_proof_by_hash))
        .route("/ct/v1/get-entries", get(routes_log::get_entries))
        .route("/ct/v1/get-roots", get(routes_log::get_roots))
        .route("/ct/v1/add-chain", post(routes_submit::add_chain))
        .route("/ct/v1/add-pre-chain", post(routes_submit::add_pre_chain))
        .layer(middleware::from_fn(interceptors::track_latency))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
