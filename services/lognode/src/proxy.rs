//! Request forwarding to fresher peers.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::reply::error_reply;
use crate::staleness::ClusterStateController;

/// Forwards a request verbatim to a peer serving a fresher STH and relays
/// the peer's response back untouched. Callers hand over the already
/// dispatched method, URI and body, so method and parameter checks have run
/// before anything is forwarded.
pub struct Proxy {
    client: reqwest::Client,
    controller: Arc<dyn ClusterStateController>,
}

impl Proxy {
    pub fn new(controller: Arc<dyn ClusterStateController>) -> Self {
        Self { client: reqwest::Client::new(), controller }
    }

    pub async fn forward(&self, method: Method, uri: &Uri, body: Bytes) -> Response {
        // Peer discovery can block on the controller's lock.
        let controller = self.controller.clone();
        let peers = match tokio::task::spawn_blocking(move || controller.fresh_peers()).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("peer discovery failed: {e}");
                Vec::new()
            }
        };
        let Some(peer) = peers.into_iter().next() else {
            return bad_gateway("No fresh peer available.");
        };

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("http://{peer}{path_and_query}");
        let Ok(method) = reqwest::Method::from_bytes(method.as_str().as_bytes()) else {
            return bad_gateway("Proxying failed.");
        };

        let upstream = match self.client.request(method, &url).body(body.to_vec()).send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(%url, "proxy request failed: {e}");
                return bad_gateway("Proxying failed.");
            }
        };
        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        match upstream.bytes().await {
            Ok(body) => (status, [("content-type", "application/json")], Body::from(body)).into_response(),
            Err(e) => {
                warn!(%url, "failed to read peer response: {e}");
                bad_gateway("Proxying failed.")
            }
        }
    }
}

fn bad_gateway(message: &str) -> Response {
    error_reply(StatusCode::BAD_GATEWAY, message).into_response()
}
