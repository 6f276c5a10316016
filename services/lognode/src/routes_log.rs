//! Read-side CT v1 endpoints.
//!
//! Each handler validates its parameters, then runs the staleness check and
//! either serves locally or forwards to a fresher peer. Proof endpoints
//! (`get-sth`, `get-sth-consistency`, `get-proof-by-hash`) read a pinned
//! lookup snapshot and never touch the database; `get-entries` scans storage
//! through the blocking pool.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::db_exec::with_db_blocking;
use crate::reply::{error_reply, ApiError};
use crate::state::SharedState;

#[derive(Serialize)]
pub struct SthResponse {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    pub tree_head_signature: String,
}

#[derive(Serialize)]
pub struct ConsistencyResponse {
    pub consistency: Vec<String>,
}

#[derive(Serialize)]
pub struct ProofByHashResponse {
    pub leaf_index: u64,
    pub audit_path: Vec<String>,
}

#[derive(Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<EntryJson>,
}

#[derive(Serialize)]
pub struct EntryJson {
    pub leaf_input: String,
    pub extra_data: String,
    /// Only populated for `include_scts` requests from peer nodes following
    /// this one; not part of the public protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sct: Option<String>,
}

#[derive(Serialize)]
pub struct RootsResponse {
    pub certificates: Vec<String>,
}

fn int_param(params: &HashMap<String, String>, name: &str) -> Option<i64> {
    params.get(name).and_then(|v| v.parse::<i64>().ok())
}

fn bool_param(params: &HashMap<String, String>, name: &str) -> bool {
    matches!(params.get(name).map(String::as_str), Some("true") | Some("1"))
}

pub async fn get_sth(State(st): State<SharedState>, uri: Uri) -> Response {
    if let Some(response) = st.proxy_if_stale(Method::GET, &uri, Bytes::new()).await {
        return response;
    }

    let snapshot = st.lookup.snapshot();
    let sth = snapshot.sth();
    Json(SthResponse {
        tree_size: sth.tree_size,
        timestamp: sth.timestamp_ms,
        sha256_root_hash: BASE64.encode(sth.root_hash),
        tree_head_signature: BASE64.encode(&sth.signature),
    })
    .into_response()
}

pub async fn get_consistency(
    State(st): State<SharedState>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let first = int_param(&params, "first")
        .filter(|v| *v >= 0)
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"first\" parameter."))?;
    let second = int_param(&params, "second")
        .filter(|v| *v >= first)
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"second\" parameter."))?;

    if let Some(response) = st.proxy_if_stale(Method::GET, &uri, Bytes::new()).await {
        return Ok(response);
    }

    let snapshot = st.lookup.snapshot();
    if second as u64 > snapshot.sth().tree_size {
        return Err(error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"second\" parameter."));
    }

    let proof = snapshot
        .consistency_proof(first as u64, second as u64)
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"second\" parameter."))?;
    Ok(Json(ConsistencyResponse {
        consistency: proof.iter().map(|node| BASE64.encode(node)).collect(),
    })
    .into_response())
}

pub async fn get_proof_by_hash(
    State(st): State<SharedState>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let b64_hash = params
        .get("hash")
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"hash\" parameter."))?;
    let hash: [u8; 32] = BASE64
        .decode(b64_hash)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Invalid \"hash\" parameter."))?;
    let tree_size = int_param(&params, "tree_size")
        .filter(|v| *v >= 0)
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"tree_size\" parameter."))?;

    if let Some(response) = st.proxy_if_stale(Method::GET, &uri, Bytes::new()).await {
        return Ok(response);
    }

    let snapshot = st.lookup.snapshot();
    if tree_size as u64 > snapshot.sth().tree_size {
        return Err(error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"tree_size\" parameter."));
    }

    let proof = snapshot
        .audit_proof(&hash, tree_size as u64)
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "Couldn't find hash."))?;
    Ok(Json(ProofByHashResponse {
        leaf_index: proof.leaf_index,
        audit_path: proof.path.iter().map(|node| BASE64.encode(node)).collect(),
    })
    .into_response())
}

pub async fn get_entries(
    State(st): State<SharedState>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let start = int_param(&params, "start")
        .filter(|v| *v >= 0)
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"start\" parameter."))?;
    let end = int_param(&params, "end")
        .filter(|v| *v >= start)
        .ok_or_else(|| error_reply(StatusCode::BAD_REQUEST, "Missing or invalid \"end\" parameter."))?;

    // Limit the number of entries returned in a single request.
    let end = end.min(start.saturating_add(st.cfg.max_leaf_entries_per_response));

    // Non-standard parameter, used by peer log nodes following this one.
    let include_scts = bool_param(&params, "include_scts");

    if let Some(response) = st.proxy_if_stale(Method::GET, &uri, Bytes::new()).await {
        return Ok(response);
    }

    let db = st.db.clone();
    let entries = with_db_blocking(db, move |db| {
        let mut out = Vec::new();
        let mut iter = db.scan_entries(start as u64);
        for i in start..=end {
            match iter.next() {
                // Stop at the end of the log or at the first sequence gap.
                Some(entry) if entry.sequence_number == Some(i as u64) => out.push(entry),
                _ => break,
            }
        }
        out
    })
    .await
    .map_err(|_| error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error."))?;

    if entries.is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "Entry not found."));
    }

    Ok(Json(EntriesResponse {
        entries: entries
            .iter()
            .map(|entry| EntryJson {
                leaf_input: BASE64.encode(&entry.leaf_input),
                extra_data: BASE64.encode(&entry.extra_data),
                sct: include_scts.then(|| BASE64.encode(entry.sct.to_bytes())),
            })
            .collect(),
    })
    .into_response())
}

pub async fn get_roots(State(st): State<SharedState>, uri: Uri) -> Response {
    if let Some(response) = st.proxy_if_stale(Method::GET, &uri, Bytes::new()).await {
        return response;
    }

    Json(RootsResponse {
        certificates: st.checker.trusted_roots().iter().map(|cert| BASE64.encode(cert)).collect(),
    })
    .into_response()
}
