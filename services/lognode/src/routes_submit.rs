//! `add-chain` and `add-pre-chain`.
//!
//! The body is parsed first; a stale node then forwards the submission to a
//! fresher peer (which stands a better chance of handling duplicates without
//! bloating the tree), otherwise admission runs on the worker pool.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use logdb::Sct;
use serde::{Deserialize, Serialize};

use crate::frontend::AddEntryError;
use crate::reply::{error_reply, ApiError};
use crate::state::SharedState;

#[derive(Deserialize)]
struct AddChainRequest {
    chain: Vec<String>,
}

#[derive(Serialize)]
pub struct AddChainResponse {
    pub sct_version: u8,
    pub id: String,
    pub timestamp: u64,
    pub extensions: String,
    pub signature: String,
}

// Content-Type is deliberately not checked, matching the protocol's
// known looseness.
fn extract_chain(body: &[u8]) -> Result<Vec<Vec<u8>>, ApiError> {
    let request: AddChainRequest = serde_json::from_slice(body)
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "Unable to parse provided JSON."))?;
    let mut chain = Vec::with_capacity(request.chain.len());
    for cert in &request.chain {
        let der = BASE64
            .decode(cert)
            .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "Unable to parse provided chain."))?;
        chain.push(der);
    }
    Ok(chain)
}

fn add_entry_reply(result: Result<Sct, AddEntryError>) -> Result<Response, ApiError> {
    match result {
        Ok(sct) => Ok(Json(AddChainResponse {
            sct_version: 0,
            id: BASE64.encode(sct.log_id),
            timestamp: sct.timestamp_ms,
            extensions: BASE64.encode(&sct.extensions),
            signature: BASE64.encode(&sct.signature),
        })
        .into_response()),
        Err(AddEntryError::OverCapacity) => {
            Err(error_reply(StatusCode::SERVICE_UNAVAILABLE, "Log is over capacity."))
        }
        Err(err) => Err(error_reply(StatusCode::BAD_REQUEST, &err.to_string())),
    }
}

pub async fn add_chain(
    State(st): State<SharedState>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let chain = extract_chain(&body)?;
    if let Some(response) = st.proxy_if_stale(Method::POST, &uri, body).await {
        return Ok(response);
    }

    let frontend = st.frontend.clone();
    let result = tokio::task::spawn_blocking(move || frontend.queue_x509_entry(chain))
        .await
        .map_err(|_| error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error."))?;
    add_entry_reply(result)
}

pub async fn add_pre_chain(
    State(st): State<SharedState>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let chain = extract_chain(&body)?;
    if let Some(response) = st.proxy_if_stale(Method::POST, &uri, body).await {
        return Ok(response);
    }

    let frontend = st.frontend.clone();
    let result = tokio::task::spawn_blocking(move || frontend.queue_pre_cert_entry(chain))
        .await
        .map_err(|_| error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error."))?;
    add_entry_reply(result)
}
