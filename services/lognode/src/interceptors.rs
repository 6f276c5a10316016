//! Request wrappers.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

/// Outermost wrapper: samples handler latency per path. The staleness/proxy
/// decision happens inside each handler, after method dispatch and parameter
/// validation, so forwarded requests still land in these samples.
pub async fn track_latency(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(req).await;
    debug!(
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    response
}
