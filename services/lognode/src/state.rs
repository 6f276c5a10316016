use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Method, Uri};
use axum::response::Response;
use logdb::{Database, LookupHandle};

use crate::checker::CertChecker;
use crate::config::AppConfig;
use crate::frontend::Frontend;
use crate::proxy::Proxy;
use crate::staleness::StalenessFlag;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub cfg: AppConfig,
    pub db: Arc<dyn Database>,
    pub frontend: Arc<Frontend>,
    pub lookup: Arc<LookupHandle>,
    pub checker: Arc<dyn CertChecker>,
    pub staleness: Arc<StalenessFlag>,
    pub proxy: Arc<Proxy>,
}

impl AppState {
    /// The staleness check, run by each handler once the method has been
    /// dispatched and the parameters validated: a stale node hands the
    /// request to a fresher peer instead of serving it locally. Reads only
    /// the cached flag; the controller itself is queried by the background
    /// refresh task, never on the I/O threads.
    pub async fn proxy_if_stale(&self, method: Method, uri: &Uri, body: Bytes) -> Option<Response> {
        if self.staleness.is_stale() {
            Some(self.proxy.forward(method, uri, body).await)
        } else {
            None
        }
    }
}
