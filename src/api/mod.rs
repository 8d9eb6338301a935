pub mod health;
pub mod migrations;
pub mod static_files;

use crate::store::Store;
use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub static_dir: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            static_dir: None,
        }
    }

    /// Serve UI assets from `dir` for requests no API route matches.
    pub fn with_static_dir(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(Arc::new(dir));
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/healthz", get(health::healthz))
        .route("/api/version", get(health::version))
        .route("/api/metrics", get(health::metrics))
        .route("/api/migrations/version", get(migrations::get_version))
        .fallback(static_files::fallback)
        .layer(middleware::from_fn(response_headers))
        .with_state(state)
}

/// Sets `nosniff`, echoes `X-Request-Id` and logs server errors.
async fn response_headers(req: Request, next: Next) -> Response {
    let request_id = req.headers().get(&X_REQUEST_ID).cloned();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;

    let status = response.status();
    if status.is_server_error() {
        let rid = request_id
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            method = %method,
            path = %path,
            rid,
            "http error"
        );
    }

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    if let Some(rid) = request_id {
        headers.insert(X_REQUEST_ID, rid);
    }
    response
}
