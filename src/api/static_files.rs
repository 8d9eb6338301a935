//! UI asset serving for requests that no API route claims.

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::path::Path;
use tower::util::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::api::AppState;
use crate::error::AppError;

/// Page served for a path, when it is not a plain file lookup.
fn page_for(path: &str) -> Option<&'static str> {
    match path {
        "/app" | "/app/" => Some("200.html"),
        p if p.starts_with("/app/") => Some("200.html"),
        "/" => Some("index.html"),
        "/about" => Some("about.html"),
        _ => None,
    }
}

fn is_api(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

pub async fn fallback(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let dir = match &state.static_dir {
        Some(dir) if !is_api(&path) => dir.clone(),
        _ => return AppError::NotFound(format!("no route for {}", path)).into_response(),
    };

    match serve(&dir, &path, req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

async fn serve(dir: &Path, path: &str, req: Request) -> Result<Response, Infallible> {
    let response = match page_for(path) {
        Some(page) => ServeFile::new(dir.join(page)).oneshot(req).await?.into_response(),
        None => ServeDir::new(dir).oneshot(req).await?.into_response(),
    };
    Ok(response)
}
