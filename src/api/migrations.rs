use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionResponse {
    pub version: i64,
}

/// Current schema version, read from the migration ledger.
pub async fn get_version(
    State(state): State<AppState>,
) -> Result<Json<VersionResponse>, AppError> {
    let version = state.store.last_migration_version().await?;

    info!(version, "migration version fetched");

    Ok(Json(VersionResponse { version }))
}
