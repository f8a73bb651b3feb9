//! Instance, workspace and metrics endpoints.

use super::AppState;
use super::error::ApiError;
use crate::error::ControllerError;
use crate::workspace::workspace_commit;
use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use datastore::InstanceInfo;
use serde_json::{Value, json};

pub async fn version(State(state): State<AppState>) -> Json<InstanceInfo> {
    Json(state.instance.clone())
}

pub async fn instances(State(state): State<AppState>) -> Result<Json<Vec<InstanceInfo>>, ApiError> {
    Ok(Json(state.datastore.instances().await?))
}

/// Ask every replica to reload the workspace.
pub async fn post_update(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let revision = state.datastore.signal_workspace_update().await?;
    Ok(Json(json!({ "revision": revision })))
}

pub async fn get_update(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match workspace_commit(state.datastore.workspace()).await {
        Ok(commit) => Ok(Json(json!({ "commit": commit }))),
        Err(ControllerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound("workspace is not a git checkout".to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state.metrics.encode().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}
