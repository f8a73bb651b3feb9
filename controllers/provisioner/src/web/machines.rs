//! Machine records, the agent heartbeat sink and the agent command channel.

use super::AppState;
use super::error::{ApiError, parse_mac};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use datastore::{AgentCommand, AgentHeartbeat, MachineRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<MachineRecord>>, ApiError> {
    Ok(Json(state.datastore.machines().await?))
}

pub async fn get(State(state): State<AppState>, Path(mac): Path<String>) -> Result<Json<MachineRecord>, ApiError> {
    let mac = parse_mac(&mac)?;
    state
        .datastore
        .machine_record(&mac, false)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("machine {} is unknown", mac)))
}

pub async fn delete(State(state): State<AppState>, Path(mac): Path<String>) -> Result<StatusCode, ApiError> {
    let mac = parse_mac(&mac)?;
    if state.datastore.delete_machine(&mac).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("machine {} is unknown", mac)))
    }
}

/// `POST /heartbeat/{mac}` from the agent on a provisioned machine.
pub async fn post_heartbeat(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mac = parse_mac(&mac)?;
    let heartbeat: AgentHeartbeat =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid heartbeat: {}", e)))?;
    state.datastore.set_heartbeat(&mac, &heartbeat).await?;
    state.datastore.check_in(&mac).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn get_heartbeat(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<AgentHeartbeat>, ApiError> {
    let mac = parse_mac(&mac)?;
    state
        .datastore
        .heartbeat(&mac)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no heartbeat from {}", mac)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandBody {
    pub command: Option<String>,
}

/// The `command` field of a JSON or form-encoded body.
fn command_field(headers: &HeaderMap, body: &[u8]) -> Result<String, ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let command = if is_json {
        serde_json::from_slice::<CommandBody>(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid command body: {}", e)))?
            .command
    } else {
        String::from_utf8_lossy(body)
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "command")
            .map(|(_, value)| value.to_string())
    };
    command.ok_or_else(|| ApiError::BadRequest("missing command".to_string()))
}

pub async fn post_command(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CommandBody>, ApiError> {
    let mac = parse_mac(&mac)?;
    let command: AgentCommand = command_field(&headers, &body)?
        .parse()
        .map_err(|e: datastore::UnknownCommand| ApiError::BadRequest(e.to_string()))?;
    state.datastore.send_command(&mac, command).await?;
    Ok(Json(CommandBody {
        command: Some(command.to_string()),
    }))
}

pub async fn get_command(State(state): State<AppState>, Path(mac): Path<String>) -> Result<Json<CommandBody>, ApiError> {
    let mac = parse_mac(&mac)?;
    let command = state.datastore.pending_command(&mac).await?;
    Ok(Json(CommandBody {
        command: command.map(|c| c.to_string()),
    }))
}
