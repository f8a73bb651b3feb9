//! Cluster and machine variable CRUD.

use super::AppState;
use super::error::{ApiError, parse_mac};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

fn found(name: String, value: Option<String>) -> Result<Json<Variable>, ApiError> {
    match value {
        Some(value) => Ok(Json(Variable { name, value })),
        None => Err(ApiError::NotFound(format!("variable {} is not set", name))),
    }
}

fn deleted(name: &str, existed: bool) -> Result<StatusCode, ApiError> {
    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("variable {} is not set", name)))
    }
}

// Cluster scope

pub async fn list_cluster(State(state): State<AppState>) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    Ok(Json(state.datastore.list_cluster_variables().await?))
}

/// Set several variables from a JSON object.
pub async fn put_cluster_many(
    State(state): State<AppState>,
    Json(values): Json<BTreeMap<String, String>>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    for (name, value) in &values {
        state.datastore.set_cluster_variable(name, value).await?;
    }
    Ok(Json(values))
}

pub async fn delete_cluster_all(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    for name in state.datastore.list_cluster_variables().await?.keys() {
        state.datastore.delete_cluster_variable(name).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_cluster(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Variable>, ApiError> {
    let value = state.datastore.get_cluster_variable(&name).await?;
    found(name, value)
}

pub async fn put_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
    value: String,
) -> Result<Json<Variable>, ApiError> {
    state.datastore.set_cluster_variable(&name, &value).await?;
    Ok(Json(Variable { name, value }))
}

pub async fn delete_cluster(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    let existed = state.datastore.delete_cluster_variable(&name).await?;
    deleted(&name, existed)
}

// Machine scope

pub async fn list_machine(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let mac = parse_mac(&mac)?;
    Ok(Json(state.datastore.list_machine_variables(&mac).await?))
}

pub async fn put_machine_many(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(values): Json<BTreeMap<String, String>>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let mac = parse_mac(&mac)?;
    for (name, value) in &values {
        state.datastore.set_machine_variable(&mac, name, value).await?;
    }
    Ok(Json(values))
}

pub async fn delete_machine_all(State(state): State<AppState>, Path(mac): Path<String>) -> Result<StatusCode, ApiError> {
    let mac = parse_mac(&mac)?;
    for name in state.datastore.list_machine_variables(&mac).await?.keys() {
        state.datastore.delete_machine_variable(&mac, name).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_machine(
    State(state): State<AppState>,
    Path((mac, name)): Path<(String, String)>,
) -> Result<Json<Variable>, ApiError> {
    let mac = parse_mac(&mac)?;
    let value = state.datastore.get_machine_variable(&mac, &name).await?;
    found(name, value)
}

pub async fn put_machine(
    State(state): State<AppState>,
    Path((mac, name)): Path<(String, String)>,
    value: String,
) -> Result<Json<Variable>, ApiError> {
    let mac = parse_mac(&mac)?;
    state.datastore.set_machine_variable(&mac, &name, &value).await?;
    Ok(Json(Variable { name, value }))
}

pub async fn delete_machine(
    State(state): State<AppState>,
    Path((mac, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let mac = parse_mac(&mac)?;
    let existed = state.datastore.delete_machine_variable(&mac, &name).await?;
    deleted(&name, existed)
}
