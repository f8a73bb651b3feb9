//! Rendered first-boot artifacts: `/t/cc`, `/t/ig` and `/t/bp`.

use super::AppState;
use super::error::{ApiError, parse_mac};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use templating::{Artifact, append_report, validate};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    validate: Option<String>,
}

fn artifact(kind: &str) -> Option<Artifact> {
    match kind {
        "cc" => Some(Artifact::CloudConfig),
        "ig" => Some(Artifact::Ignition),
        "bp" => Some(Artifact::BootParams),
        _ => None,
    }
}

pub async fn render(
    State(state): State<AppState>,
    Path((kind, mac)): Path<(String, String)>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    let artifact = artifact(&kind).ok_or_else(|| ApiError::NotFound(format!("unknown template kind {}", kind)))?;
    let mac = parse_mac(&mac)?;

    let mut text = state
        .templates
        .render_machine(artifact, &state.datastore, &mac, &state.addrs)
        .await?;
    state.metrics.template_rendered(artifact);

    let wants_validation = query.validate.as_deref().is_some_and(|v| v != "false");
    if artifact == Artifact::CloudConfig && wants_validation {
        let entries = validate(&text);
        debug!("Validated cloud-config for {}: {} entries", mac, entries.len());
        text = append_report(&text, &entries);
    }
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}
