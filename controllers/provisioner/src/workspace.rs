//! Workspace refresh: template reloads driven by the update marker, and the
//! checked-out commit.

use crate::error::ControllerError;
use datastore::DataStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use templating::TemplateRepo;
use tracing::{debug, info, warn};

/// How often every replica checks the update marker.
pub const UPDATE_POLL: Duration = Duration::from_secs(5);

/// Reload templates when the marker moved past `last`. Returns whether a
/// reload happened.
pub async fn check_for_update(
    datastore: &DataStore,
    templates: &TemplateRepo,
    last: &mut i64,
) -> Result<bool, ControllerError> {
    let revision = datastore.workspace_update_revision().await?;
    if revision == *last {
        return Ok(false);
    }
    info!("Workspace update signalled (revision {}), reloading templates", revision);
    templates.reload()?;
    *last = revision;
    Ok(true)
}

/// Poll the update marker until the task is aborted.
pub async fn watch(datastore: Arc<DataStore>, templates: Arc<TemplateRepo>, every: Duration) {
    let mut last = match datastore.workspace_update_revision().await {
        Ok(revision) => revision,
        Err(e) => {
            warn!("Cannot read the workspace update marker: {}", e);
            0
        }
    };
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match check_for_update(&datastore, &templates, &mut last).await {
            Ok(reloaded) => debug!("Workspace check done (reloaded: {})", reloaded),
            // The previous templates stay live
            Err(e) => warn!("Workspace reload failed: {}", e),
        }
    }
}

/// Commit hash checked out in the workspace, read from `.git`.
pub async fn workspace_commit(workspace: &Path) -> Result<String, ControllerError> {
    let git = workspace.join(".git");
    let head = tokio::fs::read_to_string(git.join("HEAD")).await?;
    let head = head.trim();
    let Some(reference) = head.strip_prefix("ref:") else {
        return Ok(head.to_string());
    };
    let reference = reference.trim();

    match tokio::fs::read_to_string(git.join(reference)).await {
        Ok(hash) => return Ok(hash.trim().to_string()),
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        Err(_) => {}
    }

    // Fall back to packed refs: "<hash> <ref>" per line
    let packed = tokio::fs::read_to_string(git.join("packed-refs")).await?;
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .find_map(|line| {
            let (hash, name) = line.split_once(' ')?;
            (name.trim() == reference).then(|| hash.to_string())
        })
        .ok_or_else(|| ControllerError::Task(format!("reference {} not found", reference)))
}
