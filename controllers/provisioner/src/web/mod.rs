//! Management HTTP: rendered templates, variable CRUD, machine records, the
//! agent endpoints and metrics. Served by every replica.

pub mod error;
pub mod machines;
pub mod system;
pub mod templates;
pub mod variables;

use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use axum::Router;
use axum::routing::{get, post};
use datastore::{DataStore, InstanceInfo};
use std::sync::Arc;
use templating::{ServerAddrs, TemplateRepo};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the management handlers.
#[derive(Clone)]
pub struct AppState {
    pub datastore: Arc<DataStore>,
    pub templates: Arc<TemplateRepo>,
    pub addrs: ServerAddrs,
    pub metrics: ControllerMetrics,
    pub instance: InstanceInfo,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("instance", &self.instance.ip)
            .finish_non_exhaustive()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/t/{kind}/{mac}", get(templates::render))
        .route("/heartbeat/{mac}", post(machines::post_heartbeat))
        .route("/api/machines", get(machines::list))
        .route("/api/machines/{mac}", get(machines::get).delete(machines::delete))
        .route(
            "/api/machines/{mac}/variables",
            get(variables::list_machine)
                .put(variables::put_machine_many)
                .delete(variables::delete_machine_all),
        )
        .route(
            "/api/machines/{mac}/variables/{name}",
            get(variables::get_machine)
                .put(variables::put_machine)
                .delete(variables::delete_machine),
        )
        .route(
            "/api/machines/{mac}/command",
            get(machines::get_command).post(machines::post_command),
        )
        .route("/api/machines/{mac}/heartbeat", get(machines::get_heartbeat))
        .route(
            "/api/variables",
            get(variables::list_cluster)
                .put(variables::put_cluster_many)
                .delete(variables::delete_cluster_all),
        )
        .route(
            "/api/variables/{name}",
            get(variables::get_cluster)
                .put(variables::put_cluster)
                .delete(variables::delete_cluster),
        )
        .route("/api/update", get(system::get_update).post(system::post_update))
        .route("/api/version", get(system::version))
        .route("/api/instances", get(system::instances))
        .route("/metrics", get(system::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` fires, then let in-flight requests finish.
pub async fn serve(listener: TcpListener, app: Router, shutdown: oneshot::Receiver<()>) -> Result<(), ControllerError> {
    info!("Management HTTP listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await?;
    Ok(())
}
