//! Boot HTTP: the pxelinux core module, per-machine pxelinux configs and the
//! kernel/initrd images.

use crate::assets::BootAssets;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use datastore::{DataStore, MacAddr};
use std::sync::Arc;
use templating::{Artifact, ServerAddrs, TemplateRepo};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const HTTP_PORT: u16 = 70;

/// pxelinux config that falls through to the local disk.
pub const BOOT_FROM_DISK: &str = "\nDEFAULT local\nLABEL local\nLOCALBOOT 0\n";

const KERNEL_FILE: &str = "coreos_production_pxe.vmlinuz";
const INITRD_FILE: &str = "coreos_production_pxe_image.cpio.gz";

/// Shared state of the boot HTTP handlers.
#[derive(Clone)]
pub struct BootHttpState {
    pub datastore: Arc<DataStore>,
    pub templates: Arc<TemplateRepo>,
    pub assets: BootAssets,
    pub addrs: ServerAddrs,
}

impl std::fmt::Debug for BootHttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootHttpState")
            .field("addrs", &self.addrs)
            .finish_non_exhaustive()
    }
}

pub fn router(state: BootHttpState) -> Router {
    Router::new()
        .route("/ldlinux.c32", get(ldlinux))
        .route("/pxelinux.cfg/{name}", get(pxelinux_config))
        .route("/f/{version}/{file}", get(image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ldlinux(State(state): State<BootHttpState>) -> Response {
    debug!("Sending ldlinux.c32 ({} bytes)", state.assets.ldlinux.len());
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Bytes::copy_from_slice(&state.assets.ldlinux),
    )
        .into_response()
}

/// The two-line banner shown while pxelinux loads.
fn boot_message(mac: &MacAddr) -> [String; 2] {
    [
        format!("There once was a node {}", mac),
        "that asked the network where to begin".to_string(),
    ]
}

/// A pxelinux config booting `version` with `cmdline`.
#[must_use]
pub fn pxelinux_config_text(mac: &MacAddr, base: &str, version: &str, cmdline: &str) -> String {
    let [first, second] = boot_message(mac);
    format!(
        "\nSAY {first}\nSAY {second}\nDEFAULT linux\nLABEL linux\nLINUX {base}/f/{version}/kernel\nAPPEND initrd={base}/f/{version}/initrd {cmdline}\n"
    )
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

async fn pxelinux_config(State(state): State<BootHttpState>, Path(name): Path<String>) -> Response {
    let Some(mac_text) = name.strip_prefix("01-") else {
        debug!("pxelinux config request without a MAC address: {}", name);
        return text(StatusCode::BAD_REQUEST, "Missing MAC address in request".to_string());
    };
    let Ok(mac) = mac_text.parse::<MacAddr>() else {
        debug!("pxelinux config request with a malformed MAC address: {}", name);
        return text(StatusCode::BAD_REQUEST, "Malformed MAC address in request".to_string());
    };

    let version = match state.datastore.coreos_version().await {
        Ok(version) => version,
        Err(e) => {
            warn!("No release to boot for {} ({}), booting from disk", mac, e);
            return text(StatusCode::OK, BOOT_FROM_DISK.to_string());
        }
    };
    let cmdline = match state
        .templates
        .render_machine(Artifact::BootParams, &state.datastore, &mac, &state.addrs)
        .await
    {
        Ok(cmdline) => cmdline.replace('\n', " "),
        Err(e) => {
            warn!("Rendering boot parameters for {} failed: {}", mac, e);
            return text(StatusCode::INTERNAL_SERVER_ERROR, format!("boot parameters: {}", e));
        }
    };

    let base = format!("http://{}", state.addrs.file_server_addr);
    info!("Sent pxelinux config to {} (release {})", mac, version);
    text(StatusCode::OK, pxelinux_config_text(&mac, &base, &version, cmdline.trim()))
}

async fn image(State(state): State<BootHttpState>, Path((version, file)): Path<(String, String)>) -> Response {
    let name = match file.as_str() {
        "kernel" => KERNEL_FILE,
        "initrd" => INITRD_FILE,
        _ => return text(StatusCode::NOT_FOUND, format!("unknown file {}", file)),
    };
    if version.is_empty() || version.starts_with('.') || version.contains(['/', '\\']) {
        return text(StatusCode::BAD_REQUEST, format!("invalid release {}", version));
    }

    let path = state.datastore.images_dir(&version).join(name);
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            return text(StatusCode::NOT_FOUND, "Couldn't get byte stream".to_string());
        }
    };
    let length = handle.metadata().await.ok().map(|m| m.len());
    debug!("Streaming {} for release {}", file, version);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(handle)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/octet-stream"));
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
    }
    response
}
