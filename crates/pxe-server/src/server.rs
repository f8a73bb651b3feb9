//! Lifecycle of the boot-time servers, which run only on the master.

use crate::assets::BootAssets;
use crate::dhcp::{self, DhcpServer};
use crate::error::PxeError;
use crate::http::{self, BootHttpState};
use crate::metrics::BootMetrics;
use crate::pxe::{self, PxeServer};
use crate::tftp;
use datastore::DataStore;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use templating::{ServerAddrs, TemplateRepo};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::info;

/// Where the boot servers listen.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub server_ip: Ipv4Addr,
    pub dhcp_port: u16,
    pub tftp_port: u16,
    pub pxe_port: u16,
    pub http_port: u16,
    pub addrs: ServerAddrs,
}

impl BootConfig {
    /// Standard ports on `server_ip`.
    pub fn new(server_ip: Ipv4Addr, addrs: ServerAddrs) -> Self {
        Self {
            server_ip,
            dhcp_port: dhcp::SERVER_PORT,
            tftp_port: tftp::TFTP_PORT,
            pxe_port: pxe::PXE_PORT,
            http_port: http::HTTP_PORT,
            addrs,
        }
    }
}

type Task = (&'static str, JoinHandle<Result<(), PxeError>>);

/// DHCP, proxy-DHCP, TFTP and boot HTTP, started together.
#[derive(Debug)]
pub struct BootServers {
    tasks: Vec<Task>,
}

impl BootServers {
    /// Bind every port, then spawn the servers. A bind failure leaves
    /// nothing running.
    pub async fn start(
        config: BootConfig,
        datastore: Arc<DataStore>,
        templates: Arc<TemplateRepo>,
        assets: BootAssets,
        metrics: BootMetrics,
    ) -> Result<Self, PxeError> {
        // Broadcast traffic only reaches sockets bound to the wildcard address
        let dhcp_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.dhcp_port));
        let pxe_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.pxe_port));
        let tftp_addr = SocketAddr::from((config.server_ip, config.tftp_port));
        let http_addr = SocketAddr::from((config.server_ip, config.http_port));

        let dhcp_socket = DhcpServer::bind(dhcp_addr).await?;
        let pxe_socket = UdpSocket::bind(pxe_addr).await?;
        let tftp_server = tftp::bind(tftp_addr, Arc::clone(&assets.lpxelinux)).await?;
        let http_listener = TcpListener::bind(http_addr).await?;

        let dhcp = Arc::new(DhcpServer::new(Arc::clone(&datastore), config.server_ip, metrics.clone()));
        let pxe = Arc::new(PxeServer::new(config.server_ip, config.http_port, metrics));
        let router = http::router(BootHttpState {
            datastore,
            templates,
            assets,
            addrs: config.addrs,
        });

        let tasks: Vec<Task> = vec![
            ("dhcp", tokio::spawn(dhcp.serve(dhcp_socket))),
            ("pxe", tokio::spawn(pxe.serve(pxe_socket))),
            ("tftp", tokio::spawn(tftp::serve(tftp_server))),
            (
                "http",
                tokio::spawn(async move {
                    info!("Boot HTTP listening on {}", http_addr);
                    axum::serve(http_listener, router)
                        .await
                        .map_err(|e| PxeError::Http(e.to_string()))
                }),
            ),
        ];
        info!("Boot servers started on {}", config.server_ip);
        Ok(Self { tasks })
    }

    /// Wait for the first server to stop, which only happens on failure.
    pub async fn wait(&mut self) -> (&'static str, Result<(), PxeError>) {
        if self.tasks.is_empty() {
            return futures::future::pending().await;
        }
        let (result, index, _) = futures::future::select_all(self.tasks.iter_mut().map(|(_, handle)| handle)).await;
        let name = self.tasks[index].0;
        let result = match result {
            Ok(result) => result,
            Err(e) => Err(PxeError::Configuration(format!("{} task failed: {}", name, e))),
        };
        (name, result)
    }

    /// Stop every server.
    pub fn abort(mut self) {
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            info!("Stopped {} server", name);
        }
    }
}

impl Drop for BootServers {
    fn drop(&mut self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}
