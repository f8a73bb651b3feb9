//! Main controller implementation.
//!
//! Startup checks the store and the workspace, records this instance as a
//! server machine and binds the listeners every replica runs (management
//! HTTP and DNS). The election loop then starts the boot servers when this
//! instance becomes master. Losing mastership or receiving SIGINT/SIGTERM
//! ends the process cleanly.

use crate::config::{BUILD_TIME, COMMIT, Config, VERSION};
use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use crate::web::{self, AppState};
use crate::workspace::{self, UPDATE_POLL};
use datastore::{DataStore, DataStoreConfig, Election, InstanceInfo, TTL_ACTIVE, TTL_STANDBY};
use dns_server::{DNS_PORT, DnsHandle, DnsServer, UdpForwarder};
use kv_client::EtcdClient;
use pxe_server::{BootAssets, BootConfig, BootServers, PxeError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use templating::TemplateRepo;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// How long in-flight management requests get after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why the election loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Signal,
    LostMastership,
}

pub struct Controller {
    config: Config,
    datastore: Arc<DataStore>,
    templates: Arc<TemplateRepo>,
    assets: BootAssets,
    metrics: ControllerMetrics,
    election: Election,
    instance: InstanceInfo,
    listener: TcpListener,
    dns: Option<DnsHandle>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn boot_failure(boot: &mut Option<BootServers>) -> (&'static str, Result<(), PxeError>) {
    match boot {
        Some(servers) => servers.wait().await,
        None => std::future::pending().await,
    }
}

impl Controller {
    /// Connect to the coordination store and prepare every replica-wide service.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let client = EtcdClient::new(config.etcd_endpoints.clone())?;
        info!("Validating coordination store connectivity...");
        client.validate_connection().await.map_err(|e| {
            error!("Cannot reach the coordination store at {}: {}", config.etcd_endpoints.join(","), e);
            e
        })?;

        let datastore = Arc::new(DataStore::new(
            Arc::new(client),
            DataStoreConfig {
                cluster_name: config.cluster_name.clone(),
                workspace: config.workspace.clone(),
                lease_start: config.lease_start,
                lease_range: config.lease_range,
            },
        ));
        Self::with_datastore(config, datastore).await
    }

    pub async fn with_datastore(config: Config, datastore: Arc<DataStore>) -> Result<Self, ControllerError> {
        datastore.seed_from_workspace().await?;
        let version = datastore.coreos_version().await?;
        info!("Serving release {}", version);

        datastore.register_server(&config.server_mac, config.server_ip).await?;
        let templates = Arc::new(TemplateRepo::new(&config.workspace)?);
        let assets = BootAssets::load(&config.boot_assets).await?;
        let metrics = ControllerMetrics::new()?;

        let listener = TcpListener::bind(config.http_listen).await?;
        let dns = if config.dns {
            let server = DnsServer::new(
                Arc::clone(&datastore),
                Arc::new(UdpForwarder::public()),
                metrics.dns.clone(),
            );
            let addr = SocketAddr::from((config.server_ip, DNS_PORT));
            Some(dns_server::start(Arc::new(server), addr).await?)
        } else {
            info!("Cluster DNS disabled");
            None
        };

        let instance = InstanceInfo {
            ip: config.server_ip,
            nic: config.server_mac.to_string(),
            web_port: config.http_listen.port(),
            version: VERSION.to_string(),
            commit: COMMIT.to_string(),
            build_time: BUILD_TIME.to_string(),
            debug_mode: config.debug,
            service_start_time: chrono::Utc::now().timestamp(),
        };
        let election = datastore.election(instance.clone());

        Ok(Self {
            config,
            datastore,
            templates,
            assets,
            metrics,
            election,
            instance,
            listener,
            dns,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Controller {
            config,
            datastore,
            templates,
            assets,
            metrics,
            election,
            instance,
            listener,
            dns,
        } = self;

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let app = web::router(AppState {
            datastore: Arc::clone(&datastore),
            templates: Arc::clone(&templates),
            addrs: config.server_addrs(),
            metrics: metrics.clone(),
            instance,
        });
        let (stop_web, web_shutdown) = oneshot::channel();
        let mut web_task = tokio::spawn(web::serve(listener, app, web_shutdown));
        let watcher = tokio::spawn(workspace::watch(
            Arc::clone(&datastore),
            Arc::clone(&templates),
            UPDATE_POLL,
        ));

        let boot_config = BootConfig::new(config.server_ip, config.server_addrs());
        let mut boot: Option<BootServers> = None;
        info!("Provisioner running");

        let outcome: Result<Stop, ControllerError> = loop {
            let master = election.while_master().await;
            metrics.set_master(master);
            if master && boot.is_none() {
                info!("This instance is master, starting boot servers");
                match BootServers::start(
                    boot_config.clone(),
                    Arc::clone(&datastore),
                    Arc::clone(&templates),
                    assets.clone(),
                    metrics.boot.clone(),
                )
                .await
                {
                    Ok(servers) => boot = Some(servers),
                    Err(e) => break Err(e.into()),
                }
            } else if !master && boot.is_some() {
                warn!("Lost mastership");
                break Ok(Stop::LostMastership);
            }

            let pause = if master { TTL_ACTIVE } else { TTL_STANDBY };
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break Ok(Stop::Signal);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break Ok(Stop::Signal);
                }
                (name, result) = boot_failure(&mut boot) => {
                    let reason = result.err().map_or_else(|| "exited".to_string(), |e| e.to_string());
                    break Err(ControllerError::Task(format!("{} server stopped: {}", name, reason)));
                }
                result = &mut web_task => {
                    let reason = match result {
                        Ok(Ok(())) => "exited".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => e.to_string(),
                    };
                    break Err(ControllerError::Task(format!("management HTTP stopped: {}", reason)));
                }
            }
        };

        // Shutdown: boot servers first, then the election key, then in-flight requests
        metrics.set_master(false);
        if let Some(servers) = boot.take() {
            servers.abort();
        }
        if let Err(e) = election.shutdown().await {
            warn!("Failed to remove the instance key: {}", e);
        }
        let _ = stop_web.send(());
        if !web_task.is_finished() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut web_task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Management HTTP failed during shutdown: {}", e),
                Ok(Err(e)) => warn!("Management HTTP task failed: {}", e),
                Err(_) => {
                    warn!("In-flight requests did not finish within {:?}", SHUTDOWN_GRACE);
                    web_task.abort();
                }
            }
        }
        watcher.abort();
        if let Some(dns) = dns {
            dns.abort();
        }

        match outcome? {
            Stop::Signal => info!("Shut down on signal"),
            Stop::LostMastership => info!("Shut down after losing mastership"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_client::MemoryStore;
    use std::fs;
    use std::net::Ipv4Addr;
    use std::path::Path;

    fn config(workspace: &Path) -> Config {
        Config {
            server_ip: Ipv4Addr::LOCALHOST,
            server_mac: "52:54:00:00:00:fe".parse().unwrap(),
            http_listen: "127.0.0.1:0".parse().unwrap(),
            workspace: workspace.to_path_buf(),
            cluster_name: "c".to_string(),
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            lease_start: Ipv4Addr::new(10, 0, 0, 1),
            lease_range: 10,
            dns: false,
            boot_assets: workspace.join("boot"),
            debug: false,
        }
    }

    fn datastore(config: &Config) -> Arc<DataStore> {
        Arc::new(DataStore::new(
            Arc::new(MemoryStore::new()),
            DataStoreConfig {
                cluster_name: config.cluster_name.clone(),
                workspace: config.workspace.clone(),
                lease_start: config.lease_start,
                lease_range: config.lease_range,
            },
        ))
    }

    #[tokio::test]
    async fn test_startup_requires_initial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let result = Controller::with_datastore(config.clone(), datastore(&config)).await;
        assert!(matches!(result, Err(ControllerError::DataStore(_))));
    }

    #[tokio::test]
    async fn test_startup_requires_release_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("initial.yaml"), "coreos-version: \"1632.3.0\"\n").unwrap();
        let config = config(dir.path());
        let result = Controller::with_datastore(config.clone(), datastore(&config)).await;
        assert!(matches!(result, Err(ControllerError::DataStore(_))));
    }

    #[tokio::test]
    async fn test_startup_registers_this_server() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("initial.yaml"), "coreos-version: \"1632.3.0\"\n").unwrap();
        fs::create_dir_all(dir.path().join("images/1632.3.0")).unwrap();
        fs::create_dir_all(dir.path().join("boot")).unwrap();
        fs::write(dir.path().join("boot/lpxelinux.0"), b"chain").unwrap();
        fs::write(dir.path().join("boot/ldlinux.c32"), b"core").unwrap();

        let config = config(dir.path());
        let ds = datastore(&config);
        let controller = Controller::with_datastore(config.clone(), Arc::clone(&ds)).await.unwrap();
        assert_eq!(controller.instance.ip, Ipv4Addr::LOCALHOST);
        assert_eq!(ds.server_addresses().await.unwrap(), vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(
            ds.get_cluster_variable("coreos-version").await.unwrap().as_deref(),
            Some("1632.3.0")
        );
    }

    #[tokio::test]
    async fn test_startup_requires_boot_assets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("initial.yaml"), "coreos-version: \"1632.3.0\"\n").unwrap();
        fs::create_dir_all(dir.path().join("images/1632.3.0")).unwrap();
        let config = config(dir.path());
        let result = Controller::with_datastore(config.clone(), datastore(&config)).await;
        assert!(matches!(result, Err(ControllerError::Boot(_))));
    }
}
