//! Read-only TFTP serving the pxelinux chainloader under any name.

use crate::error::PxeError;
use async_tftp::packet;
use async_tftp::server::{Handler, TftpServer, TftpServerBuilder};
use futures::io::{Cursor, Sink};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const TFTP_PORT: u16 = 69;

/// Hands out one blob for every read request.
#[derive(Debug, Clone)]
pub struct Chainloader {
    blob: Arc<[u8]>,
}

impl Chainloader {
    pub fn new(blob: Arc<[u8]>) -> Self {
        Self { blob }
    }
}

#[async_tftp::async_trait]
impl Handler for Chainloader {
    type Reader = Cursor<Arc<[u8]>>;
    type Writer = Sink;

    async fn read_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
    ) -> Result<(Self::Reader, Option<u64>), packet::Error> {
        info!("TFTP: sending pxelinux to {} (asked for {})", client, path.display());
        let size = u64::try_from(self.blob.len()).ok();
        Ok((Cursor::new(Arc::clone(&self.blob)), size))
    }

    async fn write_req_open(
        &mut self,
        client: &SocketAddr,
        path: &Path,
        _size: Option<u64>,
    ) -> Result<Self::Writer, packet::Error> {
        info!("TFTP: refusing write of {} from {}", path.display(), client);
        Err(packet::Error::IllegalOperation)
    }
}

/// Bind the TFTP port.
pub async fn bind(addr: SocketAddr, blob: Arc<[u8]>) -> Result<TftpServer<Chainloader>, PxeError> {
    TftpServerBuilder::with_handler(Chainloader::new(blob))
        .bind(addr)
        .build()
        .await
        .map_err(|e| PxeError::Tftp(format!("cannot bind {}: {}", addr, e)))
}

/// Serve until the socket fails.
pub async fn serve(server: TftpServer<Chainloader>) -> Result<(), PxeError> {
    server.serve().await.map_err(|e| PxeError::Tftp(e.to_string()))
}
