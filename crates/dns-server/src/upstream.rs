//! Passthrough for names outside the cluster zone.

use crate::error::DnsError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Public resolvers asked for everything outside the cluster.
pub const DEFAULT_UPSTREAMS: [&str; 2] = ["8.8.4.4:53", "8.8.8.8:53"];
/// Deadline for one forwarded query across all upstreams.
pub const UPSTREAM_DEADLINE: Duration = Duration::from_secs(30);

const MAX_RESPONSE: usize = 4096;

/// Sends a raw query elsewhere and returns the raw response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, DnsError>;
}

/// Tries each upstream over UDP in order.
#[derive(Debug, Clone)]
pub struct UdpForwarder {
    upstreams: Vec<SocketAddr>,
    deadline: Duration,
}

impl UdpForwarder {
    pub fn new(upstreams: Vec<SocketAddr>, deadline: Duration) -> Self {
        Self { upstreams, deadline }
    }

    /// Google's resolvers with the standard deadline.
    pub fn public() -> Self {
        let upstreams = DEFAULT_UPSTREAMS
            .iter()
            .filter_map(|addr| addr.parse().ok())
            .collect();
        Self::new(upstreams, UPSTREAM_DEADLINE)
    }

    pub fn upstreams(&self) -> &[SocketAddr] {
        &self.upstreams
    }
}

async fn exchange(upstream: SocketAddr, query: &[u8]) -> Result<Vec<u8>, DnsError> {
    let local: SocketAddr = if upstream.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(upstream).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; MAX_RESPONSE];
    loop {
        let n = socket.recv(&mut buf).await?;
        // Stray datagrams with another transaction id are skipped
        if n >= 2 && query.len() >= 2 && buf[..2] == query[..2] {
            buf.truncate(n);
            return Ok(buf);
        }
    }
}

#[async_trait]
impl Forwarder for UdpForwarder {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, DnsError> {
        if self.upstreams.is_empty() {
            return Err(DnsError::Upstream("no upstream resolvers configured".to_string()));
        }
        let attempts = u32::try_from(self.upstreams.len()).unwrap_or(u32::MAX);
        let per_attempt = self.deadline / attempts;

        let mut last_error = None;
        for upstream in &self.upstreams {
            match tokio::time::timeout(per_attempt, exchange(*upstream, query)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    debug!("Upstream {} failed: {}", upstream, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!("Upstream {} timed out", upstream);
                    last_error = Some(DnsError::Timeout(self.deadline));
                }
            }
        }
        Err(last_error.unwrap_or(DnsError::Timeout(self.deadline)))
    }
}
