//! The cluster zone responder and its UDP/TCP listeners.

use crate::error::DnsError;
use crate::metrics::{DnsMetrics, Outcome};
use crate::upstream::Forwarder;
use datastore::DataStore;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DNS_PORT: u16 = 53;
/// TTL of every record in the cluster zone.
pub const RECORD_TTL: u32 = 3600;
/// Label that resolves to the control-plane servers in turn.
pub const MASTER_LABEL: &str = "master";

const MAX_UDP_QUERY: usize = 4096;

/// Answers `<host>.<cluster>.` from machine records and forwards the rest.
pub struct DnsServer {
    datastore: Arc<DataStore>,
    forwarder: Arc<dyn Forwarder>,
    metrics: DnsMetrics,
    zone: String,
    round_robin: AtomicU16,
}

impl std::fmt::Debug for DnsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsServer")
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

/// Lowercased name without the root dot.
fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn reply_to(request: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_authoritative(true)
        .set_response_code(code);
    response.add_queries(request.queries().iter().cloned());
    response
}

impl DnsServer {
    pub fn new(datastore: Arc<DataStore>, forwarder: Arc<dyn Forwarder>, metrics: DnsMetrics) -> Self {
        let zone = normalize(datastore.cluster_name());
        Self {
            datastore,
            forwarder,
            metrics,
            zone,
            round_robin: AtomicU16::new(0),
        }
    }

    /// Host label of `name` when it sits directly under the cluster zone.
    fn cluster_label<'a>(&self, name: &'a str) -> Option<&'a str> {
        if name == self.zone {
            return Some("");
        }
        name.strip_suffix(self.zone.as_str())?.strip_suffix('.')
    }

    /// Next control-plane address, or loopback when none is known.
    async fn next_master(&self) -> Result<Ipv4Addr, DnsError> {
        let servers = self.datastore.server_addresses().await?;
        if servers.is_empty() {
            return Ok(Ipv4Addr::LOCALHOST);
        }
        let turn = self
            .round_robin
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % 0xFFFF))
            .unwrap_or_else(|c| c);
        Ok(servers[usize::from(turn) % servers.len()])
    }

    async fn resolve(&self, label: &str) -> Result<Option<Ipv4Addr>, DnsError> {
        if label.is_empty() {
            return Ok(None);
        }
        if label == MASTER_LABEL {
            return self.next_master().await.map(Some);
        }
        Ok(self.datastore.resolve_hostname(label).await?)
    }

    async fn answer_cluster(&self, request: &Message, label: &str) -> Message {
        let Some(query) = request.queries().first() else {
            return reply_to(request, ResponseCode::FormErr);
        };
        match self.resolve(label).await {
            Ok(Some(ip)) => {
                let mut response = reply_to(request, ResponseCode::NoError);
                if matches!(query.query_type(), RecordType::A | RecordType::ANY) {
                    debug!("Answering {} with {}", query.name(), ip);
                    response.add_answer(Record::from_rdata(query.name().clone(), RECORD_TTL, RData::A(A(ip))));
                }
                self.metrics.query(Outcome::Cluster);
                response
            }
            Ok(None) => {
                debug!("No machine named {}", query.name());
                self.metrics.query(Outcome::NxDomain);
                reply_to(request, ResponseCode::NXDomain)
            }
            Err(e) => {
                warn!("Resolving {} failed: {}", query.name(), e);
                self.metrics.query(Outcome::Failed);
                reply_to(request, ResponseCode::ServFail)
            }
        }
    }

    /// Response bytes for one query, `None` when the input is not a query
    /// worth answering.
    pub async fn handle(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let request = match Message::from_vec(raw) {
            Ok(request) => request,
            Err(e) => {
                debug!("Dropping undecodable DNS message: {}", e);
                return None;
            }
        };
        if request.message_type() != MessageType::Query {
            return None;
        }
        let Some(query) = request.queries().first() else {
            return encode(&reply_to(&request, ResponseCode::FormErr));
        };

        let name = normalize(&query.name().to_string());
        if let Some(label) = self.cluster_label(&name) {
            let label = label.to_string();
            return encode(&self.answer_cluster(&request, &label).await);
        }

        match self.forwarder.forward(raw).await {
            Ok(response) => {
                self.metrics.query(Outcome::Forwarded);
                Some(response)
            }
            Err(e) => {
                debug!("Forwarding {} failed: {}", name, e);
                self.metrics.query(Outcome::Failed);
                encode(&reply_to(&request, ResponseCode::ServFail))
            }
        }
    }

    pub async fn serve_udp(self: Arc<Self>, socket: UdpSocket) -> Result<(), DnsError> {
        info!("DNS listening on udp://{} for {}.", socket.local_addr()?, self.zone);
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; MAX_UDP_QUERY];
        loop {
            let (n, peer) = socket.recv_from(&mut buf).await?;
            let query = buf[..n].to_vec();
            let server = Arc::clone(&self);
            let socket = Arc::clone(&socket);
            // Forwarded queries may wait on the upstream deadline
            tokio::spawn(async move {
                if let Some(response) = server.handle(&query).await {
                    if let Err(e) = socket.send_to(&response, peer).await {
                        warn!("Failed to answer DNS query from {}: {}", peer, e);
                    }
                }
            });
        }
    }

    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> Result<(), DnsError> {
        info!("DNS listening on tcp://{} for {}.", listener.local_addr()?, self.zone);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.tcp_connection(stream).await {
                    debug!("DNS connection from {} closed: {}", peer, e);
                }
            });
        }
    }

    /// Length-prefixed queries until the peer hangs up.
    async fn tcp_connection(&self, mut stream: TcpStream) -> Result<(), DnsError> {
        loop {
            let length = match stream.read_u16().await {
                Ok(length) => usize::from(length),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let mut query = vec![0u8; length];
            stream.read_exact(&mut query).await?;
            let Some(response) = self.handle(&query).await else {
                continue;
            };
            let Ok(length) = u16::try_from(response.len()) else {
                warn!("Dropping oversized DNS response of {} bytes", response.len());
                continue;
            };
            stream.write_u16(length).await?;
            stream.write_all(&response).await?;
        }
    }
}

fn encode(message: &Message) -> Option<Vec<u8>> {
    match message.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Failed to encode DNS response: {}", e);
            None
        }
    }
}

/// Running UDP and TCP listeners.
#[derive(Debug)]
pub struct DnsHandle {
    pub udp: JoinHandle<Result<(), DnsError>>,
    pub tcp: JoinHandle<Result<(), DnsError>>,
}

impl DnsHandle {
    pub fn abort(&self) {
        self.udp.abort();
        self.tcp.abort();
    }
}

/// Bind UDP and TCP on `addr` and start answering.
pub async fn start(server: Arc<DnsServer>, addr: SocketAddr) -> Result<DnsHandle, DnsError> {
    let socket = UdpSocket::bind(addr).await?;
    let listener = TcpListener::bind(addr).await?;
    Ok(DnsHandle {
        udp: tokio::spawn(Arc::clone(&server).serve_udp(socket)),
        tcp: tokio::spawn(server.serve_tcp(listener)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use datastore::{DataStoreConfig, MacAddr};
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::Name;
    use kv_client::MemoryStore;
    use prometheus::Registry;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingForwarder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, DnsError> {
            self.seen.lock().unwrap().push(query.to_vec());
            Ok(b"upstream".to_vec())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ds: Arc<DataStore>,
        forwarder: Arc<RecordingForwarder>,
        server: DnsServer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ds = Arc::new(DataStore::new(
            Arc::new(MemoryStore::new()),
            DataStoreConfig {
                cluster_name: "c".to_string(),
                workspace: dir.path().to_path_buf(),
                lease_start: Ipv4Addr::new(10, 0, 0, 1),
                lease_range: 100,
            },
        ));
        let forwarder = Arc::new(RecordingForwarder::default());
        let server = DnsServer::new(
            Arc::clone(&ds),
            forwarder.clone(),
            DnsMetrics::new(&Registry::new()).unwrap(),
        );
        Fixture {
            _dir: dir,
            ds,
            forwarder,
            server,
        }
    }

    fn query(name: &str, kind: RecordType) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(0x4242)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), kind));
        message.to_vec().unwrap()
    }

    /// The address of the single A answer, which ends the message.
    fn answer_ip(response: &[u8]) -> Ipv4Addr {
        let message = Message::from_vec(response).unwrap();
        assert_eq!(message.answers().len(), 1);
        assert_eq!(message.answers()[0].ttl(), RECORD_TTL);
        let n = response.len();
        Ipv4Addr::new(response[n - 4], response[n - 3], response[n - 2], response[n - 1])
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x52, 0x54, 0, 0, 0, last])
    }

    #[tokio::test]
    async fn test_master_round_robin() {
        let fx = fixture();
        fx.ds.register_server(&mac(1), Ipv4Addr::new(10, 0, 0, 10)).await.unwrap();
        fx.ds.register_server(&mac(2), Ipv4Addr::new(10, 0, 0, 11)).await.unwrap();
        fx.ds
            .record_assignment(&mac(3), Ipv4Addr::new(10, 0, 0, 12), datastore::MachineType::Normal)
            .await
            .unwrap();

        let mut answers = Vec::new();
        for _ in 0..3 {
            let response = fx.server.handle(&query("master.c.", RecordType::A)).await.unwrap();
            answers.push(answer_ip(&response));
        }
        assert_eq!(
            answers,
            vec![
                Ipv4Addr::new(10, 0, 0, 10),
                Ipv4Addr::new(10, 0, 0, 11),
                Ipv4Addr::new(10, 0, 0, 10)
            ]
        );
    }

    #[tokio::test]
    async fn test_master_without_servers_is_loopback() {
        let fx = fixture();
        let response = fx.server.handle(&query("MASTER.c.", RecordType::A)).await.unwrap();
        assert_eq!(answer_ip(&response), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn test_hostname_lookup() {
        let fx = fixture();
        fx.ds
            .record_assignment(&mac(3), Ipv4Addr::new(10, 0, 0, 12), datastore::MachineType::Normal)
            .await
            .unwrap();
        fx.ds
            .record_assignment(&mac(4), Ipv4Addr::new(10, 0, 0, 13), datastore::MachineType::Normal)
            .await
            .unwrap();
        fx.ds.set_machine_variable(&mac(4), "hostname", "worker1").await.unwrap();

        let response = fx.server.handle(&query("node525400000003.c.", RecordType::A)).await.unwrap();
        assert_eq!(answer_ip(&response), Ipv4Addr::new(10, 0, 0, 12));

        let response = fx.server.handle(&query("worker1.c.", RecordType::A)).await.unwrap();
        assert_eq!(answer_ip(&response), Ipv4Addr::new(10, 0, 0, 13));
    }

    #[tokio::test]
    async fn test_unknown_cluster_name_is_nxdomain() {
        let fx = fixture();
        let response = fx.server.handle(&query("ghost.c.", RecordType::A)).await.unwrap();
        let message = Message::from_vec(&response).unwrap();
        assert_eq!(message.response_code(), ResponseCode::NXDomain);
        assert!(message.answers().is_empty());
        assert_eq!(message.id(), 0x4242);
        assert!(fx.forwarder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_names_are_forwarded() {
        let fx = fixture();
        let raw = query("example.com.", RecordType::A);
        assert_eq!(fx.server.handle(&raw).await.unwrap(), b"upstream".to_vec());
        // A zone that merely ends with the cluster name is not the cluster
        let raw2 = query("abc.", RecordType::A);
        assert_eq!(fx.server.handle(&raw2).await.unwrap(), b"upstream".to_vec());
        assert_eq!(*fx.forwarder.seen.lock().unwrap(), vec![raw, raw2]);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let fx = fixture();
        assert!(fx.server.handle(b"\x01").await.is_none());
    }

    #[tokio::test]
    async fn test_start_binds_both_transports() {
        let fx = fixture();
        let handle = start(Arc::new(fx.server), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(!handle.udp.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_tcp_listener() {
        let fx = fixture();
        fx.ds.register_server(&mac(1), Ipv4Addr::new(10, 0, 0, 10)).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(Arc::new(fx.server).serve_tcp(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let raw = query("master.c.", RecordType::A);
        stream.write_u16(u16::try_from(raw.len()).unwrap()).await.unwrap();
        stream.write_all(&raw).await.unwrap();
        let length = stream.read_u16().await.unwrap();
        let mut response = vec![0u8; usize::from(length)];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(answer_ip(&response), Ipv4Addr::new(10, 0, 0, 10));
        task.abort();
    }
}
