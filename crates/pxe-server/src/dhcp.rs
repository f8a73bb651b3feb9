//! DHCP server backed by the cluster lease pool.
//!
//! Answers DISCOVER with OFFER and REQUEST with ACK or NAK, records RELEASE
//! and DECLINE, and ignores everything else. PXE clients additionally get the
//! vendor options that point their boot ROM at the proxy-DHCP service.

use crate::error::PxeError;
use crate::metrics::BootMetrics;
use crate::options;
use datastore::{DataStore, LeaseError, MacAddr, MachineType, random_lease_duration};
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Decoder, Encodable};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Used when `net-conf` does not say otherwise.
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

const OPT_VENDOR_SPECIFIC: u8 = 43;
const OPT_CLIENT_GUID: u8 = 97;
const OPT_CLASSLESS_ROUTES: u8 = 121;
const OPT_MS_CLASSLESS_ROUTES: u8 = 249;

pub const PXE_CLIENT: &[u8] = b"PXEClient";
const MENU_LABEL: &[u8] = b"aghjo-0.1";

/// PXE vendor options: discovery control, one boot server, a one-entry menu
/// and its prompt.
#[must_use]
pub fn pxe_vendor_options(server_ip: Ipv4Addr) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    // Discovery control: no broadcast or multicast discovery
    out.extend_from_slice(&[6, 1, 3]);
    out.extend_from_slice(&[8, 7, 0x80, 0x00, 1]);
    out.extend_from_slice(&server_ip.octets());
    out.extend_from_slice(&[9, 12, 0x80, 0x00, 9]);
    out.extend_from_slice(MENU_LABEL);
    out.extend_from_slice(&[10, 10, 0x02]);
    out.extend_from_slice(MENU_LABEL);
    out.push(options::END);
    out
}

/// An encoded reply and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub packet: Vec<u8>,
    pub destination: SocketAddrV4,
}

/// The DHCP responder.
pub struct DhcpServer {
    datastore: Arc<DataStore>,
    server_ip: Ipv4Addr,
    metrics: BootMetrics,
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("server_ip", &self.server_ip)
            .finish_non_exhaustive()
    }
}

impl DhcpServer {
    pub fn new(datastore: Arc<DataStore>, server_ip: Ipv4Addr, metrics: BootMetrics) -> Self {
        Self {
            datastore,
            server_ip,
            metrics,
        }
    }

    /// Bind the DHCP port with broadcast enabled.
    pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, PxeError> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(socket)
    }

    /// Answer requests until the socket fails.
    pub async fn serve(self: Arc<Self>, socket: UdpSocket) -> Result<(), PxeError> {
        info!("DHCP listening on {} with server IP {}", socket.local_addr()?, self.server_ip);
        let mut buf = vec![0u8; 1500];
        loop {
            let Some((n, peer)) = datagram(socket.recv_from(&mut buf).await, "DHCP") else {
                continue;
            };
            match self.handle(&buf[..n]).await {
                Ok(Some(reply)) => {
                    if let Err(e) = socket.send_to(&reply.packet, reply.destination).await {
                        warn!("Failed to send DHCP reply to {}: {}", reply.destination, e);
                    }
                }
                Ok(None) => {}
                Err(e @ PxeError::Dhcp(_)) => debug!("Dropping DHCP packet from {}: {}", peer, e),
                Err(e) => warn!("DHCP request from {} failed: {}", peer, e),
            }
        }
    }

    /// Process one datagram. `None` means no reply is due.
    pub async fn handle(&self, raw: &[u8]) -> Result<Option<Reply>, PxeError> {
        let request = Message::decode(&mut Decoder::new(raw))?;
        if request.opcode() != Opcode::BootRequest {
            return Ok(None);
        }
        let Some(mac) = MacAddr::from_slice(request.chaddr()) else {
            return Err(PxeError::Dhcp("short hardware address".to_string()));
        };
        // BOOTP-only clients carry no message type
        let Some(kind) = request.opts().msg_type() else {
            return Ok(None);
        };
        self.metrics.dhcp_message(&format!("{:?}", kind).to_lowercase());

        match kind {
            MessageType::Discover => self.discover(&request, &mac).await,
            MessageType::Request => self.request(&request, &mac).await,
            MessageType::Release => {
                self.datastore
                    .lease_pool()
                    .release(&mac.to_string(), request.ciaddr())
                    .await?;
                Ok(None)
            }
            MessageType::Decline => {
                if let Some(ip) = requested_ip(&request) {
                    self.datastore.lease_pool().decline(&mac.to_string(), ip).await?;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn discover(&self, request: &Message, mac: &MacAddr) -> Result<Option<Reply>, PxeError> {
        let duration = random_lease_duration();
        let lease = match self.datastore.lease_pool().assign(&mac.to_string(), duration).await {
            Ok(lease) => lease,
            Err(LeaseError::PoolExhausted) => {
                warn!("No address left for {}", mac);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.datastore
            .record_assignment(mac, lease.ip, MachineType::Normal)
            .await?;
        self.metrics.lease_assigned();

        let pxe = pxe_request(request);
        info!(
            "DHCP discover from {}{}, offering {}",
            mac,
            if pxe.is_some() { " (PXE)" } else { "" },
            lease.ip
        );
        let mut reply = self.reply(request, MessageType::Offer, Ipv4Addr::UNSPECIFIED, lease.ip);
        self.add_network_options(&mut reply, mac, duration).await?;
        if let Some(guid) = pxe {
            self.add_pxe_options(&mut reply, guid);
        }
        self.encode(request, reply)
    }

    async fn request(&self, request: &Message, mac: &MacAddr) -> Result<Option<Reply>, PxeError> {
        if let Some(DhcpOption::ServerIdentifier(server)) = request.opts().get(OptionCode::ServerIdentifier) {
            if *server != self.server_ip {
                debug!("DHCP request from {} is for server {}", mac, server);
                return Ok(None);
            }
        }
        let requested = requested_ip(request).unwrap_or_else(|| request.ciaddr());
        if requested.is_unspecified() {
            return self.nak(request, mac, requested);
        }

        let duration = random_lease_duration();
        let lease = match self
            .datastore
            .lease_pool()
            .request(&mac.to_string(), requested, duration)
            .await
        {
            Ok(lease) => lease,
            Err(LeaseError::NoMatch { .. } | LeaseError::PoolExhausted) => return self.nak(request, mac, requested),
            Err(e) => return Err(e.into()),
        };
        self.datastore
            .record_assignment(mac, lease.ip, MachineType::Normal)
            .await?;
        self.metrics.lease_assigned();
        debug!("DHCP request from {} for {} accepted", mac, requested);

        let mut reply = self.reply(request, MessageType::Ack, request.ciaddr(), lease.ip);
        self.add_network_options(&mut reply, mac, duration).await?;
        if let Some(guid) = pxe_request(request) {
            self.add_pxe_options(&mut reply, guid);
        }
        self.encode(request, reply)
    }

    fn nak(&self, request: &Message, mac: &MacAddr, requested: Ipv4Addr) -> Result<Option<Reply>, PxeError> {
        debug!("DHCP request from {} for {} has no match", mac, requested);
        let reply = self.reply(request, MessageType::Nak, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
        self.encode(request, reply)
    }

    fn reply(&self, request: &Message, kind: MessageType, ciaddr: Ipv4Addr, yiaddr: Ipv4Addr) -> Message {
        let siaddr = if kind == MessageType::Nak { Ipv4Addr::UNSPECIFIED } else { self.server_ip };
        let mut reply = Message::new(ciaddr, yiaddr, siaddr, request.giaddr(), request.chaddr());
        reply
            .set_opcode(Opcode::BootReply)
            .set_xid(request.xid())
            .set_flags(request.flags());
        reply.opts_mut().insert(DhcpOption::MessageType(kind));
        reply.opts_mut().insert(DhcpOption::ServerIdentifier(self.server_ip));
        reply
    }

    async fn add_network_options(&self, reply: &mut Message, mac: &MacAddr, duration: Duration) -> Result<(), PxeError> {
        let network = match self.datastore.network_configuration().await {
            Ok(network) => network,
            Err(e) => {
                warn!("Ignoring network configuration: {}", e);
                None
            }
        };
        let netmask = network.as_ref().map_or(DEFAULT_NETMASK, |n| n.netmask);
        let router = network.as_ref().map_or(self.server_ip, |n| n.router);

        let mut dns: Vec<Ipv4Addr> = self.datastore.instances().await?.iter().map(|i| i.ip).collect();
        if dns.is_empty() {
            dns.push(self.server_ip);
        }
        let hostname = self.datastore.hostname(mac).await?;
        let seconds = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);

        let opts = reply.opts_mut();
        opts.insert(DhcpOption::SubnetMask(netmask));
        opts.insert(DhcpOption::Router(vec![router]));
        opts.insert(DhcpOption::DomainNameServer(dns));
        opts.insert(DhcpOption::Hostname(hostname));
        opts.insert(DhcpOption::AddressLeaseTime(seconds));
        if let Some(routes) = network.as_ref().and_then(|n| n.classless_routes_bytes()) {
            opts.insert(options::raw(OPT_CLASSLESS_ROUTES, routes.clone()));
            opts.insert(options::raw(OPT_MS_CLASSLESS_ROUTES, routes));
        }
        Ok(())
    }

    fn add_pxe_options(&self, reply: &mut Message, guid: Vec<u8>) {
        let opts = reply.opts_mut();
        opts.insert(DhcpOption::ClassIdentifier(PXE_CLIENT.to_vec()));
        opts.insert(options::raw(OPT_CLIENT_GUID, guid));
        opts.insert(options::raw(OPT_VENDOR_SPECIFIC, pxe_vendor_options(self.server_ip)));
    }

    fn encode(&self, request: &Message, reply: Message) -> Result<Option<Reply>, PxeError> {
        let kind = reply.opts().msg_type();
        let destination = destination(request, kind);
        Ok(Some(Reply {
            packet: reply.to_vec()?,
            destination,
        }))
    }
}

/// The datagram of a socket read; read errors are logged and skipped.
pub(crate) fn datagram(result: std::io::Result<(usize, SocketAddr)>, listener: &str) -> Option<(usize, SocketAddr)> {
    match result {
        Ok(received) => Some(received),
        Err(e) => {
            warn!("{} socket read failed: {}", listener, e);
            None
        }
    }
}

/// Relay agents get the reply on the server port; configured clients are
/// unicast; everyone else hears a broadcast.
fn destination(request: &Message, kind: Option<MessageType>) -> SocketAddrV4 {
    if !request.giaddr().is_unspecified() {
        return SocketAddrV4::new(request.giaddr(), SERVER_PORT);
    }
    if kind != Some(MessageType::Nak) && !request.ciaddr().is_unspecified() {
        return SocketAddrV4::new(request.ciaddr(), CLIENT_PORT);
    }
    SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT)
}

fn requested_ip(request: &Message) -> Option<Ipv4Addr> {
    match request.opts().get(OptionCode::RequestedIpAddress) {
        Some(DhcpOption::RequestedIpAddress(ip)) => Some(*ip),
        _ => None,
    }
}

/// The client GUID option of a PXE request, if the request is one.
fn pxe_request(request: &Message) -> Option<Vec<u8>> {
    match request.opts().get(OptionCode::ClassIdentifier) {
        Some(DhcpOption::ClassIdentifier(class)) if class.starts_with(PXE_CLIENT) => {
            options::value(request, OPT_CLIENT_GUID)
        }
        _ => None,
    }
}
