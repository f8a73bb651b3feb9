//! Proxy-DHCP on port 4011.
//!
//! After the DHCP exchange a PXE ROM asks the boot server it was told about
//! for the boot file. The reply chainloads pxelinux and sets the pxelinux
//! path prefix (option 210) so that everything after the TFTP chainloader
//! is fetched over HTTP.

use crate::dhcp::{PXE_CLIENT, datagram};
use crate::error::PxeError;
use crate::metrics::BootMetrics;
use crate::options::{self, END};
use datastore::MacAddr;
use dhcproto::v4::{DhcpOption, Flags, Message, MessageType, Opcode};
use dhcproto::{Decodable, Decoder, Encodable};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const PXE_PORT: u16 = 4011;

const OPT_VENDOR_SPECIFIC: u8 = 43;
const OPT_CLIENT_GUID: u8 = 97;
const SUBOPT_BOOT_ITEM: u8 = 71;
const OPT_PATH_PREFIX: u8 = 210;
const OPT_REBOOT_TIME: u8 = 211;

/// A boot server discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PxeRequest {
    pub xid: u32,
    pub mac: MacAddr,
    pub client_ip: Ipv4Addr,
    /// The 16 GUID bytes after the type octet
    pub guid: Vec<u8>,
    /// Boot item the client picked from the menu
    pub boot_item: Vec<u8>,
}

/// Parse a request, rejecting anything that is not a PXE client that has
/// picked a menu entry.
pub fn parse_request(packet: &[u8]) -> Result<PxeRequest, PxeError> {
    let msg = Message::decode(&mut Decoder::new(packet))?;
    let mac = MacAddr::from_slice(msg.chaddr())
        .ok_or_else(|| PxeError::Dhcp("short hardware address".to_string()))?;
    if msg.opcode() != Opcode::BootRequest {
        return Err(PxeError::Dhcp(format!("packet from {} is not a request", mac)));
    }

    let guid = match options::value(&msg, OPT_CLIENT_GUID) {
        Some(guid) if guid.len() == 17 && guid[0] == 0 => guid[1..].to_vec(),
        Some(_) => return Err(PxeError::Dhcp(format!("packet from {} has a malformed GUID", mac))),
        None => return Err(PxeError::Dhcp(format!("{} is not a PXE client", mac))),
    };
    let boot_item = options::value(&msg, OPT_VENDOR_SPECIFIC)
        .and_then(|vendor| {
            options::iter(&vendor)
                .find(|(sub, _)| *sub == SUBOPT_BOOT_ITEM)
                .map(|(_, item)| item.to_vec())
        })
        .ok_or_else(|| PxeError::Dhcp(format!("{} has not selected a menu entry", mac)))?;

    Ok(PxeRequest {
        xid: msg.xid(),
        mac,
        client_ip: msg.ciaddr(),
        guid,
        boot_item,
    })
}

/// Encode the ACK that chainloads pxelinux.
pub fn build_reply(request: &PxeRequest, server_ip: Ipv4Addr, http_prefix: &str) -> Result<Vec<u8>, PxeError> {
    let mut reply = Message::new(
        Ipv4Addr::UNSPECIFIED,
        request.client_ip,
        server_ip,
        Ipv4Addr::UNSPECIFIED,
        &request.mac.0,
    );
    reply
        .set_opcode(Opcode::BootReply)
        .set_xid(request.xid)
        .set_flags(Flags::default().set_broadcast())
        // The TFTP server ignores the file name
        .set_fname(b"boot");

    let mut guid = Vec::with_capacity(17);
    guid.push(0);
    guid.extend_from_slice(&request.guid);

    let mut vendor = Vec::with_capacity(request.boot_item.len() + 3);
    vendor.push(SUBOPT_BOOT_ITEM);
    vendor.push(u8::try_from(request.boot_item.len()).unwrap_or(u8::MAX));
    vendor.extend_from_slice(&request.boot_item);
    vendor.push(END);

    let opts = reply.opts_mut();
    opts.insert(DhcpOption::MessageType(MessageType::Ack));
    opts.insert(DhcpOption::ServerIdentifier(server_ip));
    opts.insert(DhcpOption::ClassIdentifier(PXE_CLIENT.to_vec()));
    opts.insert(options::raw(OPT_CLIENT_GUID, guid));
    opts.insert(options::raw(OPT_VENDOR_SPECIFIC, vendor));
    opts.insert(options::raw(OPT_PATH_PREFIX, http_prefix.as_bytes().to_vec()));
    // Reboot after 5 seconds if the boot fails
    opts.insert(options::raw(OPT_REBOOT_TIME, vec![0, 0, 0, 5]));
    Ok(reply.to_vec()?)
}

/// The port-4011 responder.
#[derive(Debug)]
pub struct PxeServer {
    server_ip: Ipv4Addr,
    http_prefix: String,
    metrics: BootMetrics,
}

impl PxeServer {
    pub fn new(server_ip: Ipv4Addr, http_port: u16, metrics: BootMetrics) -> Self {
        Self {
            server_ip,
            http_prefix: format!("http://{}:{}/", server_ip, http_port),
            metrics,
        }
    }

    pub fn http_prefix(&self) -> &str {
        &self.http_prefix
    }

    /// Reply for one datagram, `None` for anything that is not a valid request.
    pub fn handle(&self, packet: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let request = match parse_request(packet) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring PXE packet from {}: {}", peer, e);
                return None;
            }
        };
        match build_reply(&request, self.server_ip, &self.http_prefix) {
            Ok(reply) => {
                info!(
                    "Chainloading {} ({}) to pxelinux via {}",
                    request.mac, request.client_ip, self.server_ip
                );
                Some(reply)
            }
            Err(e) => {
                warn!("Failed to encode PXE reply for {}: {}", request.mac, e);
                None
            }
        }
    }

    pub async fn serve(self: Arc<Self>, socket: UdpSocket) -> Result<(), PxeError> {
        info!("PXE listening on {}", socket.local_addr()?);
        let mut buf = vec![0u8; 1500];
        loop {
            let Some((n, peer)) = datagram(socket.recv_from(&mut buf).await, "PXE") else {
                continue;
            };
            let Some(reply) = self.handle(&buf[..n], peer) else {
                continue;
            };
            match socket.send_to(&reply, peer).await {
                Ok(_) => self.metrics.pxe_reply(),
                Err(e) => warn!("Failed to answer PXE request from {}: {}", peer, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

    fn request_packet(guid_option: &[u8], boot_item: Option<&[u8]>) -> Vec<u8> {
        let mut msg = Message::new(
            Ipv4Addr::new(10, 0, 0, 7),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x52, 0x54, 0, 0, 0, 1],
        );
        msg.set_xid(0xdead_beef);
        msg.opts_mut().insert(DhcpOption::MessageType(MessageType::Request));
        msg.opts_mut().insert(options::raw(OPT_CLIENT_GUID, guid_option.to_vec()));
        if let Some(item) = boot_item {
            let mut vendor = vec![SUBOPT_BOOT_ITEM, u8::try_from(item.len()).unwrap()];
            vendor.extend_from_slice(item);
            vendor.push(END);
            msg.opts_mut().insert(options::raw(OPT_VENDOR_SPECIFIC, vendor));
        }
        msg.to_vec().unwrap()
    }

    fn guid_option() -> Vec<u8> {
        let mut guid = vec![0u8];
        guid.extend([0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00]);
        guid
    }

    fn server() -> PxeServer {
        PxeServer::new(SERVER, 70, BootMetrics::new(&prometheus::Registry::new()).unwrap())
    }

    #[test]
    fn test_parse_request() {
        let item = [0x80, 0x00, 0x00, 0x00];
        let request = parse_request(&request_packet(&guid_option(), Some(&item))).unwrap();
        assert_eq!(request.xid, 0xdead_beef);
        assert_eq!(request.mac.to_string(), "52:54:00:00:00:01");
        assert_eq!(request.client_ip, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(request.guid, guid_option()[1..].to_vec());
        assert_eq!(request.boot_item, item.to_vec());
    }

    #[test]
    fn test_parse_rejects_non_pxe() {
        assert!(parse_request(&[0u8; 100]).is_err());

        let mut bad_guid = guid_option();
        bad_guid[0] = 1;
        assert!(parse_request(&request_packet(&bad_guid, Some(&[0, 0, 0, 0]))).is_err());
        assert!(parse_request(&request_packet(&guid_option()[..16], Some(&[0, 0, 0, 0]))).is_err());
        assert!(parse_request(&request_packet(&guid_option(), None)).is_err());
    }

    #[test]
    fn test_reply_shape() {
        let item = [0x80, 0x00, 0x00, 0x00];
        let request = parse_request(&request_packet(&guid_option(), Some(&item))).unwrap();
        let packet = build_reply(&request, SERVER, server().http_prefix()).unwrap();
        assert_eq!(packet.last(), Some(&END));

        let reply = Message::decode(&mut Decoder::new(&packet)).unwrap();
        assert_eq!(reply.opcode(), Opcode::BootReply);
        assert_eq!(reply.xid(), 0xdead_beef);
        assert_eq!(reply.yiaddr(), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(reply.siaddr(), SERVER);
        assert_eq!(&reply.chaddr()[..6], &request.mac.0);
        assert!(reply.flags().broadcast());
        assert_eq!(reply.opts().msg_type(), Some(MessageType::Ack));

        assert_eq!(options::value(&reply, 54), Some(SERVER.octets().to_vec()));
        assert_eq!(options::value(&reply, 60), Some(b"PXEClient".to_vec()));
        assert_eq!(options::value(&reply, 97), Some(guid_option()));
        assert_eq!(options::value(&reply, 210), Some(b"http://10.0.0.254:70/".to_vec()));
        assert_eq!(options::value(&reply, 211), Some(vec![0, 0, 0, 5]));

        let vendor = options::value(&reply, 43).unwrap();
        assert_eq!(&vendor[..2], &[0x47, 0x04]);
        assert_eq!(&vendor[2..6], &item);
        assert_eq!(vendor[6], END);
    }

    #[test]
    fn test_handle_drops_garbage() {
        let server = server();
        let peer: SocketAddr = "10.0.0.7:68".parse().unwrap();
        assert!(server.handle(b"hello", peer).is_none());
        assert!(server.handle(&request_packet(&guid_option(), Some(&[0, 0, 0, 0])), peer).is_some());
    }
}
