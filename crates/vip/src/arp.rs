//! IPv4 ARP responder.
//!
//! A raw `AF_PACKET` socket bound to EtherType 0x0806 receives every ARP
//! frame on the host. The accept loop filters down to requests; replies and
//! gratuitous announcements are sent through the same socket with an
//! explicit link-layer destination.

use crate::interface::{self, InterfaceRegistry};
use crate::packet::{arp_reply_frame, gratuitous_arp_frame, ArpPacket, EthernetFrame, ARP_OP_REQUEST};
use crate::types::{BROADCAST_MAC, ETHERTYPE_ARP, RECV_BUFFER_SIZE};
use common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tracing::debug;

/// ARP hardware type carried in the reply sockaddr for gratuitous sends
const HATYPE_ETHERNET: u16 = 1;

/// Listener answering ARP requests for enabled IPv4 VIPs.
pub struct Arp4Listener {
    socket: Socket,
    interfaces: Arc<InterfaceRegistry>,
}

/// A validated ARP request, carrying the link-layer sockaddr it arrived with.
pub struct ArpRequest {
    pub(crate) packet: ArpPacket,
    pub(crate) remote: libc::sockaddr_ll,
}

impl ArpRequest {
    pub fn target(&self) -> Ipv4Addr {
        self.packet.target_ip
    }

    pub fn if_index(&self) -> u32 {
        self.remote.sll_ifindex as u32
    }
}

impl Arp4Listener {
    /// Create the raw ARP socket.
    pub fn new(interfaces: Arc<InterfaceRegistry>) -> Result<Self> {
        let protocol = ETHERTYPE_ARP.to_be() as libc::c_int;
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(protocol)))
            .map_err(|e| Error::socket(format!("failed to create ARP socket: {}", e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| Error::socket(format!("failed to set ARP socket non-blocking: {}", e)))?;

        Ok(Self { socket, interfaces })
    }

    /// Block until a well-formed ARP request arrives.
    ///
    /// Frames that fail to parse, carry a different EtherType, or are not
    /// requests are skipped.
    pub fn accept(&self) -> Result<ArpRequest> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (len, remote) = self.recv_from(&mut buf)?;

            let frame = match EthernetFrame::parse(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = e, "discarding unparseable frame");
                    continue;
                }
            };
            if frame.ethertype != ETHERTYPE_ARP {
                continue;
            }

            let packet = match ArpPacket::parse(&frame.payload) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(error = e, "discarding unparseable ARP packet");
                    continue;
                }
            };
            if packet.operation != ARP_OP_REQUEST {
                continue;
            }

            return Ok(ArpRequest { packet, remote });
        }
    }

    /// Answer a request, claiming the target IP for the receiving interface.
    pub fn reply(&self, request: &ArpRequest) -> Result<()> {
        let ifc = interface::by_index(request.if_index())?;
        let frame = arp_reply_frame(ifc.hardware_addr, &request.packet);

        let mut to: libc::sockaddr_ll = unsafe { mem::zeroed() };
        to.sll_family = libc::AF_PACKET as libc::c_ushort;
        to.sll_protocol = request.remote.sll_protocol;
        to.sll_ifindex = request.remote.sll_ifindex;
        to.sll_hatype = request.remote.sll_hatype;
        to.sll_pkttype = request.remote.sll_pkttype;
        to.sll_halen = request.remote.sll_halen;
        to.sll_addr[..6].copy_from_slice(&request.packet.sender_hw);

        self.send_to(&frame.to_bytes(), &to)
    }

    /// Broadcast a gratuitous ARP reply for `ip` from the first registered
    /// interface. A no-op when no interface is registered.
    pub fn gratuitous(&self, ip: Ipv4Addr) -> Result<()> {
        let Some(ifc) = self.interfaces.first() else {
            return Ok(());
        };

        let frame = gratuitous_arp_frame(ifc.hardware_addr, ip);

        let mut to: libc::sockaddr_ll = unsafe { mem::zeroed() };
        to.sll_family = libc::AF_PACKET as libc::c_ushort;
        to.sll_protocol = ETHERTYPE_ARP.to_be();
        to.sll_ifindex = ifc.index as libc::c_int;
        to.sll_hatype = HATYPE_ETHERNET;
        to.sll_pkttype = 0;
        to.sll_halen = 6;
        to.sll_addr[..6].copy_from_slice(&BROADCAST_MAC);

        self.send_to(&frame.to_bytes(), &to)
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, libc::sockaddr_ll)> {
        let fd = self.socket.as_raw_fd();

        loop {
            self.wait_readable()?;

            let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                    continue;
                }
                return Err(err.into());
            }

            return Ok((n as usize, addr));
        }
    }

    fn send_to(&self, data: &[u8], to: &libc::sockaddr_ll) -> Result<()> {
        let fd = self.socket.as_raw_fd();

        loop {
            let n = unsafe {
                libc::sendto(
                    fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len(),
                    0,
                    to as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                    continue;
                }
                return Err(err.into());
            }

            return Ok(());
        }
    }

    fn wait_readable(&self) -> Result<()> {
        let mut fds = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            let rc = unsafe { libc::poll(&mut fds, 1, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_creation() {
        // Requires CAP_NET_RAW, so only assert it doesn't panic.
        let interfaces = Arc::new(InterfaceRegistry::new());
        let _ = Arp4Listener::new(interfaces);
    }

    #[test]
    fn test_gratuitous_without_interfaces() {
        let interfaces = Arc::new(InterfaceRegistry::new());
        if let Ok(listener) = Arp4Listener::new(interfaces) {
            // No registered interface means nothing to announce from.
            listener.gratuitous(Ipv4Addr::new(10, 0, 0, 7)).unwrap();
        }
    }
}
