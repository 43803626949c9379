//! IPv6 Neighbor Discovery responder.
//!
//! An ICMPv6 raw socket filtered down to Neighbor Solicitations. Group
//! membership is driven externally through the ref counter; replies are
//! Neighbor Advertisements sent with an `IPV6_PKTINFO` control message so
//! the source address is the VIP itself.

use crate::interface::{self, InterfaceRegistry};
use crate::packet::NeighborAdvertisement;
use crate::types::{solicited_node_multicast, ICMP6_NEIGHBOR_SOLICITATION, RECV_BUFFER_SIZE};
use common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

// From <netinet/icmp6.h>
const ICMP6_FILTER: libc::c_int = 1;
// From <netinet/in.h>, RFC 3542 raw-socket checksum offset option
const IPV6_CHECKSUM: libc::c_int = 7;

/// Checksum offset within the ICMPv6 header
const CHECKSUM_OFFSET: libc::c_int = 2;

/// Neighbor Discovery messages must carry hop limit 255
const ND_HOP_LIMIT: libc::c_int = 255;

/// Minimum Neighbor Solicitation length: 8-byte header + 16-byte target
const SOLICITATION_MIN_LEN: usize = 24;

/// Listener answering Neighbor Solicitations for enabled IPv6 VIPs.
pub struct Nd6Listener {
    socket: Socket,
    interfaces: Arc<InterfaceRegistry>,
}

/// A validated Neighbor Solicitation.
pub struct NdRequest {
    pub(crate) target: Ipv6Addr,
    pub(crate) if_index: u32,
    pub(crate) source: libc::sockaddr_in6,
}

impl NdRequest {
    /// The solicited target address.
    pub fn target(&self) -> Ipv6Addr {
        self.target
    }

    /// Index of the interface the solicitation arrived on.
    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    /// Address of the solicitor.
    pub fn source_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.source.sin6_addr.s6_addr)
    }
}

impl Nd6Listener {
    /// Create the ICMPv6 socket bound to `::`.
    pub fn new(interfaces: Arc<InterfaceRegistry>) -> Result<Self> {
        let socket = icmp6_socket(Ipv6Addr::UNSPECIFIED)?;
        Ok(Self { socket, interfaces })
    }

    /// Block until a Neighbor Solicitation arrives.
    pub fn accept(&self) -> Result<NdRequest> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let Some((len, info, source)) = recv_message(&self.socket, &mut buf, -1)? else {
                continue;
            };

            let Some(target) = solicitation_target(&buf[..len]) else {
                continue;
            };

            return Ok(NdRequest {
                target,
                if_index: info.ipi6_ifindex as u32,
                source,
            });
        }
    }

    /// Answer a solicitation with an advertisement claiming the target for
    /// the receiving interface.
    pub fn reply(&self, request: &NdRequest) -> Result<()> {
        let ifc = interface::by_index(request.if_index)?;
        let na = NeighborAdvertisement::new(request.target, ifc.hardware_addr);

        send_message(
            &self.socket,
            &na.marshal(),
            &request.source,
            Some((request.target, ifc.index)),
        )
    }

    /// Send an unsolicited advertisement for `ip` to its solicited-node
    /// group from the first registered interface. A no-op when no interface
    /// is registered.
    pub fn gratuitous(&self, ip: Ipv6Addr) -> Result<()> {
        let Some(ifc) = self.interfaces.first() else {
            return Ok(());
        };

        let group = solicited_node_multicast(&ip);
        let na = NeighborAdvertisement::new(ip, ifc.hardware_addr);
        let dst = sockaddr_in6(group, ifc.index);

        send_message(&self.socket, &na.marshal(), &dst, Some((ip, ifc.index)))
    }

    /// Join a solicited-node group. Interface index 0 lets the kernel pick.
    pub fn join_group(&self, group: Ipv6Addr, if_index: u32) -> Result<()> {
        join_multicast(&self.socket, group, if_index)
    }

    /// Leave a solicited-node group.
    pub fn leave_group(&self, group: Ipv6Addr, if_index: u32) -> Result<()> {
        leave_multicast(&self.socket, group, if_index)
    }
}

/// Create a non-blocking ICMPv6 socket bound to `bind_addr`, filtered to
/// Neighbor Solicitations, with kernel checksumming, packet-info delivery
/// and hop limit 255. Option order follows the listener contract; any
/// failure drops (and thereby closes) the socket.
pub(crate) fn icmp6_socket(bind_addr: Ipv6Addr) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
        .map_err(|e| Error::socket(format!("failed to create ICMPv6 socket: {}", e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| Error::socket(format!("failed to set ICMPv6 socket non-blocking: {}", e)))?;

    let addr = SocketAddrV6::new(bind_addr, 0, 0, 0);
    socket
        .bind(&addr.into())
        .map_err(|e| Error::socket(format!("failed to bind ICMPv6 socket to {}: {}", bind_addr, e)))?;

    let fd = socket.as_raw_fd();

    let mut filter = Icmp6Filter::block_all();
    filter.accept(ICMP6_NEIGHBOR_SOLICITATION);
    set_option(fd, libc::IPPROTO_ICMPV6, ICMP6_FILTER, &filter)
        .map_err(|e| Error::socket(format!("failed to set ICMPv6 filter: {}", e)))?;

    set_option(fd, libc::IPPROTO_IPV6, IPV6_CHECKSUM, &CHECKSUM_OFFSET)
        .map_err(|e| Error::socket(format!("failed to set checksum offset: {}", e)))?;

    let on: libc::c_int = 1;
    set_option(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, &on)
        .map_err(|e| Error::socket(format!("failed to enable packet info: {}", e)))?;

    set_option(fd, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &ND_HOP_LIMIT)
        .map_err(|e| Error::socket(format!("failed to set unicast hop limit: {}", e)))?;
    set_option(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, &ND_HOP_LIMIT)
        .map_err(|e| Error::socket(format!("failed to set multicast hop limit: {}", e)))?;

    Ok(socket)
}

/// Extract the target address from a Neighbor Solicitation payload.
///
/// Returns `None` for short or non-solicitation messages.
pub(crate) fn solicitation_target(data: &[u8]) -> Option<Ipv6Addr> {
    if data.len() < SOLICITATION_MIN_LEN {
        return None;
    }
    if data[0] != ICMP6_NEIGHBOR_SOLICITATION {
        return None;
    }

    let mut target = [0u8; 16];
    target.copy_from_slice(&data[8..24]);
    Some(Ipv6Addr::from(target))
}

pub(crate) fn join_multicast(socket: &Socket, group: Ipv6Addr, if_index: u32) -> Result<()> {
    membership(socket, group, if_index, libc::IPV6_ADD_MEMBERSHIP)
        .map_err(|e| Error::socket(format!("failed to join group {}: {}", group, e)))
}

pub(crate) fn leave_multicast(socket: &Socket, group: Ipv6Addr, if_index: u32) -> Result<()> {
    membership(socket, group, if_index, libc::IPV6_DROP_MEMBERSHIP)
        .map_err(|e| Error::socket(format!("failed to leave group {}: {}", group, e)))
}

fn membership(
    socket: &Socket,
    group: Ipv6Addr,
    if_index: u32,
    option: libc::c_int,
) -> io::Result<()> {
    let mreq = libc::ipv6_mreq {
        ipv6mr_multiaddr: libc::in6_addr {
            s6_addr: group.octets(),
        },
        ipv6mr_interface: if_index as libc::c_uint,
    };

    set_option(socket.as_raw_fd(), libc::IPPROTO_IPV6, option, &mreq)
}

/// Receive one ICMPv6 message together with its packet info and source.
///
/// `timeout_ms` of -1 blocks; otherwise `Ok(None)` is returned when the
/// poll times out without data.
pub(crate) fn recv_message(
    socket: &Socket,
    buf: &mut [u8],
    timeout_ms: libc::c_int,
) -> Result<Option<(usize, libc::in6_pktinfo, libc::sockaddr_in6)>> {
    let fd = socket.as_raw_fd();

    loop {
        if !wait_readable(fd, timeout_ms)? {
            return Ok(None);
        }

        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut source: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        // cmsg buffer, 8-byte aligned
        let mut control = [0u64; 8];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut source as *mut libc::sockaddr_in6 as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&control);

        let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                continue;
            }
            return Err(err.into());
        }

        let mut info: libc::in6_pktinfo = unsafe { mem::zeroed() };
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::IPPROTO_IPV6
                    && (*cmsg).cmsg_type == libc::IPV6_PKTINFO
                {
                    std::ptr::copy_nonoverlapping(
                        libc::CMSG_DATA(cmsg),
                        &mut info as *mut libc::in6_pktinfo as *mut u8,
                        mem::size_of::<libc::in6_pktinfo>(),
                    );
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        return Ok(Some((n as usize, info, source)));
    }
}

/// Send an ICMPv6 payload to `dst`, optionally pinning the source address
/// and outgoing interface through an `IPV6_PKTINFO` control message.
pub(crate) fn send_message(
    socket: &Socket,
    payload: &[u8],
    dst: &libc::sockaddr_in6,
    pktinfo: Option<(Ipv6Addr, u32)>,
) -> Result<()> {
    let fd = socket.as_raw_fd();

    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    let mut dst = *dst;
    // cmsg buffer, 8-byte aligned
    let mut control = [0u64; 8];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut dst as *mut libc::sockaddr_in6 as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some((src, if_index)) = pktinfo {
        let info = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr {
                s6_addr: src.octets(),
            },
            ipi6_ifindex: if_index as libc::c_uint,
        };

        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen =
            unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as libc::c_uint) } as usize;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
            (*cmsg).cmsg_len =
                libc::CMSG_LEN(mem::size_of::<libc::in6_pktinfo>() as libc::c_uint) as usize;
            std::ptr::copy_nonoverlapping(
                &info as *const libc::in6_pktinfo as *const u8,
                libc::CMSG_DATA(cmsg),
                mem::size_of::<libc::in6_pktinfo>(),
            );
        }
    }

    loop {
        let n = unsafe { libc::sendmsg(fd, &msg, 0) };
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

/// Build a `sockaddr_in6` for an address and scope.
pub(crate) fn sockaddr_in6(addr: Ipv6Addr, scope_id: u32) -> libc::sockaddr_in6 {
    let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sa.sin6_addr = libc::in6_addr {
        s6_addr: addr.octets(),
    };
    sa.sin6_scope_id = scope_id;
    sa
}

/// Wait for the socket to become readable. Returns false on timeout.
pub(crate) fn wait_readable(fd: RawFd, timeout_ms: libc::c_int) -> Result<bool> {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(false);
        }
        return Ok(true);
    }
}

fn set_option<T>(
    fd: RawFd,
    level: libc::c_int,
    option: libc::c_int,
    value: &T,
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// RFC 3542 ICMPv6 type filter. A set bit blocks the type.
#[repr(C)]
struct Icmp6Filter {
    data: [u32; 8],
}

impl Icmp6Filter {
    fn block_all() -> Self {
        Self { data: [!0u32; 8] }
    }

    fn accept(&mut self, icmp_type: u8) {
        self.data[(icmp_type >> 5) as usize] &= !(1u32 << (icmp_type & 31));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_admits_only_accepted_type() {
        let mut filter = Icmp6Filter::block_all();
        filter.accept(ICMP6_NEIGHBOR_SOLICITATION);

        // Bit 135 lives in word 4; it must be the only cleared bit.
        for (i, word) in filter.data.iter().enumerate() {
            if i == (ICMP6_NEIGHBOR_SOLICITATION >> 5) as usize {
                assert_eq!(*word, !(1u32 << (ICMP6_NEIGHBOR_SOLICITATION & 31)));
            } else {
                assert_eq!(*word, !0u32);
            }
        }
    }

    #[test]
    fn test_solicitation_target_extraction() {
        let target: Ipv6Addr = "2001:db8::a:b:c:d".parse().unwrap();

        let mut payload = vec![0u8; 24];
        payload[0] = ICMP6_NEIGHBOR_SOLICITATION;
        payload[8..24].copy_from_slice(&target.octets());

        assert_eq!(solicitation_target(&payload), Some(target));
    }

    #[test]
    fn test_solicitation_target_rejects_noise() {
        // Too short
        assert_eq!(solicitation_target(&[0u8; 23]), None);

        // Wrong type
        let mut payload = vec![0u8; 24];
        payload[0] = 128; // echo request
        assert_eq!(solicitation_target(&payload), None);
    }

    #[test]
    fn test_socket_creation() {
        // Requires CAP_NET_RAW, so only assert it doesn't panic.
        let _ = icmp6_socket(Ipv6Addr::UNSPECIFIED);
    }
}
