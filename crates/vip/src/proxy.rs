//! Per-address Neighbor Discovery proxy.
//!
//! Answers solicitations for IPv6 addresses that are routed through this
//! host rather than bound on the loopback device. Each proxied address gets
//! its own ICMPv6 socket bound to that address and joined to the address's
//! solicited-node group, with one accept thread per address.

use crate::interface;
use crate::ndp::{icmp6_socket, join_multicast, recv_message, send_message, solicitation_target};
use crate::packet::NeighborAdvertisement;
use crate::types::{solicited_node_multicast, RECV_BUFFER_SIZE};
use common::{Error, Result};
use socket2::Socket;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, warn};

/// Poll interval bounding how long a stopped service lingers
const STOP_POLL_MS: libc::c_int = 1000;

/// Proxy answering Neighbor Solicitations for a set of routed addresses.
#[derive(Default)]
pub struct NdProxy {
    services: Mutex<HashMap<String, Arc<ProxyService>>>,
}

struct ProxyService {
    socket: Socket,
    address: Ipv6Addr,
    stopped: AtomicBool,
}

impl NdProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start proxying Neighbor Discovery for `address`.
    ///
    /// Only global unicast addresses are accepted. Adding an address twice
    /// is a no-op.
    pub fn add_address(&self, address: &str) -> Result<()> {
        let ip: Ipv6Addr = address
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address(address))?;
        if !is_global_unicast(&ip) {
            return Err(Error::invalid_address(format!(
                "{} is not a global unicast address",
                address
            )));
        }

        let mut services = self.services.lock().unwrap();
        let canonical = ip.to_string();
        if services.contains_key(&canonical) {
            return Ok(());
        }

        let service = Arc::new(ProxyService::new(ip)?);
        services.insert(canonical, service.clone());
        thread::spawn(move || service.run());

        Ok(())
    }

    /// Stop proxying `address`. Unknown addresses are ignored.
    pub fn del_address(&self, address: &str) -> Result<()> {
        let ip: Ipv6Addr = address
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address(address))?;

        let mut services = self.services.lock().unwrap();
        if let Some(service) = services.remove(&ip.to_string()) {
            service.stopped.store(true, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Whether `address` is currently proxied.
    pub fn contains(&self, address: &str) -> bool {
        match address.trim().parse::<Ipv6Addr>() {
            Ok(ip) => self.services.lock().unwrap().contains_key(&ip.to_string()),
            Err(_) => false,
        }
    }
}

impl ProxyService {
    fn new(address: Ipv6Addr) -> Result<Self> {
        let socket = icmp6_socket(address)?;
        join_multicast(&socket, solicited_node_multicast(&address), 0)?;

        Ok(Self {
            socket,
            address,
            stopped: AtomicBool::new(false),
        })
    }

    fn run(&self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while !self.stopped.load(Ordering::Relaxed) {
            let (len, info, source) = match recv_message(&self.socket, &mut buf, STOP_POLL_MS) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    error!(address = %self.address, error = %e, "proxy receive failed, stopping");
                    return;
                }
            };

            let Some(target) = solicitation_target(&buf[..len]) else {
                continue;
            };
            if target != self.address {
                continue;
            }

            if let Err(e) = self.advertise(info.ipi6_ifindex as u32, &source) {
                warn!(address = %self.address, error = %e, "failed to send advertisement");
            }
        }

        debug!(address = %self.address, "proxy service stopped");
    }

    fn advertise(&self, if_index: u32, solicitor: &libc::sockaddr_in6) -> Result<()> {
        let ifc = interface::by_index(if_index)?;
        let na = NeighborAdvertisement::new(self.address, ifc.hardware_addr);

        // The socket is bound to the proxied address, so no source override
        // is needed.
        send_message(&self.socket, &na.marshal(), solicitor, None)
    }
}

fn is_global_unicast(ip: &Ipv6Addr) -> bool {
    let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
    !ip.is_loopback() && !ip.is_multicast() && !ip.is_unspecified() && !link_local
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_addresses() {
        let proxy = NdProxy::new();

        assert!(proxy.add_address("not-an-address").is_err());
        assert!(proxy.add_address("10.0.0.7").is_err()); // IPv4
        assert!(proxy.add_address("::1").is_err());
        assert!(proxy.add_address("fe80::1").is_err());
        assert!(proxy.add_address("ff02::1").is_err());
        assert!(proxy.add_address("::").is_err());
    }

    #[test]
    fn test_del_unknown_address() {
        let proxy = NdProxy::new();
        proxy.del_address("2001:db8::1").unwrap();
        assert!(!proxy.contains("2001:db8::1"));
    }

    #[test]
    fn test_global_unicast_check() {
        assert!(is_global_unicast(&"2001:db8::1".parse().unwrap()));
        assert!(!is_global_unicast(&"fe80::1".parse().unwrap()));
        assert!(!is_global_unicast(&"ff02::1:ff0c:d".parse().unwrap()));
        assert!(!is_global_unicast(&"::1".parse().unwrap()));
        assert!(!is_global_unicast(&"::".parse().unwrap()));
    }
}
