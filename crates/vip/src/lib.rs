//! Virtual IP responder for Linux hosts.
//!
//! Makes IPv4 and IPv6 addresses reachable on a local Ethernet segment by
//! answering neighbor-discovery traffic (ARP for IPv4, ICMPv6 Neighbor
//! Solicitations for IPv6) as if the addresses were configured on chosen
//! physical interfaces, while the addresses are actually bound to the
//! loopback device. This is the foundation for active/standby failover: a
//! node takes a VIP by enabling it and announcing ownership; the standby
//! stops answering and the address migrates.
//!
//! # Features
//!
//! - ARP responder on a raw `AF_PACKET` socket (gratuitous and solicited)
//! - Neighbor Discovery responder with solicited-node group ref counting
//! - Loopback binding through the platform `ip` tool
//! - Per-address Neighbor Discovery proxy for routed addresses
//!
//! # Example
//!
//! ```no_run
//! use vip::Responder;
//!
//! # fn example() -> common::Result<()> {
//! let responder = Responder::new();
//! responder.vip_interface("eth0")?;
//!
//! // Bind the VIP to loopback, then start answering and announce it.
//! responder.add("10.0.0.7")?;
//! responder.enable("10.0.0.7")?;
//!
//! // Failover away: stop answering, then unbind.
//! responder.disable("10.0.0.7")?;
//! responder.delete("10.0.0.7")?;
//! # Ok(())
//! # }
//! ```
//!
//! Raw sockets require `CAP_NET_RAW`; an external coordinator decides when
//! to call the lifecycle entry points.

mod arp;
mod interface;
mod ndp;
mod packet;
mod proxy;
mod registry;
mod responder;
mod types;

pub use arp::{Arp4Listener, ArpRequest};
pub use interface::{InterfaceRegistry, NetInterface};
pub use ndp::{Nd6Listener, NdRequest};
pub use packet::{ArpPacket, EthernetFrame, NeighborAdvertisement};
pub use proxy::NdProxy;
pub use registry::{GroupRefCounter, GroupTransition, VipRegistry};
pub use responder::{Responder, ResponderConfig};
pub use types::{solicited_node_multicast, AddressFamily, VirtualIpAddress};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_types() {
        let vip = VirtualIpAddress::parse("192.0.2.10").unwrap();
        assert_eq!(vip.family(), AddressFamily::V4);
        assert_eq!(vip.to_string(), "192.0.2.10");

        let config = ResponderConfig::default();
        assert!(config.validate().is_ok());
    }
}
