//! VIP data types and address canonicalization.

use common::{Error, Result};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

/// EtherType for ARP (host byte order)
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// ICMPv6 Neighbor Solicitation message type
pub const ICMP6_NEIGHBOR_SOLICITATION: u8 = 135;

/// ICMPv6 Neighbor Advertisement message type
pub const ICMP6_NEIGHBOR_ADVERTISEMENT: u8 = 136;

/// Ethernet broadcast address
pub const BROADCAST_MAC: [u8; 6] = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff];

/// Receive buffer size for both listeners
pub(crate) const RECV_BUFFER_SIZE: usize = 1024;

/// Address family of a virtual IP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A parsed and canonicalized virtual IP address.
///
/// The canonical textual form doubles as the registry key. IPv4-mapped IPv6
/// input collapses to the 4-byte form, so `::ffff:10.0.0.7` and `10.0.0.7`
/// share one canonical representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualIpAddress {
    canonical: String,
    ip: IpAddr,
}

impl VirtualIpAddress {
    /// Parse a textual address into its canonical form.
    ///
    /// Rejects malformed input, loopback, multicast and unspecified
    /// addresses.
    pub fn parse(address: &str) -> Result<Self> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address(address))?;
        let ip = canonicalize(ip);

        if ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() {
            return Err(Error::invalid_address(address));
        }

        Ok(Self {
            canonical: ip.to_string(),
            ip,
        })
    }

    /// Canonical textual form, used as the registry key.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The canonicalized address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Prefix length used when binding the address to the loopback device.
    pub fn prefix_len(&self) -> u8 {
        match self.ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }
}

impl fmt::Display for VirtualIpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Collapse IPv4-mapped IPv6 addresses to their 4-byte form.
///
/// Wire-observed targets must go through the same collapse as parsed input,
/// or mixed-form IPv4 VIPs would never match the registry key.
pub(crate) fn canonicalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        IpAddr::V4(_) => ip,
    }
}

/// Canonical registry key for an address observed on the wire.
pub(crate) fn canonical_key(ip: IpAddr) -> String {
    canonicalize(ip).to_string()
}

/// Derive the solicited-node multicast group for an IPv6 address.
///
/// `ff02::1:ff` followed by the low 24 bits of the address (RFC 4291 §2.7.1).
pub fn solicited_node_multicast(ip: &Ipv6Addr) -> Ipv6Addr {
    let octets = ip.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xff, octets[13],
        octets[14], octets[15],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_ipv4() {
        let vip = VirtualIpAddress::parse("10.0.0.7").unwrap();
        assert_eq!(vip.canonical(), "10.0.0.7");
        assert_eq!(vip.family(), AddressFamily::V4);
        assert_eq!(vip.prefix_len(), 32);
    }

    #[test]
    fn test_parse_ipv6() {
        let vip = VirtualIpAddress::parse("2001:db8::a:b:c:d").unwrap();
        assert_eq!(vip.canonical(), "2001:db8::a:b:c:d");
        assert_eq!(vip.family(), AddressFamily::V6);
        assert_eq!(vip.prefix_len(), 128);
    }

    #[test]
    fn test_mapped_ipv4_collapses() {
        let vip = VirtualIpAddress::parse("::ffff:10.0.0.7").unwrap();
        assert_eq!(vip.canonical(), "10.0.0.7");
        assert_eq!(vip.family(), AddressFamily::V4);
        assert_eq!(vip.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_canonicalization_is_stable() {
        for addr in ["10.0.0.7", "::ffff:192.0.2.1", "2001:DB8::1", " 10.0.0.8 "] {
            let once = VirtualIpAddress::parse(addr).unwrap();
            let twice = VirtualIpAddress::parse(once.canonical()).unwrap();
            assert_eq!(once.canonical(), twice.canonical());
        }
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(VirtualIpAddress::parse("not-an-address").is_err());
        assert!(VirtualIpAddress::parse("10.0.0").is_err());
        assert!(VirtualIpAddress::parse("").is_err());
    }

    #[test]
    fn test_rejects_loopback() {
        assert!(VirtualIpAddress::parse("127.0.0.1").is_err());
        assert!(VirtualIpAddress::parse("::1").is_err());
        // Mapped loopback collapses first, then fails the loopback check.
        assert!(VirtualIpAddress::parse("::ffff:127.0.0.1").is_err());
    }

    #[test]
    fn test_rejects_non_unicast() {
        assert!(VirtualIpAddress::parse("224.0.0.1").is_err());
        assert!(VirtualIpAddress::parse("ff02::1").is_err());
        assert!(VirtualIpAddress::parse("0.0.0.0").is_err());
        assert!(VirtualIpAddress::parse("::").is_err());
    }

    #[test]
    fn test_solicited_node_multicast() {
        let ip: Ipv6Addr = "2001:db8::a:b:c:d".parse().unwrap();
        let group = solicited_node_multicast(&ip);
        assert_eq!(group, "ff02::1:ff0c:d".parse::<Ipv6Addr>().unwrap());

        // Addresses sharing the low 24 bits share the group.
        let other: Ipv6Addr = "2001:db8::e:f:c:d".parse().unwrap();
        assert_eq!(group, solicited_node_multicast(&other));
    }
}
