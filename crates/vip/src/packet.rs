//! ARP and Neighbor Discovery wire formats.
//!
//! RFC 826 - An Ethernet Address Resolution Protocol
//!
//! ```text
//!  0                   1
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Hardware Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Protocol Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    HW Len     |   Proto Len   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Operation           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Sender Hardware Address    |
//! |           (6 bytes)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Sender Protocol Address    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Target Hardware Address    |
//! |           (6 bytes)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Target Protocol Address    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The Neighbor Advertisement payload follows RFC 4861 §4.4 with a single
//! Target Link-Layer Address option.

use crate::types::{ETHERTYPE_ARP, ICMP6_NEIGHBOR_ADVERTISEMENT};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// ARP operation: request
pub const ARP_OP_REQUEST: u16 = 1;

/// ARP operation: reply
pub const ARP_OP_REPLY: u16 = 2;

/// ARP hardware type for Ethernet
pub const ARP_HW_ETHERNET: u16 = 1;

/// EtherType carried in the ARP protocol-type field (IPv4)
const ETHERTYPE_IPV4: u16 = 0x0800;

/// Serialized ARP packet length for Ethernet/IPv4
pub const ARP_PACKET_LEN: usize = 28;

/// Ethernet header length (no 802.1Q tag)
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Neighbor Advertisement payload length (header + TLLA option)
pub const ADVERTISEMENT_LEN: usize = 32;

/// Solicited | Override flags for a Neighbor Advertisement
const ADVERTISEMENT_FLAGS: u32 = 0x6000_0000;

/// An Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_hw: [u8; 6],
    pub sender_ip: Ipv4Addr,
    pub target_hw: [u8; 6],
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Create an ARP reply.
    pub fn new_reply(
        sender_hw: [u8; 6],
        sender_ip: Ipv4Addr,
        target_hw: [u8; 6],
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ARP_OP_REPLY,
            sender_hw,
            sender_ip,
            target_hw,
            target_ip,
        }
    }

    /// Parse an ARP packet from raw bytes.
    ///
    /// Only Ethernet/IPv4 packets are accepted; anything else on the segment
    /// is noise for our purposes.
    pub fn parse(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < ARP_PACKET_LEN {
            return Err("ARP packet too short");
        }

        let hardware_type = u16::from_be_bytes([data[0], data[1]]);
        let protocol_type = u16::from_be_bytes([data[2], data[3]]);
        if hardware_type != ARP_HW_ETHERNET || protocol_type != ETHERTYPE_IPV4 {
            return Err("not an Ethernet/IPv4 ARP packet");
        }
        if data[4] != 6 || data[5] != 4 {
            return Err("unexpected ARP address lengths");
        }

        let operation = u16::from_be_bytes([data[6], data[7]]);

        let mut sender_hw = [0u8; 6];
        sender_hw.copy_from_slice(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);

        let mut target_hw = [0u8; 6];
        target_hw.copy_from_slice(&data[18..24]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Ok(Self {
            operation,
            sender_hw,
            sender_ip,
            target_hw,
            target_ip,
        })
    }

    /// Serialize the packet to its 28-byte wire form.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ARP_PACKET_LEN);

        buf.put_u16(ARP_HW_ETHERNET);
        buf.put_u16(ETHERTYPE_IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(self.operation);

        buf.put_slice(&self.sender_hw);
        buf.put_slice(&self.sender_ip.octets());
        buf.put_slice(&self.target_hw);
        buf.put_slice(&self.target_ip.octets());

        buf.freeze()
    }
}

/// An Ethernet II frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ethertype: u16,
    pub payload: Bytes,
}

impl EthernetFrame {
    /// Parse a frame from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < ETHERNET_HEADER_LEN {
            return Err("Ethernet frame too short");
        }

        let mut destination = [0u8; 6];
        destination.copy_from_slice(&data[0..6]);
        let mut source = [0u8; 6];
        source.copy_from_slice(&data[6..12]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);

        Ok(Self {
            destination,
            source,
            ethertype,
            payload: Bytes::copy_from_slice(&data[ETHERNET_HEADER_LEN..]),
        })
    }

    /// Serialize the frame, header followed by payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ETHERNET_HEADER_LEN + self.payload.len());

        buf.put_slice(&self.destination);
        buf.put_slice(&self.source);
        buf.put_u16(self.ethertype);
        buf.put_slice(&self.payload);

        buf.freeze()
    }
}

/// Build the ARP reply frame for a request answered on the given interface.
///
/// The sender fields advertise the receiving interface's hardware address as
/// the owner of the requested IP; target fields address the original sender.
pub fn arp_reply_frame(interface_hw: [u8; 6], request: &ArpPacket) -> EthernetFrame {
    let reply = ArpPacket::new_reply(
        interface_hw,
        request.target_ip,
        request.sender_hw,
        request.sender_ip,
    );

    EthernetFrame {
        destination: request.sender_hw,
        source: interface_hw,
        ethertype: ETHERTYPE_ARP,
        payload: reply.to_bytes(),
    }
}

/// Build a gratuitous ARP reply frame announcing ownership of `ip`.
///
/// Sender and target protocol addresses are both the VIP; the frame is
/// broadcast so peers refresh their caches.
pub fn gratuitous_arp_frame(interface_hw: [u8; 6], ip: Ipv4Addr) -> EthernetFrame {
    let reply = ArpPacket::new_reply(interface_hw, ip, crate::types::BROADCAST_MAC, ip);

    EthernetFrame {
        destination: crate::types::BROADCAST_MAC,
        source: interface_hw,
        ethertype: ETHERTYPE_ARP,
        payload: reply.to_bytes(),
    }
}

/// An ICMPv6 Neighbor Advertisement with a Target Link-Layer Address option.
///
/// The checksum field is left zero; the kernel fills it in via the raw
/// socket's checksum offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    pub target: Ipv6Addr,
    pub link_layer: [u8; 6],
}

impl NeighborAdvertisement {
    pub fn new(target: Ipv6Addr, link_layer: [u8; 6]) -> Self {
        Self { target, link_layer }
    }

    /// Serialize to the 32-byte wire form.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ADVERTISEMENT_LEN);

        buf.put_u8(ICMP6_NEIGHBOR_ADVERTISEMENT);
        buf.put_u8(0); // code
        buf.put_u16(0); // checksum, kernel-computed
        buf.put_u32(ADVERTISEMENT_FLAGS);
        buf.put_slice(&self.target.octets());
        buf.put_u8(2); // option: target link-layer address
        buf.put_u8(1); // option length in units of 8 bytes
        buf.put_slice(&self.link_layer);

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_HW: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x09];
    const IFACE_HW: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    fn sample_request() -> ArpPacket {
        ArpPacket {
            operation: ARP_OP_REQUEST,
            sender_hw: SENDER_HW,
            sender_ip: Ipv4Addr::new(10, 0, 0, 9),
            target_hw: [0u8; 6],
            target_ip: Ipv4Addr::new(10, 0, 0, 7),
        }
    }

    #[test]
    fn test_arp_serialize_parse() {
        let packet = sample_request();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), ARP_PACKET_LEN);

        let parsed = ArpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_arp_parse_rejects_short_input() {
        assert!(ArpPacket::parse(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_arp_parse_rejects_non_ethernet() {
        let mut bytes = sample_request().to_bytes().to_vec();
        bytes[1] = 6; // IEEE 802 hardware type
        assert!(ArpPacket::parse(&bytes).is_err());
    }

    #[test]
    fn test_ethernet_roundtrip() {
        let frame = EthernetFrame {
            destination: SENDER_HW,
            source: IFACE_HW,
            ethertype: ETHERTYPE_ARP,
            payload: sample_request().to_bytes(),
        };

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), ETHERNET_HEADER_LEN + ARP_PACKET_LEN);

        let parsed = EthernetFrame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_reply_frame_swaps_roles() {
        let frame = arp_reply_frame(IFACE_HW, &sample_request());

        assert_eq!(frame.destination, SENDER_HW);
        assert_eq!(frame.source, IFACE_HW);
        assert_eq!(frame.ethertype, ETHERTYPE_ARP);

        let reply = ArpPacket::parse(&frame.payload).unwrap();
        assert_eq!(reply.operation, ARP_OP_REPLY);
        assert_eq!(reply.sender_hw, IFACE_HW);
        assert_eq!(reply.sender_ip, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(reply.target_hw, SENDER_HW);
        assert_eq!(reply.target_ip, Ipv4Addr::new(10, 0, 0, 9));
    }

    #[test]
    fn test_gratuitous_frame_announces_vip() {
        let vip = Ipv4Addr::new(10, 0, 0, 7);
        let frame = gratuitous_arp_frame(IFACE_HW, vip);

        assert_eq!(frame.destination, crate::types::BROADCAST_MAC);
        assert_eq!(frame.source, IFACE_HW);
        assert_eq!(frame.ethertype, ETHERTYPE_ARP);

        let reply = ArpPacket::parse(&frame.payload).unwrap();
        assert_eq!(reply.operation, ARP_OP_REPLY);
        assert_eq!(reply.sender_hw, IFACE_HW);
        assert_eq!(reply.sender_ip, vip);
        assert_eq!(reply.target_hw, crate::types::BROADCAST_MAC);
        assert_eq!(reply.target_ip, vip);
    }

    #[test]
    fn test_advertisement_layout() {
        let target: Ipv6Addr = "2001:db8::a:b:c:d".parse().unwrap();
        let na = NeighborAdvertisement::new(target, IFACE_HW);
        let bytes = na.marshal();

        assert_eq!(bytes.len(), ADVERTISEMENT_LEN);
        assert_eq!(bytes[0], 0x88); // type 136
        assert_eq!(bytes[1], 0x00); // code
        assert_eq!(&bytes[2..4], &[0x00, 0x00]); // checksum placeholder
        assert_eq!(&bytes[4..8], &[0x60, 0x00, 0x00, 0x00]); // solicited | override
        assert_eq!(&bytes[8..24], &target.octets());
        assert_eq!(bytes[24], 0x02); // TLLA option
        assert_eq!(bytes[25], 0x01); // length in 8-byte units
        assert_eq!(&bytes[26..32], &IFACE_HW);
    }
}
