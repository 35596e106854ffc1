//! ARP-over-Ethernet frame codec and the IP to MAC table built from replies.
//!
//! Frames are laid out as a 14 byte Ethernet header followed by the 28 byte
//! ARP payload:
//!
//! ```text
//! | dst mac | src mac | 0x0806 | htype 1 | ptype 0x0800 | 6 | 4 | op | sha | spa | tha | tpa |
//! ```
//!
//! Encoding always produces exactly [`ARP_FRAME_SIZE`] bytes. Decoding accepts
//! longer buffers because drivers pad short frames to the 60 byte Ethernet
//! minimum.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use pnet::packet::Packet;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::util::MacAddr;

use crate::error::FrameError;

/// Broadcast MAC address for ARP requests.
pub const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);

/// Size of the Ethernet header.
const ETHERNET_HEADER_SIZE: usize = 14;

/// Size of an ARP packet payload.
const ARP_PACKET_SIZE: usize = 28;

/// Size of an Ethernet frame with ARP payload.
pub const ARP_FRAME_SIZE: usize = ETHERNET_HEADER_SIZE + ARP_PACKET_SIZE;

/// ARP opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Request,
    Reply,
}

/// A decoded ARP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpFrame {
    pub operation: Operation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpFrame {
    /// A "who has `target_ip`" request. The target MAC is left zeroed.
    pub const fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: Operation::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr(0, 0, 0, 0, 0, 0),
            target_ip,
        }
    }

    /// A reply telling `target_ip` that `sender_ip` is at `sender_mac`.
    pub const fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: Operation::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Ethernet destination: broadcast for requests, the target for replies.
    pub const fn destination(&self) -> MacAddr {
        match self.operation {
            Operation::Request => BROADCAST_MAC,
            Operation::Reply => self.target_mac,
        }
    }

    /// Encode into a fresh [`ARP_FRAME_SIZE`] byte buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; ARP_FRAME_SIZE];

        // Ethernet header
        if let Some(mut ethernet) = MutableEthernetPacket::new(&mut buffer) {
            ethernet.set_destination(self.destination());
            ethernet.set_source(self.sender_mac);
            ethernet.set_ethertype(EtherTypes::Arp);
        }

        // ARP payload
        if let Some(mut arp) = MutableArpPacket::new(&mut buffer[ETHERNET_HEADER_SIZE..]) {
            arp.set_hardware_type(ArpHardwareTypes::Ethernet);
            arp.set_protocol_type(EtherTypes::Ipv4);
            arp.set_hw_addr_len(6);
            arp.set_proto_addr_len(4);
            arp.set_operation(match self.operation {
                Operation::Request => ArpOperations::Request,
                Operation::Reply => ArpOperations::Reply,
            });
            arp.set_sender_hw_addr(self.sender_mac);
            arp.set_sender_proto_addr(self.sender_ip);
            arp.set_target_hw_addr(self.target_mac);
            arp.set_target_proto_addr(self.target_ip);
        }

        buffer
    }

    /// Decode an Ethernet frame, rejecting anything that is not Ethernet/IPv4 ARP.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < ARP_FRAME_SIZE {
            return Err(FrameError::TooShort { len: frame.len() });
        }

        let ethernet = EthernetPacket::new(frame).ok_or(FrameError::TooShort { len: frame.len() })?;
        if ethernet.get_ethertype() != EtherTypes::Arp {
            return Err(FrameError::NotArp(ethernet.get_ethertype().0));
        }

        let arp = ArpPacket::new(ethernet.payload()).ok_or(FrameError::TooShort { len: frame.len() })?;
        if arp.get_hardware_type() != ArpHardwareTypes::Ethernet {
            return Err(FrameError::HardwareType(arp.get_hardware_type().0));
        }
        if arp.get_protocol_type() != EtherTypes::Ipv4 {
            return Err(FrameError::ProtocolType(arp.get_protocol_type().0));
        }
        if arp.get_hw_addr_len() != 6 || arp.get_proto_addr_len() != 4 {
            return Err(FrameError::AddressLengths {
                hardware: arp.get_hw_addr_len(),
                protocol: arp.get_proto_addr_len(),
            });
        }

        let operation = match arp.get_operation() {
            ArpOperations::Request => Operation::Request,
            ArpOperations::Reply => Operation::Reply,
            other => return Err(FrameError::Operation(other.0)),
        };

        Ok(Self {
            operation,
            sender_mac: arp.get_sender_hw_addr(),
            sender_ip: arp.get_sender_proto_addr(),
            target_mac: arp.get_target_hw_addr(),
            target_ip: arp.get_target_proto_addr(),
        })
    }
}

/// A host that answered an ARP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// ARP table mapping IP addresses to MAC addresses.
///
/// Inserting an IP that is already present replaces its MAC.
#[derive(Debug, Clone, Default)]
pub struct ArpTable {
    entries: Arc<RwLock<HashMap<Ipv4Addr, MacAddr>>>,
}

impl ArpTable {
    /// Create a new empty ARP table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an entry, returning the MAC it replaced.
    pub fn insert(&self, ip: Ipv4Addr, mac: MacAddr) -> Option<MacAddr> {
        self.entries.write().insert(ip, mac)
    }

    /// Get the MAC address for an IP.
    pub fn get(&self, ip: &Ipv4Addr) -> Option<MacAddr> {
        self.entries.read().get(ip).copied()
    }

    /// All entries, ordered by IP address.
    pub fn all(&self) -> Vec<DiscoveredHost> {
        let mut hosts: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(&ip, &mac)| DiscoveredHost { ip, mac })
            .collect();
        hosts.sort_unstable_by_key(|host| host.ip);
        hosts
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
