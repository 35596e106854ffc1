//! Network-related modules: interfaces, raw frame I/O and the ARP codec.

pub mod arp;
mod capture;
pub mod interfaces;

pub use arp::{ArpFrame, ArpTable, DiscoveredHost, Operation};
pub use capture::{FrameReceiver, FrameSender, PnetCapture, PnetSender, find_interface};
pub use interfaces::{InterfaceDescriptor, format_mac};

#[cfg(test)]
pub(crate) use capture::tests::{MockCapture, MockSender};
