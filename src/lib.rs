//! Arpblock - ARP discovery and per-host blocking on the local segment.
//!
//! The `pnet` binary lists interfaces, sweeps a subnet with ARP requests to
//! find live hosts, and cuts chosen hosts off their gateway by poisoning ARP
//! caches until it is told to stop.
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading and validation
//! - [`network`]: Interfaces, raw frame I/O and the ARP codec
//! - [`scan`]: Discovery sweep over an interface's subnet
//! - [`block`]: Per-target spoof loop
//! - [`session`]: Registry supervising concurrent block loops
//! - [`output`]: Text and JSON-lines records
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Frame I/O sits behind the [`network::FrameSender`] and
//! [`network::FrameReceiver`] traits, so scanning and blocking run against
//! in-memory frames:
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use arpblock::network::ArpFrame;
//! use pnet::util::MacAddr;
//!
//! let request = ArpFrame::request(
//!     MacAddr::new(0x02, 0, 0, 0, 0, 1),
//!     Ipv4Addr::new(192, 168, 1, 100),
//!     Ipv4Addr::new(192, 168, 1, 1),
//! );
//! assert_eq!(ArpFrame::decode(&request.encode()).unwrap(), request);
//! ```
//!
//! Opening a real channel requires root privileges. Only use the blocking
//! side on networks you own or manage.

pub mod block;
pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod scan;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
