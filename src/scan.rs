//! ARP discovery sweep over an interface's subnet.
//!
//! The scan is single-threaded. Requests go out in batches of
//! [`SEND_BATCH`], and whatever the socket has buffered is drained between
//! batches so early replies are not lost to a full receive buffer on large
//! subnets. Once every request is out, inbound frames are read until the
//! discovery window closes.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::ipnetwork::Ipv4Network;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ScanSettings;
use crate::error::{NetworkError, Result};
use crate::network::{
    ArpFrame, ArpTable, DiscoveredHost, FrameReceiver, FrameSender, InterfaceDescriptor,
    Operation,
};

/// Requests sent between two drains of the receive buffer.
pub const SEND_BATCH: usize = 64;

/// Parameters of a single scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Replies are accepted until this long after the scan starts.
    pub window: Duration,
    /// Refuse subnets with more candidate addresses than this.
    pub max_hosts: usize,
}

impl From<&ScanSettings> for ScanOptions {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            window: settings.window(),
            max_hosts: settings.max_hosts,
        }
    }
}

/// Number of addresses [`candidate_hosts`] yields for a prefix.
pub const fn candidate_count(prefix: u8) -> u64 {
    let size = 1u64 << (32 - prefix as u32);
    if prefix >= 31 { size } else { size - 2 }
}

/// Every host address of `network`.
///
/// The network and broadcast addresses are skipped, except on /31 and /32
/// where every address is a host.
pub fn candidate_hosts(network: Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    let prefix = network.prefix();
    let base = u64::from(u32::from(network.network()));
    let size = 1u64 << (32 - u32::from(prefix));
    let range = if prefix >= 31 { 0..size } else { 1..size - 1 };

    range.filter_map(move |offset| u32::try_from(base + offset).ok().map(Ipv4Addr::from))
}

/// Discovery scanner bound to one interface.
pub struct Scanner<S, C> {
    descriptor: InterfaceDescriptor,
    sender: S,
    capture: C,
    options: ScanOptions,
}

impl<S: FrameSender, C: FrameReceiver> Scanner<S, C> {
    pub const fn new(
        descriptor: InterfaceDescriptor,
        sender: S,
        capture: C,
        options: ScanOptions,
    ) -> Self {
        Self {
            descriptor,
            sender,
            capture,
            options,
        }
    }

    /// Sweep the subnet and collect replies until the window closes.
    ///
    /// Send failures abort the scan. Frames that fail to decode and transient
    /// receive errors are skipped. An empty result is not an error.
    #[instrument(skip(self), fields(interface = %self.descriptor.name, network = %self.descriptor.network))]
    pub fn scan(mut self) -> Result<ScanReport> {
        let network = self.descriptor.network;
        let hosts = candidate_count(network.prefix());
        if hosts > self.options.max_hosts as u64 {
            return Err(NetworkError::SubnetTooLarge {
                network,
                hosts,
                max: self.options.max_hosts,
            }
            .into());
        }

        let started = Instant::now();
        let deadline = started + self.options.window;
        let table = ArpTable::new();
        let mut requests_sent = 0;

        for target in candidate_hosts(network) {
            if Instant::now() >= deadline {
                warn!(requests_sent, "Discovery window closed before every request was sent");
                break;
            }
            let request = ArpFrame::request(self.descriptor.mac, self.descriptor.ipv4(), target);
            self.sender.send(&request.encode())?;
            requests_sent += 1;

            if requests_sent % SEND_BATCH == 0 {
                self.drain(&table, deadline);
            }
        }
        debug!(requests_sent, elapsed = ?started.elapsed(), "requests sent");

        while Instant::now() < deadline {
            match self.capture.next_frame() {
                Ok(Some(frame)) => self.accept(&frame, &table),
                Ok(None) => {}
                Err(err) => debug!("Ignoring receive error: {err}"),
            }
        }

        info!(hosts = table.len(), "Scan complete");
        Ok(ScanReport {
            table,
            requests_sent,
        })
    }

    /// Read buffered frames until the socket goes quiet.
    fn drain(&mut self, table: &ArpTable, deadline: Instant) {
        while Instant::now() < deadline {
            match self.capture.next_frame() {
                Ok(Some(frame)) => self.accept(&frame, table),
                Ok(None) => return,
                Err(err) => {
                    debug!("Ignoring receive error: {err}");
                    return;
                }
            }
        }
    }

    /// Record the sender of an ARP reply. Everything else is dropped.
    fn accept(&self, frame: &[u8], table: &ArpTable) {
        let arp = match ArpFrame::decode(frame) {
            Ok(arp) => arp,
            Err(err) => {
                trace!("Skipping frame: {err}");
                return;
            }
        };

        if arp.operation != Operation::Reply {
            return;
        }
        if arp.sender_ip == self.descriptor.ipv4() || arp.sender_ip.is_unspecified() {
            return;
        }

        if let Some(previous) = table.insert(arp.sender_ip, arp.sender_mac)
            && previous != arp.sender_mac
        {
            debug!(
                "{} answered from {} after {}, keeping the latest",
                arp.sender_ip, arp.sender_mac, previous
            );
        }
    }
}

/// Result of one scan. Each IP appears once, carrying the last MAC seen.
#[derive(Debug)]
pub struct ScanReport {
    table: ArpTable,
    requests_sent: usize,
}

impl ScanReport {
    /// Discovered hosts ordered by IP.
    pub fn hosts(&self) -> impl Iterator<Item = DiscoveredHost> + use<> {
        self.table.all().into_iter()
    }

    pub const fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
