//! Error types for ARP discovery and blocking.

use std::io;
use std::net::Ipv4Addr;

use pnet::ipnetwork::Ipv4Network;
use thiserror::Error;

/// Main error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("scan.window_ms must be greater than 0")]
    ZeroScanWindow,

    #[error("scan.poll_interval_ms must be greater than 0")]
    ZeroPollInterval,

    #[error("scan.poll_interval_ms ({poll_ms}) must not exceed scan.window_ms ({window_ms})")]
    PollIntervalExceedsWindow { poll_ms: u64, window_ms: u64 },

    #[error("scan.max_hosts must be greater than 0")]
    ZeroMaxHosts,

    #[error("block.interval_ms must be greater than 0")]
    ZeroBlockInterval,

    #[error("block.resolve_attempts must be greater than 0")]
    ZeroResolveAttempts,

    #[error("block.resolve_timeout_ms must be greater than 0")]
    ZeroResolveTimeout,
}

/// Network-related errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("permission denied opening raw socket on {interface} (root required)")]
    PermissionDenied { interface: String },

    #[error("no such interface: {0}")]
    NoSuchInterface(String),

    #[error("interface {0} has no usable IPv4 address")]
    NoIpv4Address(String),

    #[error("interface {0} has no default gateway")]
    NoGateway(String),

    #[error("no interface has a network containing {0}")]
    NoRoute(Ipv4Addr),

    #[error("raw socket on {interface} is already in use")]
    AddressInUse { interface: String },

    #[error("failed to open datalink channel: {0}")]
    ChannelOpen(String),

    #[error("unsupported channel type")]
    UnsupportedChannel,

    #[error("failed to send frame: {0}")]
    SendFailed(String),

    #[error("failed to receive frame: {0}")]
    ReceiveFailed(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("could not resolve MAC address of {ip}")]
    ResolutionFailed { ip: Ipv4Addr },

    #[error("{network} has {hosts} candidate hosts, more than the configured maximum of {max}")]
    SubnetTooLarge {
        network: Ipv4Network,
        hosts: u64,
        max: usize,
    },

    #[error("failed to read routing table: {0}")]
    RouteTable(String),
}

/// Reasons an inbound buffer is not accepted as an ARP-over-Ethernet frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is {len} bytes, shorter than an ARP frame")]
    TooShort { len: usize },

    #[error("ethertype {0:#06x} is not ARP")]
    NotArp(u16),

    #[error("hardware type {0} is not Ethernet")]
    HardwareType(u16),

    #[error("protocol type {0:#06x} is not IPv4")]
    ProtocolType(u16),

    #[error("address lengths ({hardware}, {protocol}) are not (6, 4)")]
    AddressLengths { hardware: u8, protocol: u8 },

    #[error("unknown ARP operation {0}")]
    Operation(u16),
}

/// Errors raised by the block session registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0} is already being blocked")]
    AlreadyActive(Ipv4Addr),

    #[error("session for {0} has not resolved its peers yet")]
    NotResolved(Ipv4Addr),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
