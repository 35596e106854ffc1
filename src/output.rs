//! Records written to stdout, as legacy text lines or versioned JSON lines.

use std::io::Write;
use std::net::Ipv4Addr;

use pnet::util::MacAddr;
use serde::Serialize;

use crate::error::Result;
use crate::network::{DiscoveredHost, InterfaceDescriptor, format_mac};

/// Version stamped on every JSON record.
pub const SCHEMA_VERSION: u32 = 1;

/// Output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One whitespace-delimited line per record.
    #[default]
    Text,
    /// One JSON object per line, tagged with `v` and `kind`.
    Json,
}

/// A single output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Interface {
        name: String,
        mac: String,
        ip: Ipv4Addr,
        prefix: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        gateway: Option<Ipv4Addr>,
    },
    Host {
        ip: Ipv4Addr,
        mac: String,
    },
    Blocking {
        target: Ipv4Addr,
        mac: String,
        interface: String,
    },
    Released {
        target: Ipv4Addr,
    },
}

impl From<&InterfaceDescriptor> for Record {
    fn from(descriptor: &InterfaceDescriptor) -> Self {
        Self::Interface {
            name: descriptor.name.clone(),
            mac: format_mac(descriptor.mac),
            ip: descriptor.ipv4(),
            prefix: descriptor.prefix(),
            gateway: descriptor.gateway,
        }
    }
}

impl From<DiscoveredHost> for Record {
    fn from(host: DiscoveredHost) -> Self {
        Self::Host {
            ip: host.ip,
            mac: format_mac(host.mac),
        }
    }
}

impl Record {
    /// A target whose MAC was resolved and is now being blocked.
    pub fn blocking(target: Ipv4Addr, mac: MacAddr, interface: &str) -> Self {
        Self::Blocking {
            target,
            mac: format_mac(mac),
            interface: interface.to_owned(),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Interface {
                name,
                mac,
                ip,
                prefix,
                gateway,
            } => match gateway {
                Some(gateway) => format!("{name} : {mac}, {ip}/{prefix}, {gateway}"),
                None => format!("{name} : {mac}, {ip}/{prefix}"),
            },
            Self::Host { ip, mac } => format!("{ip} {mac}"),
            Self::Blocking { target, mac, .. } => format!("blocking {target} {mac}"),
            Self::Released { target } => format!("released {target}"),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    v: u32,
    #[serde(flatten)]
    record: &'a Record,
}

/// Writes records to a sink, one per line, flushing after each.
pub struct Emitter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> Emitter<W> {
    pub const fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn emit(&mut self, record: &Record) -> Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{}", record.to_text())?,
            OutputFormat::Json => {
                serde_json::to_writer(
                    &mut self.out,
                    &Envelope {
                        v: SCHEMA_VERSION,
                        record,
                    },
                )?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
