//! Interface enumeration and per-interface default gateways.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::{IpNetwork, Ipv4Network};
use pnet::util::MacAddr;
use tracing::{debug, warn};

use crate::error::{NetworkError, Result};

/// Kernel route flag: route is usable.
const RTF_UP: u32 = 0x0001;

/// Kernel route flag: destination is reached through a gateway.
const RTF_GATEWAY: u32 = 0x0002;

/// Snapshot of one usable interface.
///
/// Address and prefix live together in `network`, so an interface either has
/// both or is not described at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub mac: MacAddr,
    pub network: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
}

impl InterfaceDescriptor {
    /// Describe `interface` if it is up, not loopback, has a hardware address
    /// and an IPv4 address.
    pub fn from_interface(
        interface: &NetworkInterface,
        gateways: &HashMap<String, Ipv4Addr>,
    ) -> Option<Self> {
        if !interface.is_up() || interface.is_loopback() {
            return None;
        }

        let mac = interface.mac.filter(|mac| *mac != MacAddr::zero())?;
        let network = interface.ips.iter().find_map(|ip| match ip {
            IpNetwork::V4(v4) => Some(*v4),
            IpNetwork::V6(_) => None,
        })?;

        Some(Self {
            name: interface.name.clone(),
            mac,
            network,
            gateway: gateways
                .get(&interface.name)
                .copied()
                .filter(|gw| !gw.is_unspecified()),
        })
    }

    /// Our IPv4 address on this interface.
    pub fn ipv4(&self) -> Ipv4Addr {
        self.network.ip()
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Whether a default route through a real gateway leaves this interface.
    pub fn has_usable_gateway(&self) -> bool {
        self.gateway.is_some_and(|gw| !gw.is_unspecified())
    }

    /// Whether `ip` is on this interface's subnet.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.network.contains(ip)
    }
}

impl fmt::Display for InterfaceDescriptor {
    /// `<name> : <MAC>, <ip>/<prefix>[, <gateway>]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {}, {}/{}",
            self.name,
            format_mac(self.mac),
            self.ipv4(),
            self.prefix()
        )?;
        if let Some(gateway) = self.gateway {
            write!(f, ", {gateway}")?;
        }
        Ok(())
    }
}

/// Uppercase, colon separated MAC.
pub fn format_mac(mac: MacAddr) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac.0, mac.1, mac.2, mac.3, mac.4, mac.5
    )
}

/// Describe every usable interface on the host.
///
/// A route table that cannot be read only costs the gateway column.
pub fn enumerate() -> Vec<InterfaceDescriptor> {
    let gateways = default_gateways().unwrap_or_else(|err| {
        warn!("Continuing without gateways: {err}");
        HashMap::new()
    });

    datalink::interfaces()
        .iter()
        .filter_map(|iface| {
            let descriptor = InterfaceDescriptor::from_interface(iface, &gateways);
            if descriptor.is_none() {
                debug!(interface = %iface.name, "skipping interface without usable IPv4");
            }
            descriptor
        })
        .collect()
}

/// Keep only descriptors the scan screen can work with.
pub fn with_usable_gateway(
    descriptors: impl IntoIterator<Item = InterfaceDescriptor>,
) -> Vec<InterfaceDescriptor> {
    descriptors
        .into_iter()
        .filter(InterfaceDescriptor::has_usable_gateway)
        .collect()
}

/// Describe the named interface, with its gateway if one is routed.
pub fn describe(interface: &NetworkInterface) -> Result<InterfaceDescriptor> {
    let gateways = default_gateways().unwrap_or_else(|err| {
        warn!("Continuing without gateways: {err}");
        HashMap::new()
    });
    InterfaceDescriptor::from_interface(interface, &gateways)
        .ok_or_else(|| NetworkError::NoIpv4Address(interface.name.clone()).into())
}

/// Find the interface whose subnet contains `target`.
pub fn interface_for_target(target: Ipv4Addr) -> Result<NetworkInterface> {
    let candidates = datalink::interfaces();
    let gateways = default_gateways().unwrap_or_default();

    let name = candidates
        .iter()
        .filter_map(|iface| InterfaceDescriptor::from_interface(iface, &gateways))
        .find(|descriptor| descriptor.contains(target))
        .map(|descriptor| descriptor.name)
        .ok_or(NetworkError::NoRoute(target))?;

    candidates
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| NetworkError::NoSuchInterface(name).into())
}

/// Parse `/proc/net/route` into interface name to default gateway.
///
/// Addresses in that file are the raw in-memory `u32`, so they are converted
/// from host byte order. When an interface has several default routes the
/// lowest metric wins.
pub fn parse_route_table(content: &str) -> HashMap<String, Ipv4Addr> {
    let mut best: HashMap<String, (u32, Ipv4Addr)> = HashMap::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let (iface, dest, gateway, flags, metric, mask) =
            (fields[0], fields[1], fields[2], fields[3], fields[6], fields[7]);

        if dest != "00000000" || mask != "00000000" {
            continue;
        }

        let Ok(flags) = u32::from_str_radix(flags, 16) else {
            continue;
        };
        if flags & (RTF_UP | RTF_GATEWAY) != (RTF_UP | RTF_GATEWAY) {
            continue;
        }

        let Ok(raw) = u32::from_str_radix(gateway, 16) else {
            continue;
        };
        let gateway = Ipv4Addr::from(raw.to_be());
        if gateway.is_unspecified() {
            continue;
        }

        let metric = metric.parse().unwrap_or(u32::MAX);
        match best.get(iface) {
            Some(&(current, _)) if current <= metric => {}
            _ => {
                best.insert(iface.to_owned(), (metric, gateway));
            }
        }
    }

    best.into_iter()
        .map(|(iface, (_, gateway))| (iface, gateway))
        .collect()
}

/// Read the default gateway of every interface from the routing table.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn default_gateways() -> Result<HashMap<String, Ipv4Addr>> {
    let route = std::fs::read_to_string("/proc/net/route")
        .map_err(|e| NetworkError::RouteTable(e.to_string()))?;
    Ok(parse_route_table(&route))
}

/// Read the default gateway of every interface (macOS version).
#[cfg(target_os = "macos")]
pub fn default_gateways() -> Result<HashMap<String, Ipv4Addr>> {
    use std::process::Command;

    let output = Command::new("netstat")
        .args(["-rn", "-f", "inet"])
        .output()
        .map_err(|e| NetworkError::RouteTable(format!("Failed to run netstat: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut gateways = HashMap::new();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 4
            && fields[0] == "default"
            && let Ok(gateway) = fields[1].parse::<Ipv4Addr>()
        {
            gateways.entry(fields[3].to_owned()).or_insert(gateway);
        }
    }

    Ok(gateways)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
pub fn default_gateways() -> Result<HashMap<String, Ipv4Addr>> {
    Err(NetworkError::RouteTable("unsupported platform".into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t00000000\t0101A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
wlan0\t0001A8C0\t00000000\t0001\t0\t0\t600\t00FFFFFF\t0\t0\t0
eth0\t00000000\t01000A0A\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t00000000\tFE000A0A\t0003\t0\t0\t50\t00000000\t0\t0\t0
tun0\t00000000\t00000000\t0001\t0\t0\t0\t00000000\t0\t0\t0
rmnet0\t00000000\t0102A8C0\t0001\t0\t0\t0\t00000000\t0\t0\t0
";

    fn interface(name: &str, flags: u32, mac: Option<MacAddr>, ips: Vec<IpNetwork>) -> NetworkInterface {
        NetworkInterface {
            name: name.to_owned(),
            description: String::new(),
            index: 1,
            mac,
            ips,
            flags,
        }
    }

    fn v4(addr: [u8; 4], prefix: u8) -> IpNetwork {
        IpNetwork::V4(Ipv4Network::new(Ipv4Addr::from(addr), prefix).unwrap())
    }

    const UP: u32 = libc::IFF_UP as u32;
    const LOOPBACK: u32 = libc::IFF_LOOPBACK as u32;
    const MAC: MacAddr = MacAddr(0x02, 0x11, 0x22, 0x33, 0x44, 0x55);

    #[test]
    #[cfg(target_endian = "little")]
    fn should_parse_default_gateways_per_interface() {
        let gateways = parse_route_table(ROUTE_TABLE);

        assert_eq!(gateways.get("wlan0"), Some(&Ipv4Addr::new(192, 168, 1, 1)));
        // Lower metric wins
        assert_eq!(gateways.get("eth0"), Some(&Ipv4Addr::new(10, 10, 0, 254)));
        // No gateway address, or gateway flag unset
        assert!(!gateways.contains_key("tun0"));
        assert!(!gateways.contains_key("rmnet0"));
    }

    #[test]
    fn should_ignore_header_and_garbage_lines() {
        let gateways = parse_route_table("Iface Destination Gateway\nnot a route\n\n");
        assert!(gateways.is_empty());
    }

    #[test]
    fn should_describe_up_interface_with_ipv4() {
        let iface = interface(
            "wlan0",
            UP,
            Some(MAC),
            vec![
                IpNetwork::V6("fe80::1".parse().unwrap()),
                v4([192, 168, 1, 42], 24),
            ],
        );
        let gateways = HashMap::from([("wlan0".to_owned(), Ipv4Addr::new(192, 168, 1, 1))]);

        let descriptor = InterfaceDescriptor::from_interface(&iface, &gateways).unwrap();
        assert_eq!(descriptor.ipv4(), Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(descriptor.prefix(), 24);
        assert_eq!(descriptor.gateway, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(descriptor.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!descriptor.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn should_skip_loopback_down_and_ipv6_only_interfaces() {
        let gateways = HashMap::new();

        let lo = interface("lo", UP | LOOPBACK, Some(MacAddr::zero()), vec![v4([127, 0, 0, 1], 8)]);
        assert!(InterfaceDescriptor::from_interface(&lo, &gateways).is_none());

        let down = interface("eth1", 0, Some(MAC), vec![v4([10, 0, 0, 2], 24)]);
        assert!(InterfaceDescriptor::from_interface(&down, &gateways).is_none());

        let v6_only = interface("wlan1", UP, Some(MAC), vec![IpNetwork::V6("fe80::2".parse().unwrap())]);
        assert!(InterfaceDescriptor::from_interface(&v6_only, &gateways).is_none());

        let no_mac = interface("tun0", UP, None, vec![v4([10, 8, 0, 2], 24)]);
        assert!(InterfaceDescriptor::from_interface(&no_mac, &gateways).is_none());
    }

    #[test]
    fn should_render_summary_line() {
        let iface = interface("wlan0", UP, Some(MAC), vec![v4([192, 168, 1, 42], 24)]);

        let with_gateway = InterfaceDescriptor::from_interface(
            &iface,
            &HashMap::from([("wlan0".to_owned(), Ipv4Addr::new(192, 168, 1, 1))]),
        )
        .unwrap();
        assert_eq!(
            with_gateway.to_string(),
            "wlan0 : 02:11:22:33:44:55, 192.168.1.42/24, 192.168.1.1"
        );

        let without = InterfaceDescriptor::from_interface(&iface, &HashMap::new()).unwrap();
        assert_eq!(without.to_string(), "wlan0 : 02:11:22:33:44:55, 192.168.1.42/24");
    }

    #[test]
    fn should_drop_interfaces_without_usable_gateway() {
        let base = InterfaceDescriptor {
            name: "wlan0".into(),
            mac: MAC,
            network: Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 42), 24).unwrap(),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        };
        let no_gateway = InterfaceDescriptor {
            name: "eth0".into(),
            gateway: None,
            ..base.clone()
        };
        let default_route = InterfaceDescriptor {
            name: "rmnet0".into(),
            gateway: Some(Ipv4Addr::UNSPECIFIED),
            ..base.clone()
        };

        let kept = with_usable_gateway([base.clone(), no_gateway, default_route]);
        assert_eq!(kept, vec![base]);
    }

    #[test]
    fn should_normalise_unspecified_gateway_to_absent() {
        let iface = interface("wlan0", UP, Some(MAC), vec![v4([192, 168, 1, 42], 24)]);
        let gateways = HashMap::from([("wlan0".to_owned(), Ipv4Addr::UNSPECIFIED)]);

        let descriptor = InterfaceDescriptor::from_interface(&iface, &gateways).unwrap();
        assert_eq!(descriptor.gateway, None);
        assert!(!descriptor.has_usable_gateway());
    }

    #[test]
    fn should_format_mac_uppercase() {
        assert_eq!(
            format_mac(MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01)),
            "AA:BB:CC:DD:EE:01"
        );
    }
}
