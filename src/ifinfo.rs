//! Network interface registry.
//!
//! Populated once at capture open (from the OS on live captures, from the
//! interface-list block on file captures). Events never mutate it; explicit
//! import calls may append.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Result, SinspError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4IfInfo {
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6IfInfo {
    pub name: String,
    pub addr: Ipv6Addr,
    pub netmask: Ipv6Addr,
}

/// Ordered view of the machine's interfaces.
#[derive(Debug, Clone, Default)]
pub struct NetworkInterfaces {
    v4: Vec<Ipv4IfInfo>,
    v6: Vec<Ipv6IfInfo>,
}

impl NetworkInterfaces {
    pub fn new() -> Self {
        NetworkInterfaces::default()
    }

    /// Snapshot the live system's interfaces.
    pub fn import_from_os(&mut self) -> Result<()> {
        let addrs = nix::ifaddrs::getifaddrs().map_err(|e| SinspError::SourceOpen {
            path: "getifaddrs".into(),
            message: e.to_string(),
        })?;

        for ifaddr in addrs {
            let Some(address) = ifaddr.address else {
                continue;
            };
            if let Some(sin) = address.as_sockaddr_in() {
                let netmask = ifaddr
                    .netmask
                    .and_then(|m| m.as_sockaddr_in().map(|s| Ipv4Addr::from(s.ip())))
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                self.v4.push(Ipv4IfInfo {
                    name: ifaddr.interface_name.clone(),
                    addr: Ipv4Addr::from(sin.ip()),
                    netmask,
                });
            } else if let Some(sin6) = address.as_sockaddr_in6() {
                let netmask = ifaddr
                    .netmask
                    .and_then(|m| m.as_sockaddr_in6().map(|s| s.ip()))
                    .unwrap_or(Ipv6Addr::UNSPECIFIED);
                self.v6.push(Ipv6IfInfo {
                    name: ifaddr.interface_name.clone(),
                    addr: sin6.ip(),
                    netmask,
                });
            }
        }
        Ok(())
    }

    /// Replace the view with explicit lists (file-capture import).
    pub fn import_interfaces(&mut self, v4: Vec<Ipv4IfInfo>, v6: Vec<Ipv6IfInfo>) {
        self.v4 = v4;
        self.v6 = v6;
    }

    /// Append one ipv4 interface.
    pub fn import_ipv4(&mut self, iface: Ipv4IfInfo) {
        self.v4.push(iface);
    }

    pub fn get_ipv4_list(&self) -> &[Ipv4IfInfo] {
        &self.v4
    }

    pub fn get_ipv6_list(&self) -> &[Ipv6IfInfo] {
        &self.v6
    }

    /// Find the interface whose subnet contains `addr`. Linear scan; the
    /// list is small.
    pub fn best_match(&self, addr: IpAddr) -> Option<String> {
        match addr {
            IpAddr::V4(a) => {
                let needle = u32::from(a);
                self.v4
                    .iter()
                    .find(|i| {
                        let mask = u32::from(i.netmask);
                        u32::from(i.addr) & mask == needle & mask && mask != 0
                    })
                    .map(|i| i.name.clone())
            }
            IpAddr::V6(a) => {
                let needle = u128::from(a);
                self.v6
                    .iter()
                    .find(|i| {
                        let mask = u128::from(i.netmask);
                        u128::from(i.addr) & mask == needle & mask && mask != 0
                    })
                    .map(|i| i.name.clone())
            }
        }
    }

    /// True if `addr` is one of this machine's own addresses.
    pub fn is_local_addr(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.v4.iter().any(|i| i.addr == a),
            IpAddr::V6(a) => self.v6.iter().any(|i| i.addr == a),
        }
    }
}
