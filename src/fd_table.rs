//! Per-thread file descriptor tables.
//!
//! Each thread record owns one [`FdTable`] mapping fd numbers to descriptors.
//! Descriptors are copied, never shared: dup semantics clone the descriptor
//! into the target slot. The inspector loop is the only mutator.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family tags used in the socket tuple wire encoding.
const AF_UNIX_TAG: u8 = 1;
const AF_INET_TAG: u8 = 2;
const AF_INET6_TAG: u8 = 10;

/// Transport endpoints of a socket, as reconstructed from bind/connect/accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockTuple {
    V4 {
        proto: u8,
        sip: Ipv4Addr,
        sport: u16,
        dip: Ipv4Addr,
        dport: u16,
    },
    V6 {
        proto: u8,
        sip: Ipv6Addr,
        sport: u16,
        dip: Ipv6Addr,
        dport: u16,
    },
    Unix {
        path: String,
    },
}

impl SockTuple {
    /// Swap source and destination endpoints. Used when an accepted socket
    /// mirrors the server socket's tuple.
    pub fn inverted(&self) -> SockTuple {
        match self {
            SockTuple::V4 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => SockTuple::V4 {
                proto: *proto,
                sip: *dip,
                sport: *dport,
                dip: *sip,
                dport: *sport,
            },
            SockTuple::V6 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => SockTuple::V6 {
                proto: *proto,
                sip: *dip,
                sport: *dport,
                dip: *sip,
                dport: *sport,
            },
            SockTuple::Unix { path } => SockTuple::Unix { path: path.clone() },
        }
    }

    pub fn source_addr(&self) -> Option<IpAddr> {
        match self {
            SockTuple::V4 { sip, .. } => Some(IpAddr::V4(*sip)),
            SockTuple::V6 { sip, .. } => Some(IpAddr::V6(*sip)),
            SockTuple::Unix { .. } => None,
        }
    }

    pub fn dest_addr(&self) -> Option<IpAddr> {
        match self {
            SockTuple::V4 { dip, .. } => Some(IpAddr::V4(*dip)),
            SockTuple::V6 { dip, .. } => Some(IpAddr::V6(*dip)),
            SockTuple::Unix { .. } => None,
        }
    }

    /// Wire encoding used inside event parameters and capture files.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        match self {
            SockTuple::V4 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => {
                buf.push(AF_INET_TAG);
                buf.push(*proto);
                buf.extend_from_slice(&sip.octets());
                buf.extend_from_slice(&sport.to_le_bytes());
                buf.extend_from_slice(&dip.octets());
                buf.extend_from_slice(&dport.to_le_bytes());
            }
            SockTuple::V6 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => {
                buf.push(AF_INET6_TAG);
                buf.push(*proto);
                buf.extend_from_slice(&sip.octets());
                buf.extend_from_slice(&sport.to_le_bytes());
                buf.extend_from_slice(&dip.octets());
                buf.extend_from_slice(&dport.to_le_bytes());
            }
            SockTuple::Unix { path } => {
                buf.push(AF_UNIX_TAG);
                buf.push(0);
                buf.extend_from_slice(path.as_bytes());
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<SockTuple> {
        if buf.len() < 2 {
            return None;
        }
        let proto = buf[1];
        match buf[0] {
            AF_INET_TAG => {
                if buf.len() < 14 {
                    return None;
                }
                let sip = Ipv4Addr::new(buf[2], buf[3], buf[4], buf[5]);
                let sport = u16::from_le_bytes([buf[6], buf[7]]);
                let dip = Ipv4Addr::new(buf[8], buf[9], buf[10], buf[11]);
                let dport = u16::from_le_bytes([buf[12], buf[13]]);
                Some(SockTuple::V4 {
                    proto,
                    sip,
                    sport,
                    dip,
                    dport,
                })
            }
            AF_INET6_TAG => {
                if buf.len() < 38 {
                    return None;
                }
                let mut s = [0u8; 16];
                s.copy_from_slice(&buf[2..18]);
                let sport = u16::from_le_bytes([buf[18], buf[19]]);
                let mut d = [0u8; 16];
                d.copy_from_slice(&buf[20..36]);
                let dport = u16::from_le_bytes([buf[36], buf[37]]);
                Some(SockTuple::V6 {
                    proto,
                    sip: Ipv6Addr::from(s),
                    sport,
                    dip: Ipv6Addr::from(d),
                    dport,
                })
            }
            AF_UNIX_TAG => Some(SockTuple::Unix {
                path: String::from_utf8_lossy(&buf[2..]).into_owned(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for SockTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockTuple::V4 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => {
                let proto_str = proto_name(*proto);
                write!(f, "{proto_str}:{sip}:{sport}->{dip}:{dport}")
            }
            SockTuple::V6 {
                proto,
                sip,
                sport,
                dip,
                dport,
            } => {
                let proto_str = proto_name(*proto);
                write!(f, "{proto_str}:[{sip}]:{sport}->[{dip}]:{dport}")
            }
            SockTuple::Unix { path } => write!(f, "unix:{path}"),
        }
    }
}

fn proto_name(proto: u8) -> &'static str {
    match proto {
        6 => "TCP",
        17 => "UDP",
        _ => "RAW",
    }
}

/// Kind of object an FD refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdType {
    File,
    Directory,
    Ipv4Sock,
    Ipv6Sock,
    UnixSock,
    Pipe,
    EventFd,
    SignalFd,
    Inotify,
    TimerFd,
    Other,
}

impl FdType {
    pub fn name(&self) -> &'static str {
        match self {
            FdType::File => "file",
            FdType::Directory => "directory",
            FdType::Ipv4Sock => "ipv4",
            FdType::Ipv6Sock => "ipv6",
            FdType::UnixSock => "unix",
            FdType::Pipe => "pipe",
            FdType::EventFd => "eventfd",
            FdType::SignalFd => "signalfd",
            FdType::Inotify => "inotify",
            FdType::TimerFd => "timerfd",
            FdType::Other => "other",
        }
    }
}

/// Reconstructed state for one open file descriptor on one thread.
#[derive(Debug, Clone)]
pub struct FdDesc {
    pub fd: i64,
    pub ftype: FdType,
    /// Path for files and directories, endpoint path for unix sockets,
    /// empty otherwise.
    pub name: String,
    /// Populated for socket FDs once bind/connect/accept has been seen.
    pub tuple: Option<SockTuple>,
    pub open_flags: u32,
    pub cloexec: bool,
}

impl FdDesc {
    pub fn new(fd: i64, ftype: FdType) -> Self {
        FdDesc {
            fd,
            ftype,
            name: String::new(),
            tuple: None,
            open_flags: 0,
            cloexec: false,
        }
    }

    pub fn with_name(fd: i64, ftype: FdType, name: impl Into<String>) -> Self {
        let mut desc = Self::new(fd, ftype);
        desc.name = name.into();
        desc
    }

    pub fn is_socket(&self) -> bool {
        matches!(
            self.ftype,
            FdType::Ipv4Sock | FdType::Ipv6Sock | FdType::UnixSock
        )
    }
}

/// Map from fd number to descriptor, owned by one thread record.
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    fds: HashMap<i64, FdDesc>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable::default()
    }

    pub fn get(&self, fd: i64) -> Option<&FdDesc> {
        self.fds.get(&fd)
    }

    pub fn get_mut(&mut self, fd: i64) -> Option<&mut FdDesc> {
        self.fds.get_mut(&fd)
    }

    /// Insert a descriptor, returning the displaced one if the slot was
    /// occupied. The caller reports the displacement as a synthetic close
    /// to any registered decoders.
    pub fn add(&mut self, desc: FdDesc) -> Option<FdDesc> {
        self.fds.insert(desc.fd, desc)
    }

    pub fn remove(&mut self, fd: i64) -> Option<FdDesc> {
        self.fds.remove(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FdDesc> {
        self.fds.values()
    }

    /// Drop every descriptor flagged close-on-exec. Runs on execve.
    pub fn remove_cloexec(&mut self) -> Vec<FdDesc> {
        let doomed: Vec<i64> = self
            .fds
            .values()
            .filter(|d| d.cloexec)
            .map(|d| d.fd)
            .collect();
        doomed
            .into_iter()
            .filter_map(|fd| self.fds.remove(&fd))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_tuple() -> SockTuple {
        SockTuple::V4 {
            proto: 6,
            sip: Ipv4Addr::new(1, 2, 3, 4),
            sport: 1000,
            dip: Ipv4Addr::new(5, 6, 7, 8),
            dport: 80,
        }
    }

    #[test]
    fn tuple_encode_decode_v4() {
        let t = v4_tuple();
        assert_eq!(SockTuple::decode(&t.encode()), Some(t));
    }

    #[test]
    fn tuple_encode_decode_v6() {
        let t = SockTuple::V6 {
            proto: 17,
            sip: "2001:db8::1".parse().unwrap(),
            sport: 5353,
            dip: "2001:db8::2".parse().unwrap(),
            dport: 53,
        };
        assert_eq!(SockTuple::decode(&t.encode()), Some(t));
    }

    #[test]
    fn tuple_inverted_swaps_endpoints() {
        let t = v4_tuple().inverted();
        match t {
            SockTuple::V4 {
                sip, sport, dport, ..
            } => {
                assert_eq!(sip, Ipv4Addr::new(5, 6, 7, 8));
                assert_eq!(sport, 80);
                assert_eq!(dport, 1000);
            }
            _ => panic!("wrong family"),
        }
    }

    #[test]
    fn add_replaces_and_returns_old() {
        let mut table = FdTable::new();
        assert!(table.add(FdDesc::with_name(5, FdType::File, "/tmp/a")).is_none());
        let old = table.add(FdDesc::with_name(5, FdType::File, "/tmp/b"));
        assert_eq!(old.unwrap().name, "/tmp/a");
        assert_eq!(table.get(5).unwrap().name, "/tmp/b");
    }

    #[test]
    fn remove_cloexec_only_drops_flagged() {
        let mut table = FdTable::new();
        let mut keep = FdDesc::with_name(3, FdType::File, "/keep");
        keep.cloexec = false;
        let mut drop = FdDesc::with_name(4, FdType::File, "/drop");
        drop.cloexec = true;
        table.add(keep);
        table.add(drop);

        let removed = table.remove_cloexec();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].fd, 4);
        assert!(table.get(3).is_some());
        assert!(table.get(4).is_none());
    }
}
