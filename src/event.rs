//! Event model: raw frames, the reusable enriched event slot, typed
//! parameters, and the static event information tables.
//!
//! A raw frame is the wire unit shared by live drivers and capture files:
//! a fixed header followed by length-prefixed parameter payloads. The
//! enriched [`Event`] binds a frame to the reconstructed OS state for one
//! iteration of the inspector loop; it is overwritten by the next call to
//! `next()` and must not be retained.

use std::borrow::Cow;
use std::io::{self, Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use syscalls::Sysno;

use crate::fd_table::SockTuple;
use crate::utils::{pid_from_tgidpid, tid_from_tgidpid};

/// Event type codes. Bit 0 encodes the direction: even codes are enter
/// events, odd codes are the matching exit.
pub mod codes {
    pub const GENERIC: u16 = 0;
    pub const CLONE: u16 = 2;
    pub const EXECVE: u16 = 4;
    pub const OPEN: u16 = 6;
    pub const OPENAT: u16 = 8;
    pub const CREAT: u16 = 10;
    pub const SOCKET: u16 = 12;
    pub const BIND: u16 = 14;
    pub const CONNECT: u16 = 16;
    pub const ACCEPT: u16 = 18;
    pub const ACCEPT4: u16 = 20;
    pub const READ: u16 = 22;
    pub const WRITE: u16 = 24;
    pub const SEND: u16 = 26;
    pub const RECV: u16 = 28;
    pub const SENDTO: u16 = 30;
    pub const RECVFROM: u16 = 32;
    pub const CLOSE: u16 = 34;
    pub const DUP: u16 = 36;
    pub const DUP2: u16 = 38;
    pub const DUP3: u16 = 40;
    pub const SETUID: u16 = 42;
    pub const SETGID: u16 = 44;
    pub const EXIT: u16 = 46;
    pub const EXIT_GROUP: u16 = 48;
    pub const PIPE: u16 = 50;
    pub const EVENTFD: u16 = 52;
    pub const SIGNALFD: u16 = 54;
    pub const INOTIFY_INIT: u16 = 56;
    pub const TIMERFD_CREATE: u16 = 58;
    /// Meta event: interface list changed. Synthesized by the parser.
    pub const IFINFO_UPDATE: u16 = 60;
    /// Meta event: container discovered. Synthesized by the parser.
    pub const CONTAINER: u16 = 62;
    /// Reserved frame code wrapping state events that a filter would have
    /// dropped from a fatfile dump.
    pub const FATFILE_STATE: u16 = 64;
}

/// Whether an event marks syscall entry or completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    Enter,
    Exit,
}

impl EventDirection {
    pub fn from_code(etype: u16) -> EventDirection {
        if etype & 1 == 0 {
            EventDirection::Enter
        } else {
            EventDirection::Exit
        }
    }

    /// Rendering used in event output: `>` for enter, `<` for exit.
    pub fn symbol(&self) -> char {
        match self {
            EventDirection::Enter => '>',
            EventDirection::Exit => '<',
        }
    }
}

/// Dispatch category, independent of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Generic,
    Clone,
    Execve,
    Open,
    Openat,
    Creat,
    Socket,
    Bind,
    Connect,
    Accept,
    Accept4,
    Read,
    Write,
    Send,
    Recv,
    Sendto,
    Recvfrom,
    Close,
    Dup,
    Dup2,
    Dup3,
    Setuid,
    Setgid,
    Exit,
    ExitGroup,
    Pipe,
    EventFd,
    SignalFd,
    InotifyInit,
    TimerfdCreate,
    IfinfoUpdate,
    Container,
    FatfileState,
    /// Version-gated pass-through for codes this build does not know.
    Unknown(u16),
}

impl EventCategory {
    pub fn from_code(etype: u16) -> EventCategory {
        use codes::*;
        match etype & !1 {
            GENERIC => EventCategory::Generic,
            CLONE => EventCategory::Clone,
            EXECVE => EventCategory::Execve,
            OPEN => EventCategory::Open,
            OPENAT => EventCategory::Openat,
            CREAT => EventCategory::Creat,
            SOCKET => EventCategory::Socket,
            BIND => EventCategory::Bind,
            CONNECT => EventCategory::Connect,
            ACCEPT => EventCategory::Accept,
            ACCEPT4 => EventCategory::Accept4,
            READ => EventCategory::Read,
            WRITE => EventCategory::Write,
            SEND => EventCategory::Send,
            RECV => EventCategory::Recv,
            SENDTO => EventCategory::Sendto,
            RECVFROM => EventCategory::Recvfrom,
            CLOSE => EventCategory::Close,
            DUP => EventCategory::Dup,
            DUP2 => EventCategory::Dup2,
            DUP3 => EventCategory::Dup3,
            SETUID => EventCategory::Setuid,
            SETGID => EventCategory::Setgid,
            EXIT => EventCategory::Exit,
            EXIT_GROUP => EventCategory::ExitGroup,
            PIPE => EventCategory::Pipe,
            EVENTFD => EventCategory::EventFd,
            SIGNALFD => EventCategory::SignalFd,
            INOTIFY_INIT => EventCategory::InotifyInit,
            TIMERFD_CREATE => EventCategory::TimerfdCreate,
            IFINFO_UPDATE => EventCategory::IfinfoUpdate,
            CONTAINER => EventCategory::Container,
            FATFILE_STATE => EventCategory::FatfileState,
            other => EventCategory::Unknown(other),
        }
    }

    /// True for events synthesized by the parser rather than a driver.
    pub fn is_meta(&self) -> bool {
        matches!(self, EventCategory::IfinfoUpdate | EventCategory::Container)
    }

    /// True for events that mutate reconstructed state. Fatfile mode
    /// preserves these in the dump even when the filter drops them.
    pub fn carries_state(&self) -> bool {
        !matches!(
            self,
            EventCategory::Generic
                | EventCategory::Read
                | EventCategory::Write
                | EventCategory::Send
                | EventCategory::Recv
                | EventCategory::Sendto
                | EventCategory::Recvfrom
                | EventCategory::Unknown(_)
        )
    }
}

/// Typed interpretation of one event parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    U32,
    U64,
    I64,
    Fd,
    Pid,
    Str,
    Bytes,
    Tuple,
}

/// Description of one parameter slot in the event tables.
#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    pub name: &'static str,
    pub ptype: ParamType,
}

const fn p(name: &'static str, ptype: ParamType) -> ParamInfo {
    ParamInfo { name, ptype }
}

/// Static description of one event type.
#[derive(Debug, Clone, Copy)]
pub struct EventInfo {
    pub name: &'static str,
    /// Enter-direction type code; the exit code is `code | 1`.
    pub code: u16,
    pub enter_params: &'static [ParamInfo],
    pub exit_params: &'static [ParamInfo],
}

use ParamType::*;

/// Table of all event types this build understands, indexed by `code >> 1`.
pub static EVENT_TABLE: &[EventInfo] = &[
    EventInfo {
        name: "syscall",
        code: codes::GENERIC,
        enter_params: &[p("nr", U64)],
        exit_params: &[p("nr", U64), p("res", I64)],
    },
    EventInfo {
        name: "clone",
        code: codes::CLONE,
        enter_params: &[p("flags", U32)],
        exit_params: &[
            p("res", I64),
            p("exe", Str),
            p("args", Str),
            p("ptid", Pid),
            p("cwd", Str),
            p("flags", U32),
            p("uid", U32),
            p("gid", U32),
            p("comm", Str),
        ],
    },
    EventInfo {
        name: "execve",
        code: codes::EXECVE,
        enter_params: &[p("filename", Str)],
        exit_params: &[
            p("res", I64),
            p("exe", Str),
            p("args", Str),
            p("cwd", Str),
            p("env", Str),
        ],
    },
    EventInfo {
        name: "open",
        code: codes::OPEN,
        enter_params: &[p("name", Str), p("flags", U32), p("mode", U32)],
        exit_params: &[p("fd", Fd), p("name", Str), p("flags", U32), p("mode", U32)],
    },
    EventInfo {
        name: "openat",
        code: codes::OPENAT,
        enter_params: &[p("dirfd", Fd), p("name", Str), p("flags", U32), p("mode", U32)],
        exit_params: &[
            p("fd", Fd),
            p("dirfd", Fd),
            p("name", Str),
            p("flags", U32),
            p("mode", U32),
        ],
    },
    EventInfo {
        name: "creat",
        code: codes::CREAT,
        enter_params: &[p("name", Str), p("mode", U32)],
        exit_params: &[p("fd", Fd), p("name", Str), p("mode", U32)],
    },
    EventInfo {
        name: "socket",
        code: codes::SOCKET,
        enter_params: &[p("domain", U32), p("type", U32), p("proto", U32)],
        exit_params: &[p("fd", Fd), p("domain", U32), p("type", U32), p("proto", U32)],
    },
    EventInfo {
        name: "bind",
        code: codes::BIND,
        enter_params: &[p("fd", Fd)],
        exit_params: &[p("res", I64), p("fd", Fd), p("addr", Tuple)],
    },
    EventInfo {
        name: "connect",
        code: codes::CONNECT,
        enter_params: &[p("fd", Fd), p("addr", Tuple)],
        exit_params: &[p("res", I64), p("fd", Fd), p("tuple", Tuple)],
    },
    EventInfo {
        name: "accept",
        code: codes::ACCEPT,
        enter_params: &[],
        exit_params: &[p("fd", Fd), p("sockfd", Fd), p("tuple", Tuple)],
    },
    EventInfo {
        name: "accept4",
        code: codes::ACCEPT4,
        enter_params: &[p("flags", U32)],
        exit_params: &[p("fd", Fd), p("sockfd", Fd), p("tuple", Tuple)],
    },
    EventInfo {
        name: "read",
        code: codes::READ,
        enter_params: &[p("fd", Fd), p("size", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes)],
    },
    EventInfo {
        name: "write",
        code: codes::WRITE,
        enter_params: &[p("fd", Fd), p("size", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes)],
    },
    EventInfo {
        name: "send",
        code: codes::SEND,
        enter_params: &[p("fd", Fd), p("size", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes)],
    },
    EventInfo {
        name: "recv",
        code: codes::RECV,
        enter_params: &[p("fd", Fd), p("size", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes)],
    },
    EventInfo {
        name: "sendto",
        code: codes::SENDTO,
        enter_params: &[p("fd", Fd), p("size", U32), p("tuple", Tuple)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes)],
    },
    EventInfo {
        name: "recvfrom",
        code: codes::RECVFROM,
        enter_params: &[p("fd", Fd), p("size", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("data", Bytes), p("tuple", Tuple)],
    },
    EventInfo {
        name: "close",
        code: codes::CLOSE,
        enter_params: &[p("fd", Fd)],
        exit_params: &[p("res", I64), p("fd", Fd)],
    },
    EventInfo {
        name: "dup",
        code: codes::DUP,
        enter_params: &[p("fd", Fd)],
        exit_params: &[p("res", I64), p("fd", Fd)],
    },
    EventInfo {
        name: "dup2",
        code: codes::DUP2,
        enter_params: &[p("fd", Fd), p("newfd", Fd)],
        exit_params: &[p("res", I64), p("fd", Fd), p("newfd", Fd)],
    },
    EventInfo {
        name: "dup3",
        code: codes::DUP3,
        enter_params: &[p("fd", Fd), p("newfd", Fd), p("flags", U32)],
        exit_params: &[p("res", I64), p("fd", Fd), p("newfd", Fd), p("flags", U32)],
    },
    EventInfo {
        name: "setuid",
        code: codes::SETUID,
        enter_params: &[p("uid", U32)],
        exit_params: &[p("res", I64), p("uid", U32)],
    },
    EventInfo {
        name: "setgid",
        code: codes::SETGID,
        enter_params: &[p("gid", U32)],
        exit_params: &[p("res", I64), p("gid", U32)],
    },
    EventInfo {
        name: "exit",
        code: codes::EXIT,
        enter_params: &[p("status", I64)],
        exit_params: &[p("status", I64)],
    },
    EventInfo {
        name: "exit_group",
        code: codes::EXIT_GROUP,
        enter_params: &[p("status", I64)],
        exit_params: &[p("status", I64)],
    },
    EventInfo {
        name: "pipe",
        code: codes::PIPE,
        enter_params: &[],
        exit_params: &[p("res", I64), p("fd1", Fd), p("fd2", Fd)],
    },
    EventInfo {
        name: "eventfd",
        code: codes::EVENTFD,
        enter_params: &[p("initval", U64)],
        exit_params: &[p("fd", Fd)],
    },
    EventInfo {
        name: "signalfd",
        code: codes::SIGNALFD,
        enter_params: &[p("fd", Fd), p("mask", U64)],
        exit_params: &[p("fd", Fd)],
    },
    EventInfo {
        name: "inotify_init",
        code: codes::INOTIFY_INIT,
        enter_params: &[p("flags", U32)],
        exit_params: &[p("fd", Fd)],
    },
    EventInfo {
        name: "timerfd_create",
        code: codes::TIMERFD_CREATE,
        enter_params: &[p("clockid", U32)],
        exit_params: &[p("fd", Fd)],
    },
    EventInfo {
        name: "ifinfo",
        code: codes::IFINFO_UPDATE,
        enter_params: &[],
        exit_params: &[p("name", Str)],
    },
    EventInfo {
        name: "container",
        code: codes::CONTAINER,
        enter_params: &[],
        exit_params: &[p("id", Str), p("type", U32), p("image", Str)],
    },
    EventInfo {
        name: "fatfile_state",
        code: codes::FATFILE_STATE,
        enter_params: &[p("frame", Bytes)],
        exit_params: &[p("frame", Bytes)],
    },
];

/// Look up the static description of an event type code.
pub fn event_info(etype: u16) -> Option<&'static EventInfo> {
    EVENT_TABLE.get((etype >> 1) as usize)
}

/// Maximum accepted frame length. Anything larger is a decode error.
pub const MAX_FRAME_LEN: u32 = 16 << 20;

/// Fixed frame header size on the wire.
pub const FRAME_HEADER_LEN: usize = 28;

/// One event as delivered by a capture source: fixed header plus packed
/// parameter payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub ts: u64,
    pub tgidpid: u64,
    pub cpu: u16,
    pub etype: u16,
    pub params: Vec<Vec<u8>>,
}

impl RawFrame {
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.params.iter().map(|buf| 2 + buf.len()).sum::<usize>()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.encoded_len() as u32).to_le_bytes())?;
        w.write_all(&self.ts.to_le_bytes())?;
        w.write_all(&self.tgidpid.to_le_bytes())?;
        w.write_all(&self.cpu.to_le_bytes())?;
        w.write_all(&self.etype.to_le_bytes())?;
        w.write_all(&(self.params.len() as u32).to_le_bytes())?;
        for param in &self.params {
            w.write_all(&(param.len() as u16).to_le_bytes())?;
            w.write_all(param)?;
        }
        Ok(())
    }

    /// Read one frame. Returns `Ok(None)` on clean EOF (no bytes available),
    /// `InvalidData` on a malformed frame.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<RawFrame>> {
        let mut len_buf = [0u8; 4];
        match r.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf);
        if len < FRAME_HEADER_LEN as u32 || len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad frame length {len}"),
            ));
        }

        let mut body = vec![0u8; len as usize - 4];
        r.read_exact(&mut body)?;

        let ts = u64::from_le_bytes(body[0..8].try_into().unwrap());
        let tgidpid = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let cpu = u16::from_le_bytes(body[16..18].try_into().unwrap());
        let etype = u16::from_le_bytes(body[18..20].try_into().unwrap());
        let nparams = u32::from_le_bytes(body[20..24].try_into().unwrap());

        let mut params = Vec::with_capacity(nparams as usize);
        let mut off = FRAME_HEADER_LEN - 4;
        for _ in 0..nparams {
            if off + 2 > body.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated parameter table",
                ));
            }
            let plen = u16::from_le_bytes(body[off..off + 2].try_into().unwrap()) as usize;
            off += 2;
            if off + plen > body.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "parameter overruns frame",
                ));
            }
            params.push(body[off..off + plen].to_vec());
            off += plen;
        }
        if off != body.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "trailing bytes after parameters",
            ));
        }

        Ok(Some(RawFrame {
            ts,
            tgidpid,
            cpu,
            etype,
            params,
        }))
    }
}

/// A decoded parameter value. Borrowed variants point into the frame buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue<'a> {
    U32(u32),
    U64(u64),
    I64(i64),
    Fd(i64),
    Pid(i64),
    Str(Cow<'a, str>),
    Bytes(&'a [u8]),
    Tuple(SockTuple),
}

impl<'a> ParamValue<'a> {
    fn decode(ptype: ParamType, buf: &'a [u8]) -> Option<ParamValue<'a>> {
        match ptype {
            ParamType::U32 => Some(ParamValue::U32(u32::from_le_bytes(
                buf.try_into().ok()?,
            ))),
            ParamType::U64 => Some(ParamValue::U64(u64::from_le_bytes(
                buf.try_into().ok()?,
            ))),
            ParamType::I64 => Some(ParamValue::I64(i64::from_le_bytes(
                buf.try_into().ok()?,
            ))),
            ParamType::Fd => Some(ParamValue::Fd(i64::from_le_bytes(buf.try_into().ok()?))),
            ParamType::Pid => Some(ParamValue::Pid(i64::from_le_bytes(buf.try_into().ok()?))),
            ParamType::Str => {
                let trimmed = match buf.last() {
                    Some(0) => &buf[..buf.len() - 1],
                    _ => buf,
                };
                Some(ParamValue::Str(String::from_utf8_lossy(trimmed)))
            }
            ParamType::Bytes => Some(ParamValue::Bytes(buf)),
            ParamType::Tuple => SockTuple::decode(buf).map(ParamValue::Tuple),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::U32(v) => Some(*v as i64),
            ParamValue::U64(v) => Some(*v as i64),
            ParamValue::I64(v) | ParamValue::Fd(v) | ParamValue::Pid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&SockTuple> {
        match self {
            ParamValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParamValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// How data-carrying parameters are rendered to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferFormat {
    #[default]
    Normal,
    Json,
    Base64,
    Hex,
    HexAscii,
}

impl std::str::FromStr for BufferFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BufferFormat::Normal),
            "json" => Ok(BufferFormat::Json),
            "base64" => Ok(BufferFormat::Base64),
            "hex" => Ok(BufferFormat::Hex),
            "hex-ascii" => Ok(BufferFormat::HexAscii),
            other => Err(format!("unknown buffer format '{other}'")),
        }
    }
}

/// Render a data buffer with the given format, truncated to `max_len`
/// rendered characters (0 means unlimited).
pub fn format_buffer(data: &[u8], fmt: BufferFormat, max_len: u32) -> String {
    let mut out = match fmt {
        BufferFormat::Normal => data
            .iter()
            .map(|&b| {
                if (0x20..0x7f).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect(),
        BufferFormat::Json => {
            serde_json::to_string(&String::from_utf8_lossy(data)).unwrap_or_default()
        }
        BufferFormat::Base64 => BASE64.encode(data),
        BufferFormat::Hex => {
            let mut s = String::with_capacity(data.len() * 3);
            for (i, b) in data.iter().enumerate() {
                if i > 0 {
                    s.push(' ');
                }
                s.push_str(&format!("{b:02x}"));
            }
            s
        }
        BufferFormat::HexAscii => {
            let hex: Vec<String> = data.iter().map(|b| format!("{b:02x}")).collect();
            let ascii: String = data
                .iter()
                .map(|&b| {
                    if (0x20..0x7f).contains(&b) {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{}  {}", hex.join(" "), ascii)
        }
    };
    if max_len > 0 && out.len() > max_len as usize {
        out.truncate(max_len as usize);
    }
    out
}

/// The enriched event slot. One instance lives inside the inspector and is
/// re-bound on every iteration.
#[derive(Debug, Default)]
pub struct Event {
    num: u64,
    frame: RawFrame,
    thread_tid: Option<i64>,
    fd: Option<i64>,
}

impl Event {
    /// Bind the slot to a new raw frame, clearing previous annotations.
    pub(crate) fn bind(&mut self, frame: RawFrame, num: u64) {
        self.frame = frame;
        self.num = num;
        self.thread_tid = None;
        self.fd = None;
    }

    /// Monotonic event number within this capture.
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Timestamp in nanoseconds since the epoch.
    pub fn ts(&self) -> u64 {
        self.frame.ts
    }

    pub fn cpu(&self) -> u16 {
        self.frame.cpu
    }

    /// Full type code including the direction bit.
    pub fn type_code(&self) -> u16 {
        self.frame.etype
    }

    pub fn direction(&self) -> EventDirection {
        EventDirection::from_code(self.frame.etype)
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::from_code(self.frame.etype)
    }

    /// Thread that generated the event.
    pub fn tid(&self) -> i64 {
        tid_from_tgidpid(self.frame.tgidpid)
    }

    /// Process (thread group leader) of the generating thread.
    pub fn pid(&self) -> i64 {
        pid_from_tgidpid(self.frame.tgidpid)
    }

    /// Event name. Generic syscall events resolve through the syscall table.
    pub fn name(&self) -> Cow<'static, str> {
        match self.category() {
            EventCategory::Generic => {
                let nr = self
                    .param(0)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(-1);
                match usize::try_from(nr).ok().and_then(Sysno::new) {
                    Some(sysno) => Cow::Borrowed(sysno.name()),
                    None => Cow::Owned(format!("syscall_{nr}")),
                }
            }
            EventCategory::Unknown(code) => Cow::Owned(format!("event_{code}")),
            _ => Cow::Borrowed(event_info(self.frame.etype).map(|i| i.name).unwrap_or("?")),
        }
    }

    pub fn param_count(&self) -> usize {
        self.frame.params.len()
    }

    /// Decode parameter `i` using the event table. Returns `None` when the
    /// frame carries fewer parameters, the type is unknown, or the payload
    /// does not parse as the declared type.
    pub fn param(&self, i: usize) -> Option<ParamValue<'_>> {
        let info = event_info(self.frame.etype)?;
        let table = match self.direction() {
            EventDirection::Enter => info.enter_params,
            EventDirection::Exit => info.exit_params,
        };
        let ptype = table.get(i)?.ptype;
        let buf = self.frame.params.get(i)?;
        ParamValue::decode(ptype, buf)
    }

    /// Decode the parameter with the given table name.
    pub fn param_by_name(&self, name: &str) -> Option<ParamValue<'_>> {
        let info = event_info(self.frame.etype)?;
        let table = match self.direction() {
            EventDirection::Enter => info.enter_params,
            EventDirection::Exit => info.exit_params,
        };
        let idx = table.iter().position(|pi| pi.name == name)?;
        self.param(idx)
    }

    /// The raw frame backing this event.
    pub fn raw(&self) -> &RawFrame {
        &self.frame
    }

    /// Tid of the resolved thread record, if the parser resolved one.
    pub fn thread_tid(&self) -> Option<i64> {
        self.thread_tid
    }

    pub(crate) fn set_thread_tid(&mut self, tid: i64) {
        self.thread_tid = Some(tid);
    }

    /// FD number this event references within its thread's table, if any.
    pub fn fd_num(&self) -> Option<i64> {
        self.fd
    }

    pub(crate) fn set_fd_num(&mut self, fd: i64) {
        self.fd = Some(fd);
    }

    pub fn is_meta(&self) -> bool {
        self.category().is_meta()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tgidpid_from_parts;

    fn frame_with_params(etype: u16, params: Vec<Vec<u8>>) -> RawFrame {
        RawFrame {
            ts: 1000,
            tgidpid: tgidpid_from_parts(100, 101),
            cpu: 2,
            etype,
            params,
        }
    }

    #[test]
    fn frame_roundtrip() {
        let frame = frame_with_params(
            codes::OPEN | 1,
            vec![5i64.to_le_bytes().to_vec(), b"/tmp/a\0".to_vec()],
        );
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        let back = RawFrame::read_from(&mut buf.as_slice()).unwrap().unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn frame_read_eof_is_none() {
        let mut empty: &[u8] = &[];
        assert!(RawFrame::read_from(&mut empty).unwrap().is_none());
    }

    #[test]
    fn frame_bad_length_is_invalid_data() {
        let buf = 3u32.to_le_bytes();
        let err = RawFrame::read_from(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn direction_from_parity() {
        assert_eq!(
            EventDirection::from_code(codes::OPEN),
            EventDirection::Enter
        );
        assert_eq!(
            EventDirection::from_code(codes::OPEN | 1),
            EventDirection::Exit
        );
    }

    #[test]
    fn event_param_decode_open_exit() {
        let mut evt = Event::default();
        evt.bind(
            frame_with_params(
                codes::OPEN | 1,
                vec![
                    5i64.to_le_bytes().to_vec(),
                    b"/tmp/a\0".to_vec(),
                    0u32.to_le_bytes().to_vec(),
                ],
            ),
            1,
        );
        assert_eq!(evt.name(), "open");
        assert_eq!(evt.param(0), Some(ParamValue::Fd(5)));
        assert_eq!(evt.param(1).unwrap().as_str(), Some("/tmp/a"));
        assert_eq!(evt.param_by_name("fd").unwrap().as_i64(), Some(5));
        // param 3 (mode) is absent from the frame
        assert!(evt.param(3).is_none());
    }

    #[test]
    fn event_identity_from_header() {
        let mut evt = Event::default();
        evt.bind(frame_with_params(codes::CLOSE, vec![]), 7);
        assert_eq!(evt.tid(), 101);
        assert_eq!(evt.pid(), 100);
        assert_eq!(evt.num(), 7);
        assert_eq!(evt.cpu(), 2);
    }

    #[test]
    fn generic_event_named_from_syscall_table() {
        let mut evt = Event::default();
        // syscall 1 is write on x86_64
        evt.bind(
            frame_with_params(codes::GENERIC, vec![1u64.to_le_bytes().to_vec()]),
            1,
        );
        assert_eq!(evt.name(), "write");
    }

    #[test]
    fn unknown_event_passes_through() {
        let mut evt = Event::default();
        evt.bind(frame_with_params(900, vec![]), 1);
        assert!(matches!(evt.category(), EventCategory::Unknown(900)));
        assert_eq!(evt.name(), "event_900");
    }

    #[test]
    fn buffer_formats() {
        let data = b"ab\x00cd";
        assert_eq!(format_buffer(data, BufferFormat::Normal, 0), "ab.cd");
        assert_eq!(format_buffer(data, BufferFormat::Hex, 0), "61 62 00 63 64");
        assert_eq!(format_buffer(b"abc", BufferFormat::Base64, 0), "YWJj");
        assert_eq!(
            format_buffer(data, BufferFormat::HexAscii, 0),
            "61 62 00 63 64  ab.cd"
        );
        assert!(format_buffer(data, BufferFormat::Json, 0).starts_with('"'));
    }

    #[test]
    fn buffer_truncation() {
        let out = format_buffer(b"abcdefgh", BufferFormat::Normal, 4);
        assert_eq!(out, "abcd");
    }

    #[test]
    fn event_table_indexes_match_codes() {
        for (i, info) in EVENT_TABLE.iter().enumerate() {
            assert_eq!(
                (info.code >> 1) as usize,
                i,
                "table entry '{}' out of position",
                info.name
            );
        }
    }

    #[test]
    fn state_carrying_classification() {
        assert!(EventCategory::Clone.carries_state());
        assert!(EventCategory::Close.carries_state());
        assert!(!EventCategory::Read.carries_state());
        assert!(!EventCategory::Unknown(900).carries_state());
    }
}
