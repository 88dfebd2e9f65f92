//! Shared helpers for the integration tests: synthetic frame builders, a
//! scriptable in-memory driver, and capture-file construction.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::Duration;

use sysinspect::event::codes;
use sysinspect::ifinfo::NetworkInterfaces;
use sysinspect::trace_file::{MachineInfo, TraceWriter};
use sysinspect::userdb::UserDb;
use sysinspect::{DriverStats, EventDriver, InterruptHandle, RawFrame, SockTuple};

pub fn tgidpid(pid: i64, tid: i64) -> u64 {
    ((pid as u64) << 32) | (tid as u64 & 0xFFFFFFFF)
}

pub fn str_param(s: &str) -> Vec<u8> {
    let mut buf = s.as_bytes().to_vec();
    buf.push(0);
    buf
}

pub fn i64_param(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn u32_param(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn frame(tid: i64, etype: u16, ts: u64, params: Vec<Vec<u8>>) -> RawFrame {
    RawFrame {
        ts,
        tgidpid: tgidpid(tid, tid),
        cpu: 0,
        etype,
        params,
    }
}

/// Child-side clone exit: creates `child` inheriting from `parent`.
pub fn clone_exit(child: i64, parent: i64, comm: &str, ts: u64) -> RawFrame {
    frame(
        child,
        codes::CLONE | 1,
        ts,
        vec![
            i64_param(0),
            str_param(""),
            str_param(""),
            i64_param(parent),
            str_param(""),
            u32_param(0),
            u32_param(0),
            u32_param(0),
            str_param(comm),
        ],
    )
}

pub fn execve_exit(tid: i64, exe: &str, args: &[&str], ts: u64) -> RawFrame {
    frame(
        tid,
        codes::EXECVE | 1,
        ts,
        vec![
            i64_param(0),
            str_param(exe),
            str_param(&args.join("\0")),
            str_param(""),
            str_param(""),
        ],
    )
}

pub fn exit_group_exit(tid: i64, ts: u64) -> RawFrame {
    frame(tid, codes::EXIT_GROUP | 1, ts, vec![i64_param(0)])
}

pub fn open_exit(tid: i64, fd: i64, path: &str, ts: u64) -> RawFrame {
    frame(
        tid,
        codes::OPEN | 1,
        ts,
        vec![i64_param(fd), str_param(path), u32_param(0)],
    )
}

pub fn write_exit(tid: i64, fd: i64, data: &[u8], ts: u64) -> RawFrame {
    frame(
        tid,
        codes::WRITE | 1,
        ts,
        vec![i64_param(data.len() as i64), i64_param(fd), data.to_vec()],
    )
}

pub fn close_exit(tid: i64, fd: i64, ts: u64) -> RawFrame {
    frame(tid, codes::CLOSE | 1, ts, vec![i64_param(0), i64_param(fd)])
}

pub fn socket_exit(tid: i64, fd: i64, ts: u64) -> RawFrame {
    frame(
        tid,
        codes::SOCKET | 1,
        ts,
        vec![
            i64_param(fd),
            u32_param(libc::AF_INET as u32),
            u32_param(libc::SOCK_STREAM as u32),
            u32_param(6),
        ],
    )
}

pub fn connect_exit(tid: i64, fd: i64, tuple: &SockTuple, ts: u64) -> RawFrame {
    frame(
        tid,
        codes::CONNECT | 1,
        ts,
        vec![i64_param(0), i64_param(fd), tuple.encode()],
    )
}

/// Write the frames into a fresh capture file.
pub fn write_capture(path: &Path, frames: &[RawFrame]) {
    let machine = MachineInfo {
        num_cpus: 4,
        memory_bytes: 8 << 30,
        hostname: "testbox".into(),
    };
    let mut writer = TraceWriter::create(
        path,
        false,
        &machine,
        &NetworkInterfaces::new(),
        &UserDb::new(),
    )
    .expect("create capture");
    for frame in frames {
        writer.write_frame(frame).expect("write frame");
    }
    writer.finish().expect("finish capture");
}

/// Driver fed from a queue. Once drained it blocks on the interrupt handle
/// for the full timeout, like a quiet live system.
pub struct QueueDriver {
    frames: VecDeque<RawFrame>,
    stats: DriverStats,
}

impl QueueDriver {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        QueueDriver {
            frames: frames.into(),
            stats: DriverStats::default(),
        }
    }
}

impl EventDriver for QueueDriver {
    fn next(
        &mut self,
        timeout_ms: u32,
        interrupt: &InterruptHandle,
    ) -> io::Result<Option<RawFrame>> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.stats.events += 1;
                self.stats.bytes_read += frame.encoded_len() as u64;
                Ok(Some(frame))
            }
            None => {
                interrupt.wait_timeout(Duration::from_millis(timeout_ms as u64));
                Ok(None)
            }
        }
    }

    fn stats(&self) -> DriverStats {
        self.stats
    }
}
