//! `/proc` scanning.
//!
//! Live captures use this module twice: a full walk at open time to seed the
//! thread and FD tables, and best-effort single-tid reads when an event
//! targets a thread the table has never seen.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::containers::ContainerType;
use crate::fd_table::{FdDesc, FdType};
use crate::threads::ThreadRecord;

fn read_link_string(path: &Path) -> String {
    fs::read_link(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split a NUL-separated /proc text file into strings.
fn split_nul(buf: &str) -> Vec<String> {
    buf.split('\0')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Read one thread's identity from /proc. Returns `None` when the thread is
/// gone or unreadable; callers fall back to an incomplete record.
pub fn read_thread(tid: i64, ts: u64) -> Option<ThreadRecord> {
    let status_path = format!("/proc/{tid}/status");
    let status = fs::read_to_string(&status_path).ok()?;

    let mut name = String::new();
    let mut tgid: i64 = tid;
    let mut ppid: i64 = 0;
    let mut uid: u32 = 0;
    let mut gid: u32 = 0;
    for line in status.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("Name:") => name = fields.next().unwrap_or("").to_string(),
            Some("Tgid:") => tgid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(tid),
            Some("PPid:") => ppid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            Some("Uid:") => uid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            Some("Gid:") => gid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            _ => {}
        }
    }

    // cmdline/exe/cwd live under the process, not the task
    let mut record = ThreadRecord::new(tid, tgid, ppid, ts);
    record.comm = name;
    record.exe = read_link_string(Path::new(&format!("/proc/{tgid}/exe")));
    record.cwd = read_link_string(Path::new(&format!("/proc/{tgid}/cwd")));
    if let Ok(cmdline) = fs::read_to_string(format!("/proc/{tgid}/cmdline")) {
        record.args = split_nul(&cmdline);
    }
    record.uid = uid;
    record.gid = gid;
    if let Some((id, _)) = container_id_from_cgroup(tid) {
        record.container_id = id;
    }
    Some(record)
}

/// Classify one /proc/<pid>/fd link target into an FD descriptor.
fn classify_fd_link(fd: i64, target: &str) -> FdDesc {
    if let Some(rest) = target.strip_prefix("socket:") {
        FdDesc::with_name(fd, FdType::Other, rest.trim_matches(['[', ']']))
    } else if target.starts_with("pipe:") {
        FdDesc::with_name(fd, FdType::Pipe, target)
    } else if target.starts_with("anon_inode:[eventfd") {
        FdDesc::new(fd, FdType::EventFd)
    } else if target.starts_with("anon_inode:[signalfd") {
        FdDesc::new(fd, FdType::SignalFd)
    } else if target.starts_with("anon_inode:inotify") {
        FdDesc::new(fd, FdType::Inotify)
    } else if target.starts_with("anon_inode:[timerfd") {
        FdDesc::new(fd, FdType::TimerFd)
    } else if target.starts_with('/') {
        let ftype = if Path::new(target).is_dir() {
            FdType::Directory
        } else {
            FdType::File
        };
        FdDesc::with_name(fd, ftype, target)
    } else {
        FdDesc::with_name(fd, FdType::Other, target)
    }
}

/// Import the FD table of one process into a record.
pub fn import_fd_table(record: &mut ThreadRecord) {
    let fd_dir = format!("/proc/{}/fd", record.tid);
    let Ok(entries) = fs::read_dir(&fd_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(fd) = entry.file_name().to_string_lossy().parse::<i64>() else {
            continue;
        };
        let target = read_link_string(&entry.path());
        if target.is_empty() {
            continue;
        }
        record.fd_table_mut().add(classify_fd_link(fd, &target));
    }
}

/// Walk /proc and synthesize records for every live thread. Main threads
/// get their FD tables imported; secondary threads share the process image
/// but start with empty tables.
pub fn scan_process_table(ts: u64) -> Vec<ThreadRecord> {
    let mut records = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return records;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i64>() else {
            continue;
        };
        let task_dir = format!("/proc/{pid}/task");
        let Ok(tasks) = fs::read_dir(&task_dir) else {
            continue;
        };
        for task in tasks.flatten() {
            let Ok(tid) = task.file_name().to_string_lossy().parse::<i64>() else {
                continue;
            };
            if let Some(mut record) = read_thread(tid, ts) {
                if record.is_main_thread() {
                    import_fd_table(&mut record);
                }
                records.push(record);
            }
        }
    }
    records
}

/// Extract a container id and type from a thread's cgroup file.
///
/// Recognizes docker (`/docker/<64-hex>`), containerd
/// (`cri-containerd-<hex>`), lxc (`/lxc/<name>`), rkt and mesos paths.
pub fn container_id_from_cgroup(tid: i64) -> Option<(String, ContainerType)> {
    let content = fs::read_to_string(format!("/proc/{tid}/cgroup")).ok()?;
    container_id_from_cgroup_content(&content)
}

pub(crate) fn container_id_from_cgroup_content(content: &str) -> Option<(String, ContainerType)> {
    let docker_re = Regex::new(r"/docker[/-]([0-9a-f]{12,64})").unwrap();
    let containerd_re = Regex::new(r"cri-containerd[:-]([0-9a-f]{12,64})").unwrap();
    let lxc_re = Regex::new(r"/lxc/([^/\s]+)").unwrap();
    let rkt_re = Regex::new(r"/rkt/([0-9a-f-]{12,})").unwrap();
    let mesos_re = Regex::new(r"/mesos/([0-9a-f-]{12,})").unwrap();

    for line in content.lines() {
        if let Some(cap) = docker_re.captures(line) {
            return Some((cap[1][..12].to_string(), ContainerType::Docker));
        }
        if let Some(cap) = containerd_re.captures(line) {
            return Some((cap[1][..12.min(cap[1].len())].to_string(), ContainerType::Docker));
        }
        if let Some(cap) = lxc_re.captures(line) {
            return Some((cap[1].to_string(), ContainerType::Lxc));
        }
        if let Some(cap) = rkt_re.captures(line) {
            return Some((cap[1].to_string(), ContainerType::Rkt));
        }
        if let Some(cap) = mesos_re.captures(line) {
            return Some((cap[1].to_string(), ContainerType::Mesos));
        }
    }
    None
}
