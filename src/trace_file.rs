//! Capture file format.
//!
//! A capture file carries a fixed header (magic + version), a machine info
//! block, interface/user/group list blocks, then a stream of event frames in
//! the same wire format the live driver uses. Compressed captures are gzip
//! streams detected by magic on open.
//!
//! Fatfile captures wrap filtered-out state events in frames with the
//! reserved [`codes::FATFILE_STATE`] type code; the reader unwraps them so
//! replay reconstructs the same state as the original live run.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, SinspError};
use crate::event::{codes, RawFrame};
use crate::ifinfo::{Ipv4IfInfo, Ipv6IfInfo, NetworkInterfaces};
use crate::userdb::{GroupInfo, UserDb, UserInfo};

/// File magic: `b"SYIN"` little-endian.
pub const FILE_MAGIC: u32 = 0x4e495953;
pub const FILE_VERSION: u16 = 1;

const BT_MACHINE: u16 = 1;
const BT_IFLIST: u16 = 2;
const BT_USERLIST: u16 = 3;
const BT_GROUPLIST: u16 = 4;
/// Marks the end of the block section; event frames follow.
const BT_EVENTS: u16 = 0xFFFF;

/// Information about the machine that generated a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineInfo {
    pub num_cpus: u32,
    pub memory_bytes: u64,
    pub hostname: String,
}

impl MachineInfo {
    /// Snapshot the live machine via sysconf and uname.
    pub fn from_os() -> MachineInfo {
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) }.max(1) as u32;
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) }.max(0) as u64;
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) }.max(0) as u64;

        let mut utsname: libc::utsname = unsafe { std::mem::zeroed() };
        let hostname = if unsafe { libc::uname(&mut utsname) } == 0 {
            // SAFETY: uname fills nodename with a NUL-terminated C string.
            unsafe { std::ffi::CStr::from_ptr(utsname.nodename.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        } else {
            String::new()
        };

        MachineInfo {
            num_cpus,
            memory_bytes: pages * page_size,
            hostname,
        }
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u16).to_le_bytes())?;
    w.write_all(s.as_bytes())
}

fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut buf = vec![0u8; u16::from_le_bytes(len) as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Wrap a state-carrying frame for a fatfile dump.
pub fn wrap_fatfile(frame: &RawFrame) -> RawFrame {
    let mut inner = Vec::with_capacity(frame.encoded_len());
    // Writing to a Vec cannot fail.
    frame.write_to(&mut inner).unwrap();
    RawFrame {
        ts: frame.ts,
        tgidpid: frame.tgidpid,
        cpu: frame.cpu,
        etype: codes::FATFILE_STATE | 1,
        params: vec![inner],
    }
}

struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Reader for capture files. Parses the block section eagerly on open and
/// then yields frames one at a time.
pub struct TraceReader {
    input: Box<dyn Read + Send>,
    machine: MachineInfo,
    ifaces_v4: Vec<Ipv4IfInfo>,
    ifaces_v6: Vec<Ipv6IfInfo>,
    users: Vec<UserInfo>,
    groups: Vec<GroupInfo>,
    consumed: Arc<AtomicU64>,
    file_size: u64,
    frame_offset: u64,
}

impl std::fmt::Debug for TraceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReader")
            .field("machine", &self.machine)
            .field("file_size", &self.file_size)
            .field("frame_offset", &self.frame_offset)
            .finish()
    }
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<TraceReader> {
        let mut file = File::open(path).map_err(|e| SinspError::SourceOpen {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let file_size = file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| SinspError::SourceOpen {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut magic = [0u8; 2];
        let compressed = match file.read_exact(&mut magic) {
            Ok(()) => magic == [0x1f, 0x8b],
            Err(_) => false,
        };
        file.seek(SeekFrom::Start(0))
            .map_err(|e| SinspError::SourceOpen {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let consumed = Arc::new(AtomicU64::new(0));
        let counted = CountingReader {
            inner: file,
            count: Arc::clone(&consumed),
        };
        let input: Box<dyn Read + Send> = if compressed {
            Box::new(BufReader::new(GzDecoder::new(counted)))
        } else {
            Box::new(BufReader::new(counted))
        };

        let mut reader = TraceReader {
            input,
            machine: MachineInfo::default(),
            ifaces_v4: Vec::new(),
            ifaces_v6: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            consumed,
            file_size,
            frame_offset: 0,
        };
        reader.read_header(path)?;
        Ok(reader)
    }

    fn read_header(&mut self, path: &Path) -> Result<()> {
        let bad = |message: String| SinspError::SourceOpen {
            path: path.to_path_buf(),
            message,
        };

        let magic = read_u32(&mut self.input).map_err(|e| bad(e.to_string()))?;
        if magic != FILE_MAGIC {
            return Err(bad(format!("bad magic 0x{magic:08x}")));
        }
        let mut ver = [0u8; 2];
        self.input
            .read_exact(&mut ver)
            .map_err(|e| bad(e.to_string()))?;
        let version = u16::from_le_bytes(ver);
        if version > FILE_VERSION {
            return Err(bad(format!("unsupported file version {version}")));
        }
        let mut reserved = [0u8; 2];
        self.input
            .read_exact(&mut reserved)
            .map_err(|e| bad(e.to_string()))?;

        loop {
            let mut btype_buf = [0u8; 2];
            self.input
                .read_exact(&mut btype_buf)
                .map_err(|e| bad(e.to_string()))?;
            let btype = u16::from_le_bytes(btype_buf);
            if btype == BT_EVENTS {
                let len = read_u32(&mut self.input).map_err(|e| bad(e.to_string()))?;
                if len != 0 {
                    return Err(bad("event marker block has payload".into()));
                }
                break;
            }
            let len = read_u32(&mut self.input).map_err(|e| bad(e.to_string()))?;
            let mut payload = vec![0u8; len as usize];
            self.input
                .read_exact(&mut payload)
                .map_err(|e| bad(e.to_string()))?;
            let mut cursor = payload.as_slice();
            match btype {
                BT_MACHINE => {
                    self.machine.num_cpus =
                        read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                    self.machine.memory_bytes =
                        read_u64(&mut cursor).map_err(|e| bad(e.to_string()))?;
                    self.machine.hostname =
                        read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                }
                BT_IFLIST => {
                    let count = read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                    for _ in 0..count {
                        let mut kind = [0u8; 1];
                        cursor
                            .read_exact(&mut kind)
                            .map_err(|e| bad(e.to_string()))?;
                        let name = read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        match kind[0] {
                            4 => {
                                let mut addr = [0u8; 4];
                                let mut mask = [0u8; 4];
                                cursor
                                    .read_exact(&mut addr)
                                    .and_then(|_| cursor.read_exact(&mut mask))
                                    .map_err(|e| bad(e.to_string()))?;
                                self.ifaces_v4.push(Ipv4IfInfo {
                                    name,
                                    addr: addr.into(),
                                    netmask: mask.into(),
                                });
                            }
                            6 => {
                                let mut addr = [0u8; 16];
                                let mut mask = [0u8; 16];
                                cursor
                                    .read_exact(&mut addr)
                                    .and_then(|_| cursor.read_exact(&mut mask))
                                    .map_err(|e| bad(e.to_string()))?;
                                self.ifaces_v6.push(Ipv6IfInfo {
                                    name,
                                    addr: addr.into(),
                                    netmask: mask.into(),
                                });
                            }
                            other => {
                                return Err(bad(format!("unknown interface kind {other}")))
                            }
                        }
                    }
                }
                BT_USERLIST => {
                    let count = read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                    for _ in 0..count {
                        let uid = read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        let name = read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        let home = read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        let shell = read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        self.users.push(UserInfo {
                            uid,
                            name,
                            home,
                            shell,
                        });
                    }
                }
                BT_GROUPLIST => {
                    let count = read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                    for _ in 0..count {
                        let gid = read_u32(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        let name = read_str(&mut cursor).map_err(|e| bad(e.to_string()))?;
                        self.groups.push(GroupInfo { gid, name });
                    }
                }
                // Unknown block types are skipped for forward compatibility.
                _ => {}
            }
        }
        Ok(())
    }

    /// Read the next frame. Fatfile wrapper frames are unwrapped
    /// transparently. Decode failures are fatal for file captures.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let frame = RawFrame::read_from(&mut self.input).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                SinspError::SourceDecode {
                    offset: self.frame_offset,
                    message: e.to_string(),
                }
            } else {
                SinspError::SourceDecode {
                    offset: self.frame_offset,
                    message: format!("read error: {e}"),
                }
            }
        })?;
        let Some(frame) = frame else {
            return Ok(None);
        };
        self.frame_offset += frame.encoded_len() as u64;

        if frame.etype & !1 == codes::FATFILE_STATE {
            let inner = frame.params.first().ok_or(SinspError::SourceDecode {
                offset: self.frame_offset,
                message: "empty fatfile wrapper".into(),
            })?;
            let unwrapped = RawFrame::read_from(&mut inner.as_slice())
                .ok()
                .flatten()
                .ok_or(SinspError::SourceDecode {
                    offset: self.frame_offset,
                    message: "corrupt fatfile wrapper".into(),
                })?;
            return Ok(Some(unwrapped));
        }
        Ok(Some(frame))
    }

    pub fn machine_info(&self) -> &MachineInfo {
        &self.machine
    }

    pub fn interfaces(&self) -> NetworkInterfaces {
        let mut ifaces = NetworkInterfaces::new();
        ifaces.import_interfaces(self.ifaces_v4.clone(), self.ifaces_v6.clone());
        ifaces
    }

    pub fn users(&self) -> &[UserInfo] {
        &self.users
    }

    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    /// Raw file bytes consumed so far; compressed captures report compressed
    /// progress.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

enum Output {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gz(w) => w.flush(),
        }
    }
}

/// Writer producing capture files readable by [`TraceReader`].
pub struct TraceWriter {
    out: Option<Output>,
    path: PathBuf,
    /// Logical (pre-compression) bytes written, header included.
    bytes_written: u64,
}

impl TraceWriter {
    pub fn create(
        path: &Path,
        compress: bool,
        machine: &MachineInfo,
        ifaces: &NetworkInterfaces,
        users: &UserDb,
    ) -> Result<TraceWriter> {
        let io_err = |e: io::Error| SinspError::DumpIo {
            path: path.to_path_buf(),
            source: e,
        };

        let file = File::create(path).map_err(io_err)?;
        let buffered = BufWriter::new(file);
        let out = if compress {
            Output::Gz(GzEncoder::new(buffered, Compression::default()))
        } else {
            Output::Plain(buffered)
        };

        let mut writer = TraceWriter {
            out: Some(out),
            path: path.to_path_buf(),
            bytes_written: 0,
        };
        writer.write_header(machine, ifaces, users)?;
        Ok(writer)
    }

    fn io_err(&self, e: io::Error) -> SinspError {
        SinspError::DumpIo {
            path: self.path.clone(),
            source: e,
        }
    }

    fn write_header(
        &mut self,
        machine: &MachineInfo,
        ifaces: &NetworkInterfaces,
        users: &UserDb,
    ) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&FILE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());

        let mut machine_block = Vec::new();
        machine_block.extend_from_slice(&machine.num_cpus.to_le_bytes());
        machine_block.extend_from_slice(&machine.memory_bytes.to_le_bytes());
        write_str(&mut machine_block, &machine.hostname).unwrap();
        push_block(&mut buf, BT_MACHINE, &machine_block);

        let mut if_block = Vec::new();
        let v4 = ifaces.get_ipv4_list();
        let v6 = ifaces.get_ipv6_list();
        if_block.extend_from_slice(&((v4.len() + v6.len()) as u32).to_le_bytes());
        for iface in v4 {
            if_block.push(4);
            write_str(&mut if_block, &iface.name).unwrap();
            if_block.extend_from_slice(&iface.addr.octets());
            if_block.extend_from_slice(&iface.netmask.octets());
        }
        for iface in v6 {
            if_block.push(6);
            write_str(&mut if_block, &iface.name).unwrap();
            if_block.extend_from_slice(&iface.addr.octets());
            if_block.extend_from_slice(&iface.netmask.octets());
        }
        push_block(&mut buf, BT_IFLIST, &if_block);

        let mut user_block = Vec::new();
        user_block.extend_from_slice(&(users.users().len() as u32).to_le_bytes());
        let mut sorted_users: Vec<&UserInfo> = users.users().values().collect();
        sorted_users.sort_by_key(|u| u.uid);
        for user in sorted_users {
            user_block.extend_from_slice(&user.uid.to_le_bytes());
            write_str(&mut user_block, &user.name).unwrap();
            write_str(&mut user_block, &user.home).unwrap();
            write_str(&mut user_block, &user.shell).unwrap();
        }
        push_block(&mut buf, BT_USERLIST, &user_block);

        let mut group_block = Vec::new();
        group_block.extend_from_slice(&(users.groups().len() as u32).to_le_bytes());
        let mut sorted_groups: Vec<&GroupInfo> = users.groups().values().collect();
        sorted_groups.sort_by_key(|g| g.gid);
        for group in sorted_groups {
            group_block.extend_from_slice(&group.gid.to_le_bytes());
            write_str(&mut group_block, &group.name).unwrap();
        }
        push_block(&mut buf, BT_GROUPLIST, &group_block);

        buf.extend_from_slice(&BT_EVENTS.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let out = self.out.as_mut().expect("writer already finished");
        out.write_all(&buf).map_err(|e| SinspError::DumpIo {
            path: self.path.clone(),
            source: e,
        })?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let out = self.out.as_mut().expect("writer already finished");
        frame.write_to(out).map_err(|e| SinspError::DumpIo {
            path: self.path.clone(),
            source: e,
        })?;
        self.bytes_written += frame.encoded_len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let out = self.out.as_mut().expect("writer already finished");
        out.flush().map_err(|e| SinspError::DumpIo {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, finalizing the gzip stream if present.
    pub fn finish(mut self) -> Result<()> {
        match self.out.take() {
            Some(Output::Plain(mut w)) => w.flush().map_err(|e| self.io_err(e)),
            Some(Output::Gz(w)) => w
                .finish()
                .and_then(|mut inner| inner.flush())
                .map_err(|e| self.io_err(e)),
            None => Ok(()),
        }
    }
}

fn push_block(buf: &mut Vec<u8>, btype: u16, payload: &[u8]) {
    buf.extend_from_slice(&btype.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::codes;
    use crate::utils::tgidpid_from_parts;
    use tempfile::TempDir;

    fn sample_machine() -> MachineInfo {
        MachineInfo {
            num_cpus: 8,
            memory_bytes: 16 << 30,
            hostname: "testhost".into(),
        }
    }

    fn sample_frame(ts: u64) -> RawFrame {
        RawFrame {
            ts,
            tgidpid: tgidpid_from_parts(100, 100),
            cpu: 0,
            etype: codes::CLOSE | 1,
            params: vec![0i64.to_le_bytes().to_vec(), 5i64.to_le_bytes().to_vec()],
        }
    }

    fn write_capture(path: &Path, compress: bool, frames: &[RawFrame]) {
        let mut users = UserDb::new();
        users.add_user(UserInfo {
            uid: 0,
            name: "root".into(),
            home: "/root".into(),
            shell: "/bin/sh".into(),
        });
        users.add_group(GroupInfo {
            gid: 0,
            name: "root".into(),
        });
        let mut ifaces = NetworkInterfaces::new();
        ifaces.import_ipv4(Ipv4IfInfo {
            name: "eth0".into(),
            addr: [10, 0, 0, 1].into(),
            netmask: [255, 255, 255, 0].into(),
        });
        let mut writer =
            TraceWriter::create(path, compress, &sample_machine(), &ifaces, &users).unwrap();
        for frame in frames {
            writer.write_frame(frame).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn roundtrip_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.sysp");
        let frames = vec![sample_frame(1000), sample_frame(2000)];
        write_capture(&path, false, &frames);

        let mut reader = TraceReader::open(&path).unwrap();
        assert_eq!(reader.machine_info(), &sample_machine());
        assert_eq!(reader.users().len(), 1);
        assert_eq!(reader.groups().len(), 1);
        assert_eq!(reader.interfaces().get_ipv4_list().len(), 1);
        assert_eq!(reader.next_frame().unwrap().unwrap(), frames[0]);
        assert_eq!(reader.next_frame().unwrap().unwrap(), frames[1]);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn roundtrip_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.sysp.gz");
        let frames = vec![sample_frame(1000)];
        write_capture(&path, true, &frames);

        let mut reader = TraceReader::open(&path).unwrap();
        assert_eq!(reader.machine_info().hostname, "testhost");
        assert_eq!(reader.next_frame().unwrap().unwrap(), frames[0]);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, b"this is not a capture file").unwrap();
        match TraceReader::open(&path) {
            Err(SinspError::SourceOpen { .. }) => {}
            other => panic!("expected SourceOpen, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_frame_is_source_decode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.sysp");
        write_capture(&path, false, &[sample_frame(1000)]);
        // Append garbage with an absurd frame length.
        use std::fs::OpenOptions;
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&u32::MAX.to_le_bytes()).unwrap();

        let mut reader = TraceReader::open(&path).unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        match reader.next_frame() {
            Err(SinspError::SourceDecode { .. }) => {}
            other => panic!("expected SourceDecode, got {other:?}"),
        }
    }

    #[test]
    fn fatfile_wrapper_unwraps_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.sysp");
        let inner = sample_frame(5000);
        write_capture(&path, false, &[wrap_fatfile(&inner)]);

        let mut reader = TraceReader::open(&path).unwrap();
        assert_eq!(reader.next_frame().unwrap().unwrap(), inner);
    }
}
