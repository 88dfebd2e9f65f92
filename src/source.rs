//! Capture source adapter: one pull API over live drivers and trace files.
//!
//! Live captures read from an [`EventDriver`], the contract the kernel-side
//! capture component implements. File captures read from a
//! [`TraceReader`]. The adapter owns the policy differences between the two:
//! live decode errors are counted and skipped while file decode errors are
//! fatal, pause/resume only means something live, and progress is computed
//! from file position offline.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, SinspError};
use crate::event::RawFrame;
use crate::trace_file::TraceReader;

/// Default live read timeout.
pub const DEFAULT_TIMEOUT_MS: u32 = 200;

/// Cross-task interrupt for a blocked live read. `close()` raises it from
/// another thread; drivers must return promptly once it is raised.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        InterruptHandle::default()
    }

    pub fn raise(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Block up to `timeout`, returning early if raised. Returns whether the
    /// handle is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut raised = flag.lock().unwrap();
        if !*raised {
            let (guard, _) = cvar.wait_timeout(raised, timeout).unwrap();
            raised = guard;
        }
        *raised
    }
}

/// Counters maintained by a live driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverStats {
    pub bytes_read: u64,
    pub events: u64,
    /// Events the driver dropped before the library saw them.
    pub drops: u64,
}

/// Pull contract of the kernel-side capture component.
///
/// `next` blocks up to `timeout_ms` for a frame, returning `Ok(None)` on
/// timeout. Implementations must observe `interrupt` and return early when
/// it is raised. A frame that fails to decode surfaces as
/// `io::ErrorKind::InvalidData`; the adapter skips and counts it.
pub trait EventDriver: Send {
    fn next(&mut self, timeout_ms: u32, interrupt: &InterruptHandle)
        -> io::Result<Option<RawFrame>>;

    fn stats(&self) -> DriverStats;

    /// Forwarded from the inspector; drivers that buffer payloads truncate
    /// data-carrying parameters to this many bytes.
    fn set_snaplen(&mut self, _bytes: u32) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn close(&mut self) {}
}

/// Outcome of one pull from the source.
#[derive(Debug)]
pub enum SourcePoll {
    Event(RawFrame),
    Timeout,
    Eof,
}

/// Statistics about the currently open capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub bytes_read: u64,
    pub events_captured: u64,
    pub events_dropped: u64,
    pub decode_errors_skipped: u64,
    pub n_proc_lookups: u64,
    pub tid_collisions: u64,
    /// Descriptors displaced from an occupied fd slot (synthetic closes).
    pub fd_displacements: u64,
    /// Approximate read progress, 0-100. Always 0 for live captures.
    pub progress_pct: f64,
}

enum Backend {
    Live {
        driver: Box<dyn EventDriver>,
        timeout_ms: u32,
        paused: bool,
    },
    File {
        reader: TraceReader,
        path: PathBuf,
    },
}

pub struct CaptureSource {
    backend: Backend,
    interrupt: InterruptHandle,
    events_captured: u64,
    decode_errors_skipped: u64,
}

impl CaptureSource {
    pub fn open_live(
        driver: Box<dyn EventDriver>,
        timeout_ms: u32,
        interrupt: InterruptHandle,
    ) -> CaptureSource {
        CaptureSource {
            backend: Backend::Live {
                driver,
                timeout_ms,
                paused: false,
            },
            interrupt,
            events_captured: 0,
            decode_errors_skipped: 0,
        }
    }

    pub fn open_file(path: &Path, interrupt: InterruptHandle) -> Result<CaptureSource> {
        let reader = TraceReader::open(path)?;
        Ok(CaptureSource {
            backend: Backend::File {
                reader,
                path: path.to_path_buf(),
            },
            interrupt,
            events_captured: 0,
            decode_errors_skipped: 0,
        })
    }

    pub fn is_live(&self) -> bool {
        matches!(self.backend, Backend::Live { .. })
    }

    pub fn input_filename(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File { path, .. } => Some(path),
            Backend::Live { .. } => None,
        }
    }

    /// Borrow the trace reader (file captures only); used at import time.
    pub fn trace_reader(&self) -> Option<&TraceReader> {
        match &self.backend {
            Backend::File { reader, .. } => Some(reader),
            Backend::Live { .. } => None,
        }
    }

    pub fn set_timeout_ms(&mut self, ms: u32) {
        if let Backend::Live { timeout_ms, .. } = &mut self.backend {
            *timeout_ms = ms;
        }
    }

    /// Forward the snaplen to a live driver; no-op on files.
    pub fn set_snaplen(&mut self, bytes: u32) {
        if let Backend::Live { driver, .. } = &mut self.backend {
            driver.set_snaplen(bytes);
        }
    }

    /// Pull the next frame. Returns `CaptureInterrupted` once the interrupt
    /// handle has been raised.
    pub fn next(&mut self) -> Result<SourcePoll> {
        if self.interrupt.is_raised() {
            return Err(SinspError::CaptureInterrupted);
        }
        match &mut self.backend {
            Backend::Live {
                driver,
                timeout_ms,
                paused,
            } => {
                if *paused {
                    // Consume the timeout without reading so a paused
                    // capture still honors close().
                    if self.interrupt.wait_timeout(Duration::from_millis(*timeout_ms as u64)) {
                        return Err(SinspError::CaptureInterrupted);
                    }
                    return Ok(SourcePoll::Timeout);
                }
                loop {
                    match driver.next(*timeout_ms, &self.interrupt) {
                        Ok(Some(frame)) => {
                            self.events_captured += 1;
                            return Ok(SourcePoll::Event(frame));
                        }
                        Ok(None) => {
                            if self.interrupt.is_raised() {
                                return Err(SinspError::CaptureInterrupted);
                            }
                            return Ok(SourcePoll::Timeout);
                        }
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            // Bad frame from a live source: skip and count.
                            self.decode_errors_skipped += 1;
                            continue;
                        }
                        Err(_) if self.interrupt.is_raised() => {
                            return Err(SinspError::CaptureInterrupted);
                        }
                        Err(e) => {
                            return Err(SinspError::Fatal {
                                message: format!("live source read failed: {e}"),
                            });
                        }
                    }
                }
            }
            Backend::File { reader, .. } => match reader.next_frame()? {
                Some(frame) => {
                    self.events_captured += 1;
                    Ok(SourcePoll::Event(frame))
                }
                None => Ok(SourcePoll::Eof),
            },
        }
    }

    pub fn pause(&mut self) {
        if let Backend::Live { driver, paused, .. } = &mut self.backend {
            *paused = true;
            driver.pause();
        }
    }

    pub fn resume(&mut self) {
        if let Backend::Live { driver, paused, .. } = &mut self.backend {
            *paused = false;
            driver.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.backend, Backend::Live { paused: true, .. })
    }

    pub fn close(&mut self) {
        self.interrupt.raise();
        if let Backend::Live { driver, .. } = &mut self.backend {
            driver.close();
        }
    }

    pub fn stats(&self) -> CaptureStats {
        match &self.backend {
            Backend::Live { driver, .. } => {
                let driver_stats = driver.stats();
                CaptureStats {
                    bytes_read: driver_stats.bytes_read,
                    events_captured: self.events_captured,
                    events_dropped: driver_stats.drops,
                    decode_errors_skipped: self.decode_errors_skipped,
                    n_proc_lookups: 0,
                    tid_collisions: 0,
                    fd_displacements: 0,
                    progress_pct: 0.0,
                }
            }
            Backend::File { reader, .. } => CaptureStats {
                bytes_read: reader.bytes_consumed(),
                events_captured: self.events_captured,
                events_dropped: 0,
                decode_errors_skipped: self.decode_errors_skipped,
                n_proc_lookups: 0,
                tid_collisions: 0,
                fd_displacements: 0,
                progress_pct: self.progress_pct(),
            },
        }
    }

    /// Read progress 0-100; file captures report bytes consumed over file
    /// size.
    pub fn progress_pct(&self) -> f64 {
        match &self.backend {
            Backend::Live { .. } => 0.0,
            Backend::File { reader, .. } => {
                let size = reader.file_size();
                if size == 0 {
                    100.0
                } else {
                    (reader.bytes_consumed() as f64 / size as f64 * 100.0).min(100.0)
                }
            }
        }
    }
}

/// Driver reading the frame stream from a capture device node.
///
/// This is the conventional deployment of the out-of-tree kernel component:
/// it exposes a character device delivering frames in the wire format.
pub struct DeviceDriver {
    file: std::fs::File,
    stats: DriverStats,
}

/// Device node the default live open attempts.
pub const DEFAULT_DEVICE: &str = "/dev/sysinspect0";

/// Interrupt poll granularity while blocked in a device read.
const INTERRUPT_POLL_MS: u32 = 100;

impl DeviceDriver {
    pub fn open(path: &Path) -> io::Result<DeviceDriver> {
        Ok(DeviceDriver {
            file: std::fs::File::open(path)?,
            stats: DriverStats::default(),
        })
    }
}

impl EventDriver for DeviceDriver {
    fn next(
        &mut self,
        timeout_ms: u32,
        interrupt: &InterruptHandle,
    ) -> io::Result<Option<RawFrame>> {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::AsFd;

        let mut waited: u32 = 0;
        loop {
            if interrupt.is_raised() {
                return Ok(None);
            }
            let slice = INTERRUPT_POLL_MS.min(timeout_ms.saturating_sub(waited));
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            let timeout = PollTimeout::try_from(slice as u16).unwrap_or(PollTimeout::MAX);
            let ready = poll(&mut fds, timeout).map_err(io::Error::from)?;
            if ready > 0 {
                break;
            }
            waited += slice;
            if waited >= timeout_ms {
                return Ok(None);
            }
        }

        match RawFrame::read_from(&mut self.file)? {
            Some(frame) => {
                self.stats.bytes_read += frame.encoded_len() as u64;
                self.stats.events += 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn stats(&self) -> DriverStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Driver fed from a queue; blocks on the interrupt handle when empty.
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

    fn frame(ts: u64) -> RawFrame {
        RawFrame {
            ts,
            tgidpid: 100 << 32 | 100,
            cpu: 0,
            etype: crate::event::codes::CLOSE,
            params: vec![],
        }
    }

    #[test]
    fn live_source_yields_then_times_out() {
        let driver = QueueDriver::new(vec![frame(1), frame(2)]);
        let mut source = CaptureSource::open_live(Box::new(driver), 10, InterruptHandle::new());

        assert!(matches!(source.next().unwrap(), SourcePoll::Event(_)));
        assert!(matches!(source.next().unwrap(), SourcePoll::Event(_)));
        assert!(matches!(source.next().unwrap(), SourcePoll::Timeout));
        assert_eq!(source.stats().events_captured, 2);
    }

    #[test]
    fn raised_interrupt_turns_into_capture_interrupted() {
        let driver = QueueDriver::new(vec![]);
        let interrupt = InterruptHandle::new();
        let mut source = CaptureSource::open_live(Box::new(driver), 10, interrupt.clone());

        interrupt.raise();
        assert!(matches!(
            source.next(),
            Err(SinspError::CaptureInterrupted)
        ));
    }

    #[test]
    fn interrupt_wakes_blocked_wait() {
        let interrupt = InterruptHandle::new();
        let waker = interrupt.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.raise();
        });
        // Far shorter than the 10s bound proves the wake-up was the cause.
        assert!(interrupt.wait_timeout(Duration::from_secs(10)));
        handle.join().unwrap();
    }

    #[test]
    fn paused_live_source_reports_timeout() {
        let driver = QueueDriver::new(vec![frame(1)]);
        let mut source = CaptureSource::open_live(Box::new(driver), 1, InterruptHandle::new());
        source.pause();
        assert!(matches!(source.next().unwrap(), SourcePoll::Timeout));
        source.resume();
        assert!(matches!(source.next().unwrap(), SourcePoll::Event(_)));
    }
}
