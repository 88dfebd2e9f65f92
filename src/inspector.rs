//! The inspector: capture control, the per-event loop, and the public
//! lookup surface.
//!
//! One inspector owns one capture. All state mutation happens on the thread
//! calling [`Inspector::next`]; accessors hand out borrows that are valid
//! until the next call. A clone of the [`InterruptHandle`] taken before the
//! capture loop starts lets another task interrupt a blocked `next`, which
//! then returns `CaptureInterrupted`.

use std::path::{Path, PathBuf};

use crate::containers::{ContainerInfo, ContainerManager};
use crate::cycle_writer::{CycleWriterConfig, DumpTables};
use crate::decoders::{DecoderHandle, DecoderRegistry, ProtoDecoder};
use crate::dumper::Dumper;
use crate::error::{Result, SinspError};
use crate::event::{format_buffer, BufferFormat, Event, EventInfo, EVENT_TABLE};
use crate::filter::{Filter, FilterContext};
use crate::ifinfo::{Ipv4IfInfo, NetworkInterfaces};
use crate::logger::{LogCallback, Logger, Severity};
use crate::parser::{DeferredOps, Parser, ParserConfig};
use crate::procfs;
use crate::source::{
    CaptureSource, CaptureStats, DeviceDriver, EventDriver, InterruptHandle, SourcePoll,
    DEFAULT_DEVICE,
};
use crate::threads::{PrivateStateRegistry, SlotId, ThreadManager, ThreadRecord};
use crate::trace_file::{wrap_fatfile, MachineInfo};
use crate::userdb::{GroupInfo, UserDb, UserInfo};
use crate::utils::pid_from_tgidpid;

/// Default maximum captured payload bytes per data parameter.
pub const DEFAULT_SNAPLEN: u32 = 80;

/// Sweep the thread and container tables at least every this many processed
/// events.
const SWEEP_EVENT_INTERVAL: u64 = 512;

/// ... or at least every this much event time (ns).
const SWEEP_NS_INTERVAL: u64 = 1_000_000_000;

/// Capture lifecycle. `Closed` is terminal; a new capture needs a fresh
/// inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorState {
    Uninit,
    ImportingLive,
    ImportingFile,
    Running,
    Paused,
    Closed,
}

/// Outcome of one call to [`Inspector::next`].
#[derive(Debug)]
pub enum NextResult<'a> {
    Event(&'a Event),
    Timeout,
    Eof,
}

enum Pulled {
    Event,
    Timeout,
    Eof,
}

pub struct Inspector {
    state: InspectorState,
    logger: Logger,
    source: Option<CaptureSource>,
    interrupt: InterruptHandle,
    parser: Option<Parser>,
    threads: ThreadManager,
    containers: ContainerManager,
    ifaces: NetworkInterfaces,
    users: UserDb,
    machine: Option<MachineInfo>,
    filter: Option<Filter>,
    decoders: DecoderRegistry,
    private_state: PrivateStateRegistry,
    dumper: Option<Dumper>,
    evt: Event,
    /// Raw events captured and processed.
    num_events: u64,
    /// Events handed to the caller; the enriched event number sequence.
    returned_events: u64,
    first_event_ts: Option<u64>,
    last_event_ts: u64,
    last_sweep_events: u64,
    last_sweep_ts: u64,
    deferred: DeferredOps,
    last_error: Option<String>,
    fatal: Option<String>,

    import_users: bool,
    debug_mode: bool,
    fatfile_dump: bool,
    strict_dump: bool,
    snaplen: u32,
    max_evt_output_len: u32,
    buffer_format: BufferFormat,
    query_os_if_not_found: bool,
    self_pid: i64,
}

impl Default for Inspector {
    fn default() -> Self {
        Inspector::new()
    }
}

impl Inspector {
    pub fn new() -> Inspector {
        Inspector {
            state: InspectorState::Uninit,
            logger: Logger::default(),
            source: None,
            interrupt: InterruptHandle::new(),
            parser: None,
            threads: ThreadManager::new(),
            containers: ContainerManager::new(),
            ifaces: NetworkInterfaces::new(),
            users: UserDb::new(),
            machine: None,
            filter: None,
            decoders: DecoderRegistry::new(),
            private_state: PrivateStateRegistry::default(),
            dumper: None,
            evt: Event::default(),
            num_events: 0,
            returned_events: 0,
            first_event_ts: None,
            last_event_ts: 0,
            last_sweep_events: 0,
            last_sweep_ts: 0,
            deferred: DeferredOps::default(),
            last_error: None,
            fatal: None,
            import_users: true,
            debug_mode: false,
            fatfile_dump: false,
            strict_dump: false,
            snaplen: DEFAULT_SNAPLEN,
            max_evt_output_len: 0,
            buffer_format: BufferFormat::Normal,
            query_os_if_not_found: true,
            self_pid: std::process::id() as i64,
        }
    }

    // ---- capture control ----

    /// Start a live capture using the conventional capture device.
    pub fn open_live(&mut self, timeout_ms: u32) -> Result<()> {
        let driver = DeviceDriver::open(Path::new(DEFAULT_DEVICE)).map_err(|e| {
            self.record(SinspError::SourceOpen {
                path: PathBuf::from(DEFAULT_DEVICE),
                message: e.to_string(),
            })
        })?;
        self.open_live_with(Box::new(driver), timeout_ms)
    }

    /// Start a live capture over a caller-supplied driver.
    pub fn open_live_with(
        &mut self,
        driver: Box<dyn EventDriver>,
        timeout_ms: u32,
    ) -> Result<()> {
        self.ensure_uninit()?;
        self.state = InspectorState::ImportingLive;

        self.machine = Some(MachineInfo::from_os());
        if let Err(e) = self.ifaces.import_from_os() {
            self.logger
                .log(Severity::Warning, &format!("interface import failed: {e}"));
        }
        if self.import_users {
            self.users.import_from_os();
        }
        for mut record in procfs::scan_process_table(0) {
            if record.is_main_thread() {
                procfs::import_fd_table(&mut record);
            }
            self.threads.add(record);
        }
        self.logger.log(
            Severity::Info,
            &format!("imported {} threads from /proc", self.threads.len()),
        );

        self.start_capture_common(
            CaptureSource::open_live(driver, timeout_ms, self.interrupt.clone()),
            true,
        );
        Ok(())
    }

    /// Start reading a trace file.
    pub fn open_file(&mut self, path: &Path) -> Result<()> {
        self.ensure_uninit()?;
        self.state = InspectorState::ImportingFile;

        let source = match CaptureSource::open_file(path, self.interrupt.clone()) {
            Ok(source) => source,
            Err(e) => {
                self.state = InspectorState::Uninit;
                return Err(self.record(e));
            }
        };
        {
            let reader = source.trace_reader().expect("file source has a reader");
            self.machine = Some(reader.machine_info().clone());
            self.ifaces = reader.interfaces();
            for user in reader.users() {
                self.users.add_user(user.clone());
            }
            for group in reader.groups() {
                self.users.add_group(group.clone());
            }
        }

        self.start_capture_common(source, false);
        Ok(())
    }

    fn ensure_uninit(&self) -> Result<()> {
        match self.state {
            InspectorState::Uninit => Ok(()),
            InspectorState::Closed => Err(SinspError::CaptureInterrupted),
            _ => Err(SinspError::ConfigLocked {
                message: "a capture is already open on this inspector".into(),
            }),
        }
    }

    fn start_capture_common(&mut self, source: CaptureSource, live: bool) {
        self.private_state.lock();
        self.threads.freeze_private_state(self.private_state.total());
        self.decoders.reset_all();
        self.parser = Some(Parser::new(ParserConfig {
            live,
            query_os_if_not_found: self.query_os_if_not_found,
        }));
        self.source = Some(source);
        self.state = InspectorState::Running;
    }

    /// Pause a live capture.
    pub fn stop_capture(&mut self) -> Result<()> {
        if !self.is_live() || self.state != InspectorState::Running {
            return Err(self.record(SinspError::ConfigLocked {
                message: "stop_capture requires a running live capture".into(),
            }));
        }
        self.source.as_mut().expect("live capture").pause();
        self.state = InspectorState::Paused;
        Ok(())
    }

    /// Resume a live capture paused with [`Inspector::stop_capture`].
    pub fn start_capture(&mut self) -> Result<()> {
        if !self.is_live() || self.state != InspectorState::Paused {
            return Err(self.record(SinspError::ConfigLocked {
                message: "start_capture requires a paused live capture".into(),
            }));
        }
        self.source.as_mut().expect("live capture").resume();
        self.state = InspectorState::Running;
        Ok(())
    }

    /// End the capture and release the source and dumper. Terminal: further
    /// `next` calls return `CaptureInterrupted`.
    pub fn close(&mut self) {
        self.interrupt.raise();
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(dumper) = self.dumper.take() {
            if let Err(e) = dumper.finish() {
                self.logger
                    .log(Severity::Warning, &format!("dump finalize failed: {e}"));
            }
        }
        self.state = InspectorState::Closed;
    }

    /// Handle another task can use to interrupt a blocked [`Inspector::next`].
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn state(&self) -> InspectorState {
        self.state
    }

    // ---- the event loop ----

    /// Get the next enriched event. The returned reference is valid until
    /// the next call on this inspector.
    pub fn next(&mut self) -> Result<NextResult<'_>> {
        match self.next_inner() {
            Ok(Pulled::Event) => Ok(NextResult::Event(&self.evt)),
            Ok(Pulled::Timeout) => Ok(NextResult::Timeout),
            Ok(Pulled::Eof) => Ok(NextResult::Eof),
            Err(e) => Err(self.record(e)),
        }
    }

    fn next_inner(&mut self) -> Result<Pulled> {
        if let Some(message) = &self.fatal {
            return Err(SinspError::Fatal {
                message: message.clone(),
            });
        }
        match self.state {
            InspectorState::Running | InspectorState::Paused => {}
            InspectorState::Closed => return Err(SinspError::CaptureInterrupted),
            _ => {
                return Err(SinspError::ConfigLocked {
                    message: "next() requires an open capture".into(),
                })
            }
        }

        loop {
            // Pending meta-event first.
            if let Some(frame) = self.parser.as_mut().and_then(|p| p.take_meta()) {
                self.returned_events += 1;
                self.evt.bind(frame, self.returned_events);
                return Ok(Pulled::Event);
            }

            // Removals deferred by the previous iteration.
            self.apply_deferred();
            self.maybe_sweep();

            let poll = self.source.as_mut().expect("open capture").next();
            let frame = match poll {
                Ok(SourcePoll::Event(frame)) => frame,
                Ok(SourcePoll::Timeout) => return Ok(Pulled::Timeout),
                Ok(SourcePoll::Eof) => return Ok(Pulled::Eof),
                Err(e) => return Err(e),
            };

            self.num_events += 1;
            if self.first_event_ts.is_none() {
                self.first_event_ts = Some(frame.ts);
            }
            self.last_event_ts = frame.ts;

            // Debug mode hides this process's own activity on live captures.
            if self.debug_mode
                && self.is_live()
                && pid_from_tgidpid(frame.tgidpid) == self.self_pid
            {
                continue;
            }

            self.evt.bind(frame, self.returned_events + 1);
            let parser = self.parser.as_mut().expect("open capture");
            self.deferred = parser.process_event(
                &mut self.evt,
                &mut self.threads,
                &mut self.containers,
                &mut self.decoders,
            );

            let accepted = {
                let thread = self.evt.thread_tid().and_then(|tid| self.threads.get(tid));
                let fd = self
                    .evt
                    .fd_num()
                    .and_then(|fd| thread.and_then(|t| t.fd_table().get(fd)));
                let ctx = FilterContext {
                    event: Some(&self.evt),
                    thread,
                    fd,
                };
                self.filter.as_ref().map_or(true, |f| f.evaluate(&ctx))
            };

            if !accepted {
                // Fatfile mode preserves dropped state events in the dump so
                // replay rebuilds the same tables. Only runs while a dumper
                // is attached.
                if self.fatfile_dump
                    && self.dumper.is_some()
                    && self.evt.category().carries_state()
                {
                    let wrapped = wrap_fatfile(self.evt.raw());
                    self.dump_frame_with_policy(&wrapped)?;
                }
                // The dropped event never reaches the caller, so its
                // removals can run now.
                self.apply_deferred();
                continue;
            }

            if self.dumper.is_some() {
                let frame = self.evt.raw().clone();
                self.dump_frame_with_policy(&frame)?;
            }

            self.returned_events += 1;
            return Ok(Pulled::Event);
        }
    }

    fn dump_frame_with_policy(&mut self, frame: &crate::event::RawFrame) -> Result<()> {
        let Some(dumper) = self.dumper.as_mut() else {
            return Ok(());
        };
        match dumper.write_frame(frame) {
            Ok(()) => Ok(()),
            Err(e) if self.strict_dump => Err(e),
            Err(e) => {
                dumper.pause_dumping();
                self.logger.log(
                    Severity::Warning,
                    &format!("dump write failed, dumping paused: {e}"),
                );
                self.last_error = Some(e.to_string());
                Ok(())
            }
        }
    }

    fn apply_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let deferred = std::mem::take(&mut self.deferred);
        for (tid, fd) in deferred.remove_fds {
            if let Some(thread) = self.threads.find(tid, true, 0) {
                thread.fd_table_mut().remove(fd);
            }
        }
        if let Some(tid) = deferred.remove_thread {
            self.threads.remove(tid, false);
        }
    }

    fn maybe_sweep(&mut self) {
        if self.last_event_ts == 0 {
            return;
        }
        let due_by_count = self.num_events - self.last_sweep_events >= SWEEP_EVENT_INTERVAL;
        let due_by_time = self.last_event_ts.saturating_sub(self.last_sweep_ts)
            >= SWEEP_NS_INTERVAL
            && self.last_sweep_ts != 0;
        if !due_by_count && !due_by_time && self.last_sweep_ts != 0 {
            return;
        }
        if self.last_sweep_ts == 0 {
            // First event seen; start the clock without sweeping.
            self.last_sweep_ts = self.last_event_ts;
            self.last_sweep_events = self.num_events;
            return;
        }
        let evicted = self.threads.sweep_inactive(self.last_event_ts);
        if evicted > 0 {
            self.logger
                .log(Severity::Debug, &format!("swept {evicted} inactive threads"));
        }
        self.containers
            .sweep_inactive(self.last_event_ts, self.threads.referenced_container_ids());
        self.last_sweep_events = self.num_events;
        self.last_sweep_ts = self.last_event_ts;
    }

    fn record(&mut self, e: SinspError) -> SinspError {
        self.last_error = Some(e.to_string());
        if e.is_fatal() {
            if let SinspError::Fatal { message } = &e {
                self.fatal = Some(message.clone());
                self.state = InspectorState::Closed;
            }
        }
        e
    }

    // ---- configuration ----

    /// Compile and install a capture filter.
    pub fn set_filter(&mut self, expression: &str) -> Result<()> {
        let filter = Filter::compile(expression).map_err(|e| self.record(e))?;
        self.filter = Some(filter);
        Ok(())
    }

    /// The installed filter expression, empty when none is set.
    pub fn get_filter(&self) -> &str {
        self.filter.as_ref().map(|f| f.as_str()).unwrap_or("")
    }

    /// Set the capture snaplen. Live captures only.
    pub fn set_snaplen(&mut self, bytes: u32) -> Result<()> {
        if !self.is_live() {
            return Err(self.record(SinspError::ConfigLocked {
                message: "snaplen can only be set on live captures".into(),
            }));
        }
        self.snaplen = bytes;
        self.source
            .as_mut()
            .expect("live capture")
            .set_snaplen(bytes);
        Ok(())
    }

    pub fn snaplen(&self) -> u32 {
        self.snaplen
    }

    /// Choose whether user and group tables are imported at open. Must be
    /// called before the capture starts.
    pub fn set_import_users(&mut self, import: bool) -> Result<()> {
        if self.state != InspectorState::Uninit {
            return Err(self.record(SinspError::ConfigLocked {
                message: "import_users must be set before the capture opens".into(),
            }));
        }
        self.import_users = import;
        Ok(())
    }

    /// Hide this process's own events on live captures.
    pub fn set_debug_mode(&mut self, enable: bool) {
        self.debug_mode = enable;
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.debug_mode
    }

    /// Preserve filtered-out state events in dumps.
    pub fn set_fatfile_dump_mode(&mut self, enable: bool) {
        self.fatfile_dump = enable;
    }

    /// Escalate dump I/O errors instead of pausing the dump.
    pub fn set_strict_dump(&mut self, strict: bool) {
        self.strict_dump = strict;
    }

    /// Truncate rendered event argument strings to this length; 0 means no
    /// limit.
    pub fn set_max_evt_output_len(&mut self, len: u32) {
        self.max_evt_output_len = len;
    }

    pub fn max_evt_output_len(&self) -> u32 {
        self.max_evt_output_len
    }

    pub fn set_buffer_format(&mut self, format: BufferFormat) {
        self.buffer_format = format;
    }

    pub fn get_buffer_format(&self) -> BufferFormat {
        self.buffer_format
    }

    /// Control /proc synthesis for unknown tids on live captures.
    pub fn set_query_os_if_not_found(&mut self, query: bool) {
        self.query_os_if_not_found = query;
    }

    // ---- dumping ----

    fn dump_tables(&self) -> DumpTables {
        DumpTables {
            machine: self.machine.clone().unwrap_or_default(),
            ifaces: self.ifaces.clone(),
            users: self.users.clone(),
        }
    }

    /// Start dumping accepted events to a capture file.
    pub fn autodump_start(&mut self, path: &Path, compress: bool) -> Result<()> {
        if self.source.is_none() {
            return Err(self.record(SinspError::ConfigLocked {
                message: "autodump requires an open capture".into(),
            }));
        }
        let tables = self.dump_tables();
        let dumper = Dumper::single(path, compress, &tables).map_err(|e| self.record(e))?;
        self.dumper = Some(dumper);
        Ok(())
    }

    /// Rotate the dump to its next file.
    pub fn autodump_next_file(&mut self) -> Result<()> {
        match self.dumper.as_mut() {
            Some(dumper) => {
                let result = dumper.next_file();
                result.map_err(|e| self.record(e))
            }
            None => Err(self.record(SinspError::ConfigLocked {
                message: "no dump is active".into(),
            })),
        }
    }

    /// Stop the active dump and finalize its file.
    pub fn autodump_stop(&mut self) -> Result<()> {
        match self.dumper.take() {
            Some(dumper) => dumper.finish().map_err(|e| self.record(e)),
            None => Ok(()),
        }
    }

    /// Configure a rotating dump.
    pub fn setup_cycle_writer(
        &mut self,
        base_name: &str,
        rollover_mb: u64,
        duration_s: u64,
        file_limit: u32,
        cycle: bool,
        compress: bool,
    ) -> Result<()> {
        if self.source.is_none() {
            return Err(self.record(SinspError::ConfigLocked {
                message: "cycle writer requires an open capture".into(),
            }));
        }
        let config = CycleWriterConfig {
            base_name: base_name.to_string(),
            rollover_mb,
            duration_s,
            file_limit,
            cycle,
            compress,
        };
        self.dumper = Some(Dumper::cycle(config, self.dump_tables()));
        Ok(())
    }

    // ---- lookups ----

    /// Look up a thread without touching its access time.
    pub fn get_thread(&self, tid: i64) -> Option<&ThreadRecord> {
        self.threads.get(tid)
    }

    /// Look up a thread, optionally synthesizing it from /proc on live
    /// captures. `lookup_only` leaves eviction state untouched.
    pub fn get_thread_or_query(
        &mut self,
        tid: i64,
        query_os: bool,
        lookup_only: bool,
    ) -> Result<&ThreadRecord> {
        if self.threads.get(tid).is_none() && query_os && self.is_live() {
            if let Some(record) = procfs::read_thread(tid, self.last_event_ts) {
                self.threads.add(record);
            }
        }
        if self.threads.get(tid).is_none() {
            return Err(self.record(SinspError::LookupFailed {
                kind: "thread",
                id: tid,
            }));
        }
        let now = self.last_event_ts;
        let record = if lookup_only {
            self.threads.get(tid)
        } else {
            self.threads.find(tid, false, now).map(|r| &*r)
        };
        Ok(record.expect("presence checked above"))
    }

    pub fn get_container(&self, id: &str) -> Option<&ContainerInfo> {
        self.containers.get(id)
    }

    pub fn get_userlist(&self) -> &std::collections::HashMap<u32, UserInfo> {
        self.users.users()
    }

    pub fn get_grouplist(&self) -> &std::collections::HashMap<u32, GroupInfo> {
        self.users.groups()
    }

    pub fn get_ifaddr_list(&self) -> &NetworkInterfaces {
        &self.ifaces
    }

    /// Append an ipv4 interface to the view.
    pub fn import_ipv4_interface(&mut self, iface: Ipv4IfInfo) {
        self.ifaces.import_ipv4(iface);
    }

    pub fn get_machine_info(&self) -> Option<&MachineInfo> {
        self.machine.as_ref()
    }

    pub fn get_capture_stats(&self) -> CaptureStats {
        let mut stats = self
            .source
            .as_ref()
            .map(|s| s.stats())
            .unwrap_or_default();
        stats.n_proc_lookups = self
            .parser
            .as_ref()
            .map(|p| p.n_proc_lookups())
            .unwrap_or(0);
        stats.tid_collisions = self.threads.n_collisions();
        stats.fd_displacements = self
            .parser
            .as_ref()
            .map(|p| p.n_fd_displacements())
            .unwrap_or(0);
        stats
    }

    /// Raw events captured and processed since open.
    pub fn get_num_events(&self) -> u64 {
        self.num_events
    }

    /// Timestamp of the first captured event, if any. Written once.
    pub fn get_first_event_ts(&self) -> Option<u64> {
        self.first_event_ts
    }

    /// Approximate read progress, 0-100. Always 0 live.
    pub fn get_read_progress(&self) -> f64 {
        self.source.as_ref().map(|s| s.progress_pct()).unwrap_or(0.0)
    }

    /// The static event description tables.
    pub fn get_event_info_tables(&self) -> &'static [EventInfo] {
        EVENT_TABLE
    }

    /// Name of the trace file being read, empty for live captures.
    pub fn get_input_filename(&self) -> String {
        self.source
            .as_ref()
            .and_then(|s| s.input_filename())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_live(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_live())
    }

    /// The most recent enriched event. Overwritten on every `next`.
    pub fn event(&self) -> &Event {
        &self.evt
    }

    /// Render the current event's data payload with the configured buffer
    /// format and output length limit.
    pub fn event_buffer_string(&self) -> Option<String> {
        let data = self.evt.param_by_name("data")?;
        let bytes = data.as_bytes()?;
        Some(format_buffer(
            bytes,
            self.buffer_format,
            self.max_evt_output_len,
        ))
    }

    // ---- extension hooks ----

    /// Reserve per-thread private state for an extension. Fails once the
    /// capture has started.
    pub fn reserve_thread_memory(&mut self, bytes: usize) -> Result<SlotId> {
        let result = self.private_state.reserve(bytes);
        result.map_err(|e| self.record(e))
    }

    /// Offset and length of a reserved slot inside each record's block.
    pub fn thread_memory_slot(&self, slot: SlotId) -> Option<(usize, usize)> {
        self.private_state.slot(slot)
    }

    pub fn register_protodecoder(&mut self, decoder: Box<dyn ProtoDecoder>) -> DecoderHandle {
        self.decoders.register(decoder)
    }

    /// Find a registered decoder by name.
    pub fn require_protodecoder(&mut self, name: &str) -> Result<DecoderHandle> {
        let result = self.decoders.require(name);
        result.map_err(|e| self.record(e))
    }

    /// Ask for a decoder to be reset when a capture starts.
    pub fn protodecoder_register_reset(&mut self, handle: DecoderHandle) {
        self.decoders.register_reset(handle);
    }

    // ---- diagnostics ----

    /// Human-readable string of the most recent failure.
    pub fn get_last_error(&self) -> String {
        self.last_error.clone().unwrap_or_default()
    }

    pub fn set_log_callback(&mut self, cb: LogCallback) {
        self.logger.set_callback(cb);
    }

    pub fn set_min_log_severity(&mut self, severity: Severity) {
        self.logger.set_min_severity(severity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_before_open_is_rejected() {
        let mut inspector = Inspector::new();
        match inspector.next() {
            Err(SinspError::ConfigLocked { .. }) => {}
            other => panic!("expected ConfigLocked, got {other:?}"),
        }
        assert!(!inspector.get_last_error().is_empty());
    }

    #[test]
    fn reserve_thread_memory_locks_at_open() {
        let mut inspector = Inspector::new();
        let slot = inspector.reserve_thread_memory(16).unwrap();
        assert_eq!(inspector.thread_memory_slot(slot), Some((0, 16)));

        // Opening a capture freezes the registry.
        inspector.private_state.lock();
        match inspector.reserve_thread_memory(8) {
            Err(SinspError::ConfigLocked { .. }) => {}
            other => panic!("expected ConfigLocked, got {other:?}"),
        }
    }

    #[test]
    fn snaplen_requires_live_capture() {
        let mut inspector = Inspector::new();
        match inspector.set_snaplen(256) {
            Err(SinspError::ConfigLocked { .. }) => {}
            other => panic!("expected ConfigLocked, got {other:?}"),
        }
    }

    #[test]
    fn import_users_locked_after_state_change() {
        let mut inspector = Inspector::new();
        inspector.set_import_users(false).unwrap();
        inspector.state = InspectorState::Running;
        assert!(inspector.set_import_users(true).is_err());
    }

    #[test]
    fn filter_compile_error_is_recorded() {
        let mut inspector = Inspector::new();
        let err = inspector.set_filter("evt.type = ").unwrap_err();
        match err {
            SinspError::FilterCompile { pos, .. } => assert_eq!(pos, 11),
            other => panic!("expected FilterCompile, got {other:?}"),
        }
        assert!(inspector.get_last_error().contains("position 11"));
        assert_eq!(inspector.get_filter(), "");

        inspector.set_filter("evt.type = open").unwrap();
        assert_eq!(inspector.get_filter(), "evt.type = open");
    }

    #[test]
    fn close_is_terminal() {
        let mut inspector = Inspector::new();
        inspector.close();
        assert_eq!(inspector.state(), InspectorState::Closed);
        match inspector.next() {
            Err(SinspError::CaptureInterrupted) => {}
            other => panic!("expected CaptureInterrupted, got {other:?}"),
        }
    }
}
