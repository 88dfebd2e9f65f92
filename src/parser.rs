//! Event parser: the state-transition engine.
//!
//! Each event is dispatched on (category, direction). Enter events record
//! their arguments on the thread record; exit events complete the transition
//! using both the recorded arguments and the exit parameters. This two-phase
//! shape exists because syscall arguments and return values arrive on
//! separate events.
//!
//! The parser mutates the thread, FD and container tables, annotates the
//! enriched event with its resolved thread and FD, and hands fixed-category
//! callbacks to registered protocol decoders. Removals triggered by an event
//! (thread exit, fd close) are deferred one iteration so the enriched event
//! handed to the caller stays valid.

use crate::containers::ContainerManager;
use crate::decoders::{DecoderCallback, DecoderContext, DecoderRegistry};
use crate::event::{codes, Event, EventCategory, EventDirection};
use crate::fd_table::{FdDesc, FdType, SockTuple};
use crate::procfs;
use crate::threads::{PendingEnter, ThreadManager, ThreadRecord};

/// Removals deferred to the start of the next iteration.
#[derive(Debug, Default)]
pub struct DeferredOps {
    pub remove_thread: Option<i64>,
    pub remove_fds: Vec<(i64, i64)>,
}

impl DeferredOps {
    pub fn is_empty(&self) -> bool {
        self.remove_thread.is_none() && self.remove_fds.is_empty()
    }
}

/// Per-capture knobs the parser consults.
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    pub live: bool,
    /// Attempt /proc synthesis for unknown tids on live captures.
    pub query_os_if_not_found: bool,
}

pub struct Parser {
    config: ParserConfig,
    meta_pending: Option<crate::event::RawFrame>,
    n_proc_lookups: u64,
    n_fd_displacements: u64,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Parser {
        Parser {
            config,
            meta_pending: None,
            n_proc_lookups: 0,
            n_fd_displacements: 0,
        }
    }

    pub fn n_proc_lookups(&self) -> u64 {
        self.n_proc_lookups
    }

    /// Descriptors displaced from an occupied fd slot since open.
    pub fn n_fd_displacements(&self) -> u64 {
        self.n_fd_displacements
    }

    /// Surface the synthetic close of a descriptor displaced by
    /// `FdTable::add`: counted for capture stats and reported through the
    /// log facade.
    fn note_displaced_fd(&mut self, tid: i64, displaced: Option<FdDesc>) {
        let Some(old) = displaced else {
            return;
        };
        self.n_fd_displacements += 1;
        log::debug!(
            target: "sysinspect",
            "thread {tid}: fd {} ({}) displaced while open, synthesizing close",
            old.fd,
            old.ftype.name()
        );
    }

    /// Take the pending meta-event frame, if the previous event synthesized
    /// one. The inspector returns it before pulling the next raw event.
    pub fn take_meta(&mut self) -> Option<crate::event::RawFrame> {
        self.meta_pending.take()
    }

    pub fn has_meta_pending(&self) -> bool {
        self.meta_pending.is_some()
    }

    /// Process one bound event, mutating the reconstructed state.
    pub fn process_event(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        containers: &mut ContainerManager,
        decoders: &mut DecoderRegistry,
    ) -> DeferredOps {
        let mut deferred = DeferredOps::default();
        let category = evt.category();
        let direction = evt.direction();
        let ts = evt.ts();
        let tid = evt.tid();

        // Meta events mutate registries directly and need no thread context.
        if category.is_meta() {
            return deferred;
        }

        // Clone exits in the child create their own record; everything else
        // resolves (or synthesizes) the generating thread first.
        let clone_child = category == EventCategory::Clone
            && direction == EventDirection::Exit
            && evt.param_by_name("res").and_then(|v| v.as_i64()) == Some(0);

        if clone_child {
            self.parse_clone_child(evt, threads, containers, ts);
        } else if threads.find(tid, false, ts).is_none() {
            let record = self.synthesize_thread(tid, ts);
            let has_container = !record.container_id.is_empty();
            threads.add(record);
            if has_container {
                self.note_container(threads, containers, tid, ts);
            }
        }
        evt.set_thread_tid(tid);

        match direction {
            EventDirection::Enter => self.parse_enter(evt, threads),
            EventDirection::Exit => {
                self.parse_exit(evt, threads, containers, decoders, &mut deferred)
            }
        }

        deferred
    }

    /// Best-effort record for a tid the table has never seen.
    fn synthesize_thread(&mut self, tid: i64, ts: u64) -> ThreadRecord {
        if self.config.live && self.config.query_os_if_not_found {
            self.n_proc_lookups += 1;
            if let Some(record) = procfs::read_thread(tid, ts) {
                return record;
            }
        }
        ThreadRecord::incomplete(tid, ts)
    }

    /// Register the container of a (new) thread and queue a discovery
    /// meta-event for a previously unseen id.
    fn note_container(
        &mut self,
        threads: &mut ThreadManager,
        containers: &mut ContainerManager,
        tid: i64,
        ts: u64,
    ) {
        let Some(thread) = threads.find(tid, true, ts) else {
            return;
        };
        let resolved = containers.resolve(thread, self.config.live, ts);
        if let Some((id, true)) = resolved {
            let ctype = containers
                .get(&id)
                .map(|c| c.ctype.as_u32())
                .unwrap_or_default();
            let image = containers
                .get(&id)
                .map(|c| c.image.clone())
                .unwrap_or_default();
            self.meta_pending = Some(crate::event::RawFrame {
                ts,
                tgidpid: 0,
                cpu: 0,
                etype: codes::CONTAINER | 1,
                params: vec![
                    id.into_bytes(),
                    ctype.to_le_bytes().to_vec(),
                    image.into_bytes(),
                ],
            });
        }
    }

    fn parse_enter(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        let tid = evt.tid();
        let base = evt.type_code() & !1;
        let fd = evt.param_by_name("fd").and_then(|v| v.as_i64());
        let name = evt
            .param_by_name("name")
            .or_else(|| evt.param_by_name("filename"))
            .and_then(|v| v.as_str().map(str::to_string));
        let flags = evt
            .param_by_name("flags")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u32;
        let size = evt
            .param_by_name("size")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u32;
        let tuple = evt
            .param_by_name("addr")
            .or_else(|| evt.param_by_name("tuple"))
            .and_then(|v| v.as_tuple().cloned());
        let val = evt
            .param_by_name("newfd")
            .or_else(|| evt.param_by_name("uid"))
            .or_else(|| evt.param_by_name("gid"))
            .or_else(|| evt.param_by_name("status"))
            .and_then(|v| v.as_i64());

        if let Some(thread) = threads.find(tid, false, evt.ts()) {
            thread.pending_enter = Some(PendingEnter {
                etype: base,
                fd,
                name,
                flags,
                size,
                tuple,
                val,
            });
        }
        // An enter that names an fd already references the descriptor.
        if let Some(fd) = fd {
            evt.set_fd_num(fd);
        }
    }

    fn parse_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        containers: &mut ContainerManager,
        decoders: &mut DecoderRegistry,
        deferred: &mut DeferredOps,
    ) {
        let category = evt.category();
        match category {
            EventCategory::Clone => {
                // Child-side creation ran before dispatch; the parent-side
                // exit carries the child tid and creates nothing.
            }
            EventCategory::Execve => self.parse_execve_exit(evt, threads),
            EventCategory::Open | EventCategory::Openat | EventCategory::Creat => {
                self.parse_open_exit(evt, threads, decoders)
            }
            EventCategory::Socket => self.parse_socket_exit(evt, threads),
            EventCategory::Bind => self.parse_bind_exit(evt, threads, decoders),
            EventCategory::Connect => self.parse_connect_exit(evt, threads, decoders),
            EventCategory::Accept | EventCategory::Accept4 => {
                self.parse_accept_exit(evt, threads)
            }
            EventCategory::Read | EventCategory::Recv | EventCategory::Recvfrom => {
                self.parse_io_exit(evt, threads, decoders, DecoderCallback::Read)
            }
            EventCategory::Write | EventCategory::Send | EventCategory::Sendto => {
                self.parse_io_exit(evt, threads, decoders, DecoderCallback::Write)
            }
            EventCategory::Close => self.parse_close_exit(evt, threads, deferred),
            EventCategory::Dup | EventCategory::Dup2 | EventCategory::Dup3 => {
                self.parse_dup_exit(evt, threads)
            }
            EventCategory::Pipe => self.parse_pipe_exit(evt, threads),
            EventCategory::EventFd
            | EventCategory::SignalFd
            | EventCategory::InotifyInit
            | EventCategory::TimerfdCreate => self.parse_anon_fd_exit(evt, threads, category),
            EventCategory::Setuid | EventCategory::Setgid => {
                self.parse_setid_exit(evt, threads, category)
            }
            EventCategory::Exit | EventCategory::ExitGroup => {
                deferred.remove_thread = Some(evt.tid());
            }
            // No state transition: generic syscalls, unknown pass-through,
            // meta events, fatfile wrappers (unwrapped by the reader).
            _ => {}
        }

        // Exit consumed whatever the enter phase recorded for this type.
        let base = evt.type_code() & !1;
        if let Some(thread) = threads.find(evt.tid(), true, evt.ts()) {
            if thread
                .pending_enter
                .as_ref()
                .is_some_and(|pending| pending.etype == base)
            {
                thread.pending_enter = None;
            }
        }

        // Keep the container registry warm for whatever this thread runs in.
        if threads
            .get(evt.tid())
            .is_some_and(|t| !t.container_id.is_empty())
        {
            self.note_container(threads, containers, evt.tid(), evt.ts());
        }
    }

    fn parse_clone_child(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        containers: &mut ContainerManager,
        ts: u64,
    ) {
        let tid = evt.tid();
        let pid = evt.pid();
        let ptid = evt
            .param_by_name("ptid")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        // Child observed before its parent: synthesize a minimal parent so
        // the parent link resolves.
        if ptid > 0 && threads.get(ptid).is_none() {
            threads.add(ThreadRecord::incomplete(ptid, ts));
        }

        let mut child = match threads.get(ptid) {
            Some(parent) => ThreadRecord::inherit_from(parent, tid, pid, ts),
            None => ThreadRecord::new(tid, pid, ptid, ts),
        };

        // Event parameters override inherited attributes.
        if let Some(comm) = evt.param_by_name("comm").and_then(|v| v.as_str().map(str::to_string)) {
            if !comm.is_empty() {
                child.comm = comm;
            }
        }
        if let Some(exe) = evt.param_by_name("exe").and_then(|v| v.as_str().map(str::to_string)) {
            if !exe.is_empty() {
                child.exe = exe;
            }
        }
        if let Some(args) = evt.param_by_name("args").and_then(|v| v.as_str().map(str::to_string)) {
            if !args.is_empty() {
                child.args = args.split('\0').map(str::to_string).collect();
            }
        }
        if let Some(cwd) = evt.param_by_name("cwd").and_then(|v| v.as_str().map(str::to_string)) {
            if !cwd.is_empty() {
                child.cwd = cwd;
            }
        }
        if let Some(flags) = evt.param_by_name("flags").and_then(|v| v.as_i64()) {
            child.flags = flags as u32;
        }
        if let Some(uid) = evt.param_by_name("uid").and_then(|v| v.as_i64()) {
            child.uid = uid as u32;
        }
        if let Some(gid) = evt.param_by_name("gid").and_then(|v| v.as_i64()) {
            child.gid = gid as u32;
        }

        let has_container = !child.container_id.is_empty();
        threads.add(child);
        if has_container || self.config.live {
            self.note_container(threads, containers, tid, ts);
        }
    }

    fn parse_execve_exit(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        let res = evt.param_by_name("res").and_then(|v| v.as_i64());
        if res != Some(0) {
            return;
        }
        let exe = evt
            .param_by_name("exe")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let args: Vec<String> = evt
            .param_by_name("args")
            .and_then(|v| v.as_str().map(str::to_string))
            .map(|s| s.split('\0').filter(|a| !a.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let cwd = evt
            .param_by_name("cwd")
            .and_then(|v| v.as_str().map(str::to_string));
        let env: Vec<String> = evt
            .param_by_name("env")
            .and_then(|v| v.as_str().map(str::to_string))
            .map(|s| s.split('\0').filter(|a| !a.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        if !exe.is_empty() {
            thread.comm = exe.rsplit('/').next().unwrap_or(&exe).to_string();
            thread.exe = exe;
        }
        thread.args = args;
        if let Some(cwd) = cwd {
            thread.cwd = cwd;
        }
        if !env.is_empty() {
            thread.env = env;
        }
        thread.incomplete = false;
        // execve closes every close-on-exec descriptor.
        thread.fd_table_mut().remove_cloexec();
    }

    fn parse_open_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        decoders: &mut DecoderRegistry,
    ) {
        let Some(fd) = evt.param_by_name("fd").and_then(|v| v.as_i64()) else {
            return;
        };
        if fd < 0 {
            // Failed open: no state change.
            return;
        }
        let name = evt
            .param_by_name("name")
            .and_then(|v| v.as_str().map(str::to_string));
        let flags = evt
            .param_by_name("flags")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u32;
        let dirfd = evt.param_by_name("dirfd").and_then(|v| v.as_i64());

        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        // Fall back to the enter-phase name when the exit omits it.
        let name = name
            .or_else(|| {
                thread
                    .pending_enter
                    .as_ref()
                    .and_then(|pending| pending.name.clone())
            })
            .unwrap_or_default();

        let base_dir = match dirfd {
            Some(dfd) if dfd != AT_FDCWD => thread
                .fd_table()
                .get(dfd)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| thread.cwd.clone()),
            _ => thread.cwd.clone(),
        };
        let path = resolve_path(&base_dir, &name);

        let ftype = if flags & (libc::O_DIRECTORY as u32) != 0 {
            FdType::Directory
        } else {
            FdType::File
        };
        let mut desc = FdDesc::with_name(fd, ftype, path.clone());
        desc.open_flags = flags;
        desc.cloexec = flags & (libc::O_CLOEXEC as u32) != 0;
        let displaced = thread.fd_table_mut().add(desc);
        self.note_displaced_fd(evt.tid(), displaced);
        evt.set_fd_num(fd);

        decoders.dispatch(
            DecoderCallback::Open,
            &DecoderContext {
                tid: evt.tid(),
                fd: Some(fd),
                name: Some(&path),
                tuple: None,
                data: None,
            },
        );
    }

    fn parse_socket_exit(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        let Some(fd) = evt.param_by_name("fd").and_then(|v| v.as_i64()) else {
            return;
        };
        if fd < 0 {
            return;
        }
        let domain = evt
            .param_by_name("domain")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let ftype = match domain as i32 {
            libc::AF_INET => FdType::Ipv4Sock,
            libc::AF_INET6 => FdType::Ipv6Sock,
            libc::AF_UNIX => FdType::UnixSock,
            _ => FdType::Other,
        };
        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        let displaced = thread.fd_table_mut().add(FdDesc::new(fd, ftype));
        self.note_displaced_fd(evt.tid(), displaced);
        evt.set_fd_num(fd);
    }

    fn parse_bind_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        decoders: &mut DecoderRegistry,
    ) {
        if evt.param_by_name("res").and_then(|v| v.as_i64()) != Some(0) {
            return;
        }
        let tuple = evt.param_by_name("addr").and_then(|v| v.as_tuple().cloned());
        let Some(fd) = self.event_fd(evt, threads) else {
            return;
        };
        let tid = evt.tid();
        let Some(thread) = threads.find(tid, false, evt.ts()) else {
            return;
        };
        let Some(desc) = thread.fd_table_mut().get_mut(fd) else {
            return;
        };
        if let Some(tuple) = tuple {
            retarget_socket(desc, &tuple);
            desc.tuple = Some(tuple);
        }
        evt.set_fd_num(fd);
        let thread = threads.get(tid).expect("looked up above");
        decoders.dispatch(
            DecoderCallback::TupleChange,
            &DecoderContext {
                tid,
                fd: Some(fd),
                name: None,
                tuple: thread.fd_table().get(fd).and_then(|d| d.tuple.as_ref()),
                data: None,
            },
        );
    }

    fn parse_connect_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        decoders: &mut DecoderRegistry,
    ) {
        let res = evt
            .param_by_name("res")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        // In-progress non-blocking connects still carry a valid tuple.
        if res != 0 && res != -(libc::EINPROGRESS as i64) {
            return;
        }
        let tid = evt.tid();
        let exit_tuple = evt
            .param_by_name("tuple")
            .and_then(|v| v.as_tuple().cloned());
        let Some(fd) = self.event_fd(evt, threads) else {
            return;
        };
        let Some(thread) = threads.find(tid, false, evt.ts()) else {
            return;
        };
        let tuple = exit_tuple.or_else(|| {
            thread
                .pending_enter
                .as_ref()
                .and_then(|pending| pending.tuple.clone())
        });
        let Some(desc) = thread.fd_table_mut().get_mut(fd) else {
            return;
        };
        if let Some(tuple) = tuple {
            retarget_socket(desc, &tuple);
            desc.tuple = Some(tuple);
        }
        evt.set_fd_num(fd);

        let thread = threads.get(tid).expect("looked up above");
        decoders.dispatch(
            DecoderCallback::Connect,
            &DecoderContext {
                tid,
                fd: Some(fd),
                name: None,
                tuple: thread.fd_table().get(fd).and_then(|d| d.tuple.as_ref()),
                data: None,
            },
        );
    }

    fn parse_accept_exit(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        let Some(fd) = evt.param_by_name("fd").and_then(|v| v.as_i64()) else {
            return;
        };
        if fd < 0 {
            return;
        }
        let sockfd = evt.param_by_name("sockfd").and_then(|v| v.as_i64());
        let exit_tuple = evt
            .param_by_name("tuple")
            .and_then(|v| v.as_tuple().cloned());

        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        // Prefer the event's tuple; otherwise mirror the server socket.
        let (tuple, server_type) = match sockfd.and_then(|sfd| thread.fd_table().get(sfd)) {
            Some(server) => (
                exit_tuple.or_else(|| server.tuple.as_ref().map(|t| t.inverted())),
                Some(server.ftype),
            ),
            None => (exit_tuple, None),
        };

        let ftype = server_type.unwrap_or(match &tuple {
            Some(SockTuple::V4 { .. }) => FdType::Ipv4Sock,
            Some(SockTuple::V6 { .. }) => FdType::Ipv6Sock,
            Some(SockTuple::Unix { .. }) => FdType::UnixSock,
            None => FdType::Other,
        });
        let mut desc = FdDesc::new(fd, ftype);
        desc.tuple = tuple;
        let displaced = thread.fd_table_mut().add(desc);
        self.note_displaced_fd(evt.tid(), displaced);
        evt.set_fd_num(fd);
    }

    fn parse_io_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        decoders: &mut DecoderRegistry,
        callback: DecoderCallback,
    ) {
        let Some(fd) = self.event_fd(evt, threads) else {
            return;
        };
        evt.set_fd_num(fd);
        let data = evt.param_by_name("data").and_then(|v| match v {
            crate::event::ParamValue::Bytes(b) => Some(b),
            _ => None,
        });
        decoders.dispatch(
            callback,
            &DecoderContext {
                tid: evt.tid(),
                fd: Some(fd),
                name: None,
                tuple: None,
                data,
            },
        );
    }

    fn parse_close_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        deferred: &mut DeferredOps,
    ) {
        let res = evt
            .param_by_name("res")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        let Some(fd) = self.event_fd(evt, threads) else {
            return;
        };
        evt.set_fd_num(fd);
        if res == 0 {
            // Removal waits one iteration so the caller can still resolve
            // the descriptor from this event.
            deferred.remove_fds.push((evt.tid(), fd));
        }
    }

    fn parse_dup_exit(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        let newfd = match evt.category() {
            EventCategory::Dup => evt.param_by_name("res").and_then(|v| v.as_i64()),
            _ => evt
                .param_by_name("newfd")
                .and_then(|v| v.as_i64())
                .or_else(|| evt.param_by_name("res").and_then(|v| v.as_i64())),
        };
        let Some(newfd) = newfd.filter(|&fd| fd >= 0) else {
            return;
        };
        let Some(oldfd) = self.event_fd(evt, threads) else {
            return;
        };
        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        let Some(old_desc) = thread.fd_table().get(oldfd).cloned() else {
            return;
        };
        let mut copy = old_desc;
        copy.fd = newfd;
        // A descriptor already on newfd is closed first, as dup2 does.
        let displaced = thread.fd_table_mut().add(copy);
        self.note_displaced_fd(evt.tid(), displaced);
        evt.set_fd_num(newfd);
    }

    fn parse_pipe_exit(&mut self, evt: &mut Event, threads: &mut ThreadManager) {
        if evt.param_by_name("res").and_then(|v| v.as_i64()) != Some(0) {
            return;
        }
        let fd1 = evt.param_by_name("fd1").and_then(|v| v.as_i64());
        let fd2 = evt.param_by_name("fd2").and_then(|v| v.as_i64());
        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        if let Some(fd1) = fd1.filter(|&fd| fd >= 0) {
            let displaced = thread.fd_table_mut().add(FdDesc::new(fd1, FdType::Pipe));
            self.note_displaced_fd(evt.tid(), displaced);
            evt.set_fd_num(fd1);
        }
        if let Some(fd2) = fd2.filter(|&fd| fd >= 0) {
            let displaced = thread.fd_table_mut().add(FdDesc::new(fd2, FdType::Pipe));
            self.note_displaced_fd(evt.tid(), displaced);
        }
    }

    fn parse_anon_fd_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        category: EventCategory,
    ) {
        let Some(fd) = evt.param_by_name("fd").and_then(|v| v.as_i64()) else {
            return;
        };
        if fd < 0 {
            return;
        }
        let ftype = match category {
            EventCategory::EventFd => FdType::EventFd,
            EventCategory::SignalFd => FdType::SignalFd,
            EventCategory::InotifyInit => FdType::Inotify,
            _ => FdType::TimerFd,
        };
        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        let displaced = thread.fd_table_mut().add(FdDesc::new(fd, ftype));
        self.note_displaced_fd(evt.tid(), displaced);
        evt.set_fd_num(fd);
    }

    fn parse_setid_exit(
        &mut self,
        evt: &mut Event,
        threads: &mut ThreadManager,
        category: EventCategory,
    ) {
        if evt.param_by_name("res").and_then(|v| v.as_i64()) != Some(0) {
            return;
        }
        let field = match category {
            EventCategory::Setuid => "uid",
            _ => "gid",
        };
        let Some(id) = evt.param_by_name(field).and_then(|v| v.as_i64()) else {
            return;
        };
        let Some(thread) = threads.find(evt.tid(), false, evt.ts()) else {
            return;
        };
        match category {
            EventCategory::Setuid => thread.uid = id as u32,
            _ => thread.gid = id as u32,
        }
    }

    /// FD referenced by an exit event: the exit's own fd parameter when
    /// present, otherwise whatever the enter phase recorded.
    fn event_fd(&self, evt: &Event, threads: &mut ThreadManager) -> Option<i64> {
        if let Some(fd) = evt.param_by_name("fd").and_then(|v| v.as_i64()) {
            return Some(fd);
        }
        let base = evt.type_code() & !1;
        let thread = threads.find(evt.tid(), true, evt.ts())?;
        let pending = thread.pending_enter.as_ref()?;
        if pending.etype == base {
            pending.fd
        } else {
            None
        }
    }
}

const AT_FDCWD: i64 = libc::AT_FDCWD as i64;

fn resolve_path(base: &str, name: &str) -> String {
    if name.starts_with('/') || base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// Align a socket descriptor's type tag with an observed tuple.
fn retarget_socket(desc: &mut FdDesc, tuple: &SockTuple) {
    desc.ftype = match tuple {
        SockTuple::V4 { .. } => FdType::Ipv4Sock,
        SockTuple::V6 { .. } => FdType::Ipv6Sock,
        SockTuple::Unix { .. } => FdType::UnixSock,
    };
}
