//! Thread table: reconstructed thread/process records and their manager.
//!
//! Records are exclusively owned by the manager; parent/child links are tid
//! values resolved through it. The table is bounded: an inactivity sweep
//! evicts records unseen for longer than the thread timeout, and inserting
//! past the size cap evicts the least recently accessed record first.

use std::collections::HashMap;

use crate::error::{Result, SinspError};
use crate::fd_table::{FdTable, SockTuple};

/// Default cap on thread table size.
pub const DEFAULT_MAX_THREAD_TABLE_SIZE: usize = 65536;
/// Default inactivity timeout before a thread is swept (ns).
pub const DEFAULT_THREAD_TIMEOUT_NS: u64 = 1800 * 1_000_000_000;

/// Arguments recorded on syscall entry, consumed by the matching exit.
#[derive(Debug, Clone, Default)]
pub struct PendingEnter {
    pub etype: u16,
    pub fd: Option<i64>,
    pub name: Option<String>,
    pub flags: u32,
    pub size: u32,
    pub tuple: Option<SockTuple>,
    pub val: Option<i64>,
}

/// Reconstructed state for one thread. Equals a process record when
/// `tid == pid`.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub tid: i64,
    pub pid: i64,
    pub ptid: i64,
    pub comm: String,
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: Vec<String>,
    pub uid: u32,
    pub gid: u32,
    pub container_id: String,
    /// Clone flags observed at creation, zero when unknown.
    pub flags: u32,
    /// True for records synthesized with only tid and timestamp known.
    pub incomplete: bool,
    pub creation_ts: u64,
    last_access_ts: u64,
    private_state: Vec<u8>,
    fd_table: FdTable,
    /// In-flight enter-phase arguments awaiting the exit event.
    pub pending_enter: Option<PendingEnter>,
}

impl ThreadRecord {
    pub fn new(tid: i64, pid: i64, ptid: i64, ts: u64) -> Self {
        ThreadRecord {
            tid,
            pid,
            ptid,
            comm: String::new(),
            exe: String::new(),
            args: Vec::new(),
            cwd: String::new(),
            env: Vec::new(),
            uid: 0,
            gid: 0,
            container_id: String::new(),
            flags: 0,
            incomplete: false,
            creation_ts: ts,
            last_access_ts: ts,
            private_state: Vec::new(),
            fd_table: FdTable::new(),
            pending_enter: None,
        }
    }

    /// Minimal record for a tid observed with no other context.
    pub fn incomplete(tid: i64, ts: u64) -> Self {
        let mut record = ThreadRecord::new(tid, tid, 0, ts);
        record.incomplete = true;
        record
    }

    /// Child record inheriting process-wide attributes from its parent.
    pub fn inherit_from(parent: &ThreadRecord, tid: i64, pid: i64, ts: u64) -> Self {
        let mut record = ThreadRecord::new(tid, pid, parent.tid, ts);
        record.comm = parent.comm.clone();
        record.exe = parent.exe.clone();
        record.args = parent.args.clone();
        record.cwd = parent.cwd.clone();
        record.env = parent.env.clone();
        record.uid = parent.uid;
        record.gid = parent.gid;
        record.container_id = parent.container_id.clone();
        record
    }

    pub fn is_main_thread(&self) -> bool {
        self.tid == self.pid
    }

    pub fn fd_table(&self) -> &FdTable {
        &self.fd_table
    }

    pub fn fd_table_mut(&mut self) -> &mut FdTable {
        &mut self.fd_table
    }

    pub fn last_access_ts(&self) -> u64 {
        self.last_access_ts
    }

    pub(crate) fn touch(&mut self, ts: u64) {
        if ts > self.last_access_ts {
            self.last_access_ts = ts;
        }
    }

    pub(crate) fn size_private_state(&mut self, total: usize) {
        self.private_state = vec![0; total];
    }

    /// Extension-owned per-thread state for a reserved slot.
    pub fn private_state(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.private_state.get(offset..offset + len)
    }

    pub fn private_state_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.private_state.get_mut(offset..offset + len)
    }
}

/// Identifier returned by [`PrivateStateRegistry::reserve`].
pub type SlotId = u32;

/// Registry of per-thread private-state reservations. Offsets are frozen
/// when the capture starts; reservation afterwards fails.
#[derive(Debug, Default)]
pub struct PrivateStateRegistry {
    slots: Vec<(usize, usize)>,
    total: usize,
    locked: bool,
}

impl PrivateStateRegistry {
    pub fn reserve(&mut self, bytes: usize) -> Result<SlotId> {
        if self.locked {
            return Err(SinspError::ConfigLocked {
                message: "thread memory cannot be reserved after the capture starts".into(),
            });
        }
        let slot = self.slots.len() as SlotId;
        self.slots.push((self.total, bytes));
        self.total += bytes;
        Ok(slot)
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Offset and length of a slot within each record's private block.
    pub fn slot(&self, id: SlotId) -> Option<(usize, usize)> {
        self.slots.get(id as usize).copied()
    }
}

/// Owner of every thread record observed in the capture.
#[derive(Debug)]
pub struct ThreadManager {
    threads: HashMap<i64, ThreadRecord>,
    max_table_size: usize,
    thread_timeout_ns: u64,
    private_state_len: usize,
    n_collisions: u64,
    n_evicted: u64,
}

impl Default for ThreadManager {
    fn default() -> Self {
        ThreadManager {
            threads: HashMap::new(),
            max_table_size: DEFAULT_MAX_THREAD_TABLE_SIZE,
            thread_timeout_ns: DEFAULT_THREAD_TIMEOUT_NS,
            private_state_len: 0,
            n_collisions: 0,
            n_evicted: 0,
        }
    }
}

impl ThreadManager {
    pub fn new() -> Self {
        ThreadManager::default()
    }

    pub fn set_max_table_size(&mut self, max: usize) {
        self.max_table_size = max;
    }

    pub fn set_thread_timeout_ns(&mut self, timeout: u64) {
        self.thread_timeout_ns = timeout;
    }

    /// Fix the private-state block size applied to records created from now
    /// on. Called once when the capture starts.
    pub fn freeze_private_state(&mut self, total: usize) {
        self.private_state_len = total;
        for record in self.threads.values_mut() {
            record.size_private_state(total);
        }
    }

    /// Look up a record. `lookup_only` leaves the last-access timestamp
    /// untouched; event-driven lookups pass the event timestamp as `now`.
    pub fn find(&mut self, tid: i64, lookup_only: bool, now: u64) -> Option<&mut ThreadRecord> {
        let record = self.threads.get_mut(&tid)?;
        if !lookup_only {
            record.touch(now);
        }
        Some(record)
    }

    /// Read-only accessor that never perturbs eviction state.
    pub fn get(&self, tid: i64) -> Option<&ThreadRecord> {
        self.threads.get(&tid)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.values()
    }

    /// Insert a record. A tid collision displaces the old record (its FD
    /// table included) and is counted. Inserting past the size cap first
    /// evicts the least recently accessed record.
    pub fn add(&mut self, mut record: ThreadRecord) {
        record.size_private_state(self.private_state_len);
        if self.threads.contains_key(&record.tid) {
            self.n_collisions += 1;
        } else {
            while self.max_table_size > 0 && self.threads.len() >= self.max_table_size {
                if !self.evict_lru() {
                    break;
                }
            }
        }
        self.threads.insert(record.tid, record);
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .threads
            .values()
            .min_by_key(|t| t.last_access_ts)
            .map(|t| t.tid);
        match victim {
            Some(tid) => {
                self.threads.remove(&tid);
                self.n_evicted += 1;
                true
            }
            None => false,
        }
    }

    /// Remove a record. Without `force`, a process leader with live sibling
    /// threads is kept so its process-wide attributes stay resolvable.
    pub fn remove(&mut self, tid: i64, force: bool) -> Option<ThreadRecord> {
        if !force {
            let is_leader = self.threads.get(&tid).is_some_and(|t| t.is_main_thread());
            if is_leader
                && self
                    .threads
                    .values()
                    .any(|t| t.pid == tid && t.tid != tid)
            {
                return None;
            }
        }
        self.threads.remove(&tid)
    }

    /// Evict records unseen for longer than the thread timeout, then shrink
    /// to the size cap. Returns the number of evicted records.
    pub fn sweep_inactive(&mut self, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.thread_timeout_ns);
        let stale: Vec<i64> = self
            .threads
            .values()
            .filter(|t| t.last_access_ts < cutoff)
            .map(|t| t.tid)
            .collect();
        let mut evicted = stale.len();
        self.n_evicted += stale.len() as u64;
        for tid in stale {
            self.threads.remove(&tid);
        }
        // evict_lru maintains its own eviction count.
        while self.max_table_size > 0 && self.threads.len() > self.max_table_size {
            if !self.evict_lru() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn n_collisions(&self) -> u64 {
        self.n_collisions
    }

    pub fn n_evicted(&self) -> u64 {
        self.n_evicted
    }

    /// Container ids currently referenced by at least one record.
    pub fn referenced_container_ids(&self) -> impl Iterator<Item = &str> {
        self.threads
            .values()
            .filter(|t| !t.container_id.is_empty())
            .map(|t| t.container_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tid: i64, ts: u64) -> ThreadRecord {
        ThreadRecord::new(tid, tid, 0, ts)
    }

    #[test]
    fn find_touches_unless_lookup_only() {
        let mut mgr = ThreadManager::new();
        mgr.add(record(100, 1000));

        mgr.find(100, true, 5000);
        assert_eq!(mgr.get(100).unwrap().last_access_ts(), 1000);

        mgr.find(100, false, 5000);
        assert_eq!(mgr.get(100).unwrap().last_access_ts(), 5000);
    }

    #[test]
    fn collision_displaces_and_counts() {
        let mut mgr = ThreadManager::new();
        let mut old = record(100, 1000);
        old.fd_table_mut().add(crate::fd_table::FdDesc::new(
            3,
            crate::fd_table::FdType::File,
        ));
        mgr.add(old);

        mgr.add(record(100, 2000));
        assert_eq!(mgr.n_collisions(), 1);
        assert!(mgr.get(100).unwrap().fd_table().is_empty());
        assert_eq!(mgr.get(100).unwrap().creation_ts, 2000);
    }

    #[test]
    fn capacity_evicts_least_recently_accessed() {
        let mut mgr = ThreadManager::new();
        mgr.set_max_table_size(2);
        mgr.add(record(1, 1000));
        mgr.add(record(2, 2000));
        // 1 is oldest; adding a third evicts exactly it.
        mgr.add(record(3, 3000));
        assert_eq!(mgr.len(), 2);
        assert!(mgr.get(1).is_none());
        assert!(mgr.get(2).is_some());
        assert!(mgr.get(3).is_some());
        assert_eq!(mgr.n_evicted(), 1);
    }

    #[test]
    fn sweep_evicts_past_timeout() {
        let mut mgr = ThreadManager::new();
        mgr.set_thread_timeout_ns(1000);
        mgr.add(record(1, 100));
        mgr.add(record(2, 1500));

        let evicted = mgr.sweep_inactive(2000);
        assert_eq!(evicted, 1);
        assert!(mgr.get(1).is_none());
        assert!(mgr.get(2).is_some());
    }

    #[test]
    fn leader_with_live_threads_survives_non_forced_removal() {
        let mut mgr = ThreadManager::new();
        mgr.add(ThreadRecord::new(100, 100, 1, 1000));
        mgr.add(ThreadRecord::new(101, 100, 100, 1000));

        assert!(mgr.remove(100, false).is_none());
        assert!(mgr.get(100).is_some());

        assert!(mgr.remove(101, false).is_some());
        assert!(mgr.remove(100, false).is_some());
    }

    #[test]
    fn private_state_reservation_and_access() {
        let mut registry = PrivateStateRegistry::default();
        let a = registry.reserve(8).unwrap();
        let b = registry.reserve(4).unwrap();
        registry.lock();
        assert!(registry.reserve(1).is_err());
        assert_eq!(registry.total(), 12);

        let mut mgr = ThreadManager::new();
        mgr.freeze_private_state(registry.total());
        mgr.add(record(100, 1000));

        let (off, len) = registry.slot(b).unwrap();
        let rec = mgr.find(100, false, 1000).unwrap();
        rec.private_state_mut(off, len).unwrap()[0] = 0xAB;
        assert_eq!(rec.private_state(off, len).unwrap()[0], 0xAB);
        let (off_a, len_a) = registry.slot(a).unwrap();
        assert_eq!(rec.private_state(off_a, len_a).unwrap(), &[0u8; 8]);
    }

    #[test]
    fn inherit_copies_process_attributes() {
        let mut parent = ThreadRecord::new(100, 100, 1, 1000);
        parent.comm = "sh".into();
        parent.exe = "/bin/sh".into();
        parent.uid = 1000;
        parent.container_id = "abc".into();

        let child = ThreadRecord::inherit_from(&parent, 200, 200, 2000);
        assert_eq!(child.tid, 200);
        assert_eq!(child.ptid, 100);
        assert_eq!(child.comm, "sh");
        assert_eq!(child.uid, 1000);
        assert_eq!(child.container_id, "abc");
        assert!(child.fd_table().is_empty());
    }
}
