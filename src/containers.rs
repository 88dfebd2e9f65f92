//! Container metadata.
//!
//! Records are created lazily the first time an event's thread carries an
//! unknown container id, and evicted once no thread references them past
//! the inactivity threshold.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::procfs;
use crate::threads::ThreadRecord;

/// Default inactivity threshold before an unreferenced container record is
/// dropped (ns).
pub const DEFAULT_CONTAINER_TIMEOUT_NS: u64 = 30 * 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerType {
    Docker,
    Lxc,
    Rkt,
    Mesos,
    Other,
}

impl ContainerType {
    pub fn as_u32(self) -> u32 {
        match self {
            ContainerType::Docker => 0,
            ContainerType::Lxc => 1,
            ContainerType::Rkt => 2,
            ContainerType::Mesos => 3,
            ContainerType::Other => 4,
        }
    }

    pub fn from_u32(v: u32) -> ContainerType {
        match v {
            0 => ContainerType::Docker,
            1 => ContainerType::Lxc,
            2 => ContainerType::Rkt,
            3 => ContainerType::Mesos,
            _ => ContainerType::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub ctype: ContainerType,
    pub image: String,
    pub labels: HashMap<String, String>,
    #[serde(skip)]
    last_seen_ts: u64,
}

impl ContainerInfo {
    pub fn new(id: impl Into<String>, ctype: ContainerType, ts: u64) -> Self {
        ContainerInfo {
            id: id.into(),
            ctype,
            image: String::new(),
            labels: HashMap::new(),
            last_seen_ts: ts,
        }
    }
}

#[derive(Debug, Default)]
pub struct ContainerManager {
    containers: HashMap<String, ContainerInfo>,
    inactivity_ns: u64,
}

impl ContainerManager {
    pub fn new() -> Self {
        ContainerManager {
            containers: HashMap::new(),
            inactivity_ns: DEFAULT_CONTAINER_TIMEOUT_NS,
        }
    }

    pub fn set_inactivity_ns(&mut self, ns: u64) {
        self.inactivity_ns = ns;
    }

    /// Resolve a thread's container. On live captures a thread with no known
    /// id gets a cgroup inspection; a previously unseen id creates a record.
    /// Returns the id together with whether the record is new, so the parser
    /// can synthesize a container discovery meta-event.
    pub fn resolve(
        &mut self,
        thread: &mut ThreadRecord,
        live: bool,
        now: u64,
    ) -> Option<(String, bool)> {
        let mut ctype = ContainerType::Other;
        if thread.container_id.is_empty() {
            if !live {
                return None;
            }
            let (id, detected) = procfs::container_id_from_cgroup(thread.tid)?;
            thread.container_id = id;
            ctype = detected;
        }

        let id = thread.container_id.clone();
        let is_new = !self.containers.contains_key(&id);
        let entry = self
            .containers
            .entry(id.clone())
            .or_insert_with(|| ContainerInfo::new(id.clone(), ctype, now));
        entry.last_seen_ts = now;
        Some((id, is_new))
    }

    pub fn get(&self, id: &str) -> Option<&ContainerInfo> {
        self.containers.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ContainerInfo> {
        self.containers.get_mut(id)
    }

    pub fn insert(&mut self, info: ContainerInfo) {
        self.containers.insert(info.id.clone(), info);
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Drop records that no thread references and that have not been seen
    /// since the inactivity threshold. Returns the number dropped.
    pub fn sweep_inactive<'a>(
        &mut self,
        now: u64,
        referenced: impl Iterator<Item = &'a str>,
    ) -> usize {
        let referenced: HashSet<&str> = referenced.collect();
        let cutoff = now.saturating_sub(self.inactivity_ns);
        let before = self.containers.len();
        self.containers
            .retain(|id, info| referenced.contains(id.as_str()) || info.last_seen_ts >= cutoff);
        before - self.containers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_registers_known_id_once() {
        let mut mgr = ContainerManager::new();
        let mut thread = ThreadRecord::new(100, 100, 1, 1000);
        thread.container_id = "abc123def456".into();

        let (id, is_new) = mgr.resolve(&mut thread, false, 1000).unwrap();
        assert_eq!(id, "abc123def456");
        assert!(is_new);

        let (_, is_new) = mgr.resolve(&mut thread, false, 2000).unwrap();
        assert!(!is_new);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn resolve_offline_without_id_is_none() {
        let mut mgr = ContainerManager::new();
        let mut thread = ThreadRecord::new(100, 100, 1, 1000);
        assert!(mgr.resolve(&mut thread, false, 1000).is_none());
    }

    #[test]
    fn sweep_keeps_referenced_and_recent() {
        let mut mgr = ContainerManager::new();
        mgr.set_inactivity_ns(1000);
        mgr.insert(ContainerInfo::new("referenced", ContainerType::Docker, 0));
        mgr.insert(ContainerInfo::new("stale", ContainerType::Docker, 0));
        mgr.insert(ContainerInfo::new("recent", ContainerType::Lxc, 9500));

        let dropped = mgr.sweep_inactive(10000, ["referenced"].into_iter());
        assert_eq!(dropped, 1);
        assert!(mgr.get("referenced").is_some());
        assert!(mgr.get("recent").is_some());
        assert!(mgr.get("stale").is_none());
    }

    #[test]
    fn labels_serialize_as_json() {
        let mut info = ContainerInfo::new("abc", ContainerType::Docker, 0);
        info.image = "nginx:latest".into();
        info.labels.insert("env".into(), "prod".into());
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("nginx:latest"));
        let back: ContainerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.labels["env"], "prod");
    }
}
