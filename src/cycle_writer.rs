//! Rotating dump sink.
//!
//! Writes capture files under a base name with a numeric suffix, rolling to
//! the next file when the current one exceeds the size or age limits. With
//! cycling enabled and a positive file limit, the oldest file is unlinked so
//! the on-disk count never exceeds the limit.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::error::Result;
use crate::event::RawFrame;
use crate::ifinfo::NetworkInterfaces;
use crate::trace_file::{MachineInfo, TraceWriter};
use crate::userdb::UserDb;

#[derive(Debug, Clone)]
pub struct CycleWriterConfig {
    pub base_name: String,
    /// Rollover threshold in MiB; 0 disables size-based rotation.
    pub rollover_mb: u64,
    /// Rollover threshold in seconds of wall time; 0 disables.
    pub duration_s: u64,
    /// Maximum number of files kept on disk; 0 means unlimited.
    pub file_limit: u32,
    /// Unlink the oldest file when over the limit.
    pub cycle: bool,
    pub compress: bool,
}

/// Header tables stamped into every file the writer opens.
#[derive(Debug, Clone, Default)]
pub struct DumpTables {
    pub machine: MachineInfo,
    pub ifaces: NetworkInterfaces,
    pub users: UserDb,
}

pub struct CycleWriter {
    config: CycleWriterConfig,
    tables: DumpTables,
    writer: Option<TraceWriter>,
    opened_at: Instant,
    seq: u32,
    files: VecDeque<PathBuf>,
}

impl CycleWriter {
    pub fn new(config: CycleWriterConfig, tables: DumpTables) -> CycleWriter {
        CycleWriter {
            config,
            tables,
            writer: None,
            opened_at: Instant::now(),
            seq: 0,
            files: VecDeque::new(),
        }
    }

    fn next_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.config.base_name, self.seq))
    }

    fn open_next(&mut self) -> Result<()> {
        let path = self.next_path();
        let writer = TraceWriter::create(
            &path,
            self.config.compress,
            &self.tables.machine,
            &self.tables.ifaces,
            &self.tables.users,
        )?;
        self.files.push_back(path);
        self.seq += 1;
        self.opened_at = Instant::now();
        self.writer = Some(writer);

        if self.config.cycle && self.config.file_limit > 0 {
            while self.files.len() > self.config.file_limit as usize {
                if let Some(oldest) = self.files.pop_front() {
                    // Unlink failures are not fatal; the next rotation
                    // retries on a different file anyway.
                    let _ = fs::remove_file(oldest);
                }
            }
        }
        Ok(())
    }

    fn rollover_due(&self) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };
        if self.config.rollover_mb > 0
            && writer.bytes_written() >= self.config.rollover_mb * 1024 * 1024
        {
            return true;
        }
        if self.config.duration_s > 0
            && self.opened_at.elapsed().as_secs() >= self.config.duration_s
        {
            return true;
        }
        false
    }

    /// Close the current file and open the next one in sequence.
    pub fn rotate(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        self.open_next()
    }

    /// Write one frame, rotating first when a limit is exceeded.
    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        if self.rollover_due() {
            self.rotate()?;
        }
        if self.writer.is_none() {
            self.open_next()?;
        }
        self.writer
            .as_mut()
            .expect("writer opened above")
            .write_frame(frame)
    }

    /// Paths of the files currently on disk, oldest first.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn current_path(&self) -> Option<&PathBuf> {
        self.files.back()
    }

    pub fn close(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::codes;
    use crate::utils::tgidpid_from_parts;
    use tempfile::TempDir;

    fn config(base: String, rollover_mb: u64, file_limit: u32, cycle: bool) -> CycleWriterConfig {
        CycleWriterConfig {
            base_name: base,
            rollover_mb,
            duration_s: 0,
            file_limit,
            cycle,
            compress: false,
        }
    }

    fn bulky_frame() -> RawFrame {
        RawFrame {
            ts: 1000,
            tgidpid: tgidpid_from_parts(1, 1),
            cpu: 0,
            etype: codes::WRITE | 1,
            params: vec![
                10i64.to_le_bytes().to_vec(),
                5i64.to_le_bytes().to_vec(),
                vec![0xAA; 32 * 1024],
            ],
        }
    }

    #[test]
    fn writes_sequenced_files_and_cycles() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("out").to_string_lossy().into_owned();
        let mut writer = CycleWriter::new(config(base.clone(), 1, 3, true), DumpTables::default());

        // Each frame is ~32 KiB; 4 MiB total forces three rollovers past 1 MiB.
        for _ in 0..128 {
            writer.write_frame(&bulky_frame()).unwrap();
        }
        writer.close().unwrap();

        // out0 was cycled away; out1..out3 remain.
        assert!(!PathBuf::from(format!("{base}0")).exists());
        assert!(PathBuf::from(format!("{base}1")).exists());
        assert!(PathBuf::from(format!("{base}2")).exists());
        assert!(PathBuf::from(format!("{base}3")).exists());
        assert!(!PathBuf::from(format!("{base}4")).exists());
    }

    #[test]
    fn no_cycle_keeps_all_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("keep").to_string_lossy().into_owned();
        let mut writer =
            CycleWriter::new(config(base.clone(), 1, 2, false), DumpTables::default());

        for _ in 0..128 {
            writer.write_frame(&bulky_frame()).unwrap();
        }
        writer.close().unwrap();

        assert!(PathBuf::from(format!("{base}0")).exists());
        assert!(PathBuf::from(format!("{base}3")).exists());
    }

    #[test]
    fn explicit_rotate_advances_sequence() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("rot").to_string_lossy().into_owned();
        let mut writer = CycleWriter::new(config(base.clone(), 0, 0, false), DumpTables::default());

        writer.write_frame(&bulky_frame()).unwrap();
        writer.rotate().unwrap();
        writer.write_frame(&bulky_frame()).unwrap();
        writer.close().unwrap();

        assert!(PathBuf::from(format!("{base}0")).exists());
        assert!(PathBuf::from(format!("{base}1")).exists());
    }
}
