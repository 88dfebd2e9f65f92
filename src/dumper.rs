//! Dump sink attached to a running capture.
//!
//! Either a single capture file started with `autodump_start`, or a
//! rotating [`CycleWriter`] configured with `setup_cycle_writer`. Write
//! failures pause dumping without stopping the capture unless the inspector
//! is in strict dump mode.

use std::path::Path;

use crate::cycle_writer::{CycleWriter, CycleWriterConfig, DumpTables};
use crate::error::Result;
use crate::event::RawFrame;
use crate::trace_file::TraceWriter;

enum DumpSink {
    Single(TraceWriter),
    Cycle(CycleWriter),
}

pub struct Dumper {
    sink: DumpSink,
    paused: bool,
    n_write_errors: u64,
}

impl Dumper {
    /// Start a single-file dump.
    pub fn single(path: &Path, compress: bool, tables: &DumpTables) -> Result<Dumper> {
        let writer = TraceWriter::create(
            path,
            compress,
            &tables.machine,
            &tables.ifaces,
            &tables.users,
        )?;
        Ok(Dumper {
            sink: DumpSink::Single(writer),
            paused: false,
            n_write_errors: 0,
        })
    }

    /// Start a rotating dump.
    pub fn cycle(config: CycleWriterConfig, tables: DumpTables) -> Dumper {
        Dumper {
            sink: DumpSink::Cycle(CycleWriter::new(config, tables)),
            paused: false,
            n_write_errors: 0,
        }
    }

    /// Write one frame. Paused dumpers swallow writes.
    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        let result = match &mut self.sink {
            DumpSink::Single(writer) => writer.write_frame(frame),
            DumpSink::Cycle(writer) => writer.write_frame(frame),
        };
        if result.is_err() {
            self.n_write_errors += 1;
        }
        result
    }

    /// Advance to the next file. Meaningful for cycling dumps; a single-file
    /// dump has nowhere to advance to.
    pub fn next_file(&mut self) -> Result<()> {
        match &mut self.sink {
            DumpSink::Cycle(writer) => writer.rotate(),
            DumpSink::Single(_) => Ok(()),
        }
    }

    /// Stop writing after an I/O failure in non-strict mode.
    pub fn pause_dumping(&mut self) {
        self.paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn n_write_errors(&self) -> u64 {
        self.n_write_errors
    }

    pub fn finish(self) -> Result<()> {
        match self.sink {
            DumpSink::Single(writer) => writer.finish(),
            DumpSink::Cycle(writer) => writer.close(),
        }
    }
}
