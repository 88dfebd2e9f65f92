//! sysinspect - system-call inspection library.
//!
//! The library consumes a stream of kernel-level events, either from a live
//! capture driver or from a recorded trace file, and mirrors the operating
//! system's state as the stream plays: the process and thread tree, each
//! thread's open file descriptors, network interfaces, users and groups, and
//! container associations. Consumers pull enriched events one at a time,
//! optionally filtered and optionally re-serialized to a rotating capture
//! file.
//!
//! # Modules
//!
//! - [`inspector`] - capture control and the per-event loop
//! - [`event`] - raw frames, the enriched event, event info tables
//! - [`parser`] - the state-transition engine
//! - [`threads`] / [`fd_table`] - reconstructed thread and FD state
//! - [`filter`] - the capture filter language
//! - [`trace_file`] / [`cycle_writer`] - capture file format and rotation
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use sysinspect::{Inspector, NextResult};
//!
//! let mut inspector = Inspector::new();
//! inspector.set_filter("evt.type = open").unwrap();
//! inspector.open_file(Path::new("trace.sysp")).unwrap();
//!
//! loop {
//!     match inspector.next() {
//!         Ok(NextResult::Event(evt)) => println!("{} {}", evt.num(), evt.name()),
//!         Ok(NextResult::Eof) => break,
//!         Ok(NextResult::Timeout) => continue,
//!         Err(e) => panic!("capture failed: {e}"),
//!     }
//! }
//! ```

pub mod containers;
pub mod cycle_writer;
pub mod decoders;
pub mod dumper;
pub mod error;
pub mod event;
pub mod fd_table;
pub mod filter;
pub mod ifinfo;
pub mod inspector;
pub mod logger;
pub mod parser;
pub mod procfs;
pub mod source;
pub mod threads;
pub mod trace_file;
pub mod userdb;
pub mod utils;

// Re-export the public surface.
pub use error::{Result, SinspError};
pub use event::{BufferFormat, Event, EventCategory, EventDirection, ParamValue, RawFrame};
pub use fd_table::{FdDesc, FdTable, FdType, SockTuple};
pub use filter::{Filter, FilterContext};
pub use inspector::{Inspector, InspectorState, NextResult};
pub use logger::Severity;
pub use source::{
    CaptureStats, DriverStats, EventDriver, InterruptHandle, SourcePoll, DEFAULT_TIMEOUT_MS,
};
pub use threads::ThreadRecord;
pub use trace_file::MachineInfo;
