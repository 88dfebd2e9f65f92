//! Protocol decoder registration.
//!
//! Decoders are out-of-tree extensions that watch a fixed set of event
//! categories (open, connect, read, write, tuple change) and keep their own
//! per-thread state through reserved private slots. The registry owns the
//! decoder objects; the parser dispatches plain-data callbacks so decoders
//! never borrow into the state tables.

use crate::error::{Result, SinspError};
use crate::fd_table::SockTuple;

/// Category of a decoder callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderCallback {
    Open,
    Connect,
    Read,
    Write,
    TupleChange,
}

/// Data handed to a decoder on each callback.
#[derive(Debug, Clone, Default)]
pub struct DecoderContext<'a> {
    pub tid: i64,
    pub fd: Option<i64>,
    pub name: Option<&'a str>,
    pub tuple: Option<&'a SockTuple>,
    pub data: Option<&'a [u8]>,
}

pub trait ProtoDecoder: Send {
    fn name(&self) -> &str;

    fn on_event(&mut self, callback: DecoderCallback, ctx: &DecoderContext<'_>);

    /// Called when a new capture starts, for decoders on the reset list.
    fn reset(&mut self) {}
}

/// Opaque handle to a registered decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderHandle(usize);

#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn ProtoDecoder>>,
    reset_list: Vec<usize>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        DecoderRegistry::default()
    }

    pub fn register(&mut self, decoder: Box<dyn ProtoDecoder>) -> DecoderHandle {
        self.decoders.push(decoder);
        DecoderHandle(self.decoders.len() - 1)
    }

    /// Find a registered decoder by name.
    pub fn require(&self, name: &str) -> Result<DecoderHandle> {
        self.decoders
            .iter()
            .position(|d| d.name() == name)
            .map(DecoderHandle)
            .ok_or(SinspError::LookupFailed {
                kind: "protocol decoder",
                id: -1,
            })
    }

    /// Put a decoder on the list that gets `reset()` at capture start.
    pub fn register_reset(&mut self, handle: DecoderHandle) {
        if !self.reset_list.contains(&handle.0) {
            self.reset_list.push(handle.0);
        }
    }

    pub fn reset_all(&mut self) {
        for &idx in &self.reset_list {
            if let Some(decoder) = self.decoders.get_mut(idx) {
                decoder.reset();
            }
        }
    }

    pub fn dispatch(&mut self, callback: DecoderCallback, ctx: &DecoderContext<'_>) {
        for decoder in &mut self.decoders {
            decoder.on_event(callback, ctx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
