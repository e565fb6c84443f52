//! # Transport Layer
//!
//! The narrow capability every transport must provide to participate in a
//! mesh, plus the in-process channel used for development and testing.
//!
//! A [`Channel`] is a duplex, framed-packet-capable endpoint to one
//! neighbor node. Concrete bindings (TCP, serial, BLE bridges) live outside
//! this crate; anything that can move bytes both ways and implement the
//! trait below can join a router's pool.
//!
//! ## Receive path
//! `listen` starts the transport reader, which queues raw inbound chunks
//! and signals the router's event bus. The router's dispatch worker then
//! calls [`Channel::recv_ready`], which runs the queued bytes through the
//! channel's own [`Parser`](crate::core::parser::Parser) and hands each
//! decoded packet to the supplied callback. Keeping the parser per-channel
//! means interleaved chunks from different neighbors can never corrupt one
//! another's frame state.

pub mod local;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

use crate::core::packet::Packet;
use crate::error::Result;

/// Stable identity of a channel within a process.
///
/// Routing-table entries hold a `ChannelId` rather than an owning reference
/// so a removed channel's resources are not kept alive by stale routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocate the next process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Event delivered to a router's dispatch worker.
#[derive(Debug, Clone, Copy)]
pub enum ChannelEvent {
    /// The channel has inbound bytes queued.
    Readable(ChannelId),
    /// The channel's transport ended; its close sequence has run.
    Closed(ChannelId),
}

/// Sending half of a router's event bus, handed to each channel's reader.
pub type EventSender = mpsc::Sender<ChannelEvent>;
/// Receiving half, drained by the dispatch worker.
pub type EventReceiver = mpsc::Receiver<ChannelEvent>;

/// A registered close callback.
pub type CloseFn = Box<dyn Fn(ChannelId) + Send + Sync>;

/// Ordered list of close callbacks with fire-exactly-once semantics.
///
/// Callbacks are taken out of the lock before invocation, and each call is
/// isolated with `catch_unwind` so one panicking handler cannot suppress
/// the rest or poison the channel's state.
pub struct CloseCallbacks {
    fired: AtomicBool,
    callbacks: Mutex<Vec<CloseFn>>,
}

impl CloseCallbacks {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Append a callback. Registration after the callbacks have fired is
    /// accepted but the callback will never run.
    pub fn register(&self, callback: CloseFn) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// True once the close sequence has run.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Run every registered callback exactly once, in registration order.
    pub fn fire(&self, id: ChannelId) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks = match self.callbacks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(id))).is_err() {
                warn!(channel = %id, "close callback panicked; continuing");
            }
        }
    }
}

impl Default for CloseCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

/// Duplex, framed-packet-capable transport endpoint to a neighbor node.
///
/// Implementations must accept `send` concurrently from the dispatch
/// worker and arbitrary caller threads. `send` is synchronous: it either
/// fully transmits the framed packet or returns an error. No queuing,
/// retry, or backpressure is promised at this layer.
pub trait Channel: Send + Sync {
    /// Stable identity for pool membership and routing-table references.
    fn id(&self) -> ChannelId;

    /// Begin receiving: start the transport reader, signalling `bus` when
    /// inbound bytes are queued. Calling `listen` twice is an error.
    fn listen(&self, bus: EventSender) -> Result<()>;

    /// Drain queued inbound bytes through this channel's parser, invoking
    /// `on_packet` for every decoded packet. Called by the dispatch worker
    /// after a [`ChannelEvent::Readable`] for this channel.
    fn recv_ready(&self, on_packet: &mut dyn FnMut(Packet));

    /// Encode, frame, and transmit one packet.
    fn send(&self, packet: &Packet) -> Result<()>;

    /// Release transport resources and fire all close callbacks exactly
    /// once. Idempotent.
    fn close(&self);

    /// Register a callback to run when this channel closes.
    fn on_close(&self, callback: CloseFn);
}
