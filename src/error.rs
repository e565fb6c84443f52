//! # Error Types
//!
//! Comprehensive error handling for the mesh protocol.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from wire-level corruption to routing failures.
//!
//! ## Error Categories
//! - **Wire Errors**: framing violations, truncated packets, CRC mismatches
//! - **Routing Errors**: undiscovered services, missing routes, unroutable packets
//! - **Channel Errors**: transport I/O failures, closed channels
//! - **Configuration Errors**: malformed config files or overrides
//!
//! Wire errors are never fatal to a router: corrupted frames are dropped and
//! counted, and the dispatch loop keeps running. Routing errors are returned
//! from [`Router::send`](crate::router::Router::send) to its immediate caller
//! and are never retried internally.

use std::io;
use thiserror::Error;

/// Primary error type for all mesh protocol operations.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame contained an escape byte followed by neither escape
    /// substitute. The frame is discarded up to the next delimiter.
    #[error("malformed escape sequence in frame")]
    Framing,

    /// The trailing checksum did not match the bytes received.
    #[error("crc mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    /// The buffer ended before every field named by the control word was read.
    #[error("packet truncated")]
    TruncatedPacket,

    /// The packet is structurally invalid in a way the control word cannot
    /// express (unknown discriminant, length mismatch, bad UTF-8).
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// A variable-length field exceeds what its length prefix can carry.
    #[error("field {field} exceeds wire limit: {len} > {max} bytes")]
    OversizedField {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A service-addressed packet named a service with no known provider.
    /// The packet is dropped, not queued.
    #[error("service '{0}' not yet discovered")]
    ServiceUnavailable(String),

    /// No routing-table entry for the destination address.
    #[error("no route for '{0}'")]
    NoRoute(String),

    /// A packet addressed to this node matched neither a service handler nor
    /// a context handler.
    #[error("no handler registered for service '{service}' or context {context}")]
    HandlerNotRegistered { service: String, context: u16 },

    /// The packet names a next hop other than this node.
    #[error("packet is unroutable; no action taken")]
    Unroutable,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for Results using MeshError
pub type Result<T> = std::result::Result<T, MeshError>;
