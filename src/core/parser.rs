//! Incremental frame parser.
//!
//! One parser per channel. Raw chunks from the transport may contain zero,
//! one, or many frames, a partial frame, or a boundary that falls inside an
//! escape sequence; parser state persists across calls so none of that
//! matters to the caller. Each unescaped [`END`](frame::END) hands the
//! accumulated frame to the packet codec: a decoded packet goes to the
//! callback, a decode failure is counted and dropped, and the accumulator
//! is cleared either way. There is no byte-by-byte resynchronization; the
//! next delimiter starts the next frame.

use tracing::debug;

use crate::core::frame::{END, END_SUB, ESC, ESC_SUB};
use crate::core::packet::Packet;
use crate::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating frame bytes.
    Buffering,
    /// Previous byte was ESC; the next byte selects the substitute.
    Escaped,
    /// Frame is poisoned by a malformed escape; discard until END.
    Discarding,
}

/// Streaming decoder turning raw transport bytes into packets.
#[derive(Debug)]
pub struct Parser {
    buffer: Vec<u8>,
    state: State,
    frames_dropped: u64,
    crc_failures: u64,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: State::Buffering,
            frames_dropped: 0,
            crc_failures: 0,
        }
    }

    /// Frames discarded for any reason (bad escape, decode failure).
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Frames discarded specifically for a checksum mismatch.
    pub fn crc_failures(&self) -> u64 {
        self.crc_failures
    }

    /// Consume a chunk of raw bytes, invoking `on_packet` for every
    /// complete, valid frame it finishes.
    pub fn read_bytes(&mut self, chunk: &[u8], on_packet: &mut dyn FnMut(Packet)) {
        for &byte in chunk {
            // An unescaped END always terminates the frame, even when it
            // arrives in escape state.
            if byte == END {
                self.accept_frame(on_packet);
                continue;
            }
            match self.state {
                State::Buffering => {
                    if byte == ESC {
                        self.state = State::Escaped;
                    } else {
                        self.buffer.push(byte);
                    }
                }
                State::Escaped => {
                    match byte {
                        END_SUB => self.buffer.push(END),
                        ESC_SUB => self.buffer.push(ESC),
                        other => {
                            debug!(byte = other, "malformed escape sequence; dropping frame");
                            self.buffer.clear();
                            self.state = State::Discarding;
                            continue;
                        }
                    }
                    self.state = State::Buffering;
                }
                State::Discarding => {}
            }
        }
    }

    /// Hand the accumulated frame to the packet codec and reset for the
    /// next one.
    fn accept_frame(&mut self, on_packet: &mut dyn FnMut(Packet)) {
        let poisoned = self.state == State::Discarding;
        let buffer = std::mem::take(&mut self.buffer);
        self.state = State::Buffering;

        if poisoned {
            self.frames_dropped += 1;
            return;
        }
        if buffer.is_empty() {
            // back-to-back delimiters; nothing to decode
            return;
        }
        match Packet::decode(&buffer) {
            Ok(packet) => on_packet(packet),
            Err(err) => {
                self.frames_dropped += 1;
                if matches!(err, MeshError::CrcMismatch { .. }) {
                    self.crc_failures += 1;
                }
                debug!(error = %err, len = buffer.len(), "dropping undecodable frame");
            }
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
