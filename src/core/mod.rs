//! # Core Wire Format
//!
//! Low-level packet handling: framing, the binary packet codec, and the
//! incremental stream parser.
//!
//! ## Components
//! - **frame**: SLIP-style byte stuffing that delimits packets on a raw
//!   byte stream
//! - **codec**: CRC-32 and the Hamming-protected control word
//! - **packet**: the optional-field binary packet format
//! - **parser**: per-channel incremental frame reassembly
//!
//! ## Wire Format
//! ```text
//! [control(2)] [optional fields...] [crc(4)] END
//! ```
//!
//! ## Robustness
//! - Every decode read is bounds-checked; hostile lengths error, never panic
//! - A single flipped control-word bit is corrected transparently
//! - Any corrupted body byte fails the trailing CRC-32 and drops the frame

pub mod codec;
pub mod frame;
pub mod packet;
pub mod parser;
