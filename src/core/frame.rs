//! Byte-stuffed framing for unstructured byte streams.
//!
//! Transports may coalesce or fragment writes arbitrarily, so packet
//! boundaries are marked with a reserved delimiter byte and occurrences of
//! the reserved bytes inside a packet are escaped (SLIP-style). The framing
//! is self-synchronizing; no length prefix is used at this layer.

/// Frame delimiter. One unescaped `END` terminates each frame.
pub const END: u8 = 0xC0;
/// Escape introducer.
pub const ESC: u8 = 0xDB;
/// Escaped substitute for a literal `END` byte.
pub const END_SUB: u8 = 0xDC;
/// Escaped substitute for a literal `ESC` byte.
pub const ESC_SUB: u8 = 0xDD;

/// Escape reserved bytes in `data`.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            END => {
                out.push(ESC);
                out.push(END_SUB);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_SUB);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Frame `data` for transmission: escape(data) + terminating [`END`].
pub fn frame(data: &[u8]) -> Vec<u8> {
    let mut out = escape(data);
    out.push(END);
    out
}
