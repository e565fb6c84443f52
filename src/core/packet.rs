//! Binary packet format.
//!
//! A packet is a 16-bit Hamming-protected control word, a sequence of
//! optional fields gated by the word's low 11 flag bits, and a trailing
//! CRC-32 over everything before it.
//!
//! ## Wire Format
//! ```text
//! [control(2)] [netState(1)]? [service(1+N)]? [srcAddr(1+N)]? [destAddr(1+N)]?
//! [nextAddr(1+N)]? [seqNum(2)]? [ackBlock(4)]? [contextID(2)]? [dataType(1)]?
//! [data(2+N)]? [crc(4)]
//! ```
//! All integers are big-endian. String fields carry a one-byte length
//! prefix; `data` carries a two-byte prefix. A field is present on the wire
//! iff its in-memory value is non-default (non-empty string, non-zero
//! integer), so encode and decode agree on the layout from the control word
//! alone. The checksum is always present.

use bytes::BufMut;
use tracing::debug;

use crate::core::codec::{crc32, ham_decode, ham_encode};
use crate::core::frame;
use crate::error::{MeshError, Result};

/// A node's mesh-wide identifier. Addresses are caller-supplied strings;
/// no allocation protocol exists at this layer.
pub type Address = String;

// Control flag bits. Hamming parity occupies bits 12-15, leaving 11 usable.
pub const CF_NETSTATE: u16 = 0x0400;
pub const CF_SERVICE: u16 = 0x0200;
pub const CF_SRCADDR: u16 = 0x0100;
pub const CF_DESTADDR: u16 = 0x0080;
pub const CF_NEXTADDR: u16 = 0x0040;
pub const CF_SEQNUM: u16 = 0x0020;
pub const CF_ACKBLOCK: u16 = 0x0010;
pub const CF_CONTEXTID: u16 = 0x0008;
pub const CF_DATATYPE: u16 = 0x0004;
pub const CF_DATA: u16 = 0x0002;
pub const CF_CRC: u16 = 0x0001;

/// Maximum bytes in a length-prefixed string field.
pub const MAX_STRING_FIELD: usize = 255;
/// Maximum bytes in the data field.
pub const MAX_DATA_SIZE: usize = 65_535;

/// Control-plane message discriminator. A packet with no `net_state` is a
/// data-plane packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetState {
    /// Packet carries a route advertisement or withdrawal.
    Route = 1,
    /// Packet carries a service capacity entry.
    Service = 2,
    /// Packet requests the receiver's full network state.
    Query = 3,
}

impl TryFrom<u8> for NetState {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(NetState::Route),
            2 => Ok(NetState::Service),
            3 => Ok(NetState::Query),
            _ => Err(MeshError::InvalidPacket("unknown net state discriminant")),
        }
    }
}

/// The protocol's sole message type.
///
/// Constructed either from application fields (for sending) or parsed from
/// a received frame. The router stamps `src_addr` and `next_addr` while
/// forwarding; everything else is immutable in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// Control-plane discriminator; `None` means data-plane.
    pub net_state: Option<NetState>,
    /// Target service name for service-addressed delivery.
    pub service: String,
    /// Originating node address.
    pub src_addr: Address,
    /// Final destination address.
    pub dest_addr: Address,
    /// Address of the neighbor expected to forward this packet next.
    pub next_addr: Address,
    /// Application sequence number.
    pub seq_num: u16,
    /// Application acknowledgement bitmap.
    pub ack_block: u32,
    /// Correlation token for request/response exchanges.
    pub context_id: u16,
    /// Application-defined payload type tag.
    pub data_type: u8,
    /// Payload.
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag word describing which optional fields this packet carries.
    /// The checksum bit is always set.
    pub fn control_flags(&self) -> u16 {
        let mut flags = CF_CRC;
        if self.net_state.is_some() {
            flags |= CF_NETSTATE;
        }
        if !self.service.is_empty() {
            flags |= CF_SERVICE;
        }
        if !self.src_addr.is_empty() {
            flags |= CF_SRCADDR;
        }
        if !self.dest_addr.is_empty() {
            flags |= CF_DESTADDR;
        }
        if !self.next_addr.is_empty() {
            flags |= CF_NEXTADDR;
        }
        if self.seq_num != 0 {
            flags |= CF_SEQNUM;
        }
        if self.ack_block != 0 {
            flags |= CF_ACKBLOCK;
        }
        if self.context_id != 0 {
            flags |= CF_CONTEXTID;
        }
        if self.data_type != 0 {
            flags |= CF_DATATYPE;
        }
        if !self.data.is_empty() {
            flags |= CF_DATA;
        }
        flags
    }

    /// Encode to an unframed packet buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        check_string("service", &self.service)?;
        check_string("srcAddr", &self.src_addr)?;
        check_string("destAddr", &self.dest_addr)?;
        check_string("nextAddr", &self.next_addr)?;
        if self.data.len() > MAX_DATA_SIZE {
            return Err(MeshError::OversizedField {
                field: "data",
                len: self.data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let flags = self.control_flags();
        let mut buf = Vec::with_capacity(32 + self.data.len());
        buf.put_u16(ham_encode(flags));

        if let Some(state) = self.net_state {
            buf.put_u8(state as u8);
        }
        for field in [
            &self.service,
            &self.src_addr,
            &self.dest_addr,
            &self.next_addr,
        ] {
            if !field.is_empty() {
                buf.put_u8(field.len() as u8);
                buf.put_slice(field.as_bytes());
            }
        }
        if self.seq_num != 0 {
            buf.put_u16(self.seq_num);
        }
        if self.ack_block != 0 {
            buf.put_u32(self.ack_block);
        }
        if self.context_id != 0 {
            buf.put_u16(self.context_id);
        }
        if self.data_type != 0 {
            buf.put_u8(self.data_type);
        }
        if !self.data.is_empty() {
            buf.put_u16(self.data.len() as u16);
            buf.put_slice(&self.data);
        }

        let sum = crc32(&buf);
        buf.put_u32(sum);
        Ok(buf)
    }

    /// Encode and frame for transmission on a byte stream.
    pub fn to_frame_bytes(&self) -> Result<Vec<u8>> {
        Ok(frame::frame(&self.encode()?))
    }

    /// Decode an unframed packet buffer.
    ///
    /// Hamming-corrects the control word, consumes exactly the flagged
    /// fields in wire order, then verifies the trailing checksum. Every
    /// read is bounds-checked; a short buffer is an error, never a panic.
    pub fn decode(buf: &[u8]) -> Result<Packet> {
        if buf.len() < 2 {
            return Err(MeshError::TruncatedPacket);
        }
        let raw = u16::from_be_bytes([buf[0], buf[1]]);
        let (flags, corrected) = ham_decode(raw);
        if corrected {
            debug!(raw, "corrected single-bit control word error");
        }

        let mut cur = &buf[2..];
        let mut packet = Packet::new();

        if flags & CF_NETSTATE != 0 {
            packet.net_state = Some(NetState::try_from(take(&mut cur, 1)?[0])?);
        }
        if flags & CF_SERVICE != 0 {
            packet.service = take_string(&mut cur)?;
        }
        if flags & CF_SRCADDR != 0 {
            packet.src_addr = take_string(&mut cur)?;
        }
        if flags & CF_DESTADDR != 0 {
            packet.dest_addr = take_string(&mut cur)?;
        }
        if flags & CF_NEXTADDR != 0 {
            packet.next_addr = take_string(&mut cur)?;
        }
        if flags & CF_SEQNUM != 0 {
            packet.seq_num = u16::from_be_bytes(take(&mut cur, 2)?.try_into().unwrap_or([0; 2]));
        }
        if flags & CF_ACKBLOCK != 0 {
            packet.ack_block = u32::from_be_bytes(take(&mut cur, 4)?.try_into().unwrap_or([0; 4]));
        }
        if flags & CF_CONTEXTID != 0 {
            packet.context_id = u16::from_be_bytes(take(&mut cur, 2)?.try_into().unwrap_or([0; 2]));
        }
        if flags & CF_DATATYPE != 0 {
            packet.data_type = take(&mut cur, 1)?[0];
        }
        if flags & CF_DATA != 0 {
            let len = u16::from_be_bytes(take(&mut cur, 2)?.try_into().unwrap_or([0; 2])) as usize;
            packet.data = take(&mut cur, len)?.to_vec();
        }

        match cur.len() {
            4 => {}
            n if n < 4 => return Err(MeshError::TruncatedPacket),
            _ => return Err(MeshError::InvalidPacket("trailing bytes after final field")),
        }
        let body_len = buf.len() - 4;
        let expected = u32::from_be_bytes(take(&mut cur, 4)?.try_into().unwrap_or([0; 4]));
        let computed = crc32(&buf[..body_len]);
        if expected != computed {
            return Err(MeshError::CrcMismatch { expected, computed });
        }
        Ok(packet)
    }
}

fn check_string(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_STRING_FIELD {
        return Err(MeshError::OversizedField {
            field,
            len: value.len(),
            max: MAX_STRING_FIELD,
        });
    }
    Ok(())
}

fn take<'a>(cur: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cur.len() < n {
        return Err(MeshError::TruncatedPacket);
    }
    let (head, rest) = cur.split_at(n);
    *cur = rest;
    Ok(head)
}

fn take_string(cur: &mut &[u8]) -> Result<String> {
    let len = take(cur, 1)?[0] as usize;
    let bytes = take(cur, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| MeshError::InvalidPacket("non-utf-8 string field"))
}
