//! Network message format for cross-partition traffic.
//!
//! Every message is a type tag, a 64-bit header whose layout depends on
//! the type, a fixed 64-byte data block and a destination list.
//!
//! # Header layouts
//!
//! ```text
//! STORE   [ 0..16) local scratch address, or port id
//!         [16..23) payload length
//!         [40]     target: 0 = scratchpad, 1 = input port
//!
//! LOAD    [ 0..16) local scratch address
//!         [16..22) request slot at the requester
//!         [22..26) size code (1..=8 bytes literal, 10..=15 -> (code-8)*8 bytes)
//!         [26..29) reorder entry
//!
//! UPDATE  [0] tagged   [1] tag packet (manifest)   [2..18) tag
//!         manifest: [18..40) value bytes expected, [40..48) address count,
//!                   [48] op: 0 = overwrite, 1 = add
//!         value:    [18..25) payload length
//! ```
//!
//! A LOAD whose first data byte is `0xFF` is a response (sentinel, then
//! data); otherwise it is a request whose data block carries the requesting
//! core id as a little-endian u64.
//!
//! # Frame
//!
//! ```text
//! | type u8 | header u64 LE | data [u8; 64] | source u8 | ndest u8 | dest u8 * ndest |
//! ```

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use smallvec::SmallVec;

use crate::device::dae_spec::{BANK_WIDTH, MANIFEST_ADDR_BYTES, MAX_REMOTE_READ, PACKET_SIZE, PAYLOAD_SENTINEL};
use crate::device::CoreId;
use crate::error::ProtocolError;
use crate::remote::pending::{Tag, UpdateOp};

/// Message type tag (2 bits on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Load,
    Store,
    Update,
}

impl MessageKind {
    pub const COUNT: usize = 3;

    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(MessageKind::Load),
            1 => Ok(MessageKind::Store),
            2 => Ok(MessageKind::Update),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            MessageKind::Load => 0,
            MessageKind::Store => 1,
            MessageKind::Update => 2,
        }
    }
}

/// Where a STORE payload lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    Scratch,
    Port,
}

/// STORE header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Local scratch address, or input port id.
    pub addr: u16,
    pub len: u8,
    pub target: StoreTarget,
}

impl StoreHeader {
    const TARGET_PORT: u64 = 1 << 40;

    pub fn encode(&self) -> u64 {
        let target = match self.target {
            StoreTarget::Scratch => 0,
            StoreTarget::Port => Self::TARGET_PORT,
        };
        self.addr as u64 | ((self.len as u64 & 0x7F) << 16) | target
    }

    pub fn decode(header: u64) -> Self {
        Self {
            addr: (header & 0xFFFF) as u16,
            len: ((header >> 16) & 0x7F) as u8,
            target: if header & Self::TARGET_PORT != 0 {
                StoreTarget::Port
            } else {
                StoreTarget::Scratch
            },
        }
    }
}

/// Encode a remote read length as a 4-bit size code.
pub fn encode_read_size(len: usize) -> Result<u8, ProtocolError> {
    match len {
        1..=8 => Ok(len as u8),
        n if n > 8 && n <= MAX_REMOTE_READ && n % BANK_WIDTH == 0 => Ok((8 + n / BANK_WIDTH) as u8),
        n => Err(ProtocolError::BadReadSize(n)),
    }
}

/// Bytes named by a size code.
pub fn decode_read_size(code: u8) -> usize {
    let code = (code & 0xF) as usize;
    if code <= 8 {
        code
    } else {
        (code - 8) * BANK_WIDTH
    }
}

/// Largest encodable remote read not exceeding `remaining` bytes.
pub fn remote_read_len(remaining: u64) -> usize {
    if remaining <= 8 {
        remaining as usize
    } else {
        let banked = (remaining as usize).min(MAX_REMOTE_READ);
        banked - banked % BANK_WIDTH
    }
}

/// LOAD header fields (shared by request and response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadHeader {
    pub addr: u16,
    pub request_ptr: u8,
    pub size_code: u8,
    pub reorder: u8,
}

impl LoadHeader {
    pub fn encode(&self) -> u64 {
        self.addr as u64
            | ((self.request_ptr as u64 & 0x3F) << 16)
            | ((self.size_code as u64 & 0xF) << 22)
            | ((self.reorder as u64 & 0x7) << 26)
    }

    pub fn decode(header: u64) -> Self {
        Self {
            addr: (header & 0xFFFF) as u16,
            request_ptr: ((header >> 16) & 0x3F) as u8,
            size_code: ((header >> 22) & 0xF) as u8,
            reorder: ((header >> 26) & 0x7) as u8,
        }
    }

    #[inline]
    pub fn data_bytes(&self) -> usize {
        decode_read_size(self.size_code)
    }
}

/// UPDATE header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateHeader {
    /// Destination list for a tag.
    Manifest {
        tag: Tag,
        value_bytes: u32,
        addr_count: u8,
        op: UpdateOp,
    },
    /// Value bytes for a tag.
    Value { tag: Tag, len: u8 },
}

impl UpdateHeader {
    const TAGGED: u64 = 1;
    const TAG_PACKET: u64 = 1 << 1;
    const OP_ADD: u64 = 1 << 48;

    pub fn encode(&self) -> u64 {
        match *self {
            UpdateHeader::Manifest { tag, value_bytes, addr_count, op } => {
                let op_bit = if op.bit() { Self::OP_ADD } else { 0 };
                Self::TAGGED
                    | Self::TAG_PACKET
                    | ((tag as u64) << 2)
                    | ((value_bytes as u64 & 0x3F_FFFF) << 18)
                    | ((addr_count as u64) << 40)
                    | op_bit
            }
            UpdateHeader::Value { tag, len } => {
                Self::TAGGED | ((tag as u64) << 2) | ((len as u64 & 0x7F) << 18)
            }
        }
    }

    pub fn decode(header: u64) -> Self {
        let tag = ((header >> 2) & 0xFFFF) as Tag;
        if header & Self::TAG_PACKET != 0 {
            UpdateHeader::Manifest {
                tag,
                value_bytes: ((header >> 18) & 0x3F_FFFF) as u32,
                addr_count: ((header >> 40) & 0xFF) as u8,
                op: UpdateOp::from_bit(header & Self::OP_ADD != 0),
            }
        } else {
            UpdateHeader::Value {
                tag,
                len: ((header >> 18) & 0x7F) as u8,
            }
        }
    }
}

/// One network message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetMessage {
    pub kind: MessageKind,
    pub header: u64,
    data: [u8; PACKET_SIZE],
    pub source: CoreId,
    pub destinations: SmallVec<[CoreId; 4]>,
}

impl NetMessage {
    /// Bytes of a frame before the destination list.
    pub const FIXED_LEN: usize = 1 + 8 + PACKET_SIZE + 1 + 1;

    /// Build a message. Short payloads are followed by the sentinel byte.
    pub fn new(
        kind: MessageKind,
        header: u64,
        payload: &[u8],
        source: CoreId,
        destinations: &[CoreId],
    ) -> Result<Self, ProtocolError> {
        if payload.len() > PACKET_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: PACKET_SIZE,
            });
        }
        if destinations.is_empty() {
            return Err(ProtocolError::NoDestination);
        }
        let mut data = [0u8; PACKET_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        if payload.len() < PACKET_SIZE {
            data[payload.len()] = PAYLOAD_SENTINEL;
        }
        Ok(Self {
            kind,
            header,
            data,
            source,
            destinations: SmallVec::from_slice(destinations),
        })
    }

    /// The full 64-byte data block.
    #[inline]
    pub fn data(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    /// LOAD responses lead with the sentinel byte.
    #[inline]
    pub fn is_load_response(&self) -> bool {
        self.kind == MessageKind::Load && self.data[0] == PAYLOAD_SENTINEL
    }

    /// Payload bytes, sized from the header.
    pub fn payload(&self) -> &[u8] {
        let len = match self.kind {
            MessageKind::Store => StoreHeader::decode(self.header).len as usize,
            MessageKind::Load if self.is_load_response() => {
                1 + LoadHeader::decode(self.header).data_bytes()
            }
            MessageKind::Load => 8,
            MessageKind::Update => match UpdateHeader::decode(self.header) {
                UpdateHeader::Manifest { addr_count, .. } => addr_count as usize * MANIFEST_ADDR_BYTES,
                UpdateHeader::Value { len, .. } => len as usize,
            },
        };
        &self.data[..len.min(PACKET_SIZE)]
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![0u8; Self::FIXED_LEN + self.destinations.len()];
        frame[0] = self.kind.bits();
        LittleEndian::write_u64(&mut frame[1..9], self.header);
        frame[9..9 + PACKET_SIZE].copy_from_slice(&self.data);
        frame[9 + PACKET_SIZE] = self.source;
        frame[10 + PACKET_SIZE] = self.destinations.len() as u8;
        frame[Self::FIXED_LEN..].copy_from_slice(&self.destinations);
        frame
    }

    /// Parse a wire frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let truncated = |needed: usize| ProtocolError::Truncated { needed, have: frame.len() };
        let mut rdr = Cursor::new(frame);

        let kind = MessageKind::from_bits(rdr.read_u8().map_err(|_| truncated(1))?)?;
        let header = rdr
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated(Self::FIXED_LEN))?;
        let mut data = [0u8; PACKET_SIZE];
        rdr.read_exact(&mut data).map_err(|_| truncated(Self::FIXED_LEN))?;
        let source = rdr.read_u8().map_err(|_| truncated(Self::FIXED_LEN))?;
        let count = rdr.read_u8().map_err(|_| truncated(Self::FIXED_LEN))? as usize;

        let mut destinations = SmallVec::with_capacity(count);
        for _ in 0..count {
            destinations.push(rdr.read_u8().map_err(|_| truncated(Self::FIXED_LEN + count))?);
        }

        Ok(Self {
            kind,
            header,
            data,
            source,
            destinations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_header_fields() {
        let header = StoreHeader { addr: 0x1234, len: 64, target: StoreTarget::Port };
        let decoded = StoreHeader::decode(header.encode());
        assert_eq!(decoded, header);
        assert_eq!(header.encode() & 0xFFFF, 0x1234);
        assert_eq!((header.encode() >> 16) & 0x7F, 64);
    }

    #[test]
    fn test_load_header_layout() {
        let header = LoadHeader { addr: 0x0100, request_ptr: 3, size_code: 12, reorder: 5 };
        let raw = header.encode();
        assert_eq!(raw, 0x0100 | (3 << 16) | (12 << 22) | (5 << 26));
        assert_eq!(LoadHeader::decode(raw), header);
        assert_eq!(header.data_bytes(), 32);
    }

    #[test]
    fn test_read_size_codes() {
        assert_eq!(encode_read_size(8), Ok(8));
        assert_eq!(encode_read_size(16), Ok(10));
        assert_eq!(encode_read_size(56), Ok(15));
        assert_eq!(encode_read_size(12), Err(ProtocolError::BadReadSize(12)));
        assert_eq!(encode_read_size(0), Err(ProtocolError::BadReadSize(0)));
        assert_eq!(decode_read_size(15), 56);
        assert_eq!(decode_read_size(3), 3);
        for len in [1, 5, 8, 16, 24, 56] {
            assert_eq!(decode_read_size(encode_read_size(len).unwrap()), len);
        }
    }

    #[test]
    fn test_remote_read_len() {
        assert_eq!(remote_read_len(5), 5);
        assert_eq!(remote_read_len(8), 8);
        assert_eq!(remote_read_len(13), 8);
        assert_eq!(remote_read_len(64), 56);
        assert_eq!(remote_read_len(1000), 56);
    }

    #[test]
    fn test_update_header_layout() {
        let manifest = UpdateHeader::Manifest {
            tag: 0x0C05,
            value_bytes: 8,
            addr_count: 3,
            op: UpdateOp::Overwrite,
        };
        let raw = manifest.encode();
        assert_eq!(raw & 0x3, 0x3);
        assert_eq!((raw >> 2) & 0xFFFF, 0x0C05);
        assert_eq!((raw >> 18) & 0x3F_FFFF, 8);
        assert_eq!(raw >> 48, 0);
        assert_eq!(UpdateHeader::decode(raw), manifest);

        let add = UpdateHeader::Manifest {
            tag: 0x0C05,
            value_bytes: 8,
            addr_count: 3,
            op: UpdateOp::Add,
        };
        let raw = add.encode();
        assert_eq!((raw >> 48) & 1, 1);
        assert_eq!((raw >> 40) & 0xFF, 3);
        assert_eq!(UpdateHeader::decode(raw), add);

        let value = UpdateHeader::Value { tag: 7, len: 64 };
        let raw = value.encode();
        assert_eq!(raw & 0x3, 0x1);
        assert_eq!(UpdateHeader::decode(raw), value);
    }

    #[test]
    fn test_short_payload_sentinel() {
        let header = StoreHeader { addr: 0, len: 3, target: StoreTarget::Scratch }.encode();
        let msg = NetMessage::new(MessageKind::Store, header, &[1, 2, 3], 0, &[1]).unwrap();
        assert_eq!(msg.payload(), &[1, 2, 3]);
        assert_eq!(msg.data()[3], PAYLOAD_SENTINEL);

        let full = NetMessage::new(MessageKind::Store, 0, &[0xAB; PACKET_SIZE], 0, &[1]).unwrap();
        assert!(full.data().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_message_limits() {
        let too_big = NetMessage::new(MessageKind::Store, 0, &[0; PACKET_SIZE + 1], 0, &[1]);
        assert!(matches!(too_big, Err(ProtocolError::PayloadTooLarge { .. })));
        let nowhere = NetMessage::new(MessageKind::Store, 0, &[], 0, &[]);
        assert_eq!(nowhere, Err(ProtocolError::NoDestination));
    }

    #[test]
    fn test_load_request_response_disambiguation() {
        let header = LoadHeader { addr: 0, request_ptr: 0, size_code: 8, reorder: 0 }.encode();
        let request = NetMessage::new(MessageKind::Load, header, &2u64.to_le_bytes(), 2, &[0]).unwrap();
        assert!(!request.is_load_response());
        assert_eq!(request.payload().len(), 8);

        let mut body = vec![PAYLOAD_SENTINEL];
        body.extend_from_slice(&[0xFF; 8]);
        let response = NetMessage::new(MessageKind::Load, header, &body, 0, &[2]).unwrap();
        assert!(response.is_load_response());
        assert_eq!(&response.payload()[1..], &[0xFF; 8]);
    }

    #[test]
    fn test_frame_encode_decode() {
        let msg = NetMessage::new(MessageKind::Update, 0x55, &[9, 9], 3, &[1, 2, 5]).unwrap();
        let frame = msg.encode();
        assert_eq!(frame.len(), NetMessage::FIXED_LEN + 3);
        assert_eq!(NetMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let msg = NetMessage::new(MessageKind::Load, 0, &[], 0, &[1]).unwrap();
        let mut frame = msg.encode();

        assert!(matches!(
            NetMessage::decode(&frame[..20]),
            Err(ProtocolError::Truncated { .. })
        ));

        frame[0] = 3;
        assert_eq!(NetMessage::decode(&frame), Err(ProtocolError::UnknownMessageType(3)));
    }
}
