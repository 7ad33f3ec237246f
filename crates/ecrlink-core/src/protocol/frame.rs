//! Serial packet framing (panic-free).
//!
//! Wire format (bit-exact):
//! ```text
//! ┌──────────┬──────┬─────┬────┬───────────┬───────────┬──────────┬──────────┐
//! │ STX (2B) │ Type │ Ack │ Id │ Len (2B)  │ Data      │ Checksum │ ETX (2B) │
//! │ 55 AA    │ 1B   │ 1B  │ 1B │ BE u16    │ Len bytes │ 1B XOR   │ CC 33    │
//! └──────────┴──────┴─────┴────┴───────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! The checksum is the XOR of every byte from Type through Data inclusive.
//!
//! Parsing rules:
//! - Never index raw buffers; use `Buf` readers and `get` with bounds checks.
//! - The decoder trusts `Len` to bound the data region and only accepts a
//!   frame whose ETX sits exactly where `Len` says. Marker bytes inside the
//!   payload therefore cannot truncate a frame.
//! - While a candidate is still short of its declared length, a later start
//!   marker heading a complete, checksum-valid frame wins over waiting. A
//!   corrupted `Len` then costs one frame, not the rest of the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::error::{EcrError, Result};

/// Start-of-frame marker.
pub const STX: [u8; 2] = [0x55, 0xAA];
/// End-of-frame marker.
pub const ETX: [u8; 2] = [0xCC, 0x33];

/// Type, Ack, Id and the two Len bytes.
const HEADER_LEN: usize = 5;

/// Bytes a frame carries beyond its data.
pub const FRAME_OVERHEAD: usize = STX.len() + HEADER_LEN + 1 + ETX.len();

/// Largest data section the stream decoder waits for before resyncing.
pub const DEFAULT_MAX_DATA_LEN: usize = 8 * 1024;

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Data, acknowledgment, and heartbeat packets.
    Common = 0x00,
    Handshake = 0x01,
    HandshakeConfirm = 0x02,
}

impl PacketType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(PacketType::Common),
            0x01 => Some(PacketType::Handshake),
            0x02 => Some(PacketType::HandshakeConfirm),
            _ => None,
        }
    }
}

/// One decoded (or to-be-encoded) serial packet. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    /// Non-zero when acknowledging the peer's packet with that id.
    pub ack: u8,
    /// 1..=255 for data packets, 0 for control packets.
    pub id: u8,
    pub data: Bytes,
}

impl Packet {
    pub fn handshake() -> Self {
        Self::control(PacketType::Handshake, 0)
    }

    pub fn handshake_confirm() -> Self {
        Self::control(PacketType::HandshakeConfirm, 0)
    }

    pub fn heartbeat() -> Self {
        Self::control(PacketType::Common, 0)
    }

    /// Acknowledge the peer's data packet `id`.
    pub fn ack(id: u8) -> Self {
        Self::control(PacketType::Common, id)
    }

    pub fn data(id: u8, data: impl Into<Bytes>) -> Self {
        Self {
            packet_type: PacketType::Common,
            ack: 0,
            id,
            data: data.into(),
        }
    }

    fn control(packet_type: PacketType, ack: u8) -> Self {
        Self {
            packet_type,
            ack,
            id: 0,
            data: Bytes::new(),
        }
    }

    /// Carries an application message that must be acknowledged.
    pub fn is_data(&self) -> bool {
        self.packet_type == PacketType::Common && self.id != 0
    }

    pub fn is_ack(&self) -> bool {
        self.packet_type == PacketType::Common && self.id == 0 && self.ack != 0
    }

    pub fn is_heartbeat(&self) -> bool {
        self.packet_type == PacketType::Common && self.id == 0 && self.ack == 0
    }
}

/// XOR checksum over Type..Data.
pub fn checksum(header: &[u8], data: &[u8]) -> u8 {
    header.iter().chain(data.iter()).fold(0u8, |acc, b| acc ^ b)
}

/// Encode a packet into a complete STX..ETX frame.
pub fn encode_packet(packet: &Packet) -> Result<Bytes> {
    let len = u16::try_from(packet.data.len()).map_err(|_| {
        EcrError::ProtocolViolation(format!(
            "packet data too large: {} bytes",
            packet.data.len()
        ))
    })?;

    let mut header = [0u8; HEADER_LEN];
    header[0] = packet.packet_type as u8;
    header[1] = packet.ack;
    header[2] = packet.id;
    header[3..].copy_from_slice(&len.to_be_bytes());

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + packet.data.len());
    buf.put_slice(&STX);
    buf.put_slice(&header);
    buf.put_slice(&packet.data);
    buf.put_u8(checksum(&header, &packet.data));
    buf.put_slice(&ETX);
    Ok(buf.freeze())
}

/// Decode one complete frame (markers included) into a packet.
///
/// Fails with `EcrError::Decode` on bad markers, a `Len` that disagrees with
/// the frame size, a checksum mismatch, or an unknown type byte.
pub fn decode_packet(frame: Bytes) -> Result<Packet> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(EcrError::Decode("frame too short".into()));
    }
    if !frame.starts_with(&STX) || !frame.ends_with(&ETX) {
        return Err(EcrError::Decode("missing frame markers".into()));
    }

    let body = frame.slice(STX.len()..frame.len() - ETX.len());
    let mut buf = body.clone();

    let type_byte = buf.get_u8();
    let ack = buf.get_u8();
    let id = buf.get_u8();
    let len = buf.get_u16() as usize;

    if buf.remaining() != len + 1 {
        return Err(EcrError::Decode(format!(
            "length field {len} does not match frame of {} bytes",
            frame.len()
        )));
    }

    let data = buf.copy_to_bytes(len);
    let expected = buf.get_u8();
    let actual = checksum(&body[..HEADER_LEN], &data);
    if expected != actual {
        return Err(EcrError::Decode(format!(
            "checksum mismatch: frame says {expected:#04x}, computed {actual:#04x}"
        )));
    }

    let packet_type = PacketType::from_u8(type_byte)
        .ok_or_else(|| EcrError::Decode(format!("unknown packet type {type_byte:#04x}")))?;

    Ok(Packet {
        packet_type,
        ack,
        id,
        data,
    })
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(marker.len()).position(|w| w == marker)
}

/// True when `buf` starts with a whole frame: markers where `Len` puts them
/// and a matching checksum.
fn starts_with_valid_frame(buf: &[u8], max_data_len: usize) -> bool {
    if !buf.starts_with(&STX) {
        return false;
    }
    let Some(header) = buf.get(STX.len()..STX.len() + HEADER_LEN) else {
        return false;
    };
    let data_len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if data_len > max_data_len {
        return false;
    }
    let data_at = STX.len() + HEADER_LEN;
    let total = FRAME_OVERHEAD + data_len;
    let (Some(data), Some(&sum), Some(end)) = (
        buf.get(data_at..data_at + data_len),
        buf.get(data_at + data_len),
        buf.get(total - ETX.len()..total),
    ) else {
        return false;
    };
    end == &ETX[..] && sum == checksum(header, data)
}

/// Streaming frame decoder with a carry-over buffer.
///
/// Bytes from successive reads are appended to the carry-over; complete
/// frames are cut out, anything before a start marker is discarded, and a
/// trailing partial frame waits for the next read. The carry-over is behind a
/// mutex because the byte-arrival path and flush/reset paths may race.
#[derive(Debug)]
pub struct FrameDecoder {
    carry: Mutex<BytesMut>,
    max_data_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_data_len(DEFAULT_MAX_DATA_LEN)
    }

    pub fn with_max_data_len(max_data_len: usize) -> Self {
        Self {
            carry: Mutex::new(BytesMut::new()),
            max_data_len,
        }
    }

    /// Append `incoming` and return every complete frame now available,
    /// markers included, in arrival order. Checksums are not checked here.
    pub fn decode_stream(&self, incoming: &[u8]) -> Vec<Bytes> {
        let mut carry = self.carry.lock();
        carry.extend_from_slice(incoming);

        let mut frames = Vec::new();
        loop {
            match find_marker(&carry, &STX) {
                None => {
                    // A lone 0x55 at the tail may be the first half of the next STX.
                    let keep = usize::from(carry.last() == Some(&STX[0]));
                    let discard = carry.len() - keep;
                    if discard > 0 {
                        tracing::trace!(discard, "no start marker, discarding noise");
                        carry.advance(discard);
                    }
                    break;
                }
                Some(0) => {}
                Some(skip) => {
                    tracing::debug!(skip, "resyncing to next start marker");
                    carry.advance(skip);
                }
            }

            let Some(len_bytes) = carry.get(STX.len() + 3..STX.len() + HEADER_LEN) else {
                break;
            };
            let data_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            if data_len > self.max_data_len {
                tracing::warn!(data_len, max = self.max_data_len, "implausible length, resyncing");
                carry.advance(1);
                continue;
            }

            let total = FRAME_OVERHEAD + data_len;
            if carry.len() < total {
                if self.valid_frame_follows(&carry) {
                    tracing::debug!(data_len, "complete frame behind short candidate, resyncing");
                    carry.advance(1);
                    continue;
                }
                break;
            }
            if carry.get(total - ETX.len()..total) != Some(&ETX[..]) {
                tracing::debug!(data_len, "end marker not at declared length, resyncing");
                carry.advance(1);
                continue;
            }

            frames.push(carry.split_to(total).freeze());
        }

        frames
    }

    /// Any later start marker in `carry` that heads a complete valid frame.
    fn valid_frame_follows(&self, carry: &[u8]) -> bool {
        let Some(rest) = carry.get(1..) else {
            return false;
        };
        rest.windows(STX.len())
            .enumerate()
            .filter(|(_, w)| *w == &STX[..])
            .any(|(at, _)| {
                rest.get(at..)
                    .is_some_and(|tail| starts_with_valid_frame(tail, self.max_data_len))
            })
    }

    /// Append `incoming` and return the packets that pass validation.
    /// Corrupt frames are logged and dropped.
    pub fn feed(&self, incoming: &[u8]) -> Vec<Packet> {
        self.decode_stream(incoming)
            .into_iter()
            .filter_map(|frame| match decode_packet(frame) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping corrupt frame");
                    None
                }
            })
            .collect()
    }

    /// Bytes currently held waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.carry.lock().len()
    }

    /// Drop any partial frame (e.g. after the port is reopened).
    pub fn reset(&self) {
        self.carry.lock().clear();
    }
}
