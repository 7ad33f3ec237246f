//! Protocol modules (serial framing + protobuf envelopes).
//!
//! - Frame: the STX/ETX/XOR-checksum packet format used only on the serial
//!   link, plus the stream decoder that reassembles packets from raw reads.
//! - Envelope: the protobuf request/response wrappers carried by both the
//!   serial and the WebSocket transports.
//!
//! Parsers are panic-free: malformed input is reported as `EcrError::Decode`
//! so a noisy line never takes down the reader.

pub mod envelope;
pub mod frame;
