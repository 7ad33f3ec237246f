//! Receive-side decoding shared by the engines.
//!
//! - Reply bytes => correlation cache entry keyed by `msg_id`
//! - WebSocket messages (axum or tungstenite) => one `Inbound` shape
//!
//! Undecodable replies are logged and dropped here; callers only ever see
//! them as a read timeout.

use bytes::Bytes;
use ecrlink_core::protocol::envelope;

use crate::cache::CorrelationCache;

/// Socket ended without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;
/// Close frame carried no status code.
pub const NO_STATUS: u16 = 1005;

/// Store a reply under its `msg_id`. Returns the id, or `None` if the
/// payload was not a response envelope.
pub fn store_reply(cache: &CorrelationCache, payload: Bytes) -> Option<String> {
    match envelope::unpack_response(&payload) {
        Ok(env) => {
            tracing::debug!(msg_id = %env.msg_id, success = env.success, "reply received");
            cache.put(env.msg_id.clone(), payload);
            Some(env.msg_id)
        }
        Err(e) => {
            tracing::warn!(error = %e, len = payload.len(), "dropping undecodable reply");
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Binary(Bytes),
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close { code: u16, reason: String },
}

pub fn from_axum(msg: axum::extract::ws::Message) -> Inbound {
    use axum::extract::ws::Message;
    match msg {
        Message::Binary(b) => Inbound::Binary(Bytes::from(b)),
        Message::Text(s) => Inbound::Text(s),
        Message::Ping(v) => Inbound::Ping(v),
        Message::Pong(_) => Inbound::Pong,
        Message::Close(frame) => match frame {
            Some(f) => Inbound::Close {
                code: f.code,
                reason: f.reason.into_owned(),
            },
            None => Inbound::Close {
                code: NO_STATUS,
                reason: String::new(),
            },
        },
    }
}

pub fn from_tungstenite(msg: tokio_tungstenite::tungstenite::Message) -> Inbound {
    use tokio_tungstenite::tungstenite::Message;
    match msg {
        Message::Binary(b) => Inbound::Binary(Bytes::from(b)),
        Message::Text(s) => Inbound::Text(s),
        Message::Ping(v) => Inbound::Ping(v),
        Message::Pong(_) | Message::Frame(_) => Inbound::Pong,
        Message::Close(frame) => match frame {
            Some(f) => Inbound::Close {
                code: u16::from(f.code),
                reason: f.reason.into_owned(),
            },
            None => Inbound::Close {
                code: NO_STATUS,
                reason: String::new(),
            },
        },
    }
}
