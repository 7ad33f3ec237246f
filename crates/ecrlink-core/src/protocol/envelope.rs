//! Request/response envelopes (protobuf).
//!
//! Every message on either transport is one of these envelopes. The business
//! payload travels as JSON text in `biz_data`; the voice/printer/notify side
//! channels are protobuf sub-messages built from JSON objects with unknown
//! fields ignored.

use bytes::Bytes;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EcrError, Result};

/// Envelope schema version stamped on every request.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Metadata describing the sending device.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceData {
    #[prost(string, tag = "1")]
    pub mac_address: String,
    #[prost(string, tag = "2")]
    pub device_name: String,
    #[prost(string, tag = "3")]
    pub ip_address: String,
    #[prost(string, tag = "4")]
    pub port: String,
}

/// Text-to-speech prompt to play on the terminal.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceData {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(string, tag = "2")]
    pub content_locale: String,
    #[prost(uint32, tag = "3")]
    pub volume: u32,
}

/// Receipt content for the terminal printer.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrinterData {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(uint32, tag = "2")]
    pub copies: u32,
}

/// On-screen notification.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifyData {
    #[prost(string, tag = "1")]
    pub title: String,
    #[prost(string, tag = "2")]
    pub content: String,
    #[prost(string, tag = "3")]
    pub level: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestEnvelope {
    #[prost(string, tag = "1")]
    pub msg_id: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, tag = "3")]
    pub app_id: String,
    #[prost(string, tag = "4")]
    pub topic: String,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "6")]
    pub device_data: Option<DeviceData>,
    /// Business payload as JSON text.
    #[prost(string, tag = "7")]
    pub biz_data: String,
    #[prost(message, optional, tag = "8")]
    pub voice_data: Option<VoiceData>,
    #[prost(message, optional, tag = "9")]
    pub printer_data: Option<PrinterData>,
    #[prost(message, optional, tag = "10")]
    pub notify_data: Option<NotifyData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseEnvelope {
    /// Equals the `msg_id` of the request being answered.
    #[prost(string, tag = "1")]
    pub msg_id: String,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(string, tag = "3")]
    pub error_msg: String,
    #[prost(message, optional, tag = "4")]
    pub device_data: Option<DeviceData>,
    /// Business payload as JSON text.
    #[prost(string, tag = "5")]
    pub biz_data: String,
}

impl ResponseEnvelope {
    /// Successful reply to `msg_id`.
    pub fn ok(msg_id: impl Into<String>, biz: &serde_json::Value) -> Self {
        Self {
            msg_id: msg_id.into(),
            success: true,
            biz_data: biz.to_string(),
            ..Default::default()
        }
    }

    /// Failed reply to `msg_id`.
    pub fn failed(msg_id: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            success: false,
            error_msg: error_msg.into(),
            ..Default::default()
        }
    }

    /// Parse `biz_data` into `T`; an empty payload yields `T::default()`.
    pub fn biz<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.biz_data.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&self.biz_data)
            .map_err(|e| EcrError::Decode(format!("invalid biz_data json: {e}")))
    }
}

/// Sender identity stamped on outgoing requests.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeHeader {
    pub app_id: String,
    pub mac_address: Option<String>,
}

/// Side-channel blocks as loose JSON objects.
#[derive(Debug, Clone, Default)]
pub struct SideChannels<'a> {
    pub voice: Option<&'a serde_json::Value>,
    pub printer: Option<&'a serde_json::Value>,
    pub notify: Option<&'a serde_json::Value>,
}

/// Convert a JSON object into a side-channel sub-message, ignoring unknown fields.
pub fn side_channel_from_json<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
    T::deserialize(value).map_err(|e| EcrError::Decode(format!("invalid side-channel json: {e}")))
}

fn side_channel<T: DeserializeOwned>(value: Option<&serde_json::Value>) -> Result<Option<T>> {
    value.map(side_channel_from_json).transpose()
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Assemble a request envelope for `topic`.
pub fn build_request(
    header: &EnvelopeHeader,
    topic: &str,
    msg_id: String,
    biz: &serde_json::Value,
    side: SideChannels<'_>,
) -> Result<RequestEnvelope> {
    let device_data = header.mac_address.as_ref().map(|mac| DeviceData {
        mac_address: mac.clone(),
        ..Default::default()
    });

    Ok(RequestEnvelope {
        msg_id,
        version: ENVELOPE_VERSION.to_string(),
        app_id: header.app_id.clone(),
        topic: topic.to_string(),
        timestamp: now_millis(),
        device_data,
        biz_data: biz.to_string(),
        voice_data: side_channel(side.voice)?,
        printer_data: side_channel(side.printer)?,
        notify_data: side_channel(side.notify)?,
    })
}

pub fn pack_request(env: &RequestEnvelope) -> Bytes {
    Bytes::from(env.encode_to_vec())
}

pub fn unpack_request(bytes: &[u8]) -> Result<RequestEnvelope> {
    Ok(RequestEnvelope::decode(bytes)?)
}

pub fn pack_response(env: &ResponseEnvelope) -> Bytes {
    Bytes::from(env.encode_to_vec())
}

/// Parse a response envelope. An envelope without a `msg_id` cannot be
/// correlated and is rejected as a decode error.
pub fn unpack_response(bytes: &[u8]) -> Result<ResponseEnvelope> {
    let env = ResponseEnvelope::decode(bytes)?;
    if env.msg_id.is_empty() {
        return Err(EcrError::Decode("response without msg_id".into()));
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_header_and_side_channels() {
        let header = EnvelopeHeader {
            app_id: "wz6012822ca2f1as78".into(),
            mac_address: Some("AA:BB:CC:DD:EE:FF".into()),
        };
        let voice = json!({ "content": "payment received", "volume": 3, "speaker": "left" });
        let env = build_request(
            &header,
            "ecrhub.pay.order",
            "m1".into(),
            &json!({ "merchantOrderNo": "A1" }),
            SideChannels {
                voice: Some(&voice),
                ..Default::default()
            },
        )
        .unwrap();

        let back = unpack_request(&pack_request(&env)).unwrap();
        assert_eq!(back.msg_id, "m1");
        assert_eq!(back.version, ENVELOPE_VERSION);
        assert_eq!(back.device_data.unwrap().mac_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(back.voice_data.unwrap().volume, 3);
        assert!(back.printer_data.is_none());
        assert!(back.timestamp > 0);
    }

    #[test]
    fn side_channel_type_mismatch_is_decode_error() {
        let err = side_channel_from_json::<PrinterData>(&json!({ "copies": "two" })).unwrap_err();
        assert_eq!(err.kind().as_str(), "DECODE");
    }

    #[test]
    fn response_biz_defaults_when_empty() {
        #[derive(Default, serde::Deserialize)]
        struct Biz {
            #[serde(default)]
            trans_no: Option<String>,
        }
        let env = ResponseEnvelope::failed("m2", "declined");
        let biz: Biz = env.biz().unwrap();
        assert!(biz.trans_no.is_none());
    }

    #[test]
    fn response_without_msg_id_is_rejected() {
        let bytes = pack_response(&ResponseEnvelope::default());
        assert!(unpack_response(&bytes).is_err());
    }
}
