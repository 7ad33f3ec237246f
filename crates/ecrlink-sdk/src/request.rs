//! Typed requests and replies.
//!
//! Each request type is bound to one topic. Its fields become the JSON
//! `biz_data`; per-call options (message id, wait, side channels) ride
//! alongside and never reach the payload.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::envelope::{
    build_request, DeviceData, EnvelopeHeader, RequestEnvelope, ResponseEnvelope, SideChannels,
};

pub const TOPIC_PURCHASE: &str = "ecrhub.pay.order";
pub const TOPIC_REFUND: &str = "ecrhub.pay.refund";
pub const TOPIC_QUERY: &str = "ecrhub.pay.query";
pub const TOPIC_CLOSE: &str = "ecrhub.pay.close";

/// Per-call settings carried next to a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Caller-chosen correlation id; a UUID v4 is generated when absent.
    pub msg_id: Option<String>,
    /// Overrides the transport's default reply wait.
    pub timeout: Option<Duration>,
    pub voice_data: Option<Value>,
    pub printer_data: Option<Value>,
    pub notify_data: Option<Value>,
}

pub trait EcrRequest: Serialize + Send + Sync {
    /// Shape of the reply's `biz_data`.
    type Biz: DeserializeOwned + Default + Send + 'static;

    const TOPIC: &'static str;

    fn options(&self) -> &RequestOptions;

    fn to_envelope(&self, header: &EnvelopeHeader) -> Result<RequestEnvelope> {
        let opts = self.options();
        let msg_id = opts
            .msg_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let biz = serde_json::to_value(self)
            .map_err(|e| EcrError::Internal(format!("encode {} payload failed: {e}", Self::TOPIC)))?;

        build_request(
            header,
            Self::TOPIC,
            msg_id,
            &biz,
            SideChannels {
                voice: opts.voice_data.as_ref(),
                printer: opts.printer_data.as_ref(),
                notify: opts.notify_data.as_ref(),
            },
        )
    }
}

/// A decoded reply with its typed business payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<B> {
    pub msg_id: String,
    pub success: bool,
    pub error_msg: String,
    pub device_data: Option<DeviceData>,
    pub biz: B,
}

impl<B: DeserializeOwned + Default> Reply<B> {
    pub fn from_envelope(env: ResponseEnvelope) -> Result<Self> {
        let biz = env.biz()?;
        Ok(Self {
            msg_id: env.msg_id,
            success: env.success,
            error_msg: env.error_msg,
            device_data: env.device_data,
            biz,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(skip)]
    pub options: RequestOptions,
    pub merchant_order_no: String,
    /// Decimal string, e.g. `"12.50"`.
    pub order_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_method_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_on_terminal: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(skip)]
    pub options: RequestOptions,
    pub orig_merchant_order_no: String,
    pub merchant_order_no: String,
    pub order_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(skip)]
    pub options: RequestOptions,
    pub merchant_order_no: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    #[serde(skip)]
    pub options: RequestOptions,
    pub merchant_order_no: String,
}

/// Business payload of purchase, refund and query replies.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradeResult {
    pub merchant_order_no: Option<String>,
    pub trans_no: Option<String>,
    pub order_amount: Option<String>,
    pub price_currency: Option<String>,
    pub trans_status: Option<String>,
    pub pay_method_id: Option<String>,
    pub paid_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloseResult {
    pub merchant_order_no: Option<String>,
    pub trans_status: Option<String>,
}

pub type PurchaseResponse = Reply<TradeResult>;
pub type RefundResponse = Reply<TradeResult>;
pub type QueryResponse = Reply<TradeResult>;
pub type CloseResponse = Reply<CloseResult>;

macro_rules! ecr_request {
    ($req:ty, $biz:ty, $topic:expr) => {
        impl EcrRequest for $req {
            type Biz = $biz;
            const TOPIC: &'static str = $topic;

            fn options(&self) -> &RequestOptions {
                &self.options
            }
        }

        impl $req {
            pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
                self.options.msg_id = Some(msg_id.into());
                self
            }

            pub fn with_timeout(mut self, timeout: Duration) -> Self {
                self.options.timeout = Some(timeout);
                self
            }
        }
    };
}

ecr_request!(PurchaseRequest, TradeResult, TOPIC_PURCHASE);
ecr_request!(RefundRequest, TradeResult, TOPIC_REFUND);
ecr_request!(QueryRequest, TradeResult, TOPIC_QUERY);
ecr_request!(CloseRequest, CloseResult, TOPIC_CLOSE);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header() -> EnvelopeHeader {
        EnvelopeHeader {
            app_id: "app-1".into(),
            mac_address: None,
        }
    }

    #[test]
    fn purchase_envelope_has_topic_and_camel_case_biz() {
        let req = PurchaseRequest {
            merchant_order_no: "A1".into(),
            order_amount: "12.50".into(),
            ..Default::default()
        }
        .with_msg_id("m1");

        let env = req.to_envelope(&header()).unwrap();
        assert_eq!(env.topic, TOPIC_PURCHASE);
        assert_eq!(env.msg_id, "m1");
        let biz: Value = serde_json::from_str(&env.biz_data).unwrap();
        assert_eq!(biz, json!({ "merchantOrderNo": "A1", "orderAmount": "12.50" }));
    }

    #[test]
    fn msg_id_defaults_to_fresh_uuid() {
        let req = QueryRequest {
            merchant_order_no: "A1".into(),
            ..Default::default()
        };
        let a = req.to_envelope(&header()).unwrap().msg_id;
        let b = req.to_envelope(&header()).unwrap().msg_id;
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn side_channels_are_attached() {
        let mut req = CloseRequest {
            merchant_order_no: "A1".into(),
            ..Default::default()
        };
        req.options.printer_data = Some(json!({ "content": "VOID", "copies": 1 }));

        let env = req.to_envelope(&header()).unwrap();
        assert_eq!(env.topic, TOPIC_CLOSE);
        assert_eq!(env.printer_data.unwrap().copies, 1);
        assert!(env.voice_data.is_none());
    }

    #[test]
    fn reply_decodes_trade_result() {
        let env = ResponseEnvelope::ok("m1", &json!({ "transNo": "T9", "transStatus": "S", "extra": 1 }));
        let reply = PurchaseResponse::from_envelope(env).unwrap();
        assert!(reply.success);
        assert_eq!(reply.biz.trans_no.as_deref(), Some("T9"));
        assert_eq!(reply.biz.trans_status.as_deref(), Some("S"));
    }
}
