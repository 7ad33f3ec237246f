//! Transport engines.
//!
//! Serial carries envelopes inside framed packets with a handshake and
//! per-packet acks; WebSocket carries one envelope per binary message. Both
//! land replies in a [`CorrelationCache`](crate::cache::CorrelationCache) and
//! expose the same [`Transport`] contract to the facade.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use ecrlink_core::error::Result;

pub mod codec;
pub mod link;
pub mod outbound;
pub mod serial;
pub mod ws;
pub mod ws_client;

/// Send-then-correlate contract shared by every engine.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue one packed envelope for transmission.
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Wait for the reply correlated with `msg_id`; consumes it.
    async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes>;

    /// Wait used when a request does not carry its own timeout.
    fn default_timeout(&self) -> Duration;

    async fn close(&self);
}
