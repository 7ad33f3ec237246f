//! Request/reply exchange over any [`Transport`].

use std::sync::Arc;

use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::envelope::{pack_request, unpack_response, EnvelopeHeader};

use crate::listener::ResponseCallback;
use crate::request::{EcrRequest, Reply};
use crate::transport::Transport;

/// Send `request` and wait for its correlated reply.
///
/// A reply that arrives but cannot be decoded yields `Ok(None)`; transport
/// failures and timeouts are errors.
pub async fn execute<R: EcrRequest>(
    transport: &dyn Transport,
    header: &EnvelopeHeader,
    request: &R,
) -> Result<Option<Reply<R::Biz>>> {
    if !transport.is_connected() {
        return Err(EcrError::Connection("transport not connected".into()));
    }

    let env = request.to_envelope(header)?;
    let msg_id = env.msg_id.clone();
    let timeout = request
        .options()
        .timeout
        .unwrap_or_else(|| transport.default_timeout());

    tracing::debug!(msg_id = %msg_id, topic = R::TOPIC, timeout_ms = timeout.as_millis() as u64, "sending request");
    transport.send(pack_request(&env)).await?;

    let raw = transport.receive(&msg_id, timeout).await?;
    let reply = unpack_response(&raw).and_then(Reply::from_envelope);
    match reply {
        Ok(reply) => Ok(Some(reply)),
        Err(e) => {
            tracing::warn!(msg_id = %msg_id, error = %e, "reply could not be decoded");
            Ok(None)
        }
    }
}

/// Run [`execute`] on a background task and route the outcome to `callback`.
/// There is no cancellation; drop the handle to detach.
pub fn spawn_execute<R>(
    transport: Arc<dyn Transport>,
    header: EnvelopeHeader,
    request: R,
    callback: Box<dyn ResponseCallback<Reply<R::Biz>>>,
) -> tokio::task::JoinHandle<()>
where
    R: EcrRequest + 'static,
{
    tokio::spawn(async move {
        match execute(transport.as_ref(), &header, &request).await {
            Ok(Some(reply)) => callback.on_response(reply),
            Ok(None) => callback.on_error(EcrError::Decode("reply could not be decoded".into())),
            Err(e) if e.is_retriable() => callback.on_timeout(e),
            Err(e) => callback.on_error(e),
        }
    })
}
