//! Shared state handed to every terminal session.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use parking_lot::RwLock;

use ecrlink_core::error::{EcrError, Result};

use crate::cache::CorrelationCache;
use crate::config::SdkConfig;
use crate::listener::ServerListener;
use crate::pairing::PairingGate;
use crate::server::registry::{Terminal, TerminalRegistry};

#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerStateInner>,
}

struct ServerStateInner {
    cfg: SdkConfig,
    registry: TerminalRegistry,
    /// Shared by all terminals; msg ids are unique across them.
    cache: CorrelationCache,
    listener: RwLock<Option<Arc<dyn ServerListener>>>,
    pairing: RwLock<Option<Arc<PairingGate>>>,
}

impl ServerState {
    pub fn new(cfg: SdkConfig) -> Self {
        let cache = CorrelationCache::from_config(&cfg.cache);
        Self {
            inner: Arc::new(ServerStateInner {
                cfg,
                registry: TerminalRegistry::new(),
                cache,
                listener: RwLock::new(None),
                pairing: RwLock::new(None),
            }),
        }
    }

    pub fn cfg(&self) -> &SdkConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &TerminalRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &CorrelationCache {
        &self.inner.cache
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn ServerListener>>) {
        *self.inner.listener.write() = listener;
    }

    pub fn set_pairing(&self, gate: Option<Arc<PairingGate>>) {
        *self.inner.pairing.write() = gate;
    }

    pub fn pairing(&self) -> Option<Arc<PairingGate>> {
        self.inner.pairing.read().clone()
    }

    pub fn notify_connect(&self, terminal: &Terminal) {
        let listener = self.inner.listener.read().clone();
        if let Some(l) = listener {
            l.on_connect(terminal);
        }
    }

    pub fn notify_disconnect(&self, terminal: &Terminal, code: u16, reason: &str, remote: bool) {
        let listener = self.inner.listener.read().clone();
        if let Some(l) = listener {
            l.on_disconnect(terminal, code, reason, remote);
        }
    }

    /// Queue `payload` for one terminal. Unknown or closed terminals are a
    /// protocol violation, never a silent drop.
    pub async fn send_to(&self, terminal_id: &str, payload: Bytes) -> Result<()> {
        let conn = self
            .registry()
            .connection(terminal_id)
            .ok_or_else(|| EcrError::ProtocolViolation(format!("unknown terminal {terminal_id}")))?;
        if !conn.is_open() {
            return Err(EcrError::ProtocolViolation(format!(
                "terminal {terminal_id} is closed"
            )));
        }

        let write_timeout = self.cfg().socket.write_timeout();
        match tokio::time::timeout(write_timeout, conn.tx.send(Message::Binary(payload.to_vec()))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EcrError::ProtocolViolation(format!(
                "terminal {terminal_id} is closed"
            ))),
            Err(_) => Err(EcrError::Connection(format!(
                "terminal {terminal_id} outbound queue full"
            ))),
        }
    }

    pub async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.cache()
            .wait_take(msg_id, timeout, self.cfg().poll_interval())
            .await
    }
}
