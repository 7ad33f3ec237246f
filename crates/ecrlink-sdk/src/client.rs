//! Client facade: the ECR owns one outgoing link, serial or WebSocket.

use std::sync::Arc;

use parking_lot::RwLock;

use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::envelope::EnvelopeHeader;

use crate::cache::CorrelationCache;
use crate::config::SdkConfig;
use crate::exchange;
use crate::listener::ResponseCallback;
use crate::request::{EcrRequest, Reply};
use crate::transport::link::SerialLink;
use crate::transport::serial::SerialEngine;
use crate::transport::ws_client::WsClientEngine;
use crate::transport::Transport;

pub struct EcrClient {
    cfg: SdkConfig,
    header: EnvelopeHeader,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl EcrClient {
    pub fn new(cfg: SdkConfig) -> Result<Self> {
        cfg.validate()?;
        let header = cfg.envelope_header();
        Ok(Self {
            cfg,
            header,
            transport: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.cfg
    }

    /// Open the configured serial port and handshake.
    pub async fn connect_serial(&self) -> Result<()> {
        let engine = SerialEngine::from_config(&self.cfg);
        engine.connect().await?;
        self.install(Arc::new(engine)).await;
        Ok(())
    }

    /// Handshake over a link opened by the caller.
    pub async fn connect_serial_with(&self, link: SerialLink) -> Result<()> {
        let engine = SerialEngine::from_config(&self.cfg);
        engine.connect_with(link).await?;
        self.install(Arc::new(engine)).await;
        Ok(())
    }

    pub async fn connect_websocket(&self, url: &str) -> Result<()> {
        let engine = WsClientEngine::new(
            self.cfg.socket.clone(),
            Arc::new(CorrelationCache::from_config(&self.cfg.cache)),
            self.cfg.poll_interval(),
        );
        engine.connect(url).await?;
        self.install(Arc::new(engine)).await;
        Ok(())
    }

    async fn install(&self, transport: Arc<dyn Transport>) {
        let previous = self.transport.write().replace(transport);
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    fn active(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| EcrError::Connection("client not connected".into()))
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .read()
            .as_ref()
            .is_some_and(|t| t.is_connected())
    }

    /// Send and wait for the reply. `Ok(None)` means a reply arrived but
    /// could not be decoded.
    pub async fn execute<R: EcrRequest>(&self, request: &R) -> Result<Option<Reply<R::Biz>>> {
        let transport = self.active()?;
        exchange::execute(transport.as_ref(), &self.header, request).await
    }

    pub fn async_execute<R>(
        &self,
        request: R,
        callback: Box<dyn ResponseCallback<Reply<R::Biz>>>,
    ) -> Result<tokio::task::JoinHandle<()>>
    where
        R: EcrRequest + 'static,
    {
        let transport = self.active()?;
        Ok(exchange::spawn_execute(transport, self.header.clone(), request, callback))
    }

    pub async fn close(&self) {
        let transport = self.transport.write().take();
        if let Some(t) = transport {
            t.close().await;
        }
    }
}
