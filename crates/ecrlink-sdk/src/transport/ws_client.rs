//! WebSocket client engine (ECR dials the terminal).
//!
//! One session task owns the socket: it drains the outbound channel with a
//! write timeout and stores every binary reply in the correlation cache.
//! Callers never touch the socket directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ecrlink_core::error::{EcrError, Result};

use crate::cache::CorrelationCache;
use crate::config::{SdkConfig, SocketSection};
use crate::transport::codec::{self, Inbound};
use crate::transport::Transport;

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Session {
    tx: mpsc::Sender<Message>,
    task: tokio::task::JoinHandle<()>,
}

pub struct WsClientEngine {
    cfg: SocketSection,
    poll: Duration,
    cache: Arc<CorrelationCache>,
    session: Mutex<Option<Session>>,
    open: Arc<AtomicBool>,
}

impl WsClientEngine {
    pub fn new(cfg: SocketSection, cache: Arc<CorrelationCache>, poll: Duration) -> Self {
        Self {
            cfg,
            poll,
            cache,
            session: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(cfg: &SdkConfig) -> Self {
        Self::new(
            cfg.socket.clone(),
            Arc::new(CorrelationCache::from_config(&cfg.cache)),
            cfg.poll_interval(),
        )
    }

    pub fn cache(&self) -> &Arc<CorrelationCache> {
        &self.cache
    }

    /// Dial `url` (e.g. `ws://192.168.1.20:35779`).
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            return Err(EcrError::Connection("websocket already connected".into()));
        }

        let (stream, _resp) = tokio::time::timeout(self.cfg.connect_timeout(), connect_async(url))
            .await
            .map_err(|_| {
                EcrError::Connection(format!(
                    "connect {url} timed out after {}ms",
                    self.cfg.connect_timeout_ms
                ))
            })?
            .map_err(|e| EcrError::Connection(format!("connect {url} failed: {e}")))?;

        let (tx, rx) = mpsc::channel::<Message>(1024);
        self.open.store(true, Ordering::Release);
        let task = tokio::spawn(run_session(
            stream,
            rx,
            self.cache.clone(),
            self.open.clone(),
            self.cfg.write_timeout(),
        ));

        if let Some(old) = self.session.lock().replace(Session { tx, task }) {
            old.task.abort();
        }
        tracing::info!(%url, "websocket connected");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send_binary(&self, payload: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(EcrError::Connection("websocket not connected".into()));
        }
        let tx = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.tx.clone())
            .ok_or_else(|| EcrError::Connection("websocket not connected".into()))?;
        tx.send(Message::Binary(payload.to_vec()))
            .await
            .map_err(|_| EcrError::Connection("websocket session ended".into()))
    }

    /// Send a normal close and wait briefly for the session to finish.
    pub async fn close(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = session.tx.send(Message::Close(Some(frame))).await;
        drop(session.tx);

        let mut task = session.task;
        if tokio::time::timeout(self.cfg.write_timeout(), &mut task).await.is_err() {
            task.abort();
        }
        self.open.store(false, Ordering::Release);
        tracing::info!("websocket closed");
    }
}

#[async_trait]
impl Transport for WsClientEngine {
    fn is_connected(&self) -> bool {
        self.is_open()
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        self.send_binary(payload).await
    }

    async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.cache.wait_take(msg_id, timeout, self.poll).await
    }

    fn default_timeout(&self) -> Duration {
        self.cfg.read_timeout()
    }

    async fn close(&self) {
        WsClientEngine::close(self).await
    }
}

async fn run_session(
    stream: Stream,
    mut out_rx: mpsc::Receiver<Message>,
    cache: Arc<CorrelationCache>,
    open: Arc<AtomicBool>,
    write_timeout: Duration,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            maybe_out = out_rx.recv() => {
                let Some(m) = maybe_out else { break; };
                let closing = matches!(m, Message::Close(_));
                match tokio::time::timeout(write_timeout, ws_tx.send(m)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "websocket write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(timeout_ms = write_timeout.as_millis() as u64, "websocket write timed out");
                        break;
                    }
                }
                if closing {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break; };
                match codec::from_tungstenite(msg) {
                    Inbound::Binary(payload) => {
                        codec::store_reply(&cache, payload);
                    }
                    Inbound::Text(s) => {
                        tracing::debug!(len = s.len(), "ignoring text message");
                    }
                    // tungstenite answers pings itself
                    Inbound::Ping(_) | Inbound::Pong => {}
                    Inbound::Close { code, reason } => {
                        tracing::info!(code, %reason, "terminal closed websocket");
                        break;
                    }
                }
            }
        }
    }

    open.store(false, Ordering::Release);
}
