//! WebSocket server facade: terminals dial in, the ECR addresses them by id.

pub mod registry;
pub mod router;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::envelope::EnvelopeHeader;

use crate::config::SdkConfig;
use crate::exchange;
use crate::listener::{ResponseCallback, ServerListener};
use crate::pairing::PairingGate;
use crate::request::{EcrRequest, Reply};
use crate::transport::Transport;

pub use registry::{Connection, Terminal, TerminalRegistry};
pub use state::ServerState;

const GOING_AWAY: u16 = 1001;
const STOP_GRACE: Duration = Duration::from_secs(2);

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

pub struct EcrServer {
    state: ServerState,
    header: EnvelopeHeader,
    running: Mutex<Option<Running>>,
}

impl EcrServer {
    pub fn new(cfg: SdkConfig) -> Result<Self> {
        cfg.validate()?;
        let header = cfg.envelope_header();
        Ok(Self {
            state: ServerState::new(cfg),
            header,
            running: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn set_listener(&self, listener: Arc<dyn ServerListener>) {
        self.state.set_listener(Some(listener));
    }

    pub fn set_pairing(&self, gate: PairingGate) {
        self.state.set_pairing(Some(Arc::new(gate)));
    }

    /// Bind `0.0.0.0:server_port` and serve. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(r) = self.running.lock().as_ref() {
            return Err(EcrError::Connection(format!("server already listening on {}", r.addr)));
        }

        let port = self.state.cfg().socket.server_port;
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| EcrError::Connection(format!("bind port {port} failed: {e}")))?;
        let addr = listener.local_addr()?;

        let app = router::build_router(self.state.clone());
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
            if let Err(e) = served {
                tracing::warn!(error = %e, "ecr server stopped with error");
            }
        });

        let mut running = self.running.lock();
        if running.is_some() {
            task.abort();
            return Err(EcrError::Connection("server already listening".into()));
        }
        *running = Some(Running { addr, shutdown, task });
        tracing::info!(%addr, "ecr server listening");
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    /// Close every terminal and stop accepting. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        for t in self.state.registry().list() {
            if let Some(conn) = self.state.registry().connection(&t.id) {
                let _ = conn.tx.try_send(Message::Close(Some(CloseFrame {
                    code: GOING_AWAY,
                    reason: "server stopping".into(),
                })));
            }
        }
        let _ = running.shutdown.send(());
        let mut task = running.task;
        if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        tracing::info!(addr = %running.addr, "ecr server stopped");
    }

    pub fn terminals(&self) -> Vec<Terminal> {
        self.state.registry().list()
    }

    pub async fn send(&self, terminal_id: &str, payload: Bytes) -> Result<()> {
        self.state.send_to(terminal_id, payload).await
    }

    pub async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.state.receive(msg_id, timeout).await
    }

    /// A [`Transport`] view of one terminal.
    pub fn link(&self, terminal_id: &str) -> TerminalLink {
        TerminalLink {
            state: self.state.clone(),
            terminal_id: terminal_id.to_string(),
        }
    }

    pub async fn execute<R: EcrRequest>(
        &self,
        terminal_id: &str,
        request: &R,
    ) -> Result<Option<Reply<R::Biz>>> {
        if self.state.registry().get(terminal_id).is_none() {
            return Err(EcrError::ProtocolViolation(format!("unknown terminal {terminal_id}")));
        }
        let link = self.link(terminal_id);
        exchange::execute(&link, &self.header, request).await
    }

    pub fn async_execute<R>(
        &self,
        terminal_id: &str,
        request: R,
        callback: Box<dyn ResponseCallback<Reply<R::Biz>>>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: EcrRequest + 'static,
    {
        exchange::spawn_execute(
            Arc::new(self.link(terminal_id)),
            self.header.clone(),
            request,
            callback,
        )
    }

    /// Close one terminal's socket with a normal close.
    pub async fn disconnect(&self, terminal_id: &str) -> Result<()> {
        let conn = self
            .state
            .registry()
            .connection(terminal_id)
            .ok_or_else(|| EcrError::ProtocolViolation(format!("unknown terminal {terminal_id}")))?;
        conn.tx
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "".into(),
            })))
            .await
            .map_err(|_| EcrError::ProtocolViolation(format!("terminal {terminal_id} is closed")))
    }
}

/// One terminal addressed through the server.
#[derive(Clone)]
pub struct TerminalLink {
    state: ServerState,
    terminal_id: String,
}

impl TerminalLink {
    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }
}

#[async_trait]
impl Transport for TerminalLink {
    fn is_connected(&self) -> bool {
        self.state
            .registry()
            .connection(&self.terminal_id)
            .is_some_and(|c| c.is_open())
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        self.state.send_to(&self.terminal_id, payload).await
    }

    async fn receive(&self, msg_id: &str, timeout: Duration) -> Result<Bytes> {
        self.state.receive(msg_id, timeout).await
    }

    fn default_timeout(&self) -> Duration {
        self.state.cfg().socket.read_timeout()
    }

    /// Closing a terminal link closes that terminal's socket.
    async fn close(&self) {
        if let Some(conn) = self.state.registry().connection(&self.terminal_id) {
            let _ = conn
                .tx
                .send(Message::Close(Some(CloseFrame {
                    code: 1000,
                    reason: "".into(),
                })))
                .await;
        }
    }
}
