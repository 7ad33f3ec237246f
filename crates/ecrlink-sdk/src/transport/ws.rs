//! WebSocket server session (terminal dials the ECR).
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS, peer address and `?mac=` become the `Terminal`
//! - Optional pairing gate before the terminal is registered
//! - Register/unregister in the terminal registry and notify the listener
//! - Binary replies -> correlation cache; ping/pong liveness

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::pairing::PAIRING_REJECTED;
use crate::server::registry::{Connection, Terminal};
use crate::server::state::ServerState;
use crate::transport::codec::{self, Inbound, ABNORMAL_CLOSE};

const NORMAL_CLOSE: u16 = 1000;
const INTERNAL_ERROR_CLOSE: u16 = 1011;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub mac: Option<String>,
}

/// How the session ended, reported to the listener.
#[derive(Debug)]
struct Closure {
    code: u16,
    reason: String,
    remote: bool,
}

pub async fn ws_upgrade(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let terminal = Terminal::new(addr, q.mac);
        run_session(state, terminal, socket).await;
    })
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}

async fn admit(state: &ServerState, terminal: &Terminal) -> Result<(), Message> {
    let Some(gate) = state.pairing() else {
        return Ok(());
    };
    let candidate = terminal.clone();
    match tokio::task::spawn_blocking(move || gate.admit(&candidate)).await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(close_message(PAIRING_REJECTED, "pairing rejected")),
        Ok(Err(e)) => {
            tracing::warn!(terminal = %terminal.id, error = %e, "pairing check failed");
            Err(close_message(INTERNAL_ERROR_CLOSE, "pairing unavailable"))
        }
        Err(e) => {
            tracing::warn!(terminal = %terminal.id, error = %e, "pairing task failed");
            Err(close_message(INTERNAL_ERROR_CLOSE, "pairing unavailable"))
        }
    }
}

async fn run_session(state: ServerState, terminal: Terminal, mut socket: WebSocket) {
    if let Err(close) = admit(&state, &terminal).await {
        let _ = socket.send(close).await;
        return;
    }

    // ---- outbound channel, registered so callers can reach this terminal
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(1024);
    state.registry().insert(terminal.clone(), Connection { tx: out_tx.clone() });
    tracing::info!(terminal = %terminal.id, mac = ?terminal.mac, "terminal connected");
    state.notify_connect(&terminal);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut ping_tick = tokio::time::interval(state.cfg().socket.ping_interval());
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut outcome = Closure {
        code: ABNORMAL_CLOSE,
        reason: String::new(),
        remote: true,
    };

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                let Some(m) = maybe_out else { break; };
                let local_close = match &m {
                    Message::Close(frame) => Some(match frame {
                        Some(f) => (f.code, f.reason.to_string()),
                        None => (NORMAL_CLOSE, String::new()),
                    }),
                    _ => None,
                };
                if ws_tx.send(m).await.is_err() {
                    break;
                }
                if let Some((code, reason)) = local_close {
                    outcome = Closure { code, reason, remote: false };
                    break;
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break; };
                match codec::from_axum(msg) {
                    Inbound::Binary(payload) => {
                        codec::store_reply(state.cache(), payload);
                    }
                    Inbound::Text(s) => {
                        tracing::debug!(terminal = %terminal.id, len = s.len(), "ignoring text message");
                    }
                    // axum answers pings itself
                    Inbound::Ping(_) | Inbound::Pong => {}
                    Inbound::Close { code, reason } => {
                        outcome = Closure { code, reason, remote: true };
                        break;
                    }
                }
            }

            // ping
            _ = ping_tick.tick() => {
                let _ = out_tx.try_send(Message::Ping(Vec::new()));
            }
        }
    }

    state.registry().remove(&terminal.id);
    tracing::info!(
        terminal = %terminal.id,
        code = outcome.code,
        reason = %outcome.reason,
        remote = outcome.remote,
        "terminal disconnected"
    );
    state.notify_disconnect(&terminal, outcome.code, &outcome.reason, outcome.remote);
}
