//! Live terminal connections keyed by `ip:port`.
//!
//! Each entry pairs the `Terminal` identity with the sender half of its
//! session's outbound channel; listing keeps connection order.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// One connected terminal as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    /// `ip:port` of the peer socket; unique among live connections.
    pub id: String,
    pub ip: IpAddr,
    pub port: u16,
    pub mac: Option<String>,
}

impl Terminal {
    pub fn new(addr: SocketAddr, mac: Option<String>) -> Self {
        Self {
            id: addr.to_string(),
            ip: addr.ip(),
            port: addr.port(),
            mac: mac.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Identity used for pairing: the MAC when known, else the IP.
    pub fn device_id(&self) -> String {
        match &self.mac {
            Some(mac) => mac.to_ascii_uppercase(),
            None => self.ip.to_string(),
        }
    }
}

/// One terminal session's outbound queue sender.
#[derive(Clone)]
pub struct Connection {
    pub tx: mpsc::Sender<Message>,
}

impl Connection {
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Clone)]
struct Entry {
    terminal: Terminal,
    conn: Connection,
    created_seq: u64,
}

/// Live terminals keyed by `Terminal::id`. Written by session tasks, read by
/// any caller.
pub struct TerminalRegistry {
    entries: DashMap<String, Entry>,
    seq: AtomicU64,
}

impl Default for TerminalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, terminal: Terminal, conn: Connection) {
        let created_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = terminal.id.clone();
        if let Some(prev) = self.entries.insert(
            id,
            Entry {
                terminal,
                conn,
                created_seq,
            },
        ) {
            tracing::warn!(terminal = %prev.terminal.id, "replaced stale terminal entry");
        }
    }

    pub fn remove(&self, id: &str) -> Option<Terminal> {
        self.entries.remove(id).map(|(_, e)| e.terminal)
    }

    pub fn connection(&self, id: &str) -> Option<Connection> {
        self.entries.get(id).map(|e| e.value().conn.clone())
    }

    pub fn get(&self, id: &str) -> Option<Terminal> {
        self.entries.get(id).map(|e| e.value().terminal.clone())
    }

    /// Snapshot in connection order.
    pub fn list(&self) -> Vec<Terminal> {
        let mut all: Vec<(u64, Terminal)> = self
            .entries
            .iter()
            .map(|e| (e.value().created_seq, e.value().terminal.clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, t)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
