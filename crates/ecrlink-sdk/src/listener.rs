//! Callback interfaces exposed to applications.
//!
//! At most one listener of each kind is registered at a time; registering a
//! new one replaces the previous.

use ecrlink_core::error::EcrError;

use crate::server::registry::Terminal;

/// Terminal lifecycle notifications from the WebSocket server.
pub trait ServerListener: Send + Sync {
    fn on_connect(&self, terminal: &Terminal);

    /// `remote` is true when the terminal (not this side) ended the socket.
    fn on_disconnect(&self, terminal: &Terminal, code: u16, reason: &str, remote: bool);
}

/// Outcome routing for `async_execute`.
pub trait ResponseCallback<T>: Send + Sync {
    fn on_response(&self, response: T);

    /// No reply within the wait; the error is always a read timeout.
    fn on_timeout(&self, error: EcrError);

    fn on_error(&self, error: EcrError);
}

/// Decides whether an unknown terminal may connect.
pub trait PairingListener: Send + Sync {
    fn confirm(&self, terminal: &Terminal) -> bool;
}
