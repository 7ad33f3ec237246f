//! Admission of terminals to the WebSocket server.

use std::sync::Arc;

use ecrlink_core::error::Result;

use crate::listener::PairingListener;
use crate::server::registry::Terminal;
use crate::store::DeviceStore;

/// Close code sent to a terminal whose pairing was refused.
pub const PAIRING_REJECTED: u16 = 4001;

/// Known devices pass; unknown ones are put to the listener and remembered
/// when accepted.
pub struct PairingGate {
    store: Arc<DeviceStore>,
    listener: Arc<dyn PairingListener>,
}

impl PairingGate {
    pub fn new(store: Arc<DeviceStore>, listener: Arc<dyn PairingListener>) -> Self {
        Self { store, listener }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    /// May block on the listener and on disk.
    pub fn admit(&self, terminal: &Terminal) -> Result<bool> {
        let device_id = terminal.device_id();
        if self.store.contains(&device_id) {
            return Ok(true);
        }
        if !self.listener.confirm(terminal) {
            tracing::info!(terminal = %terminal.id, device = %device_id, "pairing refused");
            return Ok(false);
        }
        self.store.add(&device_id)?;
        tracing::info!(terminal = %terminal.id, device = %device_id, "terminal paired");
        Ok(true)
    }
}
