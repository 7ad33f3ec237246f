//! Axum router wiring (HTTP -> WS upgrade).
//!
//! Terminals dial the root path, optionally with `?mac=..`.

use axum::{routing::get, Router};

use crate::{server::state::ServerState, transport};

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(transport::ws::ws_upgrade))
        .with_state(state)
}
