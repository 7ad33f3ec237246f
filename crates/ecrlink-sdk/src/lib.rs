//! ecrlink SDK runtime.
//!
//! Wires the serial and WebSocket transport engines, the correlation cache
//! and the typed request layer into two facades:
//! - [`EcrClient`]: the ECR dials one terminal over serial or WebSocket;
//! - [`EcrServer`]: terminals dial the ECR's WebSocket server.

pub mod cache;
pub mod client;
pub mod config;
pub mod exchange;
pub mod listener;
pub mod logging;
pub mod pairing;
pub mod request;
pub mod server;
pub mod store;
pub mod transport;

pub use client::EcrClient;
pub use listener::{PairingListener, ResponseCallback, ServerListener};
pub use request::{
    CloseRequest, CloseResponse, EcrRequest, PurchaseRequest, PurchaseResponse, QueryRequest,
    QueryResponse, RefundRequest, RefundResponse, Reply, RequestOptions,
};
pub use server::{EcrServer, Terminal};
