//! ecrlink core: wire-level primitives shared by every ECR transport.
//!
//! This crate defines the serial packet framing, the protobuf request/response
//! envelopes, and the error surface used by the SDK runtime. It carries no
//! async runtime or I/O dependencies so the codecs can be exercised in
//! isolation.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Line noise and malformed peers must surface as `EcrError` values, never
//! as a crashed reader thread.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{EcrError, ErrorKind, Result};
