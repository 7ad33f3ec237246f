//! Top-level facade crate for ecrlink.
//!
//! Re-exports the wire primitives and the SDK runtime so users can depend on a single crate.

pub mod core {
    pub use ecrlink_core::*;
}

pub mod sdk {
    pub use ecrlink_sdk::*;
}

pub use ecrlink_core::{EcrError, ErrorKind, Result};
pub use ecrlink_sdk::{EcrClient, EcrServer};
