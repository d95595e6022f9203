//! Transport layer for the chat router.
//!
//! Provides:
//! - Wire protocol (JSON bodies for `/chat`, `/reset`, errors)
//! - HTTP transport (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod error;
#[cfg(feature = "http")]
pub mod http;

pub use protocol::{ChatResponse, ErrorResponse, ResetResponse};
