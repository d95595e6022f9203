//! Gemini REST client and wire protocol.

pub mod client;
pub mod protocol;

pub use client::{DEFAULT_MODEL, GeminiClient, GeminiConfig};
