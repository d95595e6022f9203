//! Core abstractions for routed chat sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Exchange` / `SessionState` - Per-client conversation records
//! - `AgentKind` - Which agent served a request
//! - `ContextRetriever` - Retrieval hook and combined-context assembly
//! - Storage and generative backend traits

pub mod context;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use context::{
    ContextRetriever, TemplateRetriever, combine_context, render_history, retrieve_context,
};
pub use traits::{
    AgentKind, BackendError, ClientId, ContentPart, Exchange, FileHandle, GenerateRequest,
    GenerativeBackend, SessionState, SessionStore, StorageError,
};
