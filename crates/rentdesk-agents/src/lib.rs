//! Gemini-backed property and tenancy agents.
//!
//! Provides:
//! - Gemini REST client implementing `GenerativeBackend`
//! - `GenerativeAgent` parameterized by a `PromptStrategy`
//! - The property and tenancy prompt strategies and the `AgentSet` dispatcher

pub mod agent;
pub mod gemini;
pub mod prompts;

pub use agent::{
    AgentError, AgentRequest, AgentSet, Attachment, AttachmentPolicy, GenerativeAgent,
    PromptStrategy,
};
pub use gemini::{DEFAULT_MODEL, GeminiClient, GeminiConfig};
pub use prompts::{PropertyPrompt, TenancyPrompt};
