//! Wire protocol for client-server communication.

use rentdesk_core::AgentKind;
use rentdesk_session::ChatReply;
use serde::{Deserialize, Serialize};

/// Successful `/chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// `"Property Agent"` or `"Tenancy Agent"`.
    pub agent: AgentKind,
    /// Model text.
    pub response: String,
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        Self {
            agent: reply.agent,
            response: reply.response,
        }
    }
}

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// `/reset` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub message: String,
}

impl ResetResponse {
    /// The confirmation sent after clearing a session.
    #[must_use]
    pub fn cleared() -> Self {
        Self {
            message: "Conversation history cleared.".to_string(),
        }
    }
}
