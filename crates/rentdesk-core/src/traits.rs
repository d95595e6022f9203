//! Core traits for session storage and generative backends.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client identity (peer address of the caller).
pub type ClientId = String;

/// The agent that served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Property damage diagnosis, optionally from an image.
    #[serde(rename = "Property Agent")]
    Property,
    /// Tenancy and rental FAQ.
    #[serde(rename = "Tenancy Agent")]
    Tenancy,
}

impl AgentKind {
    /// Display name used on the wire.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Property => "Property Agent",
            Self::Tenancy => "Tenancy Agent",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One recorded query/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// The user's query text.
    pub query: String,
    /// The agent's response text.
    pub response: String,
    /// Agent that produced the response.
    pub agent: AgentKind,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

impl Exchange {
    /// Record a completed exchange, stamped with the current time.
    #[must_use]
    pub fn new(query: impl Into<String>, response: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            agent,
            created_at: now(),
        }
    }
}

/// Per-client conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Exchanges in chronological order.
    pub history: Vec<Exchange>,
    /// Agent that served the most recent exchange.
    pub last_agent: Option<AgentKind>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl SessionState {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        let timestamp = now();
        Self {
            history: Vec::new(),
            last_agent: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Whether the session has no exchanges yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get a snapshot of the client's session, creating an empty one if absent.
    async fn get_or_create(&self, client: &ClientId) -> Result<SessionState, StorageError>;

    /// Append an exchange and mark its agent as the session's last agent.
    async fn append_exchange(
        &self,
        client: &ClientId,
        exchange: Exchange,
    ) -> Result<(), StorageError>;

    /// Agent that served the client's most recent exchange.
    async fn last_agent(&self, client: &ClientId) -> Result<Option<AgentKind>, StorageError>;

    /// Drop the client's session. Returns whether one existed.
    async fn reset(&self, client: &ClientId) -> Result<bool, StorageError>;

    /// Drop sessions not updated within `max_idle`. Returns the evicted identities.
    async fn evict_idle(&self, max_idle: Duration) -> Result<Vec<ClientId>, StorageError>;

    /// Number of live sessions.
    async fn len(&self) -> Result<usize, StorageError>;
}

/// Opaque handle to a file uploaded to the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    /// Backend resource name (e.g. `files/abc123`).
    pub name: String,
    /// URI to reference the file in generation requests.
    pub uri: String,
    /// MIME type recorded by the backend.
    pub mime_type: String,
}

/// One piece of generation input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    File(FileHandle),
}

/// A content-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered input parts.
    pub parts: Vec<ContentPart>,
    /// System instruction sent alongside the parts.
    pub system_instruction: String,
}

impl GenerateRequest {
    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::File(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether any part references an uploaded file.
    #[must_use]
    pub fn has_file(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, ContentPart::File(_)))
    }
}

/// Generative backend error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("rate limit exceeded (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },
    #[error("backend returned error status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode backend response: {0}")]
    Decode(String),
    #[error("prompt was blocked: {0}")]
    Blocked(String),
    #[error("response contains no text")]
    EmptyResponse,
}

/// Trait for generative model backends.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Upload a file, returning a handle usable in [`ContentPart::File`].
    async fn upload_file(&self, data: Bytes, mime_type: &str) -> Result<FileHandle, BackendError>;

    /// Generate text for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_agent_kind_wire_names() {
        let json = assert_ok!(serde_json::to_string(&AgentKind::Property));
        assert_eq!(json, "\"Property Agent\"");
        let parsed: AgentKind = assert_ok!(serde_json::from_str("\"Tenancy Agent\""));
        assert_eq!(parsed, AgentKind::Tenancy);
        assert_eq!(AgentKind::Tenancy.to_string(), "Tenancy Agent");
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = SessionState::new();
        assert!(session.is_new());
        assert_eq!(session.last_agent, None);
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn test_generate_request_text_skips_files() {
        let request = GenerateRequest {
            model: "m".to_string(),
            parts: vec![
                ContentPart::Text("first".to_string()),
                ContentPart::File(FileHandle {
                    name: "files/1".to_string(),
                    uri: "https://example.invalid/files/1".to_string(),
                    mime_type: "image/png".to_string(),
                }),
                ContentPart::Text("second".to_string()),
            ],
            system_instruction: String::new(),
        };
        assert_eq!(request.text(), "first\nsecond");
        assert!(request.has_file());
    }
}
