//! Session manager: routes each chat request to an agent.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use rentdesk_agents::{AgentError, AgentRequest, AgentSet, Attachment};
use rentdesk_core::{
    AgentKind, ClientId, ContextRetriever, Exchange, SessionStore, StorageError, TemplateRetriever,
    combine_context, render_history,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// How the agent is chosen for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Attachment selects Property; otherwise reuse the session's last agent,
    /// falling back to Tenancy for a new session.
    #[default]
    SessionAffinity,
    /// Attachment selects Property; everything else goes to Tenancy.
    AttachmentOnly,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SessionAffinity => "session_affinity",
            Self::AttachmentOnly => "attachment_only",
        })
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session_affinity" | "affinity" => Ok(Self::SessionAffinity),
            "attachment_only" | "attachment" => Ok(Self::AttachmentOnly),
            other => Err(format!("unknown agent selection policy: {other}")),
        }
    }
}

/// Pick the agent for a request.
#[must_use]
pub fn select_agent(
    policy: SelectionPolicy,
    has_attachment: bool,
    last_agent: Option<AgentKind>,
) -> AgentKind {
    if has_attachment {
        return AgentKind::Property;
    }
    match policy {
        SelectionPolicy::SessionAffinity => last_agent.unwrap_or(AgentKind::Tenancy),
        SelectionPolicy::AttachmentOnly => AgentKind::Tenancy,
    }
}

/// An incoming chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub attachment: Option<Attachment>,
}

impl ChatRequest {
    /// A text-only request.
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            attachment: None,
        }
    }

    /// A request with an uploaded file.
    #[must_use]
    pub fn with_file(query: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            query: query.into(),
            attachment: Some(attachment),
        }
    }
}

/// The agent's answer to a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub agent: AgentKind,
    pub response: String,
}

/// Session manager for routing chat requests.
///
/// Requests from the same client are serialized so that history is read and
/// appended in arrival order; different clients proceed concurrently.
pub struct SessionManager<S>
where
    S: SessionStore,
{
    storage: S,
    agents: AgentSet,
    retriever: Arc<dyn ContextRetriever>,
    policy: SelectionPolicy,
    client_locks: Mutex<HashMap<ClientId, Arc<Mutex<()>>>>,
}

impl<S> SessionManager<S>
where
    S: SessionStore,
{
    /// Create a new session manager with the template retriever and session affinity.
    #[must_use]
    pub fn new(storage: S, agents: AgentSet) -> Self {
        Self {
            storage,
            agents,
            retriever: Arc::new(TemplateRetriever),
            policy: SelectionPolicy::default(),
            client_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different context retriever.
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Use a different agent selection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying session store.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Handle one chat request for `client`.
    ///
    /// History is only updated when the agent call succeeds.
    ///
    /// # Errors
    /// Returns error if storage fails or the selected agent fails.
    pub async fn handle_chat(
        &self,
        client: &ClientId,
        request: ChatRequest,
    ) -> Result<ChatReply, ManagerError> {
        let lock = self.client_lock(client).await;
        let _guard = lock.lock().await;

        let session = self.storage.get_or_create(client).await?;
        let history = render_history(&session.history);
        let retrieved = self.retriever.retrieve(&request.query).await;
        let context = combine_context(&history, &retrieved);

        let agent = select_agent(self.policy, request.attachment.is_some(), session.last_agent);
        tracing::info!(
            client = %client,
            agent = %agent,
            history_len = session.history.len(),
            has_file = request.attachment.is_some(),
            "Agent selected"
        );

        // A file-less Property follow-up gets empty bytes and takes the text-only path.
        let attachment = match agent {
            AgentKind::Property => Some(
                request
                    .attachment
                    .unwrap_or_else(|| Attachment::new(Bytes::new(), None)),
            ),
            AgentKind::Tenancy => None,
        };

        let response = self
            .agents
            .dispatch(
                agent,
                AgentRequest {
                    query: request.query.clone(),
                    context,
                    attachment,
                },
            )
            .await
            .inspect_err(|e| {
                tracing::error!(client = %client, agent = %agent, "Chat request failed: {e}");
            })?;

        self.storage
            .append_exchange(client, Exchange::new(request.query, response.clone(), agent))
            .await?;

        Ok(ChatReply { agent, response })
    }

    /// Clear the client's conversation history.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn reset_session(&self, client: &ClientId) -> Result<bool, ManagerError> {
        let lock = self.client_lock(client).await;
        let guard = lock.lock().await;

        let existed = self.storage.reset(client).await?;
        drop(guard);

        // Only the map and `lock` hold the entry when no other request is queued.
        let mut locks = self.client_locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(client);
        }
        drop(locks);

        tracing::info!(client = %client, existed, "Session reset");
        Ok(existed)
    }

    /// Drop sessions idle for at least `max_idle`. Returns how many were evicted.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn evict_idle(&self, max_idle: Duration) -> Result<usize, ManagerError> {
        let evicted = self.storage.evict_idle(max_idle).await?;

        let mut locks = self.client_locks.lock().await;
        for client in &evicted {
            // Keep locks that an in-flight request still holds.
            if locks.get(client).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(client);
            }
        }

        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted idle sessions");
        }
        Ok(evicted.len())
    }

    /// Number of live sessions.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn session_count(&self) -> Result<usize, ManagerError> {
        Ok(self.storage.len().await?)
    }

    async fn client_lock(&self, client: &ClientId) -> Arc<Mutex<()>> {
        let mut locks = self.client_locks.lock().await;
        Arc::clone(
            locks
                .entry(client.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use rentdesk_core::testing::{BackendCall, ScriptedBackend};
    use rentdesk_core::{BackendError, GenerativeBackend, SessionState, retrieve_context};
    use tokio_test::{assert_err, assert_ok};

    fn agents(backend: &Arc<ScriptedBackend>) -> AgentSet {
        AgentSet::with_default_model(Arc::clone(backend) as Arc<dyn GenerativeBackend>)
    }

    fn manager(backend: &Arc<ScriptedBackend>) -> SessionManager<MemoryStorage> {
        SessionManager::new(MemoryStorage::new(), agents(backend))
    }

    fn client() -> ClientId {
        "192.168.1.20".to_string()
    }

    fn image() -> Attachment {
        Attachment::new(Bytes::from_static(b"\xff\xd8\xff"), Some("image/jpeg"))
    }

    /// Memory store whose `last_agent` lookup always fails.
    #[derive(Default)]
    struct SnapshotOnlyStorage(MemoryStorage);

    #[async_trait]
    impl SessionStore for SnapshotOnlyStorage {
        async fn get_or_create(&self, client: &ClientId) -> Result<SessionState, StorageError> {
            self.0.get_or_create(client).await
        }

        async fn append_exchange(
            &self,
            client: &ClientId,
            exchange: Exchange,
        ) -> Result<(), StorageError> {
            self.0.append_exchange(client, exchange).await
        }

        async fn last_agent(&self, _client: &ClientId) -> Result<Option<AgentKind>, StorageError> {
            Err(StorageError::Internal("last_agent lookup".to_string()))
        }

        async fn reset(&self, client: &ClientId) -> Result<bool, StorageError> {
            self.0.reset(client).await
        }

        async fn evict_idle(&self, max_idle: Duration) -> Result<Vec<ClientId>, StorageError> {
            self.0.evict_idle(max_idle).await
        }

        async fn len(&self) -> Result<usize, StorageError> {
            self.0.len().await
        }
    }

    #[test]
    fn test_select_agent_table() {
        use AgentKind::{Property, Tenancy};
        use SelectionPolicy::{AttachmentOnly, SessionAffinity};

        assert_eq!(select_agent(SessionAffinity, false, None), Tenancy);
        assert_eq!(select_agent(SessionAffinity, false, Some(Property)), Property);
        assert_eq!(select_agent(SessionAffinity, false, Some(Tenancy)), Tenancy);
        assert_eq!(select_agent(SessionAffinity, true, Some(Tenancy)), Property);
        assert_eq!(select_agent(AttachmentOnly, false, Some(Property)), Tenancy);
        assert_eq!(select_agent(AttachmentOnly, true, None), Property);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "session_affinity".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::SessionAffinity)
        );
        assert_eq!(
            " Attachment_Only ".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::AttachmentOnly)
        );
        assert!("random".parse::<SelectionPolicy>().is_err());
        assert_eq!(SelectionPolicy::AttachmentOnly.to_string(), "attachment_only");
    }

    #[tokio::test]
    async fn test_first_request_goes_to_tenancy_with_retrieved_context_only() {
        let backend = Arc::new(ScriptedBackend::new().with_reply("Usually 24 hours notice."));
        let manager = manager(&backend);
        let query = "Is my landlord allowed to enter without notice?";

        let reply = assert_ok!(manager.handle_chat(&client(), ChatRequest::text(query)).await);

        assert_eq!(reply.agent, AgentKind::Tenancy);
        assert_eq!(reply.response, "Usually 24 hours notice.");
        let prompt = backend.generate_requests()[0].text();
        assert!(prompt.contains(&format!("Retrieved Context: {}\n", retrieve_context(query))));
        assert!(!prompt.contains("User: "));
    }

    #[tokio::test]
    async fn test_follow_up_includes_history_before_retrieved_context() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_reply("Usually 24 hours notice.")
                .with_reply("Weekends are no different."),
        );
        let manager = manager(&backend);
        let first = "Is my landlord allowed to enter without notice?";
        let second = "What about on weekends?";

        assert_ok!(manager.handle_chat(&client(), ChatRequest::text(first)).await);
        let reply = assert_ok!(manager.handle_chat(&client(), ChatRequest::text(second)).await);

        assert_eq!(reply.agent, AgentKind::Tenancy);
        let expected_context = format!(
            "User: {first}\nAgent: Usually 24 hours notice.\n{}",
            retrieve_context(second)
        );
        let prompt = backend.generate_requests()[1].text();
        assert!(prompt.contains(&format!("Retrieved Context: {expected_context}\n")));
    }

    #[tokio::test]
    async fn test_file_always_selects_property_and_uploads_first() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        assert_ok!(manager.handle_chat(&client(), ChatRequest::text("deposit?")).await);
        let request = ChatRequest::with_file("what is wrong with this wall", image());
        let reply = assert_ok!(manager.handle_chat(&client(), request).await);

        assert_eq!(reply.agent, AgentKind::Property);
        let calls = backend.calls();
        assert!(matches!(calls[1], BackendCall::Upload { .. }));
        let BackendCall::Generate(request) = &calls[2] else {
            panic!("expected generate after upload");
        };
        assert!(request.has_file());
        assert!(request.system_instruction.contains("100 words"));
    }

    #[tokio::test]
    async fn test_property_affinity_follow_up_is_text_only() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        let request = ChatRequest::with_file("wall crack", image());
        assert_ok!(manager.handle_chat(&client(), request).await);
        let request = ChatRequest::text("is it structural?");
        let reply = assert_ok!(manager.handle_chat(&client(), request).await);

        assert_eq!(reply.agent, AgentKind::Property);
        assert_eq!(backend.upload_count(), 1);
        let follow_up = &backend.generate_requests()[1];
        assert!(!follow_up.has_file());
        assert!(follow_up.text().contains("Provide troubleshooting steps based on prior context."));
    }

    #[tokio::test]
    async fn test_selection_reads_the_session_snapshot() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = SessionManager::new(SnapshotOnlyStorage::default(), agents(&backend));

        let request = ChatRequest::with_file("wall crack", image());
        assert_ok!(manager.handle_chat(&client(), request).await);
        let request = ChatRequest::text("is it structural?");
        let reply = assert_ok!(manager.handle_chat(&client(), request).await);

        assert_eq!(reply.agent, AgentKind::Property);
    }

    #[tokio::test]
    async fn test_attachment_only_policy_ignores_history() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend).with_policy(SelectionPolicy::AttachmentOnly);

        let request = ChatRequest::with_file("wall crack", image());
        assert_ok!(manager.handle_chat(&client(), request).await);
        let request = ChatRequest::text("is it structural?");
        let reply = assert_ok!(manager.handle_chat(&client(), request).await);

        assert_eq!(reply.agent, AgentKind::Tenancy);
    }

    #[tokio::test]
    async fn test_failure_leaves_history_untouched() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_reply("first answer")
                .with_failure(BackendError::Transport("backend unavailable".to_string())),
        );
        let manager = manager(&backend);

        assert_ok!(manager.handle_chat(&client(), ChatRequest::text("q1")).await);
        let err = assert_err!(manager.handle_chat(&client(), ChatRequest::text("q2")).await);

        assert!(err.to_string().contains("backend unavailable"));
        let session = assert_ok!(manager.storage().get_or_create(&client()).await);
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].query, "q1");
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_and_not_recorded() {
        let backend = Arc::new(ScriptedBackend::new().with_upload_failure("quota exhausted"));
        let manager = manager(&backend);

        let request = ChatRequest::with_file("wall", image());
        let err = assert_err!(manager.handle_chat(&client(), request).await);

        assert_eq!(err.to_string(), "Image upload failed: request failed: quota exhausted");
        assert!(assert_ok!(manager.storage().get_or_create(&client()).await).is_new());
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_arrival_order() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);
        let id = client();

        let requests =
            (0..8).map(|i| manager.handle_chat(&id, ChatRequest::text(format!("q{i}"))));
        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(Result::is_ok));

        let session = assert_ok!(manager.storage().get_or_create(&id).await);
        let queries: Vec<_> = session.history.iter().map(|e| e.query.clone()).collect();
        let expected: Vec<_> = (0..8).map(|i| format!("q{i}")).collect();
        assert_eq!(queries, expected);

        // Each call saw every earlier exchange.
        let prompts = backend.generate_requests();
        for (i, request) in prompts.iter().enumerate().skip(1) {
            assert!(request.text().contains(&format!("User: q{}\n", i - 1)));
        }
    }

    #[tokio::test]
    async fn test_clients_do_not_share_history() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        let request = ChatRequest::with_file("wall", image());
        assert_ok!(manager.handle_chat(&"10.0.0.1".to_string(), request).await);
        let request = ChatRequest::text("rent increase?");
        let reply = assert_ok!(manager.handle_chat(&"10.0.0.2".to_string(), request).await);

        assert_eq!(reply.agent, AgentKind::Tenancy);
        assert!(!backend.generate_requests()[1].text().contains("User: "));
    }

    #[tokio::test]
    async fn test_reset_starts_fresh() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        let request = ChatRequest::with_file("wall", image());
        assert_ok!(manager.handle_chat(&client(), request).await);
        assert!(assert_ok!(manager.reset_session(&client()).await));

        let reply = assert_ok!(manager.handle_chat(&client(), ChatRequest::text("hello")).await);
        assert_eq!(reply.agent, AgentKind::Tenancy);
    }

    #[tokio::test]
    async fn test_reset_releases_client_lock() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        assert_ok!(manager.handle_chat(&client(), ChatRequest::text("hello")).await);
        assert_eq!(manager.client_locks.lock().await.len(), 1);

        assert!(assert_ok!(manager.reset_session(&client()).await));
        assert!(manager.client_locks.lock().await.is_empty());

        // Resetting an unknown client leaves nothing behind either.
        assert!(!assert_ok!(manager.reset_session(&"10.0.0.9".to_string()).await));
        assert!(manager.client_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_evict_idle_drops_sessions_and_locks() {
        let backend = Arc::new(ScriptedBackend::new());
        let manager = manager(&backend);

        assert_ok!(manager.handle_chat(&client(), ChatRequest::text("hello")).await);
        assert_eq!(assert_ok!(manager.session_count().await), 1);

        assert_eq!(assert_ok!(manager.evict_idle(Duration::from_secs(3600)).await), 0);
        assert_eq!(assert_ok!(manager.evict_idle(Duration::ZERO).await), 1);
        assert_eq!(assert_ok!(manager.session_count().await), 0);
        assert!(manager.client_locks.lock().await.is_empty());
    }
}
