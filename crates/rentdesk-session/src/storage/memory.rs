//! In-memory session storage.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use rentdesk_core::{
    AgentKind, ClientId, Exchange, SessionState, SessionStore, StorageError, traits::now,
};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<ClientId, SessionState>>,
    history_limit: Option<usize>,
}

impl MemoryStorage {
    /// Create a new in-memory storage with unbounded history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit: None,
        }
    }

    /// Keep at most `limit` exchanges per session, dropping the oldest first.
    #[must_use]
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Internal(e.to_string())
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn get_or_create(&self, client: &ClientId) -> Result<SessionState, StorageError> {
        if let Some(session) = self.sessions.read().map_err(lock_error)?.get(client) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write().map_err(lock_error)?;
        let session = sessions.entry(client.clone()).or_insert_with(|| {
            tracing::info!(client = %client, "Creating new session");
            SessionState::new()
        });
        Ok(session.clone())
    }

    async fn append_exchange(
        &self,
        client: &ClientId,
        exchange: Exchange,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        let session = sessions.entry(client.clone()).or_default();

        session.last_agent = Some(exchange.agent);
        session.history.push(exchange);
        if let Some(limit) = self.history_limit {
            let excess = session.history.len().saturating_sub(limit);
            if excess > 0 {
                session.history.drain(..excess);
            }
        }
        session.updated_at = now();

        Ok(())
    }

    async fn last_agent(&self, client: &ClientId) -> Result<Option<AgentKind>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(lock_error)?
            .get(client)
            .and_then(|s| s.last_agent))
    }

    async fn reset(&self, client: &ClientId) -> Result<bool, StorageError> {
        Ok(self
            .sessions
            .write()
            .map_err(lock_error)?
            .remove(client)
            .is_some())
    }

    async fn evict_idle(&self, max_idle: Duration) -> Result<Vec<ClientId>, StorageError> {
        let max_idle = i64::try_from(max_idle.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now().saturating_sub(max_idle);

        let mut sessions = self.sessions.write().map_err(lock_error)?;
        let evicted: Vec<ClientId> = sessions
            .iter()
            .filter(|(_, s)| s.updated_at <= cutoff)
            .map(|(client, _)| client.clone())
            .collect();
        for client in &evicted {
            sessions.remove(client);
        }

        Ok(evicted)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.sessions.read().map_err(lock_error)?.len())
    }
}
