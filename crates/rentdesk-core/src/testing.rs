//! Scripted backend for tests (feature: test-util).

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BackendError, FileHandle, GenerateRequest, GenerativeBackend};

/// A call observed by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Upload { mime_type: String, len: usize },
    Generate(GenerateRequest),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<String, BackendError>>,
    upload_failure: Option<String>,
    calls: Vec<BackendCall>,
}

/// In-memory backend that replays scripted replies and records every call.
///
/// When the reply queue is empty, `generate` echoes `reply to: <first text part line>`.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    /// Create a backend with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful generation reply.
    #[must_use]
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.lock().replies.push_back(Ok(text.into()));
        self
    }

    /// Queue a generation failure.
    #[must_use]
    pub fn with_failure(self, error: BackendError) -> Self {
        self.lock().replies.push_back(Err(error));
        self
    }

    /// Make every upload fail with `message`.
    #[must_use]
    pub fn with_upload_failure(self, message: impl Into<String>) -> Self {
        self.lock().upload_failure = Some(message.into());
        self
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Generation requests so far, in order.
    #[must_use]
    pub fn generate_requests(&self) -> Vec<GenerateRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Generate(request) => Some(request.clone()),
                BackendCall::Upload { .. } => None,
            })
            .collect()
    }

    /// Number of uploads so far.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::Upload { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn upload_file(&self, data: Bytes, mime_type: &str) -> Result<FileHandle, BackendError> {
        let mut script = self.lock();
        script.calls.push(BackendCall::Upload {
            mime_type: mime_type.to_string(),
            len: data.len(),
        });
        if let Some(message) = &script.upload_failure {
            return Err(BackendError::Transport(message.clone()));
        }
        let index = script.calls.len();
        Ok(FileHandle {
            name: format!("files/scripted-{index}"),
            uri: format!("https://files.invalid/scripted-{index}"),
            mime_type: mime_type.to_string(),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError> {
        let mut script = self.lock();
        let fallback = request
            .text()
            .lines()
            .next()
            .map(|line| format!("reply to: {line}"))
            .unwrap_or_default();
        script.calls.push(BackendCall::Generate(request));
        script.replies.pop_front().unwrap_or(Ok(fallback))
    }
}
