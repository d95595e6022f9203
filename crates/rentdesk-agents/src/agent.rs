//! Generative agents and dispatch.

use std::sync::Arc;

use bytes::Bytes;
use rentdesk_core::{
    AgentKind, BackendError, ContentPart, FileHandle, GenerateRequest, GenerativeBackend,
};
use thiserror::Error;

use crate::gemini::DEFAULT_MODEL;
use crate::prompts::{PropertyPrompt, TenancyPrompt};

/// MIME type assumed when an upload does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Whether an agent sends attachments to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPolicy {
    /// Upload non-empty attachments and reference them in the request.
    Upload,
    /// Never upload; the agent is text only.
    Ignore,
}

/// Role-specific prompt construction.
pub trait PromptStrategy: Send + Sync {
    /// Which agent this strategy implements.
    fn kind(&self) -> AgentKind;

    /// System instruction sent with every generation call.
    fn system_instruction(&self) -> &str;

    /// How attachments are handled.
    fn attachment_policy(&self) -> AttachmentPolicy;

    /// Build the user prompt. `has_attachment` is true only when a file was uploaded.
    fn build_prompt(&self, query: &str, context: &str, has_attachment: bool) -> String;
}

/// An uploaded file from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: Bytes,
    pub mime_type: String,
}

impl Attachment {
    /// Create an attachment, defaulting the MIME type to `image/jpeg`.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, mime_type: Option<&str>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string(),
        }
    }

    /// Whether there are no bytes to upload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Input to a single agent call.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub query: String,
    /// Combined history and retrieved context.
    pub context: String,
    pub attachment: Option<Attachment>,
}

/// Agent error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Image upload failed: {0}")]
    Upload(#[source] BackendError),
    #[error("{agent} generation failed: {source}")]
    Generation { agent: AgentKind, source: BackendError },
}

/// A prompt strategy bound to a generative backend and model.
pub struct GenerativeAgent {
    backend: Arc<dyn GenerativeBackend>,
    strategy: Box<dyn PromptStrategy>,
    model: String,
}

impl GenerativeAgent {
    /// Create an agent.
    #[must_use]
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        strategy: impl PromptStrategy + 'static,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            strategy: Box::new(strategy),
            model: model.into(),
        }
    }

    /// Which agent this is.
    #[must_use]
    pub fn kind(&self) -> AgentKind {
        self.strategy.kind()
    }

    /// Model identifier used for generation.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one prompt/generation round.
    ///
    /// An empty attachment takes the text-only path and is never uploaded.
    ///
    /// # Errors
    /// Returns error if the upload or the generation call fails.
    pub async fn run(&self, request: AgentRequest) -> Result<String, AgentError> {
        let kind = self.kind();
        let attachment = match self.strategy.attachment_policy() {
            AttachmentPolicy::Upload => request.attachment.filter(|a| !a.is_empty()),
            AttachmentPolicy::Ignore => None,
        };

        let file = match attachment {
            Some(attachment) => Some(self.upload(attachment).await?),
            None => None,
        };

        let prompt = self
            .strategy
            .build_prompt(&request.query, &request.context, file.is_some());
        tracing::debug!(agent = %kind, prompt = %prompt, "Prompt constructed");

        let mut parts = vec![ContentPart::Text(prompt)];
        if let Some(file) = file {
            parts.push(ContentPart::File(file));
        }

        tracing::info!(agent = %kind, model = %self.model, "Generating response");
        let text = self
            .backend
            .generate(GenerateRequest {
                model: self.model.clone(),
                parts,
                system_instruction: self.strategy.system_instruction().to_string(),
            })
            .await
            .map_err(|source| {
                tracing::error!(agent = %kind, "Generation failed: {source}");
                AgentError::Generation { agent: kind, source }
            })?;

        tracing::info!(agent = %kind, "Response generated");
        Ok(text)
    }

    async fn upload(&self, attachment: Attachment) -> Result<FileHandle, AgentError> {
        tracing::info!(
            mime_type = %attachment.mime_type,
            size = attachment.data.len(),
            "Uploading image"
        );
        let handle = self
            .backend
            .upload_file(attachment.data, &attachment.mime_type)
            .await
            .map_err(|e| {
                tracing::error!("Image upload failed: {e}");
                AgentError::Upload(e)
            })?;
        tracing::info!(file = %handle.name, "Image uploaded");
        Ok(handle)
    }
}

/// One agent of each kind over a shared backend.
pub struct AgentSet {
    property: GenerativeAgent,
    tenancy: GenerativeAgent,
}

impl AgentSet {
    /// Build the property and tenancy agents on `backend` using `model`.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerativeBackend>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            property: GenerativeAgent::new(Arc::clone(&backend), PropertyPrompt, model.clone()),
            tenancy: GenerativeAgent::new(backend, TenancyPrompt, model),
        }
    }

    /// Build both agents with the default model.
    #[must_use]
    pub fn with_default_model(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self::new(backend, DEFAULT_MODEL)
    }

    /// The agent for `kind`.
    #[must_use]
    pub const fn get(&self, kind: AgentKind) -> &GenerativeAgent {
        match kind {
            AgentKind::Property => &self.property,
            AgentKind::Tenancy => &self.tenancy,
        }
    }

    /// Run the agent for `kind`.
    ///
    /// # Errors
    /// Returns the agent's upload or generation error.
    pub async fn dispatch(
        &self,
        kind: AgentKind,
        request: AgentRequest,
    ) -> Result<String, AgentError> {
        self.get(kind).run(request).await
    }

    /// Diagnose a property issue, from an image when `image_bytes` is non-empty.
    ///
    /// # Errors
    /// Returns error if the upload or the generation call fails.
    pub async fn process_property_issue(
        &self,
        query: &str,
        image_bytes: Bytes,
        context: &str,
        mime_type: &str,
    ) -> Result<String, AgentError> {
        self.property
            .run(AgentRequest {
                query: query.to_string(),
                context: context.to_string(),
                attachment: Some(Attachment::new(image_bytes, Some(mime_type))),
            })
            .await
    }

    /// Answer a tenancy question.
    ///
    /// # Errors
    /// Returns error if the generation call fails.
    pub async fn process_tenancy_query(
        &self,
        query: &str,
        context: &str,
    ) -> Result<String, AgentError> {
        self.tenancy
            .run(AgentRequest {
                query: query.to_string(),
                context: context.to_string(),
                attachment: None,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentdesk_core::testing::{BackendCall, ScriptedBackend};

    fn agents(backend: &Arc<ScriptedBackend>) -> AgentSet {
        AgentSet::with_default_model(Arc::clone(backend) as Arc<dyn GenerativeBackend>)
    }

    #[tokio::test]
    async fn test_property_empty_image_never_uploads() {
        let backend = Arc::new(ScriptedBackend::new().with_reply("Check the seal."));
        let text = agents(&backend)
            .process_property_issue("still leaking", Bytes::new(), "ctx", "image/png")
            .await
            .unwrap();

        assert_eq!(text, "Check the seal.");
        assert_eq!(backend.upload_count(), 0);
        let requests = backend.generate_requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].has_file());
        let prompt = requests[0].text();
        assert!(prompt.contains("Provide troubleshooting steps based on prior context."));
    }

    #[tokio::test]
    async fn test_property_image_uploads_before_generating() {
        let backend = Arc::new(ScriptedBackend::new().with_reply("Damp patch; ventilate."));
        agents(&backend)
            .process_property_issue(
                "what is wrong with this wall",
                Bytes::from_static(b"jpeg"),
                "ctx",
                "image/png",
            )
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            BackendCall::Upload {
                mime_type: "image/png".to_string(),
                len: 4
            }
        );
        let BackendCall::Generate(request) = &calls[1] else {
            panic!("expected generate after upload");
        };
        assert!(request.has_file());
        assert_eq!(request.model, DEFAULT_MODEL);
        assert!(request.system_instruction.contains("100 words"));
        assert!(request.text().contains("Analyze the provided image"));
    }

    #[tokio::test]
    async fn test_upload_failure_skips_generation() {
        let backend = Arc::new(ScriptedBackend::new().with_upload_failure("connection reset"));
        let err = agents(&backend)
            .process_property_issue("q", Bytes::from_static(b"img"), "ctx", "image/jpeg")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Upload(_)));
        assert_eq!(err.to_string(), "Image upload failed: request failed: connection reset");
        assert!(backend.generate_requests().is_empty());
    }

    #[tokio::test]
    async fn test_tenancy_generation_failure_message() {
        let backend = Arc::new(ScriptedBackend::new().with_failure(BackendError::EmptyResponse));
        let err = agents(&backend).process_tenancy_query("q", "ctx").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Tenancy Agent generation failed: response contains no text"
        );
    }

    #[tokio::test]
    async fn test_tenancy_ignores_attachments() {
        let backend = Arc::new(ScriptedBackend::new());
        let request = AgentRequest {
            query: "deposit?".to_string(),
            context: "ctx".to_string(),
            attachment: Some(Attachment::new(Bytes::from_static(b"img"), None)),
        };
        tokio_test::assert_ok!(agents(&backend).dispatch(AgentKind::Tenancy, request).await);
        assert_eq!(backend.upload_count(), 0);
    }

    #[test]
    fn test_attachment_defaults_mime_type() {
        assert_eq!(Attachment::new(Bytes::new(), None).mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(Attachment::new(Bytes::new(), Some("")).mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(Attachment::new(Bytes::new(), Some("image/gif")).mime_type, "image/gif");
    }

    #[test]
    fn test_agent_set_kinds() {
        let backend = Arc::new(ScriptedBackend::new());
        let set = agents(&backend);
        assert_eq!(set.get(AgentKind::Property).kind(), AgentKind::Property);
        assert_eq!(set.get(AgentKind::Tenancy).kind(), AgentKind::Tenancy);
    }
}
