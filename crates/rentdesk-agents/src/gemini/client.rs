//! Gemini REST client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rentdesk_core::{BackendError, FileHandle, GenerateRequest, GenerativeBackend};
use reqwest::header::CONTENT_TYPE;

use super::protocol::{GenerateContentRequest, GenerateContentResponse, UploadFileResponse};

/// Default generation model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_UPLOAD_BASE_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Base URL for `models/*:generateContent`.
    pub base_url: String,
    /// Base URL for media uploads.
    pub upload_base_url: String,
    /// Overall per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl GeminiConfig {
    /// Settings for the public Gemini endpoints.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE_URL.to_string(),
            upload_base_url: GEMINI_UPLOAD_BASE_URL.to_string(),
            timeout: None,
        }
    }

    /// Point both endpoints at `base_url` (used against mock servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.upload_base_url.clone_from(&base_url);
        self.base_url = base_url;
        self
    }
}

/// Gemini client implementing [`GenerativeBackend`].
///
/// Holds one pooled `reqwest::Client` for both uploads and generation.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(transport_error)?;
        Ok(Self { http, config })
    }

    async fn read_success(response: reqwest::Response) -> Result<String, BackendError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(transport_error)?;

        if status.is_success() {
            return Ok(body);
        }

        let status = status.as_u16();
        tracing::error!(status, body = %body, "Gemini API returned error status");
        if status == 429 {
            Err(BackendError::RateLimited { status, body })
        } else {
            Err(BackendError::Status { status, body })
        }
    }
}

/// Request URLs are stripped so error messages never carry endpoint details.
fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.without_url().to_string())
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn upload_file(&self, data: Bytes, mime_type: &str) -> Result<FileHandle, BackendError> {
        let url = format!("{}/files?uploadType=media", self.config.upload_base_url);
        tracing::debug!(mime_type, size = data.len(), "Uploading file to Gemini");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(CONTENT_TYPE, mime_type)
            .header("X-Goog-Upload-Protocol", "raw")
            .body(data)
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_success(response).await?;
        let parsed: UploadFileResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Decode(format!("{e} - body: {body}")))?;

        let handle = parsed.file.into_handle(mime_type);
        tracing::debug!(name = %handle.name, "File uploaded");
        Ok(handle)
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.config.base_url, request.model);
        tracing::debug!(
            model = %request.model,
            parts = request.parts.len(),
            has_file = request.has_file(),
            "Calling Gemini generateContent"
        );

        let body = GenerateContentRequest::from(request);
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_success(response).await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Decode(format!("{e} - body: {body}")))?;

        let text = parsed.into_text()?;
        tracing::debug!(response_len = text.len(), "Gemini response received");
        Ok(text)
    }
}
