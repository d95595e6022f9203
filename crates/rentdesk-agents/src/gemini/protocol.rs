//! Gemini REST wire types.

use rentdesk_core::{BackendError, ContentPart, FileHandle, GenerateRequest};
use serde::{Deserialize, Serialize};

/// `models/{model}:generateContent` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
}

/// A single turn of content.
#[derive(Debug, Serialize)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<RequestPart>,
}

/// Request part: inline text or a reference to an uploaded file.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<RequestPart>,
}

impl From<GenerateRequest> for GenerateContentRequest {
    fn from(request: GenerateRequest) -> Self {
        let parts = request
            .parts
            .into_iter()
            .map(|part| match part {
                ContentPart::Text(text) => RequestPart::Text { text },
                ContentPart::File(handle) => RequestPart::FileData {
                    file_data: FileData {
                        mime_type: handle.mime_type,
                        file_uri: handle.uri,
                    },
                },
            })
            .collect();

        let system_instruction =
            (!request.system_instruction.is_empty()).then(|| SystemInstruction {
                parts: vec![RequestPart::Text {
                    text: request.system_instruction,
                }],
            });

        Self {
            contents: vec![Content { role: "user", parts }],
            system_instruction,
        }
    }
}

/// `generateContent` response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate.
    ///
    /// # Errors
    /// Returns error if the prompt was blocked or no text came back.
    pub fn into_text(self) -> Result<String, BackendError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(BackendError::Blocked(reason));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(BackendError::EmptyResponse)?;

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_default();
            return if matches!(reason.as_str(), "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST") {
                Err(BackendError::Blocked(reason))
            } else {
                Err(BackendError::EmptyResponse)
            };
        }

        Ok(text)
    }
}

/// Media upload response body.
#[derive(Debug, Deserialize)]
pub struct UploadFileResponse {
    pub file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl UploadedFile {
    /// Convert into a handle, falling back to the MIME type sent on upload.
    #[must_use]
    pub fn into_handle(self, sent_mime_type: &str) -> FileHandle {
        FileHandle {
            name: self.name,
            uri: self.uri,
            mime_type: self.mime_type.unwrap_or_else(|| sent_mime_type.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            model: "gemini-2.0-flash".to_string(),
            parts: vec![
                ContentPart::Text("look at this".to_string()),
                ContentPart::File(FileHandle {
                    name: "files/abc".to_string(),
                    uri: "https://example.invalid/files/abc".to_string(),
                    mime_type: "image/png".to_string(),
                }),
            ],
            system_instruction: "be brief".to_string(),
        };

        let json = serde_json::to_value(GenerateContentRequest::from(request)).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "look at this");
        assert_eq!(
            json["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://example.invalid/files/abc"
        );
        assert_eq!(json["contents"][0]["parts"][1]["fileData"]["mimeType"], "image/png");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_empty_system_instruction_is_omitted() {
        let request = GenerateRequest {
            model: "m".to_string(),
            parts: vec![ContentPart::Text("hi".to_string())],
            system_instruction: String::new(),
        };
        let json = serde_json::to_value(GenerateContentRequest::from(request)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_joins_text_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"tenant."}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "Hello, tenant.");
    }

    #[test]
    fn test_response_blocked_prompt() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = response.into_text().unwrap_err();
        assert!(matches!(err, BackendError::Blocked(reason) if reason == "SAFETY"));
    }

    #[test]
    fn test_response_safety_finish_without_text() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(matches!(response.into_text(), Err(BackendError::Blocked(_))));
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(response.into_text(), Err(BackendError::EmptyResponse)));
    }

    #[test]
    fn test_upload_response_falls_back_to_sent_mime() {
        let response: UploadFileResponse =
            serde_json::from_str(r#"{"file":{"name":"files/x","uri":"https://u/x"}}"#).unwrap();
        let handle = response.file.into_handle("image/webp");
        assert_eq!(handle.mime_type, "image/webp");
        assert_eq!(handle.name, "files/x");
    }
}
