//! Prompt strategies for the property and tenancy agents.

use rentdesk_core::AgentKind;

use crate::agent::{AttachmentPolicy, PromptStrategy};

const PROPERTY_SYSTEM_INSTRUCTION: &str = "You are a property damage resolution agent. \
Analyse the property issue and provide a practical solution. \
Limit the response to 100 words; a shorter answer is fine but never exceed 100 words.";

const TENANCY_SYSTEM_INSTRUCTION: &str = "You are a property tenancy FAQ agent. \
Provide a clear solution to the tenant's question. \
Limit the response to 100 words; a shorter answer is fine but never exceed 100 words.";

/// Property damage diagnosis. Uploads an attached image when present.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropertyPrompt;

impl PromptStrategy for PropertyPrompt {
    fn kind(&self) -> AgentKind {
        AgentKind::Property
    }

    fn system_instruction(&self) -> &str {
        PROPERTY_SYSTEM_INSTRUCTION
    }

    fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy::Upload
    }

    fn build_prompt(&self, query: &str, context: &str, has_attachment: bool) -> String {
        let instruction = if has_attachment {
            "Analyze the provided image for property issues (e.g., water damage, mold, cracks, \
             poor lighting, broken fixtures). Return a troubleshooting diagnosis and recommendations."
        } else {
            "Provide troubleshooting steps based on prior context."
        };
        format!("Context: {context}\nUser Query: {query}\n{instruction}")
    }
}

/// Tenancy law and rental agreement questions. Text only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TenancyPrompt;

impl PromptStrategy for TenancyPrompt {
    fn kind(&self) -> AgentKind {
        AgentKind::Tenancy
    }

    fn system_instruction(&self) -> &str {
        TENANCY_SYSTEM_INSTRUCTION
    }

    fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy::Ignore
    }

    fn build_prompt(&self, query: &str, context: &str, _has_attachment: bool) -> String {
        format!(
            "You are a legal and property management expert specializing in tenancy laws and rental agreements.\n\
             Retrieved Context: {context}\n\
             User Query: {query}\n\
             Provide a comprehensive, legally informed answer including any necessary legal conditions \
             and practical advice. If relevant, ask if more location-specific information is needed."
        )
    }
}
