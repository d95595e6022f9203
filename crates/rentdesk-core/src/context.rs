//! Retrieval context and combined-context assembly.

use async_trait::async_trait;

use crate::Exchange;

/// Source of background context for a query.
///
/// The built-in [`TemplateRetriever`] only formats the query; a real
/// retrieval-augmented lookup plugs in here.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Retrieve context for a query. Never fails.
    async fn retrieve(&self, query: &str) -> String;
}

/// Deterministic placeholder retriever.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRetriever;

#[async_trait]
impl ContextRetriever for TemplateRetriever {
    async fn retrieve(&self, query: &str) -> String {
        retrieve_context(query)
    }
}

/// Format the placeholder retrieval result for a query.
#[must_use]
pub fn retrieve_context(query: &str) -> String {
    tracing::debug!(query, "Retrieving context");
    let context = format!("Relevant tenancy information based on the query: '{query}'.");
    tracing::debug!(context = %context, "Context retrieved");
    context
}

/// Render history as `User: <q>\nAgent: <r>\n` lines, oldest first.
#[must_use]
pub fn render_history(history: &[Exchange]) -> String {
    history.iter().fold(String::new(), |mut out, exchange| {
        out.push_str("User: ");
        out.push_str(&exchange.query);
        out.push_str("\nAgent: ");
        out.push_str(&exchange.response);
        out.push('\n');
        out
    })
}

/// History text followed by the retrieved context.
#[must_use]
pub fn combine_context(history: &str, retrieved: &str) -> String {
    let mut combined = String::with_capacity(history.len() + retrieved.len());
    combined.push_str(history);
    combined.push_str(retrieved);
    combined
}
