//! HTTP transport: `POST /chat`, `POST /reset`, `GET /health`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, State},
    http::Request,
    routing::{get, post},
};
use rentdesk_agents::Attachment;
use rentdesk_core::{ClientId, SessionStore};
use rentdesk_session::{ChatRequest, SessionManager};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::error::ApiError;
use crate::protocol::{ChatResponse, ResetResponse};

/// Default request body limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Handler state.
pub struct AppState<S: SessionStore> {
    /// Session manager shared by all requests.
    pub manager: Arc<SessionManager<S>>,
}

impl<S: SessionStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

/// Create the HTTP router.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// peer IP is the session key.
///
/// # Example
/// ```ignore
/// let app = create_router(manager, DEFAULT_MAX_UPLOAD_BYTES);
/// axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
/// ```
#[must_use]
pub fn create_router<S>(manager: Arc<SessionManager<S>>, max_upload_bytes: usize) -> Router
where
    S: SessionStore + 'static,
{
    Router::new()
        .route("/chat", post(chat_handler::<S>))
        .route("/reset", post(reset_handler::<S>))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(AppState { manager })
}

fn client_id(addr: SocketAddr) -> ClientId {
    addr.ip().to_string()
}

/// Route a chat query to an agent.
///
/// Multipart fields: `query` (required) and `file` (optional).
async fn chat_handler<S>(
    State(state): State<AppState<S>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, ApiError>
where
    S: SessionStore + 'static,
{
    let request = read_chat_form(multipart).await?;
    let client = client_id(addr);
    tracing::info!(client = %client, query = %request.query, "Received /chat request");

    let reply = state.manager.handle_chat(&client, request).await?;
    tracing::info!(client = %client, agent = %reply.agent, "Chat response generated");

    Ok(Json(reply.into()))
}

async fn read_chat_form(mut multipart: Multipart) -> Result<ChatRequest, ApiError> {
    let mut query = None;
    let mut attachment = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("query") => query = Some(field.text().await?),
            Some("file") => {
                let file_name = field.file_name().map(str::to_owned);
                let mime_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await?;

                // Browsers send an empty, unnamed part when no file was chosen.
                if data.is_empty() && file_name.as_deref().is_none_or(str::is_empty) {
                    continue;
                }
                tracing::info!(
                    file_name = file_name.as_deref().unwrap_or(""),
                    mime_type = mime_type.as_deref().unwrap_or(""),
                    size = data.len(),
                    "File received"
                );
                attachment = Some(Attachment::new(data, mime_type.as_deref()));
            }
            other => {
                tracing::warn!("Ignoring unknown multipart field: {other:?}");
            }
        }
    }

    let query = query.ok_or(ApiError::MissingQuery)?;
    Ok(ChatRequest { query, attachment })
}

/// Clear the caller's conversation history.
async fn reset_handler<S>(
    State(state): State<AppState<S>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<ResetResponse>, ApiError>
where
    S: SessionStore + 'static,
{
    state.manager.reset_session(&client_id(addr)).await?;
    Ok(Json(ResetResponse::cleared()))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
