//! Conversation, message, and per-conversation settings endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, api_error, error_response, json_rejection};
use crate::db::{Conversation, StoredMessage};

// --- Request/Response types ---

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: i64,
    pub name: String,
    pub context: bool,
    pub model: String,
    pub created_at: String,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            name: c.name,
            context: c.context_enabled,
            model: c.model,
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub is_user: bool,
    pub created_at: String,
}

impl From<StoredMessage> for MessageResponse {
    fn from(m: StoredMessage) -> Self {
        Self {
            message: m.content,
            is_user: m.is_user,
            created_at: m.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub context: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub model: String,
}

// --- Handlers ---

/// Create a conversation
async fn create_conversation(
    State(state): State<Arc<ApiState>>,
    body: Result<Option<Json<CreateConversationRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<ConversationResponse>), ApiError> {
    let req = body
        .map_err(|e| json_rejection(&e))?
        .map(|Json(r)| r)
        .unwrap_or_default();
    let conversation = state
        .conversations
        .create(req.name.as_deref())
        .map_err(|e| api_error(&e))?;

    tracing::info!(id = conversation.id, name = %conversation.name, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation.into())))
}

/// List conversations, newest first
async fn list_conversations(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let conversations = state.conversations.list().map_err(|e| api_error(&e))?;
    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

/// Rename a conversation
async fn rename_conversation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Json(req) = body.map_err(|e| json_rejection(&e))?;
    state
        .conversations
        .rename(id, &req.name)
        .map_err(|e| api_error(&e))?;
    let conversation = state.conversations.require(id).map_err(|e| api_error(&e))?;
    Ok(Json(conversation.into()))
}

/// Delete a conversation and its messages
async fn delete_conversation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.conversations.delete(id).map_err(|e| api_error(&e))?;
    if deleted {
        tracing::info!(id, "conversation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            error_response("not_found", "Conversation not found"),
        ))
    }
}

/// List messages, oldest first
async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    state.conversations.require(id).map_err(|e| api_error(&e))?;
    let messages = state.messages.list(id).map_err(|e| api_error(&e))?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

/// Send a message and return the model's reply
async fn send_message(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<ReplyResponse>, ApiError> {
    let Json(req) = body.map_err(|e| json_rejection(&e))?;
    let reply = state
        .chat
        .send_message(id, &req.message)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(ReplyResponse { reply }))
}

/// Whether history is sent with new messages
async fn get_context(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ContextResponse>, ApiError> {
    let context = state
        .conversations
        .context_enabled(id)
        .map_err(|e| api_error(&e))?;
    Ok(Json(ContextResponse { context }))
}

/// Flip the context flag
async fn toggle_context(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ContextResponse>, ApiError> {
    let context = state
        .conversations
        .toggle_context(id)
        .map_err(|e| api_error(&e))?;
    tracing::debug!(id, context, "context toggled");
    Ok(Json(ContextResponse { context }))
}

async fn get_model(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ModelResponse>, ApiError> {
    let model = state.conversations.model(id).map_err(|e| api_error(&e))?;
    Ok(Json(ModelResponse { model }))
}

/// Switch the conversation's model; only allowed models are accepted
async fn set_model(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<SetModelRequest>, JsonRejection>,
) -> Result<Json<ModelResponse>, ApiError> {
    let Json(req) = body.map_err(|e| json_rejection(&e))?;
    let model = req.model.trim();
    if !state.allowed_models.iter().any(|m| m == model) {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response(
                "invalid_model",
                &format!(
                    "model {model:?} is not allowed; choose one of: {}",
                    state.allowed_models.join(", ")
                ),
            ),
        ));
    }

    state
        .conversations
        .set_model(id, model)
        .map_err(|e| api_error(&e))?;
    tracing::info!(id, model, "conversation model changed");

    Ok(Json(ModelResponse {
        model: model.to_string(),
    }))
}

/// Build the conversations router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_conversations).post(create_conversation))
        .route("/{id}", delete(delete_conversation))
        .route("/{id}/name", put(rename_conversation))
        .route("/{id}/messages", get(list_messages).post(send_message))
        .route("/{id}/context", get(get_context).post(toggle_context))
        .route("/{id}/model", get(get_model).put(set_model))
        .with_state(state)
}
