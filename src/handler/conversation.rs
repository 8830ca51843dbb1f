// handler/conversation.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use validator::Validate;

use crate::{
    dtos::{conversationdtos::*, page_window, ApiResponse, PaginatedResponse},
    error::HttpError,
    middleware::{Actor, AdminPermission},
    AppState,
};

/// Visitor-facing routes. Anyone with a session may use them.
pub fn chat_handler() -> Router {
    Router::new()
        .route("/messages", post(send_visitor_message))
        .route("/conversation", get(get_visitor_conversation))
        .route("/live-chat", post(request_live_chat))
}

/// Admin routes; mounted behind `require_admin`.
pub fn admin_conversation_handler() -> Router {
    Router::new()
        .route("/", get(list_conversations))
        .route("/:conversation_id", get(get_conversation))
        .route("/:conversation_id/messages", post(send_admin_reply))
        .route("/:conversation_id/close", put(close_conversation))
        .route("/:conversation_id/reopen", put(reopen_conversation))
        .route("/:conversation_id/seen", put(mark_seen))
}

pub async fn send_visitor_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<SendMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = app_state
        .conversation_service
        .send_visitor_message(&actor, &body.body, body.message_type)
        .await?;

    Ok(Json(ApiResponse::success(VisitorSendResponseDto::from(outcome))))
}

pub async fn get_visitor_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, HttpError> {
    let conversation = app_state
        .conversation_service
        .get_visitor_conversation(&actor)
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": conversation
    })))
}

pub async fn request_live_chat(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, HttpError> {
    let conversation = app_state
        .conversation_service
        .request_live_chat(&actor)
        .await?;

    Ok(Json(ApiResponse::with_message(
        "An agent will join the conversation shortly",
        conversation,
    )))
}

pub async fn list_conversations(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ConversationQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageConversations)?;
    query.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let (page, page_size, limit, offset) = page_window(query.page, query.page_size);
    let (conversations, total) = app_state
        .conversation_service
        .list_conversations(&query.filter(), limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        conversations,
        total,
        page,
        page_size,
    ))))
}

pub async fn get_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageConversations)?;

    let conversation = app_state
        .conversation_service
        .get_conversation_for_admin(conversation_id)
        .await?;

    Ok(Json(ApiResponse::success(conversation)))
}

pub async fn send_admin_reply(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<AdminReplyDto>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, admin_name) = actor.require_permission(AdminPermission::ManageConversations)?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = app_state
        .conversation_service
        .send_admin_reply(admin_id, admin_name, conversation_id, &body.body)
        .await?;

    Ok(Json(ApiResponse::success(AdminReplyResponseDto::from(outcome))))
}

pub async fn close_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageConversations)?;

    let conversation = app_state
        .conversation_service
        .close_conversation(admin_id, conversation_id)
        .await?;

    Ok(Json(ApiResponse::with_message("Conversation closed", conversation)))
}

pub async fn reopen_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageConversations)?;

    let conversation = app_state
        .conversation_service
        .reopen_conversation(admin_id, conversation_id)
        .await?;

    Ok(Json(ApiResponse::with_message("Conversation reopened", conversation)))
}

pub async fn mark_seen(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(conversation_id): Path<i64>,
    body: Option<Json<MarkSeenDto>>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageConversations)?;

    let body = body.map(|Json(body)| body).unwrap_or_default();
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let message_ids = app_state
        .conversation_service
        .mark_seen(conversation_id, body.up_to_message_id)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "conversation_id": conversation_id,
        "message_ids": message_ids
    }))))
}
