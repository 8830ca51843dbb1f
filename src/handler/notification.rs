// handler/notification.rs
use std::sync::Arc;

use axum::{extract::Query, response::IntoResponse, routing::get, Extension, Json, Router};
use serde::Deserialize;

use crate::{
    dtos::{page_window, ApiResponse},
    error::{ErrorMessage, HttpError},
    middleware::Actor,
    AppState,
};

/// Mounted behind `require_user`.
pub fn notification_handler() -> Router {
    Router::new().route("/", get(get_notifications))
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn get_notifications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<NotificationQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let user_id = actor
        .user_id()
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNotAuthenticated.to_string()))?;

    let (_, _, limit, offset) = page_window(query.page, query.page_size);
    let notifications = app_state
        .notification_service
        .get_user_notifications(user_id, limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(notifications)))
}
