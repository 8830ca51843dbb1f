// handler/countdown.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use validator::Validate;

use crate::{
    dtos::{countdowndtos::*, ApiResponse},
    error::HttpError,
    middleware::{Actor, AdminPermission},
    AppState,
};

pub fn countdown_handler() -> Router {
    Router::new().route("/", get(list_countdowns))
}

/// Admin routes; mounted behind `require_admin`.
pub fn admin_countdown_handler() -> Router {
    Router::new()
        .route("/", post(create_countdown))
        .route("/:countdown_id", put(update_countdown).delete(delete_countdown))
        .route("/:countdown_id/start", put(start_countdown))
        .route("/:countdown_id/stop", put(stop_countdown))
}

pub async fn list_countdowns(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<CountdownQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    let countdowns = app_state
        .countdown_service
        .list_countdowns(query.active_only.unwrap_or(false))
        .await?;

    Ok(Json(ApiResponse::success(countdowns)))
}

pub async fn create_countdown(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateCountdownDto>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageCountdowns)?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let countdown = app_state
        .countdown_service
        .create_countdown(body.title, body.description, body.ends_at)
        .await?;

    Ok(Json(ApiResponse::with_message("Countdown created", countdown)))
}

pub async fn update_countdown(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(countdown_id): Path<i64>,
    Json(body): Json<UpdateCountdownDto>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageCountdowns)?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;
    if body.is_empty() {
        return Err(HttpError::bad_request("Nothing to update"));
    }

    let countdown = app_state
        .countdown_service
        .update_countdown(countdown_id, body.into())
        .await?;

    Ok(Json(ApiResponse::success(countdown)))
}

pub async fn start_countdown(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(countdown_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageCountdowns)?;

    let countdown = app_state.countdown_service.start_countdown(countdown_id).await?;

    Ok(Json(ApiResponse::with_message("Countdown started", countdown)))
}

pub async fn stop_countdown(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(countdown_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageCountdowns)?;

    let countdown = app_state.countdown_service.stop_countdown(countdown_id).await?;

    Ok(Json(ApiResponse::with_message("Countdown stopped", countdown)))
}

pub async fn delete_countdown(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(countdown_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    actor.require_permission(AdminPermission::ManageCountdowns)?;

    app_state.countdown_service.delete_countdown(countdown_id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Countdown deleted"
    })))
}
