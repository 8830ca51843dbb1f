// handler/auction.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    handler::Handler,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use validator::Validate;

use crate::{
    dtos::{auctiondtos::*, page_window, ApiResponse, PaginatedResponse},
    error::{ErrorMessage, HttpError},
    middleware::{require_user, Actor, AdminPermission},
    AppState,
};

pub fn auction_handler() -> Router {
    Router::new()
        .route("/", get(list_auctions))
        .route("/:auction_id", get(get_auction))
        .route(
            "/:auction_id/bids",
            get(list_bids).post(place_bid.layer(middleware::from_fn(require_user))),
        )
}

/// Admin routes; mounted behind `require_admin`.
pub fn admin_auction_handler() -> Router {
    Router::new()
        .route("/", post(create_auction))
        .route("/:auction_id/activate", put(activate_auction))
        .route("/:auction_id/settle", put(settle_auction))
        .route("/:auction_id/cancel", put(cancel_auction))
        .route("/:auction_id/extend", put(extend_auction))
}

pub async fn list_auctions(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<AuctionQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let (page, page_size, limit, offset) = page_window(query.page, query.page_size);
    let (auctions, total) = app_state
        .auction_service
        .list_auctions(query.status, limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        auctions, total, page, page_size,
    ))))
}

pub async fn get_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let auction = app_state.auction_service.get_auction(auction_id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": {
            "auction": auction,
            "minimum_next_bid": auction.minimum_next_bid()
        }
    })))
}

pub async fn list_bids(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let bids = app_state.auction_service.list_bids(auction_id).await?;

    Ok(Json(ApiResponse::success(bids)))
}

pub async fn place_bid(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(auction_id): Path<i64>,
    Json(body): Json<PlaceBidDto>,
) -> Result<impl IntoResponse, HttpError> {
    let bidder_id = actor
        .user_id()
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNotAuthenticated.to_string()))?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let placement = app_state
        .auction_service
        .place_bid(bidder_id, auction_id, body.amount)
        .await?;

    Ok(Json(ApiResponse::with_message(
        "Bid placed",
        BidPlacedResponseDto::from(placement),
    )))
}

pub async fn create_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateAuctionDto>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageAuctions)?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let auction = app_state
        .auction_service
        .create_auction(admin_id, body.into())
        .await?;

    Ok(Json(ApiResponse::with_message("Auction created", auction)))
}

pub async fn activate_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageAuctions)?;

    let auction = app_state
        .auction_service
        .activate_auction(admin_id, auction_id)
        .await?;

    Ok(Json(ApiResponse::success(auction)))
}

pub async fn settle_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageAuctions)?;

    let settlement = app_state
        .auction_service
        .settle_auction(admin_id, auction_id)
        .await?;

    Ok(Json(ApiResponse::with_message("Auction settled", settlement)))
}

pub async fn cancel_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageAuctions)?;

    let auction = app_state
        .auction_service
        .cancel_auction(admin_id, auction_id)
        .await?;

    Ok(Json(ApiResponse::with_message("Auction cancelled", auction)))
}

pub async fn extend_auction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(auction_id): Path<i64>,
    Json(body): Json<ExtendAuctionDto>,
) -> Result<impl IntoResponse, HttpError> {
    let (admin_id, _) = actor.require_permission(AdminPermission::ManageAuctions)?;
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let auction = app_state
        .auction_service
        .extend_auction(admin_id, auction_id, body.minutes)
        .await?;

    Ok(Json(ApiResponse::with_message("Auction extended", auction)))
}
