use axum::http::StatusCode;
use thiserror::Error;

use crate::{
    error::HttpError,
    models::auctionmodel::{AuctionRejection, AuctionStatus},
    utils::money::format_amount,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("Auction {0} not found")]
    AuctionNotFound(i64),

    #[error("Countdown {0} not found")]
    CountdownNotFound(i64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Auction is not accepting bids (status: {0})")]
    AuctionNotActive(AuctionStatus),

    #[error("Bid too low; the minimum next bid is {}", format_amount(*.minimum))]
    BidTooLow { minimum: i64 },

    #[error("You already hold a bid of {}; a new bid must be higher", format_amount(*.own_best))]
    DuplicateBid { own_best: i64 },

    #[error("Auction {0} has already been settled")]
    AlreadySettled(i64),

    #[error("Cannot move auction from {from} to {to}")]
    InvalidAuctionTransition { from: AuctionStatus, to: AuctionStatus },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn from_rejection(auction_id: i64, rejection: AuctionRejection) -> Self {
        match rejection {
            AuctionRejection::NotActive { status } => ServiceError::AuctionNotActive(status),
            AuctionRejection::BidTooLow { minimum } => ServiceError::BidTooLow { minimum },
            AuctionRejection::DuplicateBid { own_best } => ServiceError::DuplicateBid { own_best },
            AuctionRejection::AlreadySettled => ServiceError::AlreadySettled(auction_id),
            AuctionRejection::InvalidTransition { from, to } => {
                ServiceError::InvalidAuctionTransition { from, to }
            }
            AuctionRejection::ExtensionOutOfRange { minutes } => ServiceError::Validation(format!(
                "Extension must be between 1 and 1440 minutes, got {}",
                minutes
            )),
            AuctionRejection::AmountOutOfRange { max } => ServiceError::Validation(format!(
                "Amount cannot exceed {}",
                format_amount(max)
            )),
            AuctionRejection::InvariantViolation(detail) => ServiceError::InvariantViolation(detail),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::ConversationNotFound(_)
            | ServiceError::AuctionNotFound(_)
            | ServiceError::CountdownNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,

            ServiceError::Conflict(_)
            | ServiceError::AuctionNotActive(_)
            | ServiceError::BidTooLow { .. }
            | ServiceError::DuplicateBid { .. }
            | ServiceError::AlreadySettled(_)
            | ServiceError::InvalidAuctionTransition { .. } => StatusCode::CONFLICT,

            ServiceError::InvariantViolation(_) | ServiceError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error {
            ServiceError::BidTooLow { minimum } => HttpError::new(error.to_string(), status)
                .with_data(serde_json::json!({ "minimum_bid": minimum })),
            ServiceError::DuplicateBid { own_best } => HttpError::new(error.to_string(), status)
                .with_data(serde_json::json!({ "own_best_bid": own_best })),
            ServiceError::Database(ref e) => {
                tracing::error!("🔥 Database error: {}", e);
                HttpError::server_error("Something went wrong, please try again")
            }
            ServiceError::InvariantViolation(_) => HttpError::server_error("Internal consistency error"),
            _ => HttpError::new(error.to_string(), status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_statuses() {
        assert_eq!(ServiceError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::ConversationNotFound(1).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ServiceError::BidTooLow { minimum: 110 }.status_code(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::AlreadySettled(1).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ServiceError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::InvariantViolation("two winners".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bid_too_low_reports_the_minimum() {
        let error: HttpError = ServiceError::BidTooLow { minimum: 110 }.into();
        assert_eq!(error.status, StatusCode::CONFLICT);
        assert!(error.message.contains("1.10"));
        assert_eq!(error.data, Some(serde_json::json!({ "minimum_bid": 110 })));
    }

    #[test]
    fn database_details_are_not_leaked() {
        let error: HttpError = ServiceError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("pool"));
    }

    #[test]
    fn rejections_translate_to_conflicts() {
        let error = ServiceError::from_rejection(9, AuctionRejection::AlreadySettled);
        assert!(matches!(error, ServiceError::AlreadySettled(9)));

        let error = ServiceError::from_rejection(9, AuctionRejection::ExtensionOutOfRange { minutes: 0 });
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);

        let error = ServiceError::from_rejection(9, AuctionRejection::AmountOutOfRange { max: 100_000 });
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.to_string().contains("1000.00"));
    }
}
