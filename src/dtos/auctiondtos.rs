use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::auctionmodel::*;

/// Amounts are minor currency units.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateAuctionDto {
    #[validate(range(min = 1, message = "Product id must be positive"))]
    pub product_id: i64,

    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(range(min = 1, max = 1000000000000000, message = "Starting bid is out of range"))]
    pub starting_bid: i64,

    #[validate(range(min = 1, max = 1000000000000000, message = "Bid increment is out of range"))]
    pub bid_increment: i64,

    #[validate(range(min = 1, max = 1000000000000000, message = "Reserve price is out of range"))]
    pub reserve_price: Option<i64>,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl From<CreateAuctionDto> for NewAuction {
    fn from(dto: CreateAuctionDto) -> Self {
        NewAuction {
            product_id: dto.product_id,
            title: dto.title.trim().to_string(),
            starting_bid: dto.starting_bid,
            bid_increment: dto.bid_increment,
            reserve_price: dto.reserve_price,
            start_date: dto.start_date,
            end_date: dto.end_date,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PlaceBidDto {
    #[validate(range(min = 1, max = 1000000000000000, message = "Bid amount is out of range"))]
    pub amount: i64,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ExtendAuctionDto {
    #[validate(range(min = 1, max = 1440, message = "Extension must be between 1 and 1440 minutes"))]
    pub minutes: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AuctionQueryDto {
    pub status: Option<AuctionStatus>,

    #[validate(range(min = 1))]
    pub page: Option<u32>,

    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BidPlacedResponseDto {
    pub auction: Auction,
    pub bid: Bid,
    pub minimum_next_bid: Option<i64>,
}

impl From<BidPlacement> for BidPlacedResponseDto {
    fn from(placement: BidPlacement) -> Self {
        Self {
            minimum_next_bid: placement.auction.minimum_next_bid(),
            auction: placement.auction,
            bid: placement.bid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn extension_minutes_are_bounded() {
        assert!(ExtendAuctionDto { minutes: 1 }.validate().is_ok());
        assert!(ExtendAuctionDto { minutes: 1440 }.validate().is_ok());
        assert!(ExtendAuctionDto { minutes: 0 }.validate().is_err());
        assert!(ExtendAuctionDto { minutes: 1441 }.validate().is_err());
    }

    #[test]
    fn non_positive_bids_fail_validation() {
        assert!(PlaceBidDto { amount: 0 }.validate().is_err());
        assert!(PlaceBidDto { amount: -5 }.validate().is_err());
        assert!(PlaceBidDto { amount: 110 }.validate().is_ok());
        assert!(PlaceBidDto { amount: MAX_AMOUNT }.validate().is_ok());
        assert!(PlaceBidDto { amount: MAX_AMOUNT + 1 }.validate().is_err());
        assert!(PlaceBidDto { amount: i64::MAX }.validate().is_err());
    }

    #[test]
    fn create_dto_converts_with_trimmed_title() {
        let now = Utc::now();
        let dto = CreateAuctionDto {
            product_id: 4,
            title: "  Signed vinyl ".to_string(),
            starting_bid: 5000,
            bid_increment: 250,
            reserve_price: None,
            start_date: now,
            end_date: now + Duration::days(2),
        };
        assert!(dto.validate().is_ok());

        let auction: NewAuction = dto.into();
        assert_eq!(auction.title, "Signed vinyl");
        assert!(auction.check().is_ok());
    }
}
