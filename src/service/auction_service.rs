// service/auction_service.rs
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::{
        auctiondb::{AuctionExt, AuctionTxError},
        db::DBClient,
    },
    models::auctionmodel::*,
    service::{
        error::ServiceError,
        notification_service::NotificationService,
        realtime_hub::{BroadcastHub, Room, ServerEvent},
    },
};

fn map_tx_error(auction_id: i64, err: AuctionTxError) -> ServiceError {
    match err {
        AuctionTxError::NotFound => ServiceError::AuctionNotFound(auction_id),
        AuctionTxError::Rejected(rejection) => ServiceError::from_rejection(auction_id, rejection),
        AuctionTxError::Database(e) => ServiceError::Database(e),
    }
}

#[derive(Debug, Clone)]
pub struct AuctionService {
    db_client: Arc<DBClient>,
    hub: Arc<BroadcastHub>,
    notification_service: Arc<NotificationService>,
}

impl AuctionService {
    pub fn new(
        db_client: Arc<DBClient>,
        hub: Arc<BroadcastHub>,
        notification_service: Arc<NotificationService>,
    ) -> Self {
        Self {
            db_client,
            hub,
            notification_service,
        }
    }

    pub async fn create_auction(
        &self,
        admin_id: Uuid,
        auction: NewAuction,
    ) -> Result<Auction, ServiceError> {
        auction.check().map_err(ServiceError::Validation)?;

        let auction = self.db_client.create_auction(admin_id, auction).await?;
        tracing::info!("🔨 Auction {} created by {}", auction.id, admin_id);

        Ok(auction)
    }

    pub async fn get_auction(&self, auction_id: i64) -> Result<Auction, ServiceError> {
        self.db_client
            .get_auction(auction_id)
            .await?
            .ok_or(ServiceError::AuctionNotFound(auction_id))
    }

    pub async fn list_auctions(
        &self,
        status: Option<AuctionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Auction>, i64), ServiceError> {
        Ok(self.db_client.list_auctions(status, limit, offset).await?)
    }

    pub async fn list_bids(&self, auction_id: i64) -> Result<Vec<BidWithBidder>, ServiceError> {
        self.get_auction(auction_id).await?;
        Ok(self.db_client.list_bids(auction_id).await?)
    }

    pub async fn place_bid(
        &self,
        bidder_id: Uuid,
        auction_id: i64,
        amount: i64,
    ) -> Result<BidPlacement, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation("Bid amount must be positive".to_string()));
        }

        let placement = match self
            .db_client
            .place_bid(auction_id, bidder_id, amount, Utc::now())
            .await
        {
            Ok(placement) => placement,
            Err(err) => {
                let err = map_tx_error(auction_id, err);
                match &err {
                    ServiceError::InvariantViolation(detail) => tracing::error!(
                        auction_id,
                        %bidder_id,
                        amount,
                        %detail,
                        "🚨 Bid aborted on invariant violation"
                    ),
                    other => tracing::info!(
                        auction_id,
                        %bidder_id,
                        amount,
                        "Bid rejected: {}",
                        other
                    ),
                }
                return Err(err);
            }
        };

        tracing::info!(
            auction_id,
            %bidder_id,
            amount,
            total_bids = placement.auction.total_bids,
            "✅ Bid admitted"
        );

        let event = ServerEvent::BidPlaced {
            auction: placement.auction.clone(),
            bid: placement.bid.clone(),
        };
        self.hub.broadcast(&Room::Auction(auction_id), &event).await;
        self.hub.broadcast(&Room::Admin, &event).await;

        if let Some(previous) = placement.previous_winner.filter(|id| *id != bidder_id) {
            self.notification_service
                .notify_outbid(previous, &placement.auction)
                .await;
        }

        Ok(placement)
    }

    pub async fn activate_auction(
        &self,
        admin_id: Uuid,
        auction_id: i64,
    ) -> Result<Auction, ServiceError> {
        let auction = self
            .db_client
            .activate_auction(auction_id, Utc::now())
            .await
            .map_err(|e| map_tx_error(auction_id, e))?;

        tracing::info!("Auction {} moved to {} by {}", auction_id, auction.status, admin_id);

        if auction.status == AuctionStatus::Active {
            let event = ServerEvent::AuctionActivated {
                auction: auction.clone(),
            };
            self.hub.broadcast(&Room::Auction(auction_id), &event).await;
            self.hub.broadcast(&Room::Admin, &event).await;
        }

        Ok(auction)
    }

    pub async fn settle_auction(
        &self,
        admin_id: Uuid,
        auction_id: i64,
    ) -> Result<Settlement, ServiceError> {
        let settlement = self
            .db_client
            .settle_auction(auction_id)
            .await
            .map_err(|e| map_tx_error(auction_id, e))?;

        match settlement.auction.winner_id {
            Some(winner) => tracing::info!(
                auction_id,
                %admin_id,
                %winner,
                winning_bid = settlement.auction.winning_bid,
                "🏁 Auction settled"
            ),
            None => tracing::info!(
                auction_id,
                %admin_id,
                reserve_met = settlement.reserve_met,
                "🏁 Auction settled without a winner"
            ),
        }

        self.hub
            .broadcast_all(&ServerEvent::AuctionSettled {
                auction: settlement.auction.clone(),
                reserve_met: settlement.reserve_met,
            })
            .await;

        if let Some(winner) = settlement.auction.winner_id {
            self.notification_service
                .notify_auction_won(winner, &settlement.auction)
                .await;
        }

        Ok(settlement)
    }

    pub async fn cancel_auction(
        &self,
        admin_id: Uuid,
        auction_id: i64,
    ) -> Result<Auction, ServiceError> {
        let auction = self
            .db_client
            .cancel_auction(auction_id)
            .await
            .map_err(|e| map_tx_error(auction_id, e))?;

        tracing::info!("Auction {} cancelled by {}", auction_id, admin_id);

        self.hub
            .broadcast_all(&ServerEvent::AuctionCancelled {
                auction: auction.clone(),
            })
            .await;

        Ok(auction)
    }

    pub async fn extend_auction(
        &self,
        admin_id: Uuid,
        auction_id: i64,
        minutes: i64,
    ) -> Result<Auction, ServiceError> {
        let auction = self
            .db_client
            .extend_auction(auction_id, minutes)
            .await
            .map_err(|e| map_tx_error(auction_id, e))?;

        tracing::info!(
            "⏱️ Auction {} extended by {} minutes to {} by {}",
            auction_id,
            minutes,
            auction.end_date,
            admin_id
        );

        let event = ServerEvent::AuctionExtended {
            auction: auction.clone(),
        };
        self.hub.broadcast(&Room::Auction(auction_id), &event).await;
        self.hub.broadcast(&Room::Admin, &event).await;

        Ok(auction)
    }

    /// Reports auctions whose winner flags disagree with their bids. Read-only.
    pub async fn audit_winner_flags(&self) -> Result<usize, ServiceError> {
        let violations = self.db_client.find_winner_flag_violations().await?;
        for (auction_id, detail) in &violations {
            tracing::error!(auction_id, %detail, "🚨 Winning-bid invariant violated");
        }
        Ok(violations.len())
    }
}
