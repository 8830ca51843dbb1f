// service/notification_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::db::DBClient,
    models::{
        auctionmodel::Auction, conversationmodel::Conversation,
        notificationmodel::UserNotification,
    },
    service::{
        error::ServiceError,
        realtime_hub::{BroadcastHub, Room, ServerEvent},
    },
    utils::money::format_amount,
};

/// Best-effort sink: a failed notification is logged and dropped, it never
/// fails the operation that triggered it.
#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
    hub: Arc<BroadcastHub>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>, hub: Arc<BroadcastHub>) -> Self {
        Self { db_client, hub }
    }

    pub async fn notify_outbid(&self, user_id: Uuid, auction: &Auction) {
        tracing::info!(
            "Outbid notification: user {} on auction {} (now {})",
            user_id,
            auction.id,
            auction.current_bid
        );

        self.deliver(
            user_id,
            "auction_outbid",
            serde_json::json!({
                "auction_id": auction.id,
                "auction_title": auction.title,
                "current_bid": auction.current_bid,
                "minimum_next_bid": auction.minimum_next_bid(),
            }),
            format!(
                "You have been outbid on {}. The current bid is {}",
                auction.title,
                format_amount(auction.current_bid)
            ),
        )
        .await;
    }

    pub async fn notify_auction_won(&self, user_id: Uuid, auction: &Auction) {
        let amount = auction.winning_bid.unwrap_or(auction.current_bid);
        tracing::info!("Winner notification: user {} won auction {}", user_id, auction.id);

        self.deliver(
            user_id,
            "auction_won",
            serde_json::json!({
                "auction_id": auction.id,
                "auction_title": auction.title,
                "winning_bid": amount,
            }),
            format!("You won {} with a bid of {}", auction.title, format_amount(amount)),
        )
        .await;
    }

    pub async fn notify_support_reply(&self, user_id: Uuid, conversation: &Conversation, admin_name: &str) {
        self.deliver(
            user_id,
            "support_reply",
            serde_json::json!({
                "conversation_id": conversation.id,
                "admin_name": admin_name,
            }),
            format!("{} replied to your conversation", admin_name),
        )
        .await;
    }

    pub async fn get_user_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserNotification>, ServiceError> {
        let notifications = sqlx::query_as::<_, UserNotification>(
            r#"
            SELECT id, user_id, type, metadata, message, is_read, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db_client.pool)
        .await?;

        Ok(notifications)
    }

    async fn deliver(
        &self,
        user_id: Uuid,
        notification_type: &str,
        metadata: serde_json::Value,
        message: String,
    ) {
        match self.store_notification(user_id, notification_type, metadata, message).await {
            Ok(notification) => {
                self.hub
                    .broadcast(&Room::User(user_id), &ServerEvent::Notification { notification })
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to store {} notification for {}: {}",
                    notification_type,
                    user_id,
                    e
                );
            }
        }
    }

    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        metadata: serde_json::Value,
        message: String,
    ) -> Result<UserNotification, ServiceError> {
        let notification = sqlx::query_as::<_, UserNotification>(
            r#"
            INSERT INTO notifications (user_id, type, metadata, message, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, user_id, type, metadata, message, is_read, created_at
            "#
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(metadata)
        .bind(message)
        .fetch_one(&self.db_client.pool)
        .await?;

        Ok(notification)
    }
}
