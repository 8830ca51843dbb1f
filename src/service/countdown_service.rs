// service/countdown_service.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    db::{countdowndb::CountdownExt, db::DBClient},
    models::countdownmodel::{Countdown, CountdownChanges},
    service::{
        error::ServiceError,
        realtime_hub::{BroadcastHub, ServerEvent},
    },
};

/// Countdown rows have no admission rules: last writer wins, and every change
/// is pushed to all connected clients.
#[derive(Debug, Clone)]
pub struct CountdownService {
    db_client: Arc<DBClient>,
    hub: Arc<BroadcastHub>,
}

impl CountdownService {
    pub fn new(db_client: Arc<DBClient>, hub: Arc<BroadcastHub>) -> Self {
        Self { db_client, hub }
    }

    pub async fn create_countdown(
        &self,
        title: String,
        description: Option<String>,
        ends_at: DateTime<Utc>,
    ) -> Result<Countdown, ServiceError> {
        let countdown = self
            .db_client
            .create_countdown(title, description, ends_at)
            .await?;

        tracing::info!("⏳ Countdown {} created", countdown.id);
        self.publish(&countdown).await;
        Ok(countdown)
    }

    pub async fn list_countdowns(&self, active_only: bool) -> Result<Vec<Countdown>, ServiceError> {
        Ok(self.db_client.list_countdowns(active_only).await?)
    }

    pub async fn update_countdown(
        &self,
        countdown_id: i64,
        changes: CountdownChanges,
    ) -> Result<Countdown, ServiceError> {
        let countdown = self
            .db_client
            .update_countdown(countdown_id, changes)
            .await?
            .ok_or(ServiceError::CountdownNotFound(countdown_id))?;

        tracing::info!("⏳ Countdown {} updated", countdown_id);
        self.publish(&countdown).await;
        Ok(countdown)
    }

    pub async fn start_countdown(&self, countdown_id: i64) -> Result<Countdown, ServiceError> {
        self.set_active(countdown_id, true).await
    }

    pub async fn stop_countdown(&self, countdown_id: i64) -> Result<Countdown, ServiceError> {
        self.set_active(countdown_id, false).await
    }

    pub async fn delete_countdown(&self, countdown_id: i64) -> Result<(), ServiceError> {
        if !self.db_client.delete_countdown(countdown_id).await? {
            return Err(ServiceError::CountdownNotFound(countdown_id));
        }

        tracing::info!("⏳ Countdown {} deleted", countdown_id);
        self.hub
            .broadcast_all(&ServerEvent::CountdownDeleted { countdown_id })
            .await;
        Ok(())
    }

    async fn set_active(&self, countdown_id: i64, active: bool) -> Result<Countdown, ServiceError> {
        let countdown = self
            .db_client
            .set_countdown_active(countdown_id, active)
            .await?
            .ok_or(ServiceError::CountdownNotFound(countdown_id))?;

        tracing::info!(
            "⏳ Countdown {} {}",
            countdown_id,
            if active { "started" } else { "stopped" }
        );
        self.publish(&countdown).await;
        Ok(countdown)
    }

    async fn publish(&self, countdown: &Countdown) {
        self.hub
            .broadcast_all(&ServerEvent::CountdownUpdated {
                countdown: countdown.clone(),
                remaining_seconds: countdown.remaining_seconds(Utc::now()),
            })
            .await;
    }
}
