use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct UserNotification {
    pub id: i64,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub notification_type: String,
    pub metadata: Option<serde_json::Value>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
