// db/countdowndb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Error;

use super::db::DBClient;
use crate::models::countdownmodel::*;

#[async_trait]
pub trait CountdownExt {
    async fn create_countdown(
        &self,
        title: String,
        description: Option<String>,
        ends_at: DateTime<Utc>,
    ) -> Result<Countdown, Error>;

    async fn list_countdowns(&self, active_only: bool) -> Result<Vec<Countdown>, Error>;

    async fn update_countdown(
        &self,
        countdown_id: i64,
        changes: CountdownChanges,
    ) -> Result<Option<Countdown>, Error>;

    async fn set_countdown_active(
        &self,
        countdown_id: i64,
        active: bool,
    ) -> Result<Option<Countdown>, Error>;

    async fn delete_countdown(&self, countdown_id: i64) -> Result<bool, Error>;
}

#[async_trait]
impl CountdownExt for DBClient {
    async fn create_countdown(
        &self,
        title: String,
        description: Option<String>,
        ends_at: DateTime<Utc>,
    ) -> Result<Countdown, Error> {
        sqlx::query_as::<_, Countdown>(
            r#"
            INSERT INTO countdowns (title, description, ends_at)
            VALUES ($1, $2, $3)
            RETURNING *
            "#
        )
        .bind(title)
        .bind(description)
        .bind(ends_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn list_countdowns(&self, active_only: bool) -> Result<Vec<Countdown>, Error> {
        sqlx::query_as::<_, Countdown>(
            r#"
            SELECT * FROM countdowns
            WHERE ($1 = FALSE OR is_active)
            ORDER BY ends_at ASC, id ASC
            "#
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
    }

    async fn update_countdown(
        &self,
        countdown_id: i64,
        changes: CountdownChanges,
    ) -> Result<Option<Countdown>, Error> {
        sqlx::query_as::<_, Countdown>(
            r#"
            UPDATE countdowns
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                ends_at = COALESCE($4, ends_at),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(countdown_id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.ends_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_countdown_active(
        &self,
        countdown_id: i64,
        active: bool,
    ) -> Result<Option<Countdown>, Error> {
        sqlx::query_as::<_, Countdown>(
            r#"
            UPDATE countdowns
            SET is_active = $2,
                started_at = CASE WHEN $2 THEN NOW() ELSE started_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(countdown_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_countdown(&self, countdown_id: i64) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM countdowns WHERE id = $1")
            .bind(countdown_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
