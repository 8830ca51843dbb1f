// service/background_jobs.rs
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::AppState;

/// Periodically checks the single-winning-bid rule across every auction.
/// Violations are logged, never repaired.
pub async fn start_winning_bid_audit_job(app_state: Arc<AppState>) {
    let mut interval = interval(Duration::from_secs(app_state.env.audit_interval_secs.max(1)));

    loop {
        interval.tick().await;

        tracing::debug!("Running winning-bid audit at {}", Utc::now());

        match app_state.auction_service.audit_winner_flags().await {
            Ok(0) => tracing::debug!("Winning-bid audit found no violations"),
            Ok(count) => tracing::error!("🚨 Winning-bid audit found {} inconsistent auctions", count),
            Err(e) => tracing::warn!("Winning-bid audit failed: {}", e),
        }
    }
}

/// Logs pool usage and warns when it nears capacity.
pub async fn start_pool_monitor(app_state: Arc<AppState>) {
    let max_connections = app_state.env.database_max_connections;
    let mut interval = interval(Duration::from_secs(30));

    loop {
        interval.tick().await;

        let pool = &app_state.db_client.pool;
        let size = pool.size();
        let idle = pool.num_idle() as u32;
        tracing::debug!(
            "🔍 Pool Status - Active: {}, Idle: {}, Total: {}",
            size.saturating_sub(idle),
            idle,
            size
        );

        if size >= max_connections * 8 / 10 {
            tracing::warn!("⚠️  Connection pool at 80% capacity! Consider increasing DATABASE_MAX_CONNECTIONS");
        }
    }
}
