mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use db::db::DBClient;
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use service::{
    auction_service::AuctionService,
    background_jobs::{start_pool_monitor, start_winning_bid_audit_job},
    conversation_service::ConversationService,
    countdown_service::CountdownService,
    notification_service::NotificationService,
    realtime_hub::BroadcastHub,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub hub: Arc<BroadcastHub>,
    // Services
    pub conversation_service: Arc<ConversationService>,
    pub auction_service: Arc<AuctionService>,
    pub countdown_service: Arc<CountdownService>,
    pub notification_service: Arc<NotificationService>,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config) -> Self {
        let db_client_arc = Arc::new(db_client);
        let hub = Arc::new(BroadcastHub::new());

        let notification_service = Arc::new(NotificationService::new(
            db_client_arc.clone(),
            hub.clone(),
        ));

        let conversation_service = Arc::new(ConversationService::new(
            db_client_arc.clone(),
            hub.clone(),
            notification_service.clone(),
        ));

        let auction_service = Arc::new(AuctionService::new(
            db_client_arc.clone(),
            hub.clone(),
            notification_service.clone(),
        ));

        let countdown_service = Arc::new(CountdownService::new(db_client_arc.clone(), hub.clone()));

        Self {
            env: config,
            db_client: db_client_arc,
            hub,
            conversation_service,
            auction_service,
            countdown_service,
            notification_service,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = Config::init();

    tracing_subscriber::fmt()
        .with_max_level(
            config
                .as_ref()
                .map(|config| config.log_level)
                .unwrap_or(LevelFilter::DEBUG),
        )
        .init();

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("🔥 Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_max_connections.min(5))
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!(
                "✅ Connection to the database is successful! (max connections: {})",
                config.database_max_connections
            );
            pool
        }
        Err(err) => {
            tracing::error!("🔥 Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!("🔥 Failed to run migrations: {}", err);
        std::process::exit(1);
    }

    let allowed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);

    let app_state = Arc::new(AppState::new(DBClient::new(pool), config.clone()));

    tokio::spawn(start_pool_monitor(app_state.clone()));
    tokio::spawn(start_winning_bid_audit_job(app_state.clone()));

    let app = create_router(app_state.clone()).layer(cors);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("🔥 Failed to bind port {}: {}", config.port, err);
            std::process::exit(1);
        }
    };

    tracing::info!("🚀 Server is running on http://localhost:{}", config.port);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("🔥 Server error: {}", err);
    }
}
