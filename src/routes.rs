// routes.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{
        auction::{admin_auction_handler, auction_handler},
        conversation::{admin_conversation_handler, chat_handler},
        countdown::{admin_countdown_handler, countdown_handler},
        notification::notification_handler,
        realtime::realtime_handler,
    },
    middleware::{require_admin, require_user, resolve_actor},
    AppState,
};

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .nest("/conversations", admin_conversation_handler())
        .nest("/auctions", admin_auction_handler())
        .nest("/countdowns", admin_countdown_handler())
        .layer(middleware::from_fn(require_admin));

    let api_route = Router::new()
        .route("/realtime", get(realtime_handler))
        .nest("/chat", chat_handler())
        .nest("/auctions", auction_handler())
        .nest("/countdowns", countdown_handler())
        .nest(
            "/notifications",
            notification_handler().layer(middleware::from_fn(require_user)),
        )
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn(resolve_actor))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use tracing_subscriber::filter::LevelFilter;

    use crate::{config::Config, db::db::DBClient};

    fn test_state() -> Arc<AppState> {
        let config = Config {
            database_url: "postgres://localhost/storefront_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            port: 0,
            database_max_connections: 1,
            cors_origins: vec![],
            session_cookie_secure: false,
            log_level: LevelFilter::OFF,
            audit_interval_secs: 300,
        };
        // Lazy pool: none of the requests below reach the database.
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .unwrap();
        Arc::new(AppState::new(DBClient::new(pool), config))
    }

    #[tokio::test]
    async fn health_check_responds() {
        let response = create_router(test_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn anonymous_admin_request_is_rejected_and_gets_a_session() {
        let response = create_router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/admin/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert!(cookie.starts_with("sid="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn existing_session_cookie_is_not_reissued() {
        let response = create_router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/admin/auctions")
                    .method("POST")
                    .header(header::COOKIE, "sid=4f1c2d1e-8a7b-4c3d-9e0f-112233445566")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn bidding_requires_an_authenticated_user() {
        let response = create_router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/auctions/1/bids")
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"amount":120}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
