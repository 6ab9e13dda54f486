pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
};
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::scanner::NetworkScanner;
use crate::server::config::AppConfig;

/// Shared application state handed to every handler.
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub scanner: Arc<dyn NetworkScanner>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            app_state
                .config
                .frontend_url
                .parse::<HeaderValue>()
                .map(Into::into)
                .unwrap_or(tower_http::cors::AllowOrigin::any()),
        )
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let authed = Router::new()
        .nest("/api/cloud/targets", routes::target_routes::router())
        .nest("/api/certificates", routes::cert_routes::router())
        .nest("/api/dashboard", routes::cert_routes::dashboard_router())
        .nest("/api/collectors", routes::collector_routes::router())
        .layer(from_fn_with_state(
            app_state.clone(),
            middleware::auth::auth,
        ));

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/report", routes::report_routes::router())
        .merge(authed)
        .with_state(app_state)
        .layer(cors)
}

pub async fn run_http_server(
    app_state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app_router = build_router(app_state);

    info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app_router).await?;
    Ok(())
}
