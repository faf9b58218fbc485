use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_marketplace_api::config::Config;
use lead_marketplace_api::db::Database;
use lead_marketplace_api::feed_client::FeedClient;
use lead_marketplace_api::handlers::{self, AppState};
use lead_marketplace_api::ingestion::Ingestor;
use lead_marketplace_api::poller;
use lead_marketplace_api::store::{LeadStore, PgLeadStore};

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database (running migrations), the
/// feed poller and the HTTP routes with their middleware, then starts the
/// Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_marketplace_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn LeadStore> = Arc::new(PgLeadStore::new(db.pool.clone()));
    let feed = FeedClient::new(config.feed_url.clone(), config.feed_timeout())?;
    let ingestor = Arc::new(Ingestor::new(store.clone(), feed));

    // Background feed poller
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_handle = if config.sync_interval_secs > 0 {
        Some(tokio::spawn(poller::run(
            ingestor.clone(),
            std::time::Duration::from_secs(config.initial_sync_delay_secs),
            std::time::Duration::from_secs(config.sync_interval_secs),
            shutdown_rx,
        )))
    } else {
        tracing::warn!("SYNC_INTERVAL_SECS is 0; background ingestion disabled");
        None
    };

    let app_state = Arc::new(AppState::new(store, config.clone(), ingestor));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 1MB is plenty for claim and profile bodies
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_tx.send(true).ok();
    if let Some(handle) = poller_handle {
        handle.await.ok();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
