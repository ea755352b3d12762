//! Koi Market storefront - checkout and payment reconciliation service.
//!
//! This binary serves the shopper and operator APIs on port 3000.
//!
//! # Architecture
//!
//! - Axum JSON API
//! - Payment provider reached through an authenticated HTTP client
//! - `PostgreSQL` for orders, refunds, carts and the event ledger, or an
//!   in-memory store when no database URL is configured
//!
//! # Security
//!
//! - Provider webhooks are accepted only with a valid HMAC signature
//! - Operator routes require the operator API key
//! - Provider credentials never leave this process

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use koi_storefront::config::StorefrontConfig;
use koi_storefront::db::{self, Repositories};
use koi_storefront::gateway::HttpGateway;
use koi_storefront::state::AppState;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "koi_storefront=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let coupons = config
        .store
        .load_coupons()
        .expect("Failed to load coupons");
    tracing::info!(count = coupons.len(), "Coupons loaded");

    let (repos, pool) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .expect("Failed to create database pool");
            tracing::info!("Database pool created");
            (Repositories::postgres(pool.clone()), Some(pool))
        }
        None => {
            tracing::warn!("STOREFRONT_DATABASE_URL not set; using in-memory store");
            (Repositories::in_memory(), None)
        }
    };

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p koi-cli -- migrate

    let gateway = HttpGateway::new(&config.payment).expect("Failed to create payment client");
    let state = AppState::new(config.clone(), repos, Arc::new(gateway), coupons, pool);

    let mut app = koi_storefront::app(state);
    if sentry_guard.is_some() {
        // Sentry layers (outermost for full request coverage)
        app = app
            .layer(sentry_tower::NewSentryLayer::new_from_top())
            .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());
    }

    let addr = config.socket_addr();
    tracing::info!("storefront listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
