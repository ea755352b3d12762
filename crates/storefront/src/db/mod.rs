//! Persistence for orders, refunds, processed events and carts.
//!
//! # Backends
//!
//! - [`postgres::PgStore`] - `PostgreSQL`, used whenever a database URL is configured
//! - [`memory::MemoryStore`] - process-local maps, for development and tests
//!
//! Both implement every repository trait with the same semantics. In
//! particular, order status updates are compare-and-set on the prior status,
//! so a writer holding a stale view of an order can never regress it.
//!
//! ## Tables
//!
//! - `orders` - Orders with their frozen cart snapshot and price breakdown
//! - `refund_requests` - Operator refund requests
//! - `processed_events` - Idempotency ledger keyed by `(intent_id, event_type)`
//! - `carts` - Per-user carts (JSONB)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p koi-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use koi_core::{Cart, OrderId, PaymentIntentId, ProviderRefundId, RefundRequestId, UserId};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{Order, ProcessedEvent, RefundRequest, RefundResolution, StatusChange};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate id).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order.
    ///
    /// Returns `RepositoryError::Conflict` if the id or intent is already taken.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Most recent order created as a retry of `id`.
    async fn find_successor(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Compare-and-set status update.
    ///
    /// Returns the updated order, or `None` if the order is no longer in
    /// `change.from`. Returns `RepositoryError::NotFound` for an unknown id.
    async fn transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<Option<Order>, RepositoryError>;
}

/// Refund request storage.
#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn insert(&self, request: &RefundRequest) -> Result<(), RepositoryError>;

    async fn get(&self, id: RefundRequestId) -> Result<Option<RefundRequest>, RepositoryError>;

    /// All requests for an order, oldest first.
    async fn list_for_order(&self, order_id: OrderId)
    -> Result<Vec<RefundRequest>, RepositoryError>;

    /// Remember the provider's refund id before the request is resolved, so a
    /// later attempt can look it up instead of creating a second refund.
    async fn record_provider_refund(
        &self,
        id: RefundRequestId,
        provider_refund_id: &ProviderRefundId,
    ) -> Result<(), RepositoryError>;

    /// Resolve a pending request. Returns `None` if it was no longer pending.
    async fn resolve(
        &self,
        id: RefundRequestId,
        resolution: &RefundResolution,
    ) -> Result<Option<RefundRequest>, RepositoryError>;
}

/// Idempotency ledger for provider events.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Record an event. Returns `false` if `(intent_id, event_type)` was
    /// already recorded, in which case nothing is written.
    async fn record(&self, event: &ProcessedEvent) -> Result<bool, RepositoryError>;

    /// Forget an event so a redelivery is processed again. Used when applying
    /// a recorded event failed part way.
    async fn release(
        &self,
        intent_id: &PaymentIntentId,
        event_type: &str,
    ) -> Result<(), RepositoryError>;

    async fn list_for_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Vec<ProcessedEvent>, RepositoryError>;
}

/// Per-user cart storage.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Load a user's cart; an empty cart if none is stored.
    async fn load(&self, user_id: UserId) -> Result<Cart, RepositoryError>;

    async fn save(&self, user_id: UserId, cart: &Cart) -> Result<(), RepositoryError>;

    async fn clear(&self, user_id: UserId) -> Result<(), RepositoryError>;
}

/// The full set of repositories behind one backend.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub refunds: Arc<dyn RefundRepository>,
    pub events: Arc<dyn EventLedger>,
    pub carts: Arc<dyn CartStore>,
}

impl Repositories {
    /// Process-local repositories. Contents are lost on restart.
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            orders: store.clone(),
            refunds: store.clone(),
            events: store.clone(),
            carts: store,
        }
    }

    /// `PostgreSQL` repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            orders: store.clone(),
            refunds: store.clone(),
            events: store.clone(),
            carts: store,
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
