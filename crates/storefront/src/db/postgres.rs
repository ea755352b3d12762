//! `PostgreSQL` repositories.
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds
//! without a live database. Status columns are plain `TEXT`; values are parsed
//! back through the core enums and anything unrecognised is reported as
//! `RepositoryError::DataCorruption`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use koi_core::{
    Cart, CartSnapshot, OrderId, PaymentIntentId, PriceQuote, ProviderRefundId, RefundRequestId,
    UserId,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{CartStore, EventLedger, OrderRepository, RefundRepository, RepositoryError};
use crate::models::{Order, ProcessedEvent, RefundRequest, RefundResolution, StatusChange};

const ORDER_COLUMNS: &str = r"
    id, user_id, snapshot, subtotal, discount, shipping, total, currency,
    payment_method, payment_intent_id, client_secret, intent_status, status,
    retry_of, failure_reason, created_at, updated_at
";

const REFUND_COLUMNS: &str = r"
    id, order_id, payment_intent_id, amount, reason, status, provider_refund_id,
    requested_by, resolved_by, created_at, resolved_at
";

/// Every repository backed by one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

fn map_unique(err: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(err)
}

// =============================================================================
// Orders
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    snapshot: Json<CartSnapshot>,
    subtotal: Decimal,
    discount: Decimal,
    shipping: Decimal,
    total: Decimal,
    currency: String,
    payment_method: String,
    payment_intent_id: Option<String>,
    client_secret: Option<String>,
    intent_status: Option<String>,
    status: String,
    retry_of: Option<Uuid>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            snapshot: row.snapshot.0,
            quote: PriceQuote {
                subtotal: row.subtotal,
                discount: row.discount,
                shipping: row.shipping,
                total: row.total,
            },
            currency: parse_column(&row.currency, "currency")?,
            payment_method: parse_column(&row.payment_method, "payment_method")?,
            payment_intent_id: row.payment_intent_id.map(PaymentIntentId::from),
            client_secret: row.client_secret,
            intent_status: row
                .intent_status
                .as_deref()
                .map(|s| parse_column(s, "intent_status"))
                .transpose()?,
            status: parse_column(&row.status, "status")?,
            retry_of: row.retry_of.map(OrderId::from_uuid),
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.orders (
                id, user_id, snapshot, subtotal, discount, shipping, total, currency,
                payment_method, payment_intent_id, client_secret, intent_status, status,
                retry_of, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(Json(&order.snapshot))
        .bind(order.quote.subtotal)
        .bind(order.quote.discount)
        .bind(order.quote.shipping)
        .bind(order.quote.total)
        .bind(order.currency.code())
        .bind(order.payment_method.as_str())
        .bind(order.payment_intent_id.as_ref().map(|id| id.as_str().to_owned()))
        .bind(order.client_secret.as_deref())
        .bind(order.intent_status.map(|s| s.as_str()))
        .bind(order.status.as_str())
        .bind(order.retry_of)
        .bind(order.failure_reason.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "order"))?;

        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE id = $1");
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql =
            format!("SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE payment_intent_id = $1");
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(intent_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_successor(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders
             WHERE retry_of = $1
             ORDER BY created_at DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!(
            "UPDATE storefront.orders
             SET status = $3,
                 intent_status = COALESCE($4, intent_status),
                 failure_reason = COALESCE($5, failure_reason),
                 updated_at = now()
             WHERE id = $1 AND status = $2
             RETURNING {ORDER_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .bind(change.intent_status.map(|s| s.as_str()))
            .bind(change.failure_reason.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Order::try_from(row).map(Some);
        }

        // Distinguish "lost the race" from "no such order"
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM storefront.orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match exists {
            Some(_) => Ok(None),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// =============================================================================
// Refund requests
// =============================================================================

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    order_id: Uuid,
    payment_intent_id: Option<String>,
    amount: Decimal,
    reason: String,
    status: String,
    provider_refund_id: Option<String>,
    requested_by: String,
    resolved_by: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<RefundRow> for RefundRequest {
    type Error = RepositoryError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RefundRequestId::from_uuid(row.id),
            order_id: OrderId::from_uuid(row.order_id),
            payment_intent_id: row.payment_intent_id.map(PaymentIntentId::from),
            amount: row.amount,
            reason: row.reason,
            status: parse_column(&row.status, "refund status")?,
            provider_refund_id: row.provider_refund_id.map(ProviderRefundId::from),
            requested_by: row.requested_by,
            resolved_by: row.resolved_by,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[async_trait]
impl RefundRepository for PgStore {
    async fn insert(&self, request: &RefundRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.refund_requests (
                id, order_id, payment_intent_id, amount, reason, status,
                provider_refund_id, requested_by, resolved_by, created_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(request.id)
        .bind(request.order_id)
        .bind(request.payment_intent_id.as_ref().map(|id| id.as_str().to_owned()))
        .bind(request.amount)
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.provider_refund_id.as_ref().map(|id| id.as_str().to_owned()))
        .bind(&request.requested_by)
        .bind(request.resolved_by.as_deref())
        .bind(request.created_at)
        .bind(request.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "refund request"))?;

        Ok(())
    }

    async fn get(&self, id: RefundRequestId) -> Result<Option<RefundRequest>, RepositoryError> {
        let sql = format!("SELECT {REFUND_COLUMNS} FROM storefront.refund_requests WHERE id = $1");
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(RefundRequest::try_from)
            .transpose()
    }

    async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<RefundRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM storefront.refund_requests
             WHERE order_id = $1
             ORDER BY created_at"
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(RefundRequest::try_from)
            .collect()
    }

    async fn record_provider_refund(
        &self,
        id: RefundRequestId,
        provider_refund_id: &ProviderRefundId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE storefront.refund_requests SET provider_refund_id = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(provider_refund_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn resolve(
        &self,
        id: RefundRequestId,
        resolution: &RefundResolution,
    ) -> Result<Option<RefundRequest>, RepositoryError> {
        let sql = format!(
            "UPDATE storefront.refund_requests
             SET status = $2,
                 resolved_by = $3,
                 resolved_at = $4,
                 provider_refund_id = COALESCE($5, provider_refund_id)
             WHERE id = $1 AND status = 'pending'
             RETURNING {REFUND_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .bind(resolution.status.as_str())
            .bind(&resolution.resolved_by)
            .bind(resolution.resolved_at)
            .bind(
                resolution
                    .provider_refund_id
                    .as_ref()
                    .map(|id| id.as_str().to_owned()),
            )
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return RefundRequest::try_from(row).map(Some);
        }

        match RefundRepository::get(self, id).await? {
            Some(_) => Ok(None),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// =============================================================================
// Processed events
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    intent_id: String,
    event_type: String,
    order_id: Uuid,
    outcome: String,
    received_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for ProcessedEvent {
    type Error = RepositoryError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            intent_id: PaymentIntentId::from(row.intent_id),
            event_type: row.event_type,
            order_id: OrderId::from_uuid(row.order_id),
            outcome: parse_column(&row.outcome, "event outcome")?,
            received_at: row.received_at,
        })
    }
}

#[async_trait]
impl EventLedger for PgStore {
    async fn record(&self, event: &ProcessedEvent) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO storefront.processed_events (intent_id, event_type, order_id, outcome, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (intent_id, event_type) DO NOTHING
            ",
        )
        .bind(event.intent_id.as_str())
        .bind(&event.event_type)
        .bind(event.order_id)
        .bind(event.outcome.as_str())
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        intent_id: &PaymentIntentId,
        event_type: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM storefront.processed_events WHERE intent_id = $1 AND event_type = $2",
        )
        .bind(intent_id.as_str())
        .bind(event_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Vec<ProcessedEvent>, RepositoryError> {
        sqlx::query_as::<_, EventRow>(
            r"
            SELECT intent_id, event_type, order_id, outcome, received_at
            FROM storefront.processed_events
            WHERE intent_id = $1
            ORDER BY received_at
            ",
        )
        .bind(intent_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ProcessedEvent::try_from)
        .collect()
    }
}

// =============================================================================
// Carts
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn load(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        let row: Option<(Json<Cart>,)> =
            sqlx::query_as("SELECT contents FROM storefront.carts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(cart),)| cart).unwrap_or_default())
    }

    async fn save(&self, user_id: UserId, cart: &Cart) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.carts (user_id, contents, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id) DO UPDATE
            SET contents = EXCLUDED.contents, updated_at = now()
            ",
        )
        .bind(user_id)
        .bind(Json(cart))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storefront.carts WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
