//! Orders.

use chrono::{DateTime, Utc};
use koi_core::{
    CartSnapshot, CurrencyCode, Money, OrderId, OrderStatus, PaymentIntentId, PaymentIntentStatus,
    PaymentMethod, PriceQuote, UserId,
};
use rust_decimal::Decimal;
use serde::Serialize;

/// A placed order.
///
/// `payment_intent_id` is assigned once, when the order is created, and never
/// changes. Cash-on-delivery orders have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub snapshot: CartSnapshot,
    pub quote: PriceQuote,
    pub currency: CurrencyCode,
    pub payment_method: PaymentMethod,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub client_secret: Option<String>,
    /// Last provider status we acted on.
    pub intent_status: Option<PaymentIntentStatus>,
    pub status: OrderStatus,
    /// The failed or cancelled order this one retries.
    pub retry_of: Option<OrderId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Amount charged.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.quote.total
    }

    #[must_use]
    pub const fn total_money(&self) -> Money {
        Money::new(self.quote.total, self.currency)
    }

    /// Apply a status change in memory. Callers have already checked `from`.
    pub fn apply(&mut self, change: &StatusChange, at: DateTime<Utc>) {
        self.status = change.to;
        if let Some(intent_status) = change.intent_status {
            self.intent_status = Some(intent_status);
        }
        if let Some(reason) = &change.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
        self.updated_at = at;
    }

    /// Client-facing representation.
    #[must_use]
    pub fn view(&self) -> OrderView {
        OrderView {
            id: self.id,
            status: self.status,
            payment_method: self.payment_method,
            payment_intent_id: self.payment_intent_id.clone(),
            subtotal: self.quote.subtotal,
            discount: self.quote.discount,
            shipping: self.quote.shipping,
            total: self.quote.total,
            currency: self.currency,
            coupon: self
                .snapshot
                .coupon
                .as_ref()
                .map(|c| c.code.to_string()),
            item_count: self
                .snapshot
                .lines
                .iter()
                .fold(0u32, |acc, line| acc.saturating_add(line.quantity)),
            retry_of: self.retry_of,
            failure_reason: self.failure_reason.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A compare-and-set status update: applied only if the order is still in `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub intent_status: Option<PaymentIntentStatus>,
    pub failure_reason: Option<String>,
}

impl StatusChange {
    #[must_use]
    pub const fn new(from: OrderStatus, to: OrderStatus) -> Self {
        Self {
            from,
            to,
            intent_status: None,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn with_intent_status(mut self, status: PaymentIntentStatus) -> Self {
        self.intent_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = reason;
        self
    }
}

/// Order as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub coupon: Option<String>,
    pub item_count: u32,
    pub retry_of: Option<OrderId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
