//! Order lifecycle reconciliation.
//!
//! The reconciler is the only component that moves an order between payment
//! states. Provider events arrive twice (webhook and status poll), out of
//! order, and possibly duplicated; all of them funnel through
//! [`OrderReconciler::apply_event`], which is idempotent per
//! `(intent_id, event_type)`.
//!
//! # Ordering guarantees
//!
//! - Every mutation of an order happens under its [`OrderLocks`] entry
//! - Status writes are compare-and-set on the prior status
//! - Once an order leaves `pending`, provider events can no longer move it;
//!   contradicting events are recorded as anomalies

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use koi_core::{
    CartSnapshot, CurrencyCode, OrderId, OrderStatus, PaymentIntentId, PaymentIntentStatus,
    PaymentMethod, PriceQuote, UserId,
};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::{Caller, OrderEffects, OrderLocks, Operator, ReconcileError};
use crate::db::Repositories;
use crate::gateway::{GatewayError, PaymentGateway, PaymentIntent};
use crate::models::{EventOutcome, Order, ProcessedEvent, StatusChange};
use crate::webhook::{WebhookEvent, WebhookEventKind};

/// How long a polled intent status is served from cache.
const POLL_CACHE_TTL: Duration = Duration::from_secs(2);
const POLL_CACHE_CAPACITY: u64 = 10_000;

/// Terminal result of a payment attempt, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentOutcome {
    /// Ledger key. Webhooks and polls for the same outcome share it.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Succeeded => "payment_intent.succeeded",
            Self::Failed => "payment_intent.payment_failed",
            Self::Cancelled => "payment_intent.cancelled",
        }
    }

    /// Order status this outcome moves a pending order to.
    #[must_use]
    pub const fn target(self) -> OrderStatus {
        match self {
            Self::Succeeded => OrderStatus::Paid,
            Self::Failed => OrderStatus::Failed,
            Self::Cancelled => OrderStatus::Cancelled,
        }
    }

    #[must_use]
    pub const fn intent_status(self) -> PaymentIntentStatus {
        match self {
            Self::Succeeded => PaymentIntentStatus::Succeeded,
            Self::Failed => PaymentIntentStatus::Failed,
            Self::Cancelled => PaymentIntentStatus::Cancelled,
        }
    }

    /// The outcome a final intent status stands for. `None` while in flight.
    #[must_use]
    pub const fn from_intent_status(status: PaymentIntentStatus) -> Option<Self> {
        match status {
            PaymentIntentStatus::Succeeded => Some(Self::Succeeded),
            PaymentIntentStatus::Failed => Some(Self::Failed),
            PaymentIntentStatus::Cancelled => Some(Self::Cancelled),
            PaymentIntentStatus::Initial | PaymentIntentStatus::Pending => None,
        }
    }
}

/// A provider event, normalized from either a webhook or a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub intent_id: PaymentIntentId,
    pub outcome: PaymentOutcome,
    pub failure_reason: Option<String>,
}

impl PaymentEvent {
    #[must_use]
    pub const fn new(intent_id: PaymentIntentId, outcome: PaymentOutcome) -> Self {
        Self {
            intent_id,
            outcome,
            failure_reason: None,
        }
    }

    /// Normalize a verified webhook. `None` for event types we do not act on.
    #[must_use]
    pub fn from_webhook(event: &WebhookEvent) -> Option<Self> {
        let outcome = match &event.kind {
            WebhookEventKind::PaymentSucceeded => PaymentOutcome::Succeeded,
            WebhookEventKind::PaymentFailed => PaymentOutcome::Failed,
            WebhookEventKind::PaymentCancelled => PaymentOutcome::Cancelled,
            WebhookEventKind::Other(_) => return None,
        };
        Some(Self {
            intent_id: event.intent_id.clone(),
            outcome,
            failure_reason: event.failure_reason.clone(),
        })
    }
}

/// What [`OrderReconciler::apply_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The order moved.
    Applied {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// This `(intent, event type)` was already processed.
    Duplicate,
    /// The order had already left `pending` in another direction.
    Anomaly {
        order_id: OrderId,
        current: OrderStatus,
    },
    /// Nothing to do: unknown intent, or the order already has that status.
    Ignored,
}

/// Returned when an order is placed or retried.
///
/// The only place the client secret leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub client_secret: Option<String>,
    pub status: OrderStatus,
    pub total: Decimal,
    pub currency: CurrencyCode,
}

impl CheckoutSession {
    fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            payment_intent_id: order.payment_intent_id.clone(),
            client_secret: order.client_secret.clone(),
            status: order.status,
            total: order.total(),
            currency: order.currency,
        }
    }
}

/// Result of a payment status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntentStatusView {
    pub status: PaymentIntentStatus,
    pub order_id: OrderId,
    pub order_status: OrderStatus,
}

/// Everything needed to persist a new order except its id and intent.
struct OrderDraft {
    user_id: UserId,
    snapshot: CartSnapshot,
    quote: PriceQuote,
    currency: CurrencyCode,
    method: PaymentMethod,
    retry_of: Option<OrderId>,
}

impl OrderDraft {
    fn retry_of(original: &Order) -> Self {
        Self {
            user_id: original.user_id,
            snapshot: original.snapshot.clone(),
            quote: original.quote,
            currency: original.currency,
            method: original.payment_method,
            retry_of: Some(original.id),
        }
    }
}

struct ReconcilerInner {
    repos: Repositories,
    gateway: Arc<dyn PaymentGateway>,
    effects: Arc<dyn OrderEffects>,
    locks: OrderLocks,
    poll_cache: Cache<PaymentIntentId, PaymentIntentStatus>,
}

/// Drives orders through the payment state machine. Cheap to clone.
#[derive(Clone)]
pub struct OrderReconciler {
    inner: Arc<ReconcilerInner>,
}

impl OrderReconciler {
    #[must_use]
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        effects: Arc<dyn OrderEffects>,
        locks: OrderLocks,
    ) -> Self {
        let poll_cache = Cache::builder()
            .max_capacity(POLL_CACHE_CAPACITY)
            .time_to_live(POLL_CACHE_TTL)
            .build();

        Self {
            inner: Arc::new(ReconcilerInner {
                repos,
                gateway,
                effects,
                locks,
                poll_cache,
            }),
        }
    }

    /// The lock table shared with the refund workflow.
    #[must_use]
    pub fn locks(&self) -> &OrderLocks {
        &self.inner.locks
    }

    #[must_use]
    pub fn effects(&self) -> &Arc<dyn OrderEffects> {
        &self.inner.effects
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Place an order for a frozen cart.
    ///
    /// For card payments the provider intent is created first, keyed by the
    /// new order id, and the order is persisted only once that succeeds.
    /// Cash-on-delivery orders are persisted without an intent.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty cart or a quote that does not match
    /// it, `Gateway` if the provider call fails (including a repeated
    /// timeout), or `Repository` if the order cannot be stored.
    #[instrument(
        skip(self, snapshot, quote),
        fields(user_id = %caller.user_id, total = %quote.total, method = %method)
    )]
    pub async fn create_order(
        &self,
        caller: Caller,
        snapshot: CartSnapshot,
        quote: PriceQuote,
        currency: CurrencyCode,
        method: PaymentMethod,
    ) -> Result<CheckoutSession, ReconcileError> {
        if snapshot.is_empty() {
            return Err(ReconcileError::Validation("cart is empty".to_string()));
        }
        if snapshot.subtotal() != quote.subtotal {
            return Err(ReconcileError::Validation(
                "price quote does not match the cart".to_string(),
            ));
        }

        self.place(OrderDraft {
            user_id: caller.user_id,
            snapshot,
            quote,
            currency,
            method,
            retry_of: None,
        })
        .await
    }

    /// Create a successor for a failed or cancelled order.
    ///
    /// The successor carries the same snapshot and total and a fresh intent.
    /// The original order is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the order is not failed or cancelled, or a
    /// live successor already exists.
    #[instrument(skip(self), fields(user_id = %caller.user_id, order_id = %order_id))]
    pub async fn retry_payment(
        &self,
        caller: Caller,
        order_id: OrderId,
    ) -> Result<CheckoutSession, ReconcileError> {
        let this = self.clone();
        tokio::spawn(async move { this.retry_detached(caller, order_id).await }.in_current_span())
            .await?
    }

    /// Successor check and placement under one lock guard, in a task that
    /// outlives the request.
    async fn retry_detached(
        &self,
        caller: Caller,
        order_id: OrderId,
    ) -> Result<CheckoutSession, ReconcileError> {
        let _guard = self.inner.locks.lock(order_id).await;
        let original = self.owned_order(caller, order_id).await?;

        if !matches!(
            original.status,
            OrderStatus::Failed | OrderStatus::Cancelled
        ) {
            return Err(ReconcileError::StateConflict(format!(
                "order {order_id} is {}; only failed or cancelled orders can be retried",
                original.status
            )));
        }

        if let Some(successor) = self.inner.repos.orders.find_successor(order_id).await?
            && !matches!(
                successor.status,
                OrderStatus::Failed | OrderStatus::Cancelled
            )
        {
            return Err(ReconcileError::StateConflict(format!(
                "order {order_id} already has an active retry {}",
                successor.id
            )));
        }

        let session = self.place_detached(OrderDraft::retry_of(&original)).await?;
        info!(successor_id = %session.order_id, "Payment retry created");
        Ok(session)
    }

    /// Create the intent and persist the order in a detached task, so a
    /// client disconnect cannot abandon a charge half way.
    async fn place(&self, draft: OrderDraft) -> Result<CheckoutSession, ReconcileError> {
        let this = self.clone();
        tokio::spawn(async move { this.place_detached(draft).await }.in_current_span()).await?
    }

    async fn place_detached(&self, draft: OrderDraft) -> Result<CheckoutSession, ReconcileError> {
        let order_id = OrderId::generate();
        let total = draft.quote.total;

        let intent = if draft.method.uses_gateway() {
            if total <= Decimal::ZERO {
                return Err(ReconcileError::InvalidAmount(total));
            }
            Some(self.create_intent(order_id, total, draft.currency).await?)
        } else {
            None
        };

        let now = Utc::now();
        let order = Order {
            id: order_id,
            user_id: draft.user_id,
            snapshot: draft.snapshot,
            quote: draft.quote,
            currency: draft.currency,
            payment_method: draft.method,
            payment_intent_id: intent.as_ref().map(|i| i.id.clone()),
            client_secret: intent.as_ref().map(|i| i.client_secret.clone()),
            intent_status: intent.as_ref().map(|i| i.status),
            status: OrderStatus::Pending,
            retry_of: draft.retry_of,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.inner.repos.orders.insert(&order).await {
            error!(
                order_id = %order.id,
                intent_id = ?order.payment_intent_id,
                error = %err,
                "Failed to persist order after creating its payment intent"
            );
            return Err(err.into());
        }

        info!(
            order_id = %order.id,
            intent_id = ?order.payment_intent_id,
            total = %order.total_money(),
            "Order created"
        );
        Ok(CheckoutSession::for_order(&order))
    }

    /// Create an intent, re-issuing once with the same request id on timeout.
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Decimal,
        currency: CurrencyCode,
    ) -> Result<PaymentIntent, GatewayError> {
        match self
            .inner
            .gateway
            .create_intent(order_id, amount, currency)
            .await
        {
            Err(GatewayError::Timeout) => {
                warn!(%order_id, "Intent creation timed out; re-issuing");
                self.inner
                    .gateway
                    .create_intent(order_id, amount, currency)
                    .await
            }
            result => result,
        }
    }

    // =========================================================================
    // Provider events
    // =========================================================================

    /// Apply a provider event to the order owning its intent.
    ///
    /// Runs in its own task: once the ledger entry is written, the status
    /// write and effects complete even if the delivering request is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if the ledger or the order cannot be written. In
    /// that case the ledger entry is released so a redelivery is processed.
    #[instrument(
        skip(self, event),
        fields(intent_id = %event.intent_id, event_type = event.outcome.event_type())
    )]
    pub async fn apply_event(&self, event: PaymentEvent) -> Result<ApplyOutcome, ReconcileError> {
        let this = self.clone();
        tokio::spawn(async move { this.apply_detached(event).await }.in_current_span()).await?
    }

    async fn apply_detached(&self, event: PaymentEvent) -> Result<ApplyOutcome, ReconcileError> {
        let Some(found) = self
            .inner
            .repos
            .orders
            .find_by_intent(&event.intent_id)
            .await?
        else {
            warn!("Event for unknown payment intent");
            return Ok(ApplyOutcome::Ignored);
        };

        let _guard = self.inner.locks.lock(found.id).await;
        let order = self.load(found.id).await?;
        let target = event.outcome.target();

        let outcome = if order.status == OrderStatus::Pending {
            EventOutcome::Applied
        } else if order.status == target {
            EventOutcome::Ignored
        } else {
            EventOutcome::Anomaly
        };

        let entry = ProcessedEvent {
            intent_id: event.intent_id.clone(),
            event_type: event.outcome.event_type().to_string(),
            order_id: order.id,
            outcome,
            received_at: Utc::now(),
        };
        if !self.inner.repos.events.record(&entry).await? {
            debug!(order_id = %order.id, "Duplicate event");
            return Ok(ApplyOutcome::Duplicate);
        }

        match outcome {
            EventOutcome::Ignored => {
                debug!(order_id = %order.id, status = %order.status, "Order already in target state");
                Ok(ApplyOutcome::Ignored)
            }
            EventOutcome::Anomaly => {
                warn!(
                    order_id = %order.id,
                    current = %order.status,
                    attempted = %target,
                    "Provider event contradicts order state; recorded without applying"
                );
                Ok(ApplyOutcome::Anomaly {
                    order_id: order.id,
                    current: order.status,
                })
            }
            EventOutcome::Applied => self.apply_transition(&order, &event, &entry).await,
        }
    }

    async fn apply_transition(
        &self,
        order: &Order,
        event: &PaymentEvent,
        entry: &ProcessedEvent,
    ) -> Result<ApplyOutcome, ReconcileError> {
        let target = event.outcome.target();
        let change = StatusChange::new(order.status, target)
            .with_intent_status(event.outcome.intent_status())
            .with_failure_reason(event.failure_reason.clone());

        let updated = match self.inner.repos.orders.transition(order.id, &change).await {
            Ok(updated) => updated,
            Err(err) => {
                if let Err(release_err) = self
                    .inner
                    .repos
                    .events
                    .release(&entry.intent_id, &entry.event_type)
                    .await
                {
                    error!(error = %release_err, "Failed to release ledger entry");
                }
                return Err(err.into());
            }
        };

        let Some(updated) = updated else {
            // Another process moved the order between our read and write
            let current = self
                .inner
                .repos
                .orders
                .get(order.id)
                .await?
                .map_or(order.status, |o| o.status);
            warn!(order_id = %order.id, %current, "Order changed concurrently; event not applied");
            return Ok(ApplyOutcome::Anomaly {
                order_id: order.id,
                current,
            });
        };

        info!(order_id = %order.id, from = %order.status, to = %target, "Order transitioned");
        self.inner.poll_cache.invalidate(&event.intent_id).await;

        if target == OrderStatus::Paid {
            self.inner.effects.on_paid(&updated).await;
        } else {
            self.inner.effects.on_payment_failed(&updated).await;
        }

        Ok(ApplyOutcome::Applied {
            order_id: order.id,
            from: order.status,
            to: target,
        })
    }

    /// Poll the provider for an intent's status.
    ///
    /// A final status is applied through [`Self::apply_event`], so polling
    /// and webhooks can race freely.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an intent no order owns, or `Gateway` if the
    /// provider cannot be reached.
    #[instrument(skip(self), fields(intent_id = %intent_id))]
    pub async fn sync_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<IntentStatusView, ReconcileError> {
        let order = self.order_for_intent(intent_id).await?;
        let status = self.poll_status(intent_id).await?;

        let order_status = match PaymentOutcome::from_intent_status(status) {
            Some(outcome) => {
                match self
                    .apply_event(PaymentEvent::new(intent_id.clone(), outcome))
                    .await?
                {
                    ApplyOutcome::Applied { to, .. } => to,
                    ApplyOutcome::Anomaly { current, .. } => current,
                    ApplyOutcome::Duplicate | ApplyOutcome::Ignored => {
                        self.load(order.id).await?.status
                    }
                }
            }
            None => order.status,
        };

        Ok(IntentStatusView {
            status,
            order_id: order.id,
            order_status,
        })
    }

    /// [`Self::sync_intent`] restricted to the order's owner.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` if the intent belongs to another user's order.
    pub async fn sync_intent_for(
        &self,
        caller: Caller,
        intent_id: &PaymentIntentId,
    ) -> Result<IntentStatusView, ReconcileError> {
        let order = self.order_for_intent(intent_id).await?;
        if order.user_id != caller.user_id {
            return Err(ReconcileError::Forbidden);
        }
        self.sync_intent(intent_id).await
    }

    async fn poll_status(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, ReconcileError> {
        if let Some(status) = self.inner.poll_cache.get(intent_id).await {
            debug!("Cache hit for intent status");
            return Ok(status);
        }

        let status = self.inner.gateway.get_intent_status(intent_id).await?;
        self.inner
            .poll_cache
            .insert(intent_id.clone(), status)
            .await;
        Ok(status)
    }

    // =========================================================================
    // Operator transitions
    // =========================================================================

    /// Move an order along fulfillment, or settle a cash-on-delivery order.
    ///
    /// Operators may set `processing`, `shipped` and `delivered`. For
    /// cash-on-delivery orders they may also record payment (`paid`) or
    /// cancel a pending order.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` for a transition the state machine or the
    /// payment method does not allow, `Validation` for statuses operators
    /// never set.
    #[instrument(skip(self, operator), fields(operator = %operator.name, order_id = %order_id, target = %target))]
    pub async fn advance(
        &self,
        operator: &Operator,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<Order, ReconcileError> {
        let _guard = self.inner.locks.lock(order_id).await;
        let order = self.load(order_id).await?;

        match target {
            OrderStatus::Processing | OrderStatus::Shipped | OrderStatus::Delivered => {}
            OrderStatus::Paid | OrderStatus::Cancelled
                if order.payment_method == PaymentMethod::CashOnDelivery => {}
            OrderStatus::Paid | OrderStatus::Cancelled => {
                return Err(ReconcileError::StateConflict(format!(
                    "{target} is reported by the payment provider for {} orders",
                    order.payment_method
                )));
            }
            OrderStatus::Refunded => {
                return Err(ReconcileError::StateConflict(
                    "refunds go through a refund request".to_string(),
                ));
            }
            OrderStatus::Pending | OrderStatus::Failed => {
                return Err(ReconcileError::Validation(format!(
                    "{target} cannot be set by an operator"
                )));
            }
        }

        if !order.status.can_transition_to(target) {
            return Err(ReconcileError::StateConflict(format!(
                "cannot move order {order_id} from {} to {target}",
                order.status
            )));
        }

        let updated = self
            .inner
            .repos
            .orders
            .transition(order_id, &StatusChange::new(order.status, target))
            .await?
            .ok_or_else(|| {
                ReconcileError::StateConflict(format!("order {order_id} changed concurrently"))
            })?;

        info!(from = %order.status, "Order advanced by operator");
        if target == OrderStatus::Paid {
            self.inner.effects.on_paid(&updated).await;
        }
        Ok(updated)
    }

    /// Move a refundable order to `refunded`.
    ///
    /// Does not take the order lock; the caller must already hold it.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the order is not refundable.
    pub async fn mark_refunded(&self, order_id: OrderId) -> Result<Order, ReconcileError> {
        let order = self.load(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Refunded) {
            return Err(ReconcileError::StateConflict(format!(
                "order {order_id} is {} and cannot be refunded",
                order.status
            )));
        }

        let updated = self
            .inner
            .repos
            .orders
            .transition(
                order_id,
                &StatusChange::new(order.status, OrderStatus::Refunded),
            )
            .await?
            .ok_or_else(|| {
                ReconcileError::StateConflict(format!("order {order_id} changed concurrently"))
            })?;

        info!(%order_id, from = %order.status, "Order refunded");
        Ok(updated)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Ownership-checked order read.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden`.
    pub async fn get_order(&self, caller: Caller, order_id: OrderId) -> Result<Order, ReconcileError> {
        self.owned_order(caller, order_id).await
    }

    /// Unchecked read for operator routes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn load(&self, order_id: OrderId) -> Result<Order, ReconcileError> {
        self.inner
            .repos
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("order {order_id}")))
    }

    async fn owned_order(&self, caller: Caller, order_id: OrderId) -> Result<Order, ReconcileError> {
        let order = self.load(order_id).await?;
        if order.user_id != caller.user_id {
            return Err(ReconcileError::Forbidden);
        }
        Ok(order)
    }

    async fn order_for_intent(&self, intent_id: &PaymentIntentId) -> Result<Order, ReconcileError> {
        self.inner
            .repos
            .orders
            .find_by_intent(intent_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("payment intent {intent_id}")))
    }
}
