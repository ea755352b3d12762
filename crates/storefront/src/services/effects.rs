//! Business side effects of order transitions.
//!
//! Effects fire only when a transition is actually applied, never for a
//! duplicate or anomalous provider event. They are best-effort: a failing
//! effect must not undo the transition, so the trait methods return nothing.

use async_trait::async_trait;
use tracing::info;

use crate::models::{Order, RefundRequest};

/// Hooks invoked after an order changes state.
#[async_trait]
pub trait OrderEffects: Send + Sync {
    /// The order moved to `paid`.
    async fn on_paid(&self, order: &Order);

    /// The order moved to `failed` or `cancelled` through the provider.
    async fn on_payment_failed(&self, order: &Order);

    /// A refund completed and the order moved to `refunded`.
    async fn on_refunded(&self, order: &Order, refund: &RefundRequest);
}

/// Default effects: structured logs plus a Sentry breadcrumb.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEffects;

#[async_trait]
impl OrderEffects for LoggingEffects {
    async fn on_paid(&self, order: &Order) {
        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            total = %order.total_money(),
            "Order confirmed"
        );
        crate::error::add_breadcrumb("order", &format!("order {} paid", order.id), None);
    }

    async fn on_payment_failed(&self, order: &Order) {
        info!(
            order_id = %order.id,
            status = %order.status,
            reason = order.failure_reason.as_deref().unwrap_or("unknown"),
            "Order payment did not complete"
        );
        crate::error::add_breadcrumb(
            "order",
            &format!("order {} {}", order.id, order.status),
            None,
        );
    }

    async fn on_refunded(&self, order: &Order, refund: &RefundRequest) {
        info!(
            order_id = %order.id,
            refund_id = %refund.id,
            amount = %refund.amount,
            "Order refunded"
        );
        crate::error::add_breadcrumb("refund", &format!("order {} refunded", order.id), None);
    }
}
