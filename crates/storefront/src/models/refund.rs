//! Refund requests.

use chrono::{DateTime, Utc};
use koi_core::{OrderId, PaymentIntentId, ProviderRefundId, RefundRequestId, RefundStatus};
use rust_decimal::Decimal;
use serde::Serialize;

/// An operator's request to return money for an order.
///
/// Completed and rejected requests are never modified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundRequest {
    pub id: RefundRequestId,
    pub order_id: OrderId,
    /// Absent for cash-on-delivery orders.
    pub payment_intent_id: Option<PaymentIntentId>,
    pub amount: Decimal,
    pub reason: String,
    pub status: RefundStatus,
    /// Set as soon as the provider acknowledges the refund.
    pub provider_refund_id: Option<ProviderRefundId>,
    pub requested_by: String,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Final outcome written when a pending request is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundResolution {
    pub status: RefundStatus,
    pub resolved_by: String,
    pub provider_refund_id: Option<ProviderRefundId>,
    pub resolved_at: DateTime<Utc>,
}

impl RefundRequest {
    /// Apply a resolution in memory.
    pub fn resolve(&mut self, resolution: &RefundResolution) {
        self.status = resolution.status;
        self.resolved_by = Some(resolution.resolved_by.clone());
        self.resolved_at = Some(resolution.resolved_at);
        if let Some(id) = &resolution.provider_refund_id {
            self.provider_refund_id = Some(id.clone());
        }
    }
}
