//! Operator refund workflow.
//!
//! A refund starts as a pending request and is resolved exactly once, either
//! approved (money returned, order `refunded`) or rejected. Approval runs
//! under the order lock and sends the request id to the provider as the
//! idempotency key, so approving again after a timeout cannot refund twice.

use std::sync::Arc;

use chrono::Utc;
use koi_core::{
    OrderId, PaymentIntentId, ProviderRefundId, RefundRequestId, RefundStatus,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{OrderReconciler, Operator, ReconcileError};
use crate::db::Repositories;
use crate::gateway::{PaymentGateway, ProviderRefundStatus, RefundCall, RefundStatusView};
use crate::models::{RefundRequest, RefundResolution};

/// Parameters for [`RefundWorkflow::request`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRefund {
    pub order_id: OrderId,
    /// Must match the order's intent when given.
    #[serde(default)]
    pub payment_intent_id: Option<PaymentIntentId>,
    pub amount: Decimal,
    pub reason: String,
}

struct RefundInner {
    repos: Repositories,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: OrderReconciler,
}

/// Creates and resolves refund requests. Cheap to clone.
#[derive(Clone)]
pub struct RefundWorkflow {
    inner: Arc<RefundInner>,
}

impl RefundWorkflow {
    /// The workflow shares the reconciler's lock table.
    #[must_use]
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        reconciler: OrderReconciler,
    ) -> Self {
        Self {
            inner: Arc::new(RefundInner {
                repos,
                gateway,
                reconciler,
            }),
        }
    }

    /// Open a pending refund request.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` when the amount is not positive or exceeds the order total
    /// - `Validation` for a blank reason or an intent that is not the order's
    /// - `StateConflict` when the order is not refundable or already has a
    ///   pending request
    #[instrument(
        skip(self, operator, new),
        fields(operator = %operator.name, order_id = %new.order_id, amount = %new.amount)
    )]
    pub async fn request(
        &self,
        operator: &Operator,
        new: NewRefund,
    ) -> Result<RefundRequest, ReconcileError> {
        if new.amount <= Decimal::ZERO {
            return Err(ReconcileError::InvalidAmount(new.amount));
        }
        let reason = new.reason.trim();
        if reason.is_empty() {
            return Err(ReconcileError::Validation(
                "refund reason is required".to_string(),
            ));
        }

        let _guard = self.inner.reconciler.locks().lock(new.order_id).await;
        let order = self.inner.reconciler.load(new.order_id).await?;

        if let Some(intent) = &new.payment_intent_id
            && order.payment_intent_id.as_ref() != Some(intent)
        {
            return Err(ReconcileError::Validation(format!(
                "payment intent {intent} does not belong to order {}",
                order.id
            )));
        }
        if new.amount > order.total() {
            return Err(ReconcileError::InvalidAmount(new.amount));
        }
        if !order.status.is_refundable() {
            return Err(ReconcileError::StateConflict(format!(
                "order {} is {} and cannot be refunded",
                order.id, order.status
            )));
        }

        let existing = self.inner.repos.refunds.list_for_order(order.id).await?;
        if let Some(pending) = existing.iter().find(|r| r.status == RefundStatus::Pending) {
            return Err(ReconcileError::StateConflict(format!(
                "order {} already has pending refund request {}",
                order.id, pending.id
            )));
        }

        let request = RefundRequest {
            id: RefundRequestId::generate(),
            order_id: order.id,
            payment_intent_id: order.payment_intent_id.clone(),
            amount: new.amount,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            provider_refund_id: None,
            requested_by: operator.name.clone(),
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.inner.repos.refunds.insert(&request).await?;

        info!(refund_id = %request.id, "Refund requested");
        Ok(request)
    }

    /// Approve a pending request: refund through the provider, then mark the
    /// request completed and the order refunded.
    ///
    /// Cash-on-delivery orders complete locally.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the request is already resolved, the order
    /// is no longer refundable, or the provider reports the refund failed.
    /// Provider errors leave the request pending.
    #[instrument(skip(self, operator), fields(operator = %operator.name, refund_id = %refund_id))]
    pub async fn approve(
        &self,
        operator: &Operator,
        refund_id: RefundRequestId,
    ) -> Result<RefundRequest, ReconcileError> {
        let order_id = self.get(refund_id).await?.order_id;
        let _guard = self.inner.reconciler.locks().lock(order_id).await;

        let request = self.pending(refund_id).await?;
        let order = self.inner.reconciler.load(order_id).await?;
        if !order.status.is_refundable() {
            return Err(ReconcileError::StateConflict(format!(
                "order {order_id} is {} and cannot be refunded",
                order.status
            )));
        }

        let provider_refund_id = match order.payment_intent_id {
            Some(intent) => Some(self.settle_with_provider(&request, intent).await?),
            None => None,
        };

        let resolution = RefundResolution {
            status: RefundStatus::Completed,
            resolved_by: operator.name.clone(),
            provider_refund_id,
            resolved_at: Utc::now(),
        };
        let resolved = self.resolve(refund_id, &resolution).await?;

        let refunded = self.inner.reconciler.mark_refunded(order_id).await?;
        self.inner
            .reconciler
            .effects()
            .on_refunded(&refunded, &resolved)
            .await;

        info!(%order_id, provider_refund_id = ?resolved.provider_refund_id, "Refund completed");
        Ok(resolved)
    }

    /// Ensure the provider holds a live refund for this request and return
    /// its id. An id recorded by an earlier attempt is looked up rather than
    /// created again.
    async fn settle_with_provider(
        &self,
        request: &RefundRequest,
        intent: PaymentIntentId,
    ) -> Result<ProviderRefundId, ReconcileError> {
        if let Some(existing) = &request.provider_refund_id {
            let view = self
                .inner
                .gateway
                .get_refund_status(existing, &intent)
                .await?;
            return match view.status {
                ProviderRefundStatus::Succeeded | ProviderRefundStatus::Pending => {
                    info!(provider_refund_id = %existing, status = %view.status, "Reusing earlier provider refund");
                    Ok(existing.clone())
                }
                ProviderRefundStatus::Failed => Err(Self::provider_failed(existing)),
            };
        }

        // Detached so a dropped request cannot lose the provider's refund id
        let gateway = self.inner.gateway.clone();
        let repos = self.inner.repos.clone();
        let request_id = request.id;
        let amount = request.amount;
        let reason = request.reason.clone();

        let refund = tokio::spawn(async move {
            let refund = gateway
                .create_refund(RefundCall {
                    intent_id: &intent,
                    amount,
                    reason: &reason,
                    request_id,
                })
                .await?;
            repos
                .refunds
                .record_provider_refund(request_id, &refund.id)
                .await?;
            Ok::<_, ReconcileError>(refund)
        })
        .await??;

        if refund.status == ProviderRefundStatus::Failed {
            return Err(Self::provider_failed(&refund.id));
        }
        Ok(refund.id)
    }

    fn provider_failed(refund_id: &ProviderRefundId) -> ReconcileError {
        warn!(provider_refund_id = %refund_id, "Provider reports refund failed");
        ReconcileError::StateConflict(format!(
            "provider refund {refund_id} failed; reject this request and open a new one"
        ))
    }

    /// Reject a pending request. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` if the request is already resolved.
    #[instrument(skip(self, operator), fields(operator = %operator.name, refund_id = %refund_id))]
    pub async fn reject(
        &self,
        operator: &Operator,
        refund_id: RefundRequestId,
    ) -> Result<RefundRequest, ReconcileError> {
        let order_id = self.get(refund_id).await?.order_id;
        let _guard = self.inner.reconciler.locks().lock(order_id).await;
        self.pending(refund_id).await?;

        let resolution = RefundResolution {
            status: RefundStatus::Rejected,
            resolved_by: operator.name.clone(),
            provider_refund_id: None,
            resolved_at: Utc::now(),
        };
        let resolved = self.resolve(refund_id, &resolution).await?;

        info!(%order_id, "Refund rejected");
        Ok(resolved)
    }

    /// Provider view of the refund behind a request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the request was never submitted to the provider,
    /// `Validation` if `intent_id` is not the request's intent.
    pub async fn status(
        &self,
        refund_id: RefundRequestId,
        intent_id: &PaymentIntentId,
    ) -> Result<RefundStatusView, ReconcileError> {
        let request = self.get(refund_id).await?;
        if request.payment_intent_id.as_ref() != Some(intent_id) {
            return Err(ReconcileError::Validation(format!(
                "payment intent {intent_id} does not match refund request {refund_id}"
            )));
        }
        let provider_refund_id = request.provider_refund_id.ok_or_else(|| {
            ReconcileError::NotFound(format!("provider refund for request {refund_id}"))
        })?;

        Ok(self
            .inner
            .gateway
            .get_refund_status(&provider_refund_id, intent_id)
            .await?)
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn get(&self, refund_id: RefundRequestId) -> Result<RefundRequest, ReconcileError> {
        self.inner
            .repos
            .refunds
            .get(refund_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("refund request {refund_id}")))
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown order.
    pub async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<RefundRequest>, ReconcileError> {
        self.inner.reconciler.load(order_id).await?;
        Ok(self.inner.repos.refunds.list_for_order(order_id).await?)
    }

    async fn pending(&self, refund_id: RefundRequestId) -> Result<RefundRequest, ReconcileError> {
        let request = self.get(refund_id).await?;
        if request.status.is_resolved() {
            return Err(ReconcileError::StateConflict(format!(
                "refund request {refund_id} is already {}",
                request.status
            )));
        }
        Ok(request)
    }

    async fn resolve(
        &self,
        refund_id: RefundRequestId,
        resolution: &RefundResolution,
    ) -> Result<RefundRequest, ReconcileError> {
        self.inner
            .repos
            .refunds
            .resolve(refund_id, resolution)
            .await?
            .ok_or_else(|| {
                ReconcileError::StateConflict(format!(
                    "refund request {refund_id} was resolved concurrently"
                ))
            })
    }
}
