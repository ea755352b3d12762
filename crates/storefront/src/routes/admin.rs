//! Operator route handlers: refunds, fulfillment and diagnostics.
//!
//! Every handler requires the operator key (see [`RequireOperator`]).

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use koi_core::{OrderId, OrderStatus, PaymentIntentId, ProviderRefundId, RefundRequestId, RefundStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::gateway::RefundStatusView;
use crate::middleware::RequireOperator;
use crate::models::{OrderView, ProcessedEvent, RefundRequest};
use crate::services::NewRefund;
use crate::state::AppState;

/// Short form of a refund request returned by mutating endpoints.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub refund_id: RefundRequestId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub provider_refund_id: Option<ProviderRefundId>,
}

impl From<RefundRequest> for RefundResponse {
    fn from(request: RefundRequest) -> Self {
        Self {
            refund_id: request.id,
            order_id: request.order_id,
            amount: request.amount,
            status: request.status,
            provider_refund_id: request.provider_refund_id,
        }
    }
}

/// Query of `GET /admin/refunds/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct RefundStatusQuery {
    pub payment_intent_id: String,
}

/// Body of `POST /admin/orders/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct AdvanceOrder {
    pub status: OrderStatus,
}

/// Open a refund request.
#[instrument(skip(state, operator, body), fields(operator = %operator.name, order_id = %body.order_id))]
pub async fn create_refund(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Json(body): Json<NewRefund>,
) -> Result<(StatusCode, Json<RefundResponse>)> {
    let request = state.refunds().request(&operator, body).await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

#[instrument(skip(state, operator), fields(operator = %operator.name, %refund_id))]
pub async fn approve_refund(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Path(refund_id): Path<RefundRequestId>,
) -> Result<Json<RefundResponse>> {
    let request = state.refunds().approve(&operator, refund_id).await?;
    Ok(Json(request.into()))
}

#[instrument(skip(state, operator), fields(operator = %operator.name, %refund_id))]
pub async fn reject_refund(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Path(refund_id): Path<RefundRequestId>,
) -> Result<Json<RefundResponse>> {
    let request = state.refunds().reject(&operator, refund_id).await?;
    Ok(Json(request.into()))
}

/// Full refund request record.
pub async fn show_refund(
    State(state): State<AppState>,
    RequireOperator(_operator): RequireOperator,
    Path(refund_id): Path<RefundRequestId>,
) -> Result<Json<RefundRequest>> {
    Ok(Json(state.refunds().get(refund_id).await?))
}

/// Provider-side status of a submitted refund.
#[instrument(skip(state, _operator, query), fields(%refund_id))]
pub async fn refund_status(
    State(state): State<AppState>,
    RequireOperator(_operator): RequireOperator,
    Path(refund_id): Path<RefundRequestId>,
    Query(query): Query<RefundStatusQuery>,
) -> Result<Json<RefundStatusView>> {
    let intent_id = PaymentIntentId::new(query.payment_intent_id);
    Ok(Json(state.refunds().status(refund_id, &intent_id).await?))
}

/// Operator view of any order.
pub async fn show_order(
    State(state): State<AppState>,
    RequireOperator(_operator): RequireOperator,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderView>> {
    Ok(Json(state.reconciler().load(order_id).await?.view()))
}

/// Fulfillment and cash-on-delivery transitions.
#[instrument(skip(state, operator, body), fields(operator = %operator.name, %order_id, target = %body.status))]
pub async fn advance_order(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Path(order_id): Path<OrderId>,
    Json(body): Json<AdvanceOrder>,
) -> Result<Json<OrderView>> {
    let order = state
        .reconciler()
        .advance(&operator, order_id, body.status)
        .await?;
    Ok(Json(order.view()))
}

pub async fn order_refunds(
    State(state): State<AppState>,
    RequireOperator(_operator): RequireOperator,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<RefundRequest>>> {
    Ok(Json(state.refunds().list_for_order(order_id).await?))
}

/// Idempotency ledger entries for an intent, oldest first.
pub async fn intent_events(
    State(state): State<AppState>,
    RequireOperator(_operator): RequireOperator,
    Path(intent_id): Path<String>,
) -> Result<Json<Vec<ProcessedEvent>>> {
    let intent_id = PaymentIntentId::new(intent_id);
    Ok(Json(state.repos().events.list_for_intent(&intent_id).await?))
}
