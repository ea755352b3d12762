//! Checkout and order route handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use koi_core::{CurrencyCode, OrderId, PaymentIntentId, PaymentMethod};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::{AppError, Result};
use crate::middleware::RequireCaller;
use crate::models::OrderView;
use crate::services::{CheckoutSession, IntentStatusView};
use crate::state::AppState;

/// Body of `POST /api/orders`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct CreateOrder {
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// Place an order for the caller's cart.
///
/// The cart is cleared once the order exists. If the applied coupon stopped
/// qualifying, it is removed and the request is rejected so the shopper can
/// review the new total before paying.
#[instrument(skip(state, caller, body), fields(user_id = %caller.user_id))]
pub async fn create(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Json(body): Json<CreateOrder>,
) -> Result<(StatusCode, Json<CheckoutSession>)> {
    let store_currency = state.config().store.currency;
    let currency = body.currency.unwrap_or(store_currency);
    if currency != store_currency {
        return Err(AppError::BadRequest(format!(
            "this store charges in {store_currency}"
        )));
    }
    let method = body.payment_method.unwrap_or_default();

    let mut cart = state.repos().carts.load(caller.user_id).await?;
    if let Some(dropped) = state.coupons().revalidate(&mut cart) {
        state.repos().carts.save(caller.user_id, &cart).await?;
        warn!(code = %dropped.code, "Coupon no longer applies at checkout");
        return Err(AppError::BadRequest(format!(
            "coupon {} no longer applies; review the cart total",
            dropped.code
        )));
    }

    let snapshot = cart.snapshot();
    let quote = state.pricing().quote_snapshot(&snapshot);
    let session = state
        .reconciler()
        .create_order(caller, snapshot, quote, currency, method)
        .await?;

    if let Err(err) = state.repos().carts.clear(caller.user_id).await {
        warn!(order_id = %session.order_id, error = %err, "Failed to clear cart after checkout");
    }

    info!(order_id = %session.order_id, "Checkout started");
    Ok((StatusCode::CREATED, Json(session)))
}

/// Show one of the caller's orders.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id, %order_id))]
pub async fn show(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderView>> {
    let order = state.reconciler().get_order(caller, order_id).await?;
    Ok(Json(order.view()))
}

/// Retry payment for a failed or cancelled order.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id, %order_id))]
pub async fn retry(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(order_id): Path<OrderId>,
) -> Result<(StatusCode, Json<CheckoutSession>)> {
    let session = state.reconciler().retry_payment(caller, order_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Poll the provider for a payment's status.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id, %intent_id))]
pub async fn payment_status(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(intent_id): Path<String>,
) -> Result<Json<IntentStatusView>> {
    let intent_id = PaymentIntentId::new(intent_id);
    let view = state
        .reconciler()
        .sync_intent_for(caller, &intent_id)
        .await?;
    Ok(Json(view))
}
