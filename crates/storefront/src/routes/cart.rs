//! Cart route handlers.
//!
//! Every response carries the cart together with a fresh price quote, so the
//! client never computes totals itself. After each mutation the applied
//! coupon is re-checked and dropped if the cart no longer qualifies.

use axum::{
    Json,
    extract::{Path, State},
};
use koi_core::{Cart, CartLine, CouponPolicy, PriceQuote, PricingEngine, ProductId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{AppError, Result};
use crate::middleware::RequireCaller;
use crate::services::Caller;
use crate::state::AppState;

/// Cart as returned to the shopper.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub lines: Vec<CartLine>,
    pub coupon: Option<String>,
    pub item_count: u32,
    pub quote: PriceQuote,
    /// Code of a coupon removed by this request because the cart stopped qualifying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_coupon: Option<String>,
}

impl CartResponse {
    fn new(cart: &Cart, pricing: &PricingEngine, dropped: Option<String>) -> Self {
        Self {
            lines: cart.lines().to_vec(),
            coupon: cart.coupon().map(|c| c.code.to_string()),
            item_count: cart.item_count(),
            quote: pricing.quote_cart(cart),
            dropped_coupon: dropped,
        }
    }
}

/// Body of `POST /api/cart/items`.
#[derive(Debug, Deserialize)]
pub struct AddItem {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub stock_limit: u32,
}

/// Body of `PUT /api/cart/items/{product_id}`.
#[derive(Debug, Deserialize)]
pub struct SetQuantity {
    pub quantity: u32,
}

/// Body of `POST /api/cart/coupon`.
#[derive(Debug, Deserialize)]
pub struct ApplyCoupon {
    pub code: String,
}

/// Re-check the coupon, store the cart and build the response.
async fn save(state: &AppState, caller: Caller, mut cart: Cart) -> Result<Json<CartResponse>> {
    let dropped = state
        .coupons()
        .revalidate(&mut cart)
        .map(|coupon| coupon.code.to_string());
    if let Some(code) = &dropped {
        info!(%code, "Coupon no longer applies; removed");
    }

    state.repos().carts.save(caller.user_id, &cart).await?;
    Ok(Json(CartResponse::new(&cart, state.pricing(), dropped)))
}

/// Show the cart with its current quote.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id))]
pub async fn show(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    let dropped = state
        .coupons()
        .revalidate(&mut cart)
        .map(|coupon| coupon.code.to_string());
    if dropped.is_some() {
        state.repos().carts.save(caller.user_id, &cart).await?;
    }
    Ok(Json(CartResponse::new(&cart, state.pricing(), dropped)))
}

/// Add a line, merging with an existing line for the same product.
#[instrument(skip(state, caller, item), fields(user_id = %caller.user_id, product_id = %item.product_id))]
pub async fn add_item(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Json(item): Json<AddItem>,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    cart.add(
        item.product_id,
        item.unit_price,
        item.quantity,
        item.stock_limit,
    )?;
    save(&state, caller, cart).await
}

/// Set a line's quantity; zero removes it.
#[instrument(skip(state, caller, body), fields(user_id = %caller.user_id, %product_id))]
pub async fn set_quantity(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(product_id): Path<ProductId>,
    Json(body): Json<SetQuantity>,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    cart.set_quantity(product_id, body.quantity)?;
    save(&state, caller, cart).await
}

/// Remove a line.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id, %product_id))]
pub async fn remove_item(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(product_id): Path<ProductId>,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    if !cart.remove(product_id) {
        return Err(AppError::NotFound(format!("product {product_id} in cart")));
    }
    save(&state, caller, cart).await
}

/// Apply a coupon, replacing any coupon already applied.
#[instrument(skip(state, caller, body), fields(user_id = %caller.user_id, code = %body.code))]
pub async fn apply_coupon(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Json(body): Json<ApplyCoupon>,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    state.coupons().apply(&body.code, &mut cart)?;
    save(&state, caller, cart).await
}

/// Remove the applied coupon. Succeeds when none is applied.
#[instrument(skip(state, caller), fields(user_id = %caller.user_id))]
pub async fn remove_coupon(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
) -> Result<Json<CartResponse>> {
    let mut cart = state.repos().carts.load(caller.user_id).await?;
    CouponPolicy::remove(&mut cart);
    save(&state, caller, cart).await
}
