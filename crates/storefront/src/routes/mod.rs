//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                          - Liveness
//! GET    /health/ready                    - Readiness (database when configured)
//!
//! # Cart (x-user-id)
//! GET    /api/cart                        - Cart with quote
//! POST   /api/cart/items                  - Add line
//! PUT    /api/cart/items/{product_id}     - Set quantity (0 removes)
//! DELETE /api/cart/items/{product_id}     - Remove line
//! POST   /api/cart/coupon                 - Apply coupon
//! DELETE /api/cart/coupon                 - Remove coupon
//!
//! # Orders (x-user-id)
//! POST   /api/orders                      - Place order, returns client secret
//! GET    /api/orders/{id}                 - Order view (owner only)
//! POST   /api/orders/{id}/retry           - Successor order with a fresh intent
//! GET    /api/payments/{intent_id}/status - Poll provider status
//!
//! # Provider
//! POST   /webhooks/payments               - Signed payment events
//!
//! # Admin (x-operator-key)
//! POST   /admin/refunds                   - Open refund request
//! GET    /admin/refunds/{id}              - Refund request
//! POST   /admin/refunds/{id}/approve      - Approve (refunds through provider)
//! POST   /admin/refunds/{id}/reject       - Reject
//! GET    /admin/refunds/{id}/status       - Provider refund status
//! GET    /admin/orders/{id}               - Any order
//! POST   /admin/orders/{id}/status        - Fulfillment / cash-on-delivery transitions
//! GET    /admin/orders/{id}/refunds       - Refund requests for an order
//! GET    /admin/payments/{intent_id}/events - Processed provider events
//! ```

pub mod admin;
pub mod cart;
pub mod health;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{product_id}",
            put(cart::set_quantity).delete(cart::remove_item),
        )
        .route(
            "/coupon",
            post(cart::apply_coupon).delete(cart::remove_coupon),
        )
}

/// Create the order and payment routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create))
        .route("/orders/{id}", get(orders::show))
        .route("/orders/{id}/retry", post(orders::retry))
        .route("/payments/{intent_id}/status", get(orders::payment_status))
}

/// Create the operator routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/refunds", post(admin::create_refund))
        .route("/refunds/{id}", get(admin::show_refund))
        .route("/refunds/{id}/approve", post(admin::approve_refund))
        .route("/refunds/{id}/reject", post(admin::reject_refund))
        .route("/refunds/{id}/status", get(admin::refund_status))
        .route("/orders/{id}", get(admin::show_order))
        .route("/orders/{id}/status", post(admin::advance_order))
        .route("/orders/{id}/refunds", get(admin::order_refunds))
        .route("/payments/{intent_id}/events", get(admin::intent_events))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/cart", cart_routes())
        .nest("/api", order_routes())
        .route("/webhooks/payments", post(webhooks::receive))
        .nest("/admin", admin_routes())
}
