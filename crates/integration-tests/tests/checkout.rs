//! Cart, coupon and order placement through the HTTP API.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use koi_core::ProductId;
use koi_integration_tests::{TestApp, money};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_checkout_prices_cart_and_clears_it() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();

    let session = app.checkout(user, "120.00", 2, Some("SAVE20")).await;
    assert_eq!(session.status, StatusCode::CREATED, "{:?}", session.body);

    // 240 - 20 + 15 shipping
    assert_eq!(session.money("total"), dec!(235));
    assert_eq!(session.str("status"), "pending");
    assert_eq!(session.str("currency"), "CNY");

    let order_id = session.str("order_id");
    assert_eq!(session.str("payment_intent_id"), format!("pi_{order_id}"));
    assert_eq!(session.str("client_secret"), format!("cs_{order_id}"));

    let order = app
        .as_user(user, Method::GET, &format!("/api/orders/{order_id}"), None)
        .await;
    assert_eq!(order.status, StatusCode::OK);
    assert_eq!(order.money("subtotal"), dec!(240));
    assert_eq!(order.money("discount"), dec!(20));
    assert_eq!(order.money("shipping"), dec!(15));
    assert_eq!(order.str("coupon"), "SAVE20");
    assert_eq!(order.body["item_count"], 2);

    let cart = app.as_user(user, Method::GET, "/api/cart", None).await;
    assert_eq!(cart.status, StatusCode::OK);
    assert_eq!(cart.body["lines"], json!([]));
    assert!(cart.body["coupon"].is_null());
}

#[tokio::test]
async fn test_free_shipping_at_threshold() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();

    let session = app.checkout(user, "250.00", 2, None).await;
    assert_eq!(session.status, StatusCode::CREATED);
    assert_eq!(session.money("total"), dec!(500));
}

#[tokio::test]
async fn test_coupon_dropped_when_cart_falls_below_minimum() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    let product = ProductId::generate();

    let added = app
        .as_user(
            user,
            Method::POST,
            "/api/cart/items",
            Some(json!({
                "product_id": product,
                "unit_price": "120.00",
                "quantity": 2,
                "stock_limit": 5,
            })),
        )
        .await;
    assert_eq!(added.status, StatusCode::OK);

    let applied = app
        .as_user(user, Method::POST, "/api/cart/coupon", Some(json!({ "code": "save20" })))
        .await;
    assert_eq!(applied.status, StatusCode::OK);
    assert_eq!(applied.str("coupon"), "SAVE20");
    assert_eq!(money(&applied.body["quote"]["discount"]), dec!(20));

    let reduced = app
        .as_user(
            user,
            Method::PUT,
            &format!("/api/cart/items/{product}"),
            Some(json!({ "quantity": 1 })),
        )
        .await;
    assert_eq!(reduced.status, StatusCode::OK);
    assert_eq!(reduced.str("dropped_coupon"), "SAVE20");
    assert!(reduced.body["coupon"].is_null());
    assert_eq!(money(&reduced.body["quote"]["discount"]), dec!(0));
    assert_eq!(money(&reduced.body["quote"]["total"]), dec!(135));
}

#[tokio::test]
async fn test_coupon_errors() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();

    let unknown = app
        .as_user(user, Method::POST, "/api/cart/coupon", Some(json!({ "code": "NOPE" })))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    // Empty cart does not meet SAVE20's minimum
    let ineligible = app
        .as_user(user, Method::POST, "/api/cart/coupon", Some(json!({ "code": "SAVE20" })))
        .await;
    assert_eq!(ineligible.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cart_clamps_to_stock_and_rejects_sold_out() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    let item = |quantity: u32, stock_limit: u32| {
        Some(json!({
            "product_id": ProductId::generate(),
            "unit_price": "10.00",
            "quantity": quantity,
            "stock_limit": stock_limit,
        }))
    };

    let clamped = app
        .as_user(user, Method::POST, "/api/cart/items", item(6, 5))
        .await;
    assert_eq!(clamped.status, StatusCode::OK);
    assert_eq!(clamped.body["lines"][0]["quantity"], 5);
    assert_eq!(clamped.body["item_count"], 5);

    let sold_out = app
        .as_user(user, Method::POST, "/api/cart/items", item(1, 0))
        .await;
    assert_eq!(sold_out.status, StatusCode::BAD_REQUEST);

    let zero = app
        .as_user(user, Method::POST, "/api/cart/items", item(0, 5))
        .await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_cart_cannot_check_out() {
    let app = TestApp::start().await;

    let response = app
        .as_user(Uuid::new_v4(), Method::POST, "/api/orders", Some(json!({})))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_rejects_foreign_currency() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    app.as_user(
        user,
        Method::POST,
        "/api/cart/items",
        Some(json!({
            "product_id": ProductId::generate(),
            "unit_price": "10.00",
            "quantity": 1,
            "stock_limit": 5,
        })),
    )
    .await;

    let response = app
        .as_user(user, Method::POST, "/api/orders", Some(json!({ "currency": "USD" })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cash_on_delivery_has_no_intent() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    app.as_user(
        user,
        Method::POST,
        "/api/cart/items",
        Some(json!({
            "product_id": ProductId::generate(),
            "unit_price": "80.00",
            "quantity": 1,
            "stock_limit": 5,
        })),
    )
    .await;

    let session = app
        .as_user(
            user,
            Method::POST,
            "/api/orders",
            Some(json!({ "payment_method": "cash_on_delivery" })),
        )
        .await;
    assert_eq!(session.status, StatusCode::CREATED, "{:?}", session.body);
    assert!(session.body["payment_intent_id"].is_null());
    assert!(session.body["client_secret"].is_null());

    let intents: Vec<_> = app
        .provider
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/v1/payment-intents")
        .collect();
    assert!(intents.is_empty());

    let paid = app
        .as_operator(
            Method::POST,
            &format!("/admin/orders/{}/status", session.str("order_id")),
            Some(json!({ "status": "paid" })),
        )
        .await;
    assert_eq!(paid.status, StatusCode::OK, "{:?}", paid.body);
    assert_eq!(paid.str("status"), "paid");
}

#[tokio::test]
async fn test_orders_are_private_to_their_owner() {
    let app = TestApp::start().await;
    let owner = Uuid::new_v4();
    let session = app.checkout(owner, "50.00", 1, None).await;
    let uri = format!("/api/orders/{}", session.str("order_id"));

    let stranger = app.as_user(Uuid::new_v4(), Method::GET, &uri, None).await;
    assert_eq!(stranger.status, StatusCode::FORBIDDEN);

    let anonymous = app.send(Method::GET, &uri, &[], None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let garbage = app.send(Method::GET, &uri, &[("x-user-id", "not-a-uuid")], None).await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_responses_carry_request_id_and_security_headers() {
    let app = TestApp::start().await;

    let request = axum::http::Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(koi_storefront::app(app.state.clone()), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["cache-control"], "no-store");
}
