//! Operator refund workflow against the full router.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use koi_integration_tests::{TestApp, money};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_refund_exceeding_total_is_rejected_before_provider() {
    let app = TestApp::start().await;
    let session = app.paid_order(Uuid::new_v4(), "35.00", 1).await;
    assert_eq!(session.money("total"), dec!(50));

    let response = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({
                "order_id": session.str("order_id"),
                "amount": "100",
                "reason": "damaged in transit",
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    let refund_calls = app
        .provider
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().starts_with("/api/v1/refunds"))
        .count();
    assert_eq!(refund_calls, 0);
}

#[tokio::test]
async fn test_refund_request_and_approval() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    let session = app.paid_order(user, "60.00", 1).await;
    let order_id = session.str("order_id");
    let intent = session.str("payment_intent_id");

    let created = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({
                "order_id": order_id,
                "payment_intent_id": intent,
                "amount": "35",
                "reason": "damaged in transit",
            })),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{:?}", created.body);
    assert_eq!(created.str("status"), "pending");
    assert!(created.body["provider_refund_id"].is_null());
    let refund_id = created.str("refund_id").to_string();

    let record = app
        .as_operator(Method::GET, &format!("/admin/refunds/{refund_id}"), None)
        .await;
    assert_eq!(record.str("requested_by"), "mei");
    assert_eq!(record.str("reason"), "damaged in transit");

    // One open request per order
    let second = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({ "order_id": order_id, "amount": "5", "reason": "again" })),
        )
        .await;
    assert_eq!(second.status, StatusCode::CONFLICT);

    let approved = app
        .as_operator(Method::POST, &format!("/admin/refunds/{refund_id}/approve"), None)
        .await;
    assert_eq!(approved.status, StatusCode::OK, "{:?}", approved.body);
    assert_eq!(approved.str("status"), "completed");
    assert_eq!(approved.str("provider_refund_id"), format!("rf_{refund_id}"));
    assert_eq!(approved.money("amount"), dec!(35));

    let order = app
        .as_user(user, Method::GET, &format!("/api/orders/{order_id}"), None)
        .await;
    assert_eq!(order.str("status"), "refunded");

    let again = app
        .as_operator(Method::POST, &format!("/admin/refunds/{refund_id}/approve"), None)
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    let listed = app
        .as_operator(Method::GET, &format!("/admin/orders/{order_id}/refunds"), None)
        .await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let status = app
        .as_operator(
            Method::GET,
            &format!("/admin/refunds/{refund_id}/status?payment_intent_id={intent}"),
            None,
        )
        .await;
    assert_eq!(status.status, StatusCode::OK, "{:?}", status.body);
    assert_eq!(status.str("status"), "SUCCEEDED");
    assert_eq!(money(&status.body["amount"]), dec!(35));

    let mismatched = app
        .as_operator(
            Method::GET,
            &format!("/admin/refunds/{refund_id}/status?payment_intent_id=pi_other"),
            None,
        )
        .await;
    assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejected_refund_leaves_order_paid() {
    let app = TestApp::start().await;
    let user = Uuid::new_v4();
    let session = app.paid_order(user, "60.00", 1).await;
    let order_id = session.str("order_id");

    let created = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({ "order_id": order_id, "amount": "10", "reason": "changed mind" })),
        )
        .await;
    let refund_id = created.str("refund_id").to_string();

    let rejected = app
        .as_operator(Method::POST, &format!("/admin/refunds/{refund_id}/reject"), None)
        .await;
    assert_eq!(rejected.status, StatusCode::OK);
    assert_eq!(rejected.str("status"), "rejected");

    let approve = app
        .as_operator(Method::POST, &format!("/admin/refunds/{refund_id}/approve"), None)
        .await;
    assert_eq!(approve.status, StatusCode::CONFLICT);

    let order = app
        .as_operator(Method::GET, &format!("/admin/orders/{order_id}"), None)
        .await;
    assert_eq!(order.str("status"), "paid");
}

#[tokio::test]
async fn test_unpaid_order_cannot_be_refunded() {
    let app = TestApp::start().await;
    let session = app.checkout(Uuid::new_v4(), "60.00", 1, None).await;

    let response = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({
                "order_id": session.str("order_id"),
                "amount": "10",
                "reason": "not delivered",
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_refund_requires_reason() {
    let app = TestApp::start().await;
    let session = app.paid_order(Uuid::new_v4(), "60.00", 1).await;

    let response = app
        .as_operator(
            Method::POST,
            "/admin/refunds",
            Some(json!({ "order_id": session.str("order_id"), "amount": "10", "reason": "  " })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_operator_key() {
    let app = TestApp::start().await;
    let body = json!({ "order_id": Uuid::new_v4(), "amount": "10", "reason": "x" })
        .to_string()
        .into_bytes();

    let missing = app
        .send(Method::POST, "/admin/refunds", &[], Some(body.clone()))
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .send(
            Method::POST,
            "/admin/refunds",
            &[("x-operator-key", "guess")],
            Some(body),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    // A shopper identity is not an operator
    let shopper = app
        .as_user(Uuid::new_v4(), Method::GET, &format!("/admin/orders/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(shopper.status, StatusCode::UNAUTHORIZED);
}
