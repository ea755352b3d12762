//! End-to-end tests for the Koi Market storefront.
//!
//! Each test drives the full router (middleware included) in process, with
//! the in-memory store and the real HTTP payment client pointed at a
//! `wiremock` provider.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p koi-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `checkout` - Cart, coupon and order placement
//! - `webhooks` - Signed provider events and status polling
//! - `refunds` - Operator refund workflow

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use koi_core::{Coupon, CouponPolicy, ProductId};
use koi_storefront::config::{PaymentConfig, StoreConfig, StorefrontConfig};
use koi_storefront::db::Repositories;
use koi_storefront::gateway::HttpGateway;
use koi_storefront::state::AppState;
use koi_storefront::webhook;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

pub const OPERATOR_KEY: &str = "op-Kq8#vN2!xR5@tZ9";
pub const WEBHOOK_SECRET: &str = "wh-Jd4$mP7&sL1^yB6";

/// A response with its JSON body decoded (`Null` when empty).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    /// Money field at `key`, as sent on the wire.
    #[must_use]
    pub fn money(&self, key: &str) -> Decimal {
        money(&self.body[key])
    }

    #[must_use]
    pub fn str(&self, key: &str) -> &str {
        self.body[key].as_str().unwrap_or_default()
    }
}

/// Parse a decimal serialized as a JSON string.
#[must_use]
pub fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| panic!("not a money value: {value}"))
}

/// In-process storefront wired to a fake payment provider.
pub struct TestApp {
    router: Router,
    pub provider: MockServer,
    pub state: AppState,
}

impl TestApp {
    /// Start a provider that accepts every call, and the app in front of it.
    pub async fn start() -> Self {
        let provider = MockServer::start().await;
        mount_provider(&provider).await;
        Self::with_provider(provider)
    }

    /// Build the app against an already configured provider.
    #[must_use]
    pub fn with_provider(provider: MockServer) -> Self {
        let config = config(&provider);
        let gateway = HttpGateway::new(&config.payment).unwrap();
        let state = AppState::new(
            config,
            Repositories::in_memory(),
            Arc::new(gateway),
            coupons(),
            None,
        );

        Self {
            router: koi_storefront::app(state.clone()),
            provider,
            state,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(bytes) => builder
                .header("content-type", "application/json")
                .body(Body::from(bytes)),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse { status, body }
    }

    /// Request as the shopper `user`.
    pub async fn as_user(
        &self,
        user: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> TestResponse {
        let user = user.to_string();
        self.send(
            method,
            uri,
            &[("x-user-id", user.as_str())],
            body.map(|b| b.to_string().into_bytes()),
        )
        .await
    }

    /// Request with the operator key.
    pub async fn as_operator(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        self.send(
            method,
            uri,
            &[("x-operator-key", OPERATOR_KEY), ("x-operator-name", "mei")],
            body.map(|b| b.to_string().into_bytes()),
        )
        .await
    }

    /// Deliver a correctly signed provider event.
    pub async fn webhook(&self, event_type: &str, intent_id: &str) -> TestResponse {
        let payload = json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": event_type,
            "data": { "id": intent_id },
        })
        .to_string()
        .into_bytes();
        let signature = webhook::sign(&payload, &SecretString::from(WEBHOOK_SECRET)).unwrap();

        self.send(
            Method::POST,
            "/webhooks/payments",
            &[("signature", signature.as_str())],
            Some(payload),
        )
        .await
    }

    /// Fill `user`'s cart and place an order, returning the checkout session.
    pub async fn checkout(&self, user: Uuid, unit_price: &str, quantity: u32, coupon: Option<&str>) -> TestResponse {
        let added = self
            .as_user(
                user,
                Method::POST,
                "/api/cart/items",
                Some(json!({
                    "product_id": ProductId::generate(),
                    "unit_price": unit_price,
                    "quantity": quantity,
                    "stock_limit": 10,
                })),
            )
            .await;
        assert_eq!(added.status, StatusCode::OK, "{:?}", added.body);

        if let Some(code) = coupon {
            let applied = self
                .as_user(user, Method::POST, "/api/cart/coupon", Some(json!({ "code": code })))
                .await;
            assert_eq!(applied.status, StatusCode::OK, "{:?}", applied.body);
        }

        self.as_user(user, Method::POST, "/api/orders", Some(json!({})))
            .await
    }

    /// Place an order and confirm it through the webhook.
    pub async fn paid_order(&self, user: Uuid, unit_price: &str, quantity: u32) -> TestResponse {
        let session = self.checkout(user, unit_price, quantity, None).await;
        assert_eq!(session.status, StatusCode::CREATED, "{:?}", session.body);

        let delivered = self
            .webhook("payment_intent.succeeded", session.str("payment_intent_id"))
            .await;
        assert_eq!(delivered.body["status"], "applied");
        session
    }
}

fn config(provider: &MockServer) -> StorefrontConfig {
    StorefrontConfig {
        database_url: None,
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        payment: PaymentConfig {
            api_base: Url::parse(&provider.uri()).unwrap(),
            client_id: "koi-test".to_string(),
            api_key: SecretString::from("pk-Zr3%wQ8*hT5"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            timeout: Duration::from_secs(5),
            cache_tokens: true,
        },
        store: StoreConfig::default(),
        operator_api_key: SecretString::from(OPERATOR_KEY),
        sentry_dsn: None,
    }
}

/// `SAVE20`: 20 off from 200. `TENOFF`: 10% off anything.
#[must_use]
pub fn coupons() -> CouponPolicy {
    let coupons: Vec<Coupon> = serde_json::from_value(json!([
        { "code": "SAVE20", "kind": "fixed", "value": "20", "min_purchase": "200" },
        { "code": "TENOFF", "kind": "percentage", "value": "10" },
    ]))
    .unwrap();
    CouponPolicy::new(coupons).unwrap()
}

/// Mount the login endpoint only.
pub async fn mount_login(provider: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/authentication/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok_test",
            "expires_at": "2099-01-01T00:00:00Z"
        })))
        .mount(provider)
        .await;
}

/// A provider that creates intents and settles refunds immediately.
///
/// Intent ids are `pi_<order id>` and refund ids `rf_<refund request id>`,
/// so tests can predict them.
pub async fn mount_provider(provider: &MockServer) {
    mount_login(provider).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/payment-intents"))
        .respond_with(|request: &MockRequest| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
            let order_id = body["request_id"].as_str().unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("pi_{order_id}"),
                "client_secret": format!("cs_{order_id}"),
                "status": "INITIAL",
            }))
        })
        .mount(provider)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/refunds"))
        .respond_with(|request: &MockRequest| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
            let request_id = body["request_id"].as_str().unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("rf_{request_id}"),
                "status": "SUCCEEDED",
                "amount": body["amount"],
            }))
        })
        .mount(provider)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v1/refunds/rf_[0-9a-f-]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "rf_lookup",
            "status": "SUCCEEDED",
            "amount": "35",
            "created_at": "2026-10-01T08:00:00Z"
        })))
        .mount(provider)
        .await;
}

/// Make the provider report `status` for `intent_id` on polls.
pub async fn mount_intent_status(provider: &MockServer, intent_id: &str, status: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/payment-intents/{intent_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": intent_id,
            "status": status,
        })))
        .mount(provider)
        .await;
}
