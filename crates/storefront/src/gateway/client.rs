//! HTTP implementation of [`PaymentGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use koi_core::{CurrencyCode, OrderId, PaymentIntentId, PaymentIntentStatus, ProviderRefundId};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

use super::auth::{AccessToken, authenticate};
use super::{
    GatewayError, PaymentGateway, PaymentIntent, ProviderRefund, ProviderRefundStatus, RefundCall,
    RefundStatusView,
};
use crate::config::PaymentConfig;

/// Payment provider REST client.
///
/// # Authentication
///
/// Every API call carries a bearer token obtained from the login endpoint.
/// With caching enabled the token is kept in memory and reused until shortly
/// before it expires. A `401` from any endpoint discards the cached token and
/// the call is retried once with a fresh one; the provider does not execute
/// unauthenticated requests, so the retry cannot double-apply.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    base: Url,
    client_id: String,
    api_key: SecretString,
    cache_tokens: bool,
    /// In-memory token cache
    token: RwLock<Option<AccessToken>>,
}

#[derive(Serialize)]
struct CreateIntentRequest<'a> {
    request_id: String,
    amount: Decimal,
    currency: &'a str,
    metadata: IntentMetadata,
}

#[derive(Serialize)]
struct IntentMetadata {
    order_id: String,
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
}

#[derive(Serialize)]
struct CreateRefundRequest<'a> {
    request_id: String,
    payment_intent_id: &'a str,
    amount: Decimal,
    reason: &'a str,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpGateway {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayError::Http)?;

        // `Url::join` replaces the last path segment unless it ends in '/'
        let mut base = config.api_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(HttpGatewayInner {
                client,
                base,
                client_id: config.client_id.clone(),
                api_key: config.api_key.clone(),
                cache_tokens: config.cache_tokens,
                token: RwLock::new(None),
            }),
        })
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Obtain a fresh token, replacing any cached one.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` if the credentials are rejected.
    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<AccessToken, GatewayError> {
        let token = authenticate(
            &self.inner.client,
            &self.inner.base,
            &self.inner.client_id,
            &self.inner.api_key,
        )
        .await?;

        if self.inner.cache_tokens {
            *self.inner.token.write().await = Some(token.clone());
        }

        Ok(token)
    }

    /// Clear the cached token.
    pub async fn clear_token(&self) {
        *self.inner.token.write().await = None;
    }

    async fn bearer(&self) -> Result<SecretString, GatewayError> {
        if self.inner.cache_tokens
            && let Some(token) = self.inner.token.read().await.as_ref()
            && !token.is_expired()
        {
            return Ok(token.token.clone());
        }

        Ok(self.authenticate().await?.token)
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.inner.base.join(path).map_err(|e| GatewayError::Request {
            status: 0,
            message: format!("invalid provider URL for {path}: {e}"),
        })
    }

    /// Send an authorized request, retrying once on `401`.
    async fn send<T, F>(&self, build: F) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut retried = false;
        loop {
            let token = self.bearer().await?;
            let response = build(&self.inner.client)
                .bearer_auth(token.expose_secret())
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                tracing::debug!("Provider rejected token, re-authenticating");
                self.clear_token().await;
                retried = true;
                continue;
            }

            let body = response.bytes().await?;
            if status.is_success() {
                return Ok(serde_json::from_slice(&body)?);
            }

            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(GatewayError::Auth(message));
            }

            return Err(GatewayError::Request {
                status: status.as_u16(),
                message,
            });
        }
    }
}

fn parse_intent_status(raw: &str) -> Result<PaymentIntentStatus, GatewayError> {
    raw.parse().map_err(|message| GatewayError::Request {
        status: 200,
        message,
    })
}

fn parse_refund_status(raw: &str) -> Result<ProviderRefundStatus, GatewayError> {
    raw.parse().map_err(|message| GatewayError::Request {
        status: 200,
        message,
    })
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Decimal,
        currency: CurrencyCode,
    ) -> Result<PaymentIntent, GatewayError> {
        let url = self.url("api/v1/payment-intents")?;
        let body = CreateIntentRequest {
            request_id: order_id.to_string(),
            amount,
            currency: currency.code(),
            metadata: IntentMetadata {
                order_id: order_id.to_string(),
            },
        };

        let response: IntentResponse = self
            .send(|client| client.post(url.clone()).json(&body))
            .await?;

        let client_secret = response.client_secret.ok_or_else(|| GatewayError::Request {
            status: 200,
            message: "intent created without client_secret".to_string(),
        })?;

        tracing::info!(intent_id = %response.id, "Payment intent created");

        Ok(PaymentIntent {
            id: PaymentIntentId::new(response.id),
            client_secret,
            status: parse_intent_status(&response.status)?,
        })
    }

    #[instrument(skip(self), fields(intent_id = %intent_id))]
    async fn get_intent_status(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, GatewayError> {
        let url = self.url(&format!("api/v1/payment-intents/{intent_id}"))?;
        let response: IntentResponse = self.send(|client| client.get(url.clone())).await?;
        parse_intent_status(&response.status)
    }

    #[instrument(skip(self, call), fields(intent_id = %call.intent_id, refund_request_id = %call.request_id))]
    async fn create_refund(&self, call: RefundCall<'_>) -> Result<ProviderRefund, GatewayError> {
        if call.amount <= Decimal::ZERO {
            return Err(GatewayError::InvalidAmount(call.amount));
        }

        let url = self.url("api/v1/refunds")?;
        let body = CreateRefundRequest {
            request_id: call.request_id.to_string(),
            payment_intent_id: call.intent_id.as_str(),
            amount: call.amount,
            reason: call.reason,
        };

        let response: RefundResponse = self
            .send(|client| client.post(url.clone()).json(&body))
            .await?;

        tracing::info!(provider_refund_id = %response.id, "Refund created");

        Ok(ProviderRefund {
            id: ProviderRefundId::new(response.id),
            status: parse_refund_status(&response.status)?,
        })
    }

    #[instrument(skip(self), fields(refund_id = %refund_id, intent_id = %intent_id))]
    async fn get_refund_status(
        &self,
        refund_id: &ProviderRefundId,
        intent_id: &PaymentIntentId,
    ) -> Result<RefundStatusView, GatewayError> {
        let mut url = self.url(&format!("api/v1/refunds/{refund_id}"))?;
        url.query_pairs_mut()
            .append_pair("payment_intent_id", intent_id.as_str());

        let response: RefundResponse = self.send(|client| client.get(url.clone())).await?;

        Ok(RefundStatusView {
            status: parse_refund_status(&response.status)?,
            amount: response.amount.unwrap_or_default(),
            created_at: response.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use koi_core::RefundRequestId;

    fn config(server: &MockServer, cache_tokens: bool) -> PaymentConfig {
        PaymentConfig {
            api_base: Url::parse(&server.uri()).unwrap(),
            client_id: "koi".to_string(),
            api_key: SecretString::from("k3y"),
            webhook_secret: SecretString::from("whsec"),
            timeout: Duration::from_millis(500),
            cache_tokens,
        }
    }

    async fn mount_login(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/authentication/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok",
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_intent_uses_order_id_as_request_id() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;

        let order_id = OrderId::generate();
        Mock::given(method("POST"))
            .and(path("/api/v1/payment-intents"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(serde_json::json!({
                "request_id": order_id.to_string(),
                "currency": "CNY",
                "amount": "245"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "client_secret": "cs_1",
                "status": "INITIAL"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let intent = gateway
            .create_intent(order_id, dec!(245), CurrencyCode::CNY)
            .await
            .unwrap();

        assert_eq!(intent.id.as_str(), "pi_1");
        assert_eq!(intent.client_secret, "cs_1");
        assert_eq!(intent.status, PaymentIntentStatus::Initial);
    }

    #[tokio::test]
    async fn test_token_is_cached_between_calls() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/payment-intents/pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "status": "SUCCEEDED"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let intent = PaymentIntentId::new("pi_1");
        for _ in 0..2 {
            assert_eq!(
                gateway.get_intent_status(&intent).await.unwrap(),
                PaymentIntentStatus::Succeeded
            );
        }
    }

    #[tokio::test]
    async fn test_token_cache_disabled_authenticates_every_call() {
        let server = MockServer::start().await;
        mount_login(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/payment-intents/pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "status": "PENDING"
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, false)).unwrap();
        let intent = PaymentIntentId::new("pi_1");
        gateway.get_intent_status(&intent).await.unwrap();
        gateway.get_intent_status(&intent).await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_retries_once_with_fresh_token() {
        let server = MockServer::start().await;
        mount_login(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/payment-intents/pi_1"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/payment-intents/pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "status": "FAILED"
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let status = gateway
            .get_intent_status(&PaymentIntentId::new("pi_1"))
            .await
            .unwrap();
        assert_eq!(status, PaymentIntentStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_error_message_is_preserved() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/payment-intents"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"message": "amount too small"})),
            )
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let err = gateway
            .create_intent(OrderId::generate(), dec!(0.01), CurrencyCode::CNY)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Request { status: 422, ref message } if message == "amount too small"
        ));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/payment-intents"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let err = gateway
            .create_intent(OrderId::generate(), dec!(10), CurrencyCode::CNY)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout));
    }

    #[tokio::test]
    async fn test_refund_rejects_non_positive_amount_locally() {
        let server = MockServer::start().await;
        // No mocks mounted: any request would 404

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let intent = PaymentIntentId::new("pi_1");
        let err = gateway
            .create_refund(RefundCall {
                intent_id: &intent,
                amount: Decimal::ZERO,
                reason: "damaged",
                request_id: RefundRequestId::generate(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidAmount(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_status_lookup() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/refunds/rf_1"))
            .and(query_param("payment_intent_id", "pi_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "rf_1",
                "status": "SUCCEEDED",
                "amount": "30.00",
                "created_at": "2026-03-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&config(&server, true)).unwrap();
        let view = gateway
            .get_refund_status(&ProviderRefundId::new("rf_1"), &PaymentIntentId::new("pi_1"))
            .await
            .unwrap();

        assert_eq!(view.status, ProviderRefundStatus::Succeeded);
        assert_eq!(view.amount, dec!(30));
    }
}
