//! Payment provider client.
//!
//! The rest of the service talks to the provider only through the
//! [`PaymentGateway`] trait, so the HTTP client can be swapped for a test
//! double or a different processor.
//!
//! # Architecture
//!
//! - Two-layer authentication: client id + API key → bearer token → API
//! - Tokens cached in memory until shortly before expiry
//! - Every call has a bounded timeout; a timeout means the outcome is unknown
//! - Intent and refund creation carry an idempotency key (`request_id`)

pub mod auth;
pub mod client;

pub use client::HttpGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use koi_core::{CurrencyCode, OrderId, PaymentIntentId, PaymentIntentStatus, ProviderRefundId, RefundRequestId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to the payment provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider rejected our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The provider answered with a non-success status.
    #[error("Provider returned HTTP {status}: {message}")]
    Request { status: u16, message: String },

    /// The call did not complete in time. It may or may not have executed.
    #[error("Provider request timed out")]
    Timeout,

    /// Refund amounts must be positive. Raised before any network call.
    #[error("Invalid refund amount: {0}")]
    InvalidAmount(Decimal),

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

impl GatewayError {
    /// Whether the request may have been executed by the provider.
    #[must_use]
    pub const fn is_unknown_outcome(&self) -> bool {
        matches!(self, Self::Timeout | Self::Http(_))
    }
}

/// A provider-side payment intent, as returned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    /// Handed to the client to finish payment in the provider's hosted flow.
    pub client_secret: String,
    pub status: PaymentIntentStatus,
}

/// Provider-side refund state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderRefundStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ProviderRefundStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for ProviderRefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" | "PROCESSING" | "RECEIVED" => Ok(Self::Pending),
            "SUCCEEDED" | "SUCCESS" | "COMPLETED" | "SETTLED" => Ok(Self::Succeeded),
            "FAILED" | "CANCELLED" | "CANCELED" => Ok(Self::Failed),
            _ => Err(format!("invalid refund status: {s}")),
        }
    }
}

impl std::fmt::Display for ProviderRefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refund as acknowledged by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRefund {
    pub id: ProviderRefundId,
    pub status: ProviderRefundStatus,
}

/// Refund status as reported by the provider's lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundStatusView {
    pub status: ProviderRefundStatus,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Parameters for [`PaymentGateway::create_refund`].
#[derive(Debug, Clone)]
pub struct RefundCall<'a> {
    pub intent_id: &'a PaymentIntentId,
    pub amount: Decimal,
    pub reason: &'a str,
    /// Idempotency key; retries of the same refund reuse it.
    pub request_id: RefundRequestId,
}

/// Operations the service needs from the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for an order.
    ///
    /// The order id is sent as the idempotency key, so re-issuing after a
    /// timeout returns the same intent.
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Decimal,
        currency: CurrencyCode,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Current status of an intent.
    async fn get_intent_status(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, GatewayError>;

    /// Refund part or all of a captured payment.
    async fn create_refund(&self, call: RefundCall<'_>) -> Result<ProviderRefund, GatewayError>;

    /// Look up a refund previously created with [`Self::create_refund`].
    async fn get_refund_status(
        &self,
        refund_id: &ProviderRefundId,
        intent_id: &PaymentIntentId,
    ) -> Result<RefundStatusView, GatewayError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::Request {
            status: 402,
            message: "card declined".to_string(),
        };
        assert_eq!(err.to_string(), "Provider returned HTTP 402: card declined");
    }

    #[test]
    fn test_timeout_is_unknown_outcome() {
        assert!(GatewayError::Timeout.is_unknown_outcome());
        assert!(!GatewayError::Auth("bad key".to_string()).is_unknown_outcome());
    }

    #[test]
    fn test_refund_status_aliases() {
        assert_eq!(
            "completed".parse::<ProviderRefundStatus>(),
            Ok(ProviderRefundStatus::Succeeded)
        );
        assert_eq!(
            "PROCESSING".parse::<ProviderRefundStatus>(),
            Ok(ProviderRefundStatus::Pending)
        );
        assert!("weird".parse::<ProviderRefundStatus>().is_err());
    }
}
