//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Responses carry a JSON body `{"error": "..."}`. Server-side failures are
//! reported with a generic message; the detail goes to logs and Sentry only.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use koi_core::{CouponError, ValidationError};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::gateway::GatewayError;
use crate::services::ReconcileError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Order or refund service failure.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Payment provider call made directly from a handler.
    #[error("Payment provider error: {0}")]
    Gateway(#[from] GatewayError),

    /// Cart input rejected.
    #[error(transparent)]
    Cart(#[from] ValidationError),

    /// Coupon could not be applied.
    #[error(transparent)]
    Coupon(#[from] CouponError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Reconcile(err) => match err {
                ReconcileError::StateConflict(_) => StatusCode::CONFLICT,
                ReconcileError::InvalidAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
                ReconcileError::Forbidden => StatusCode::FORBIDDEN,
                ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
                ReconcileError::Gateway(gateway) => gateway_status(gateway),
                ReconcileError::Repository(_) | ReconcileError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Gateway(gateway) => gateway_status(gateway),
            Self::Cart(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Coupon(CouponError::NotFound(_)) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Coupon(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

const fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::InvalidAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Auth(_)
        | GatewayError::Request { .. }
        | GatewayError::Http(_)
        | GatewayError::Parse(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "Payment provider error".to_string(),
            StatusCode::GATEWAY_TIMEOUT => {
                "Payment provider timed out; check the order status before retrying".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this once the caller is identified to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for order activity.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("order", "Order paid", Some(&[("order_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn get_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order-123".to_string());
        assert_eq!(err.to_string(), "Not found: order-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_reconcile_error_status_codes() {
        assert_eq!(
            get_status(ReconcileError::StateConflict("paid".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(ReconcileError::InvalidAmount(dec!(100))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(ReconcileError::NotFound("order".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(get_status(ReconcileError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            get_status(ReconcileError::Validation("empty".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(ReconcileError::Repository(RepositoryError::NotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_gateway_error_status_codes() {
        assert_eq!(
            get_status(ReconcileError::Gateway(GatewayError::Timeout)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            get_status(GatewayError::Request {
                status: 500,
                message: "boom".to_string()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(
            get_status(ValidationError::ZeroQuantity),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(CouponError::NotFound("NOPE".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("missing key".to_string())),
            StatusCode::UNAUTHORIZED
        );
    }
}
