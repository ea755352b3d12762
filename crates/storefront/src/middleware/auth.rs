//! Identity extractors.
//!
//! Shopper identity is established upstream (edge proxy or API gateway) and
//! forwarded in `x-user-id`. Operator routes require `x-operator-key` to
//! match the configured secret; `x-operator-name` is recorded on refund
//! requests and in logs.

use axum::{extract::FromRequestParts, http::request::Parts};
use koi_core::UserId;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::Span;
use uuid::Uuid;

use crate::error::{AppError, set_sentry_user};
use crate::services::{Caller, Operator};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";
pub const OPERATOR_NAME_HEADER: &str = "x-operator-name";

/// Name recorded when the operator does not identify themselves.
const DEFAULT_OPERATOR_NAME: &str = "operator";

/// Extractor that requires an identified shopper.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireCaller(caller): RequireCaller) -> impl IntoResponse {
///     format!("Hello, {}!", caller.user_id)
/// }
/// ```
pub struct RequireCaller(pub Caller);

impl<S> FromRequestParts<S> for RequireCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        let uuid = Uuid::parse_str(raw)
            .map_err(|_| AppError::Unauthorized(format!("invalid {USER_ID_HEADER} header")))?;
        let user_id = UserId::from_uuid(uuid);

        Span::current().record("user_id", tracing::field::display(user_id));
        set_sentry_user(&user_id);

        Ok(Self(Caller::new(user_id)))
    }
}

/// Extractor that requires the operator key.
pub struct RequireOperator(pub Operator);

impl FromRequestParts<AppState> for RequireOperator {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = header(parts, OPERATOR_KEY_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("missing {OPERATOR_KEY_HEADER} header"))
        })?;

        if !keys_match(presented, state.config().operator_api_key.expose_secret()) {
            tracing::warn!(path = %parts.uri.path(), "Rejected operator key");
            return Err(AppError::Unauthorized("invalid operator key".to_string()));
        }

        let name = header(parts, OPERATOR_NAME_HEADER)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_OPERATOR_NAME);
        Span::current().record("operator", name);

        Ok(Self(Operator::new(name)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

/// Compare fixed-length digests so timing does not reveal a matching prefix.
fn keys_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match("s3cret-operator-key", "s3cret-operator-key"));
        assert!(!keys_match("s3cret-operator-kex", "s3cret-operator-key"));
        assert!(!keys_match("", "s3cret-operator-key"));
    }

    #[tokio::test]
    async fn test_caller_requires_valid_user_header() {
        let (mut parts, ()) = axum::http::Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap()
            .into_parts();
        assert!(matches!(
            RequireCaller::from_request_parts(&mut parts, &()).await,
            Err(AppError::Unauthorized(_))
        ));

        let user = Uuid::new_v4();
        let (mut parts, ()) = axum::http::Request::builder()
            .header(USER_ID_HEADER, user.to_string())
            .body(())
            .unwrap()
            .into_parts();
        let RequireCaller(caller) = RequireCaller::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(caller.user_id, UserId::from_uuid(user));
    }
}
