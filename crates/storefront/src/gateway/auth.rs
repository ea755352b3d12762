//! Provider authentication.
//!
//! Exchanges the client id and API key for a short-lived bearer token.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::GatewayError;

/// Login endpoint, relative to the API base.
const AUTH_PATH: &str = "api/v1/authentication/login";

/// Tokens are treated as expired this many seconds early.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Bearer token obtained from the provider.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AuthErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Authenticate with the provider.
///
/// # Errors
///
/// Returns `GatewayError::Auth` if the credentials are rejected, or a transport
/// error if the provider cannot be reached.
#[instrument(skip(client, api_key), fields(client_id = %client_id))]
pub async fn authenticate(
    client: &reqwest::Client,
    base: &Url,
    client_id: &str,
    api_key: &SecretString,
) -> Result<AccessToken, GatewayError> {
    let url = base
        .join(AUTH_PATH)
        .map_err(|e| GatewayError::Auth(format!("invalid login URL: {e}")))?;

    let response = client
        .post(url)
        .header("x-client-id", client_id)
        .header("x-api-key", api_key.expose_secret())
        .send()
        .await?;

    let status = response.status();

    if status.is_success() {
        let body = response.bytes().await?;
        let auth: AuthResponse = serde_json::from_slice(&body)?;

        Ok(AccessToken {
            token: SecretString::from(auth.token),
            expires_at: auth.expires_at,
        })
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        let error_response: AuthErrorResponse =
            response.json().await.unwrap_or(AuthErrorResponse {
                error: None,
                message: None,
            });

        let message = error_response
            .message
            .or(error_response.error)
            .unwrap_or_else(|| "Invalid credentials".to_string());

        Err(GatewayError::Auth(message))
    } else {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(GatewayError::Auth(format!("HTTP {status}: {error_text}")))
    }
}

impl AccessToken {
    /// Check if the token has expired, or will within the safety buffer.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRY_BUFFER_SECS)
    }

    /// Check if the token will expire within the given number of seconds.
    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        Utc::now() >= self.expires_at - chrono::Duration::seconds(seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn token_expiring_in(secs: i64) -> AccessToken {
        AccessToken {
            token: SecretString::from("tok"),
            expires_at: Utc::now() + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn test_token_is_expired() {
        assert!(token_expiring_in(-3600).is_expired());
        assert!(!token_expiring_in(3600).is_expired());
        // Inside the buffer
        assert!(token_expiring_in(30).is_expired());
    }

    #[test]
    fn test_token_expires_within() {
        let token = token_expiring_in(300);
        assert!(token.expires_within(600));
        assert!(!token.expires_within(60));
    }

    #[tokio::test]
    async fn test_authenticate_sends_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/authentication/login"))
            .and(header("x-client-id", "koi"))
            .and(header("x-api-key", "k3y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc",
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let token = authenticate(&reqwest::Client::new(), &base, "koi", &SecretString::from("k3y"))
            .await
            .unwrap();

        assert_eq!(token.token.expose_secret(), "abc");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/authentication/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"message": "unknown client"})),
            )
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let err = authenticate(&reqwest::Client::new(), &base, "koi", &SecretString::from("nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Auth(msg) if msg == "unknown client"));
    }
}
