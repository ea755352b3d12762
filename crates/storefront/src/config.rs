//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PAYMENT_API_BASE` - Base URL of the payment provider API
//! - `PAYMENT_CLIENT_ID` - Client identifier issued by the provider
//! - `PAYMENT_API_KEY` - API key paired with the client ID (high entropy)
//! - `PAYMENT_WEBHOOK_SECRET` - Shared secret for webhook signatures (high entropy)
//! - `OPERATOR_API_KEY` - Key expected in `x-operator-key` on `/admin` routes
//!
//! ## Optional
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`; in-memory store when neither is set)
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `PAYMENT_TIMEOUT_SECS` - Per-request provider timeout (default: 15)
//! - `PAYMENT_TOKEN_CACHE` - Reuse provider access tokens until expiry (default: true)
//! - `STORE_CURRENCY` - ISO 4217 currency for new orders (default: CNY)
//! - `SHIPPING_FEE` - Flat shipping fee (default: 15)
//! - `FREE_SHIPPING_THRESHOLD` - Subtotal at which shipping is free (default: 500)
//! - `COUPONS_FILE` - JSON file with the list of issued coupons
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use koi_core::{Coupon, CouponPolicy, CurrencyCode, MONEY_SCALE, PricingEngine};
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_PAYMENT_TIMEOUT_SECS: u64 = 15;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Failed to load coupons from {0}: {1}")]
    Coupons(PathBuf, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Payment provider configuration
    pub payment: PaymentConfig,
    /// Pricing and coupon configuration
    pub store: StoreConfig,
    /// Key required on operator routes
    pub operator_api_key: SecretString,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Payment provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    /// Provider API base URL
    pub api_base: Url,
    /// Client identifier sent as `x-client-id`
    pub client_id: String,
    /// API key sent as `x-api-key` when requesting a token
    pub api_key: SecretString,
    /// HMAC key for inbound webhooks
    pub webhook_secret: SecretString,
    /// Per-request timeout
    pub timeout: Duration,
    /// Whether access tokens are reused until they expire
    pub cache_tokens: bool,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base.as_str())
            .field("client_id", &self.client_id)
            .field("api_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("cache_tokens", &self.cache_tokens)
            .finish()
    }
}

/// Store-wide pricing settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub currency: CurrencyCode,
    pub shipping_fee: Decimal,
    pub free_shipping_threshold: Decimal,
    pub coupons_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::default(),
            shipping_fee: Decimal::from(15),
            free_shipping_threshold: Decimal::from(500),
            coupons_file: None,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL");
        let host = parse_env_or_default::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("STOREFRONT_PORT", "3000")?;

        let payment = PaymentConfig::from_env()?;
        let store = StoreConfig::from_env()?;
        let operator_api_key = get_validated_secret("OPERATOR_API_KEY")?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            database_url,
            host,
            port,
            payment,
            store,
            operator_api_key,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base = Url::parse(&get_required_env("PAYMENT_API_BASE")?).map_err(|e| {
            ConfigError::InvalidEnvVar("PAYMENT_API_BASE".to_string(), e.to_string())
        })?;
        let timeout_secs = parse_env_or_default::<u64>(
            "PAYMENT_TIMEOUT_SECS",
            &DEFAULT_PAYMENT_TIMEOUT_SECS.to_string(),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api_base,
            client_id: get_required_env("PAYMENT_CLIENT_ID")?,
            api_key: get_validated_secret("PAYMENT_API_KEY")?,
            webhook_secret: get_validated_secret("PAYMENT_WEBHOOK_SECRET")?,
            timeout: Duration::from_secs(timeout_secs),
            cache_tokens: parse_env_or_default::<bool>("PAYMENT_TOKEN_CACHE", "true")?,
        })
    }
}

impl StoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let currency = get_env_or_default("STORE_CURRENCY", "CNY")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e))?;
        let shipping_fee = parse_amount("SHIPPING_FEE", "15")?;
        let free_shipping_threshold = parse_amount("FREE_SHIPPING_THRESHOLD", "500")?;

        Ok(Self {
            currency,
            shipping_fee,
            free_shipping_threshold,
            coupons_file: get_optional_env("COUPONS_FILE").map(PathBuf::from),
        })
    }

    /// Pricing engine for these settings.
    #[must_use]
    pub const fn pricing_engine(&self) -> PricingEngine {
        PricingEngine::new(self.shipping_fee, self.free_shipping_threshold)
    }

    /// Load the issued coupons, or an empty policy when no file is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Coupons` if the file cannot be read, is not a JSON
    /// list of coupons, or contains an invalid coupon.
    pub fn load_coupons(&self) -> Result<CouponPolicy, ConfigError> {
        let Some(path) = &self.coupons_file else {
            return Ok(CouponPolicy::default());
        };

        let fail = |reason: String| ConfigError::Coupons(path.clone(), reason);
        let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        parse_coupons(&raw).map_err(fail)
    }
}

/// Parse a JSON list of coupons into a policy.
fn parse_coupons(raw: &str) -> Result<CouponPolicy, String> {
    let coupons: Vec<Coupon> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    CouponPolicy::new(coupons).map_err(|e| e.to_string())
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    std::env::var(primary_key)
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a non-negative money amount.
fn parse_amount(key: &str, default: &str) -> Result<Decimal, ConfigError> {
    let amount = parse_env_or_default::<Decimal>(key, default)?;
    check_amount(key, amount)
}

/// Store amounts are non-negative and whole cents.
fn check_amount(key: &str, amount: Decimal) -> Result<Decimal, ConfigError> {
    if amount < Decimal::ZERO {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "cannot be negative".to_string(),
        ));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("cannot have more than {MONEY_SCALE} decimal places"),
        ));
    }
    Ok(amount)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
