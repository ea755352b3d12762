//! Webhook signing, for replaying provider events against a local server.
//!
//! # Usage
//!
//! ```bash
//! sig=$(koi-cli webhook sign --file event.json)
//! curl -X POST localhost:3000/webhooks/payments \
//!     -H "signature: $sig" --data-binary @event.json
//! ```
//!
//! # Environment Variables
//!
//! - `PAYMENT_WEBHOOK_SECRET` - Shared HMAC key

use std::io::Read;
use std::path::Path;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Failed to read payload: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Webhook(#[from] koi_storefront::webhook::WebhookError),
}

/// Print the hex signature of a payload read from `file` or stdin.
///
/// # Errors
///
/// Returns an error if the secret is not set or empty, or the payload cannot
/// be read.
pub fn sign(file: Option<&Path>) -> Result<(), SignError> {
    dotenvy::dotenv().ok();

    let secret = std::env::var("PAYMENT_WEBHOOK_SECRET")
        .map(SecretString::from)
        .map_err(|_| SignError::MissingEnvVar("PAYMENT_WEBHOOK_SECRET"))?;

    let payload = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let signature = koi_storefront::webhook::sign(&payload, &secret)?;
    #[allow(clippy::print_stdout)]
    {
        println!("{signature}");
    }
    Ok(())
}
