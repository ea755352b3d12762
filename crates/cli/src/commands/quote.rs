//! Price quotes from the command line.
//!
//! Uses the same pricing engine and coupon rules as checkout, so operators
//! can check what a shopper would be charged.

use std::path::PathBuf;

use koi_core::{Cart, CouponPolicy, PriceQuote, PricingEngine, ProductId, ValidationError};
use koi_storefront::config::{ConfigError, StoreConfig};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Coupon error: {0}")]
    Coupon(#[from] koi_core::CouponError),

    #[error("Invalid subtotal: {0}")]
    Subtotal(#[from] ValidationError),

    #[error("Subtotal must not be negative: {0}")]
    NegativeSubtotal(Decimal),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct QuoteArgs {
    pub subtotal: Decimal,
    pub coupon: Option<String>,
    pub coupons_file: Option<PathBuf>,
    pub shipping_fee: Decimal,
    pub threshold: Decimal,
}

/// Price `args.subtotal`, applying the coupon if given.
///
/// # Errors
///
/// Returns an error if the catalogue cannot be loaded or the coupon does
/// not apply.
pub fn quote(args: &QuoteArgs) -> Result<PriceQuote, QuoteError> {
    if args.subtotal < Decimal::ZERO {
        return Err(QuoteError::NegativeSubtotal(args.subtotal));
    }

    let engine = PricingEngine::new(args.shipping_fee, args.threshold);
    let Some(code) = &args.coupon else {
        return Ok(engine.quote(args.subtotal, None));
    };

    dotenvy::dotenv().ok();
    let store = StoreConfig {
        coupons_file: args
            .coupons_file
            .clone()
            .or_else(|| std::env::var("COUPONS_FILE").ok().map(PathBuf::from)),
        ..StoreConfig::default()
    };
    let policy: CouponPolicy = store.load_coupons()?;

    // One line carrying the whole subtotal
    let mut scratch = Cart::new();
    if args.subtotal > Decimal::ZERO {
        scratch.add(ProductId::generate(), args.subtotal, 1, 1)?;
    }
    policy.apply(code, &mut scratch)?;
    Ok(engine.quote_cart(&scratch))
}

/// Print the quote as JSON.
///
/// # Errors
///
/// See [`quote`].
pub fn print(args: QuoteArgs) -> Result<(), QuoteError> {
    let quote = quote(&args)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&quote)?);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(subtotal: Decimal) -> QuoteArgs {
        QuoteArgs {
            subtotal,
            coupon: None,
            coupons_file: None,
            shipping_fee: Decimal::from(15),
            threshold: Decimal::from(500),
        }
    }

    #[test]
    fn test_quote_without_coupon() {
        let quote = quote(&args(Decimal::from(250))).unwrap();
        assert_eq!(quote.shipping, Decimal::from(15));
        assert_eq!(quote.total, Decimal::from(265));
    }

    #[test]
    fn test_quote_free_shipping_at_threshold() {
        let quote = quote(&args(Decimal::from(500))).unwrap();
        assert_eq!(quote.shipping, Decimal::ZERO);
        assert_eq!(quote.total, Decimal::from(500));
    }

    #[test]
    fn test_negative_subtotal_rejected() {
        assert!(matches!(
            quote(&args(Decimal::from(-1))),
            Err(QuoteError::NegativeSubtotal(_))
        ));
    }
}
