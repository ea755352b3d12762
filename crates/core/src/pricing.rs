//! Pricing engine.
//!
//! Turns cart contents and an optional coupon into the amount to charge. The
//! engine is pure: the same inputs always yield the same quote, and it has no
//! error conditions because every input was validated when it entered the cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cart::{Cart, CartLine, CartSnapshot};
use crate::coupon::Coupon;
use crate::types::round_half_up;

/// Breakdown of what a cart costs.
///
/// `total == subtotal + shipping - discount` holds exactly, and `total >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// Store-wide pricing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingEngine {
    shipping_fee: Decimal,
    free_shipping_threshold: Decimal,
}

impl PricingEngine {
    #[must_use]
    pub const fn new(shipping_fee: Decimal, free_shipping_threshold: Decimal) -> Self {
        Self {
            shipping_fee,
            free_shipping_threshold,
        }
    }

    #[must_use]
    pub const fn shipping_fee(&self) -> Decimal {
        self.shipping_fee
    }

    #[must_use]
    pub const fn free_shipping_threshold(&self) -> Decimal {
        self.free_shipping_threshold
    }

    /// Price a subtotal with an optional coupon.
    ///
    /// The total is rounded once, half-up to two decimal places. The reported
    /// discount is whatever makes the breakdown add up after that rounding.
    #[must_use]
    pub fn quote(&self, subtotal: Decimal, coupon: Option<&Coupon>) -> PriceQuote {
        let raw_discount = coupon.map_or(Decimal::ZERO, |c| c.discount_for(subtotal));
        let shipping = self.shipping_for(subtotal);

        let total = round_half_up(subtotal + shipping - raw_discount).max(Decimal::ZERO);
        let discount = subtotal + shipping - total;

        PriceQuote {
            subtotal,
            discount,
            shipping,
            total,
        }
    }

    /// Price a live cart with whatever coupon it holds.
    #[must_use]
    pub fn quote_cart(&self, cart: &Cart) -> PriceQuote {
        self.quote(cart.subtotal(), cart.coupon())
    }

    /// Price the frozen contents of an order.
    #[must_use]
    pub fn quote_snapshot(&self, snapshot: &CartSnapshot) -> PriceQuote {
        self.quote(snapshot.subtotal(), snapshot.coupon.as_ref())
    }

    /// Price raw lines, as the CLI does for ad hoc quotes.
    #[must_use]
    pub fn quote_lines(&self, lines: &[CartLine], coupon: Option<&Coupon>) -> PriceQuote {
        let subtotal = lines.iter().map(CartLine::line_total).sum();
        self.quote(subtotal, coupon)
    }

    /// Shipping is charged in whole cents, so a rounded total never eats into it.
    fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal.is_zero() || subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            round_half_up(self.shipping_fee)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::coupon::{CouponKind, CouponPolicy};
    use crate::types::{CouponCode, ProductId};

    fn engine() -> PricingEngine {
        PricingEngine::new(dec!(15), dec!(500))
    }

    fn save20() -> Coupon {
        Coupon {
            code: CouponCode::parse("SAVE20").unwrap(),
            kind: CouponKind::Fixed,
            value: dec!(20),
            min_purchase: Some(dec!(200)),
            active: true,
        }
    }

    fn percent(value: Decimal) -> Coupon {
        Coupon {
            code: CouponCode::parse("PCT").unwrap(),
            kind: CouponKind::Percentage,
            value,
            min_purchase: None,
            active: true,
        }
    }

    fn assert_identity(quote: &PriceQuote) {
        assert_eq!(
            quote.total,
            quote.subtotal + quote.shipping - quote.discount,
            "{quote:?}"
        );
        assert!(quote.total >= Decimal::ZERO, "{quote:?}");
        assert!(quote.discount <= quote.subtotal, "{quote:?}");
    }

    #[test]
    fn test_save20_below_free_shipping() {
        let mut cart = Cart::new();
        cart.add(ProductId::generate(), dec!(250), 1, 5).unwrap();
        CouponPolicy::new(vec![save20()])
            .unwrap()
            .apply("SAVE20", &mut cart)
            .unwrap();

        let quote = engine().quote_cart(&cart);
        assert_eq!(quote.subtotal, dec!(250));
        assert_eq!(quote.discount, dec!(20));
        assert_eq!(quote.shipping, dec!(15));
        assert_eq!(quote.total, dec!(245));
    }

    #[test]
    fn test_free_shipping_at_threshold() {
        let quote = engine().quote(dec!(500), None);
        assert_eq!(quote.shipping, Decimal::ZERO);
        assert_eq!(quote.total, dec!(500));

        let quote = engine().quote(dec!(499.99), None);
        assert_eq!(quote.shipping, dec!(15));
    }

    #[test]
    fn test_empty_cart_is_free() {
        let quote = engine().quote_cart(&Cart::new());
        assert_eq!(
            quote,
            PriceQuote {
                subtotal: Decimal::ZERO,
                discount: Decimal::ZERO,
                shipping: Decimal::ZERO,
                total: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn test_apply_then_remove_restores_quote() {
        let mut cart = Cart::new();
        cart.add(ProductId::generate(), dec!(120), 2, 5).unwrap();
        let policy = CouponPolicy::new(vec![save20(), percent(dec!(10))]).unwrap();

        let before = engine().quote_cart(&cart);
        policy.apply("SAVE20", &mut cart).unwrap();
        assert_ne!(engine().quote_cart(&cart), before);

        CouponPolicy::remove(&mut cart);
        assert_eq!(engine().quote_cart(&cart), before);
    }

    #[test]
    fn test_percentage_rounds_half_up_once() {
        // 33.33 * 15% = 4.9995, 33.33 + 15 - 4.9995 = 43.3305 -> 43.33
        let quote = engine().quote(dec!(33.33), Some(&percent(dec!(15))));
        assert_eq!(quote.total, dec!(43.33));
        assert_eq!(quote.discount, dec!(5.00));
        assert_identity(&quote);

        // 0.05 * 50% = 0.025 -> total 15.025 -> 15.03
        let quote = engine().quote(dec!(0.05), Some(&percent(dec!(50))));
        assert_eq!(quote.total, dec!(15.03));
        assert_identity(&quote);
    }

    #[test]
    fn test_full_discount_leaves_shipping() {
        let quote = engine().quote(dec!(40), Some(&percent(dec!(100))));
        assert_eq!(quote.discount, dec!(40));
        assert_eq!(quote.total, dec!(15));
        assert_identity(&quote);
    }

    #[test]
    fn test_sub_cent_shipping_fee_keeps_discount_within_subtotal() {
        let engine = PricingEngine::new(dec!(15.004), dec!(500));

        let quote = engine.quote(dec!(10), Some(&percent(dec!(100))));
        assert_eq!(quote.shipping, dec!(15.00));
        assert_eq!(quote.discount, dec!(10));
        assert_eq!(quote.total, dec!(15.00));
        assert_identity(&quote);

        let quote = engine.quote(dec!(33.33), Some(&percent(dec!(15))));
        assert_identity(&quote);
    }

    #[test]
    fn test_ineligible_coupon_grants_nothing() {
        let quote = engine().quote(dec!(100), Some(&save20()));
        assert_eq!(quote.discount, Decimal::ZERO);
        assert_eq!(quote.total, dec!(115));
    }

    #[test]
    fn test_identity_holds_across_inputs() {
        let coupons = [
            None,
            Some(save20()),
            Some(percent(dec!(7.5))),
            Some(percent(dec!(33))),
            Some(percent(dec!(100))),
        ];
        let prices = [dec!(0.01), dec!(0.99), dec!(19.99), dec!(33.33), dec!(249.95)];

        for price in prices {
            for quantity in [1u32, 2, 3, 7, 13] {
                for coupon in &coupons {
                    let line = CartLine {
                        product_id: ProductId::generate(),
                        unit_price: price,
                        quantity,
                        stock_limit: quantity,
                    };
                    let quote = engine().quote_lines(&[line], coupon.as_ref());
                    assert_identity(&quote);
                    assert!(quote.total.scale() <= 2);
                }
            }
        }
    }

    #[test]
    fn test_quote_snapshot_matches_cart() {
        let mut cart = Cart::new();
        cart.add(ProductId::generate(), dec!(250), 1, 5).unwrap();
        CouponPolicy::new(vec![save20()])
            .unwrap()
            .apply("SAVE20", &mut cart)
            .unwrap();

        assert_eq!(
            engine().quote_snapshot(&cart.snapshot()),
            engine().quote_cart(&cart)
        );
    }
}
