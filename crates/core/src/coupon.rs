//! Coupons and the policy that attaches them to carts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::Cart;
use crate::types::{CouponCode, CouponCodeError, MONEY_SCALE};

/// How a coupon's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    /// `value` is a percentage of the subtotal, in `(0, 100]`.
    Percentage,
    /// `value` is a fixed amount off, capped at the subtotal.
    Fixed,
}

/// A discount rule identified by a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: CouponCode,
    pub kind: CouponKind,
    pub value: Decimal,
    /// Minimum subtotal required for the coupon to apply.
    #[serde(default)]
    pub min_purchase: Option<Decimal>,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl Coupon {
    /// Check the coupon's value against its kind.
    ///
    /// # Errors
    ///
    /// Returns `CouponError::Invalid` if the value is out of range for the kind
    /// or the minimum purchase is negative.
    pub fn validate(&self) -> Result<(), CouponError> {
        let invalid = |reason: &str| CouponError::Invalid {
            code: self.code.to_string(),
            reason: reason.to_owned(),
        };

        match self.kind {
            CouponKind::Percentage if self.value <= Decimal::ZERO || self.value > Decimal::ONE_HUNDRED => {
                return Err(invalid("percentage must be in (0, 100]"));
            }
            CouponKind::Fixed if self.value <= Decimal::ZERO => {
                return Err(invalid("fixed amount must be positive"));
            }
            CouponKind::Fixed if self.value.normalize().scale() > MONEY_SCALE => {
                return Err(invalid("fixed amount cannot be finer than a cent"));
            }
            _ => {}
        }

        if self.min_purchase.is_some_and(|min| min < Decimal::ZERO) {
            return Err(invalid("minimum purchase cannot be negative"));
        }

        Ok(())
    }

    /// Whether a cart with this subtotal meets the coupon's minimum.
    #[must_use]
    pub fn is_eligible(&self, subtotal: Decimal) -> bool {
        self.min_purchase.is_none_or(|min| subtotal >= min)
    }

    /// Unrounded discount this coupon grants on `subtotal`.
    ///
    /// Never exceeds `subtotal`. Zero when the minimum is not met.
    #[must_use]
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal <= Decimal::ZERO || !self.is_eligible(subtotal) {
            return Decimal::ZERO;
        }

        let discount = match self.kind {
            CouponKind::Percentage => subtotal * self.value / Decimal::ONE_HUNDRED,
            CouponKind::Fixed => self.value,
        };
        discount.min(subtotal)
    }
}

/// Coupon lookup and cart attachment errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("coupon {0} not found")]
    NotFound(String),

    #[error("coupon {code} requires a minimum purchase of {minimum}")]
    BelowMinimum { code: String, minimum: Decimal },

    #[error("coupon {code} is invalid: {reason}")]
    Invalid { code: String, reason: String },

    #[error(transparent)]
    MalformedCode(#[from] CouponCodeError),
}

/// The set of issued coupons and the rules for applying them.
#[derive(Debug, Clone, Default)]
pub struct CouponPolicy {
    coupons: Vec<Coupon>,
}

impl CouponPolicy {
    /// Build a policy from issued coupons.
    ///
    /// # Errors
    ///
    /// Returns the first coupon that fails [`Coupon::validate`], or
    /// `CouponError::Invalid` if two coupons share a code.
    pub fn new(coupons: Vec<Coupon>) -> Result<Self, CouponError> {
        for (index, coupon) in coupons.iter().enumerate() {
            coupon.validate()?;
            if coupons[..index].iter().any(|c| c.code == coupon.code) {
                return Err(CouponError::Invalid {
                    code: coupon.code.to_string(),
                    reason: "duplicate code".to_owned(),
                });
            }
        }
        Ok(Self { coupons })
    }

    /// Look up an active coupon by code, ignoring case.
    #[must_use]
    pub fn find(&self, code: &CouponCode) -> Option<&Coupon> {
        self.coupons.iter().find(|c| c.active && &c.code == code)
    }

    /// Number of issued coupons, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coupons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coupons.is_empty()
    }

    /// Attach a coupon to the cart, replacing any coupon already applied.
    ///
    /// On error the cart is left untouched.
    ///
    /// # Errors
    ///
    /// - `MalformedCode` if `code` is not a syntactically valid code
    /// - `NotFound` if no active coupon has this code
    /// - `BelowMinimum` if the cart subtotal is under the coupon's minimum
    pub fn apply(&self, code: &str, cart: &mut Cart) -> Result<Coupon, CouponError> {
        let code = CouponCode::parse(code)?;
        let coupon = self
            .find(&code)
            .ok_or_else(|| CouponError::NotFound(code.to_string()))?;

        if !coupon.is_eligible(cart.subtotal()) {
            return Err(CouponError::BelowMinimum {
                code: code.to_string(),
                minimum: coupon.min_purchase.unwrap_or_default(),
            });
        }

        cart.replace_coupon(Some(coupon.clone()));
        Ok(coupon.clone())
    }

    /// Clear the cart's coupon slot. Idempotent.
    pub fn remove(cart: &mut Cart) -> Option<Coupon> {
        cart.replace_coupon(None)
    }

    /// Drop the applied coupon if the cart no longer qualifies for it.
    ///
    /// Called after every cart mutation. Returns the dropped coupon.
    pub fn revalidate(&self, cart: &mut Cart) -> Option<Coupon> {
        let still_valid = cart.coupon().is_none_or(|applied| {
            self.find(&applied.code)
                .is_some_and(|coupon| coupon.is_eligible(cart.subtotal()))
        });

        if still_valid {
            None
        } else {
            cart.replace_coupon(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::ProductId;

    fn coupon(code: &str, kind: CouponKind, value: Decimal, min: Option<Decimal>) -> Coupon {
        Coupon {
            code: CouponCode::parse(code).unwrap(),
            kind,
            value,
            min_purchase: min,
            active: true,
        }
    }

    fn policy() -> CouponPolicy {
        CouponPolicy::new(vec![
            coupon("SAVE20", CouponKind::Fixed, dec!(20), Some(dec!(200))),
            coupon("TENOFF", CouponKind::Percentage, dec!(10), None),
            Coupon {
                active: false,
                ..coupon("EXPIRED", CouponKind::Fixed, dec!(5), None)
            },
        ])
        .unwrap()
    }

    fn cart_with(subtotal: Decimal) -> Cart {
        let mut cart = Cart::new();
        cart.add(ProductId::generate(), subtotal, 1, 10).unwrap();
        cart
    }

    #[test]
    fn test_apply_is_case_insensitive() {
        let mut cart = cart_with(dec!(250));
        let applied = policy().apply("save20", &mut cart).unwrap();

        assert_eq!(applied.code.as_str(), "SAVE20");
        assert_eq!(cart.coupon(), Some(&applied));
    }

    #[test]
    fn test_apply_unknown_and_inactive() {
        let mut cart = cart_with(dec!(250));
        assert_eq!(
            policy().apply("NOPE", &mut cart),
            Err(CouponError::NotFound("NOPE".to_owned()))
        );
        assert!(matches!(
            policy().apply("expired", &mut cart),
            Err(CouponError::NotFound(_))
        ));
        assert!(cart.coupon().is_none());
    }

    #[test]
    fn test_apply_below_minimum_names_threshold() {
        let mut cart = cart_with(dec!(150));
        let err = policy().apply("SAVE20", &mut cart).unwrap_err();

        assert_eq!(
            err,
            CouponError::BelowMinimum {
                code: "SAVE20".to_owned(),
                minimum: dec!(200)
            }
        );
        assert!(err.to_string().contains("200"));
        assert!(cart.coupon().is_none());
    }

    #[test]
    fn test_apply_replaces_prior_coupon() {
        let mut cart = cart_with(dec!(250));
        let policy = policy();
        policy.apply("SAVE20", &mut cart).unwrap();
        policy.apply("TENOFF", &mut cart).unwrap();

        assert_eq!(cart.coupon().unwrap().code.as_str(), "TENOFF");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut cart = cart_with(dec!(250));
        policy().apply("TENOFF", &mut cart).unwrap();

        assert!(CouponPolicy::remove(&mut cart).is_some());
        assert!(CouponPolicy::remove(&mut cart).is_none());
    }

    #[test]
    fn test_revalidate_drops_unmet_minimum() {
        let product = ProductId::generate();
        let mut cart = Cart::new();
        cart.add(product, dec!(125), 2, 10).unwrap();
        let policy = policy();
        policy.apply("SAVE20", &mut cart).unwrap();

        assert!(policy.revalidate(&mut cart).is_none());

        cart.set_quantity(product, 1).unwrap();
        let dropped = policy.revalidate(&mut cart).unwrap();
        assert_eq!(dropped.code.as_str(), "SAVE20");
        assert!(cart.coupon().is_none());
    }

    #[test]
    fn test_discount_for_caps_fixed_at_subtotal() {
        let c = coupon("BIG", CouponKind::Fixed, dec!(100), None);
        assert_eq!(c.discount_for(dec!(40)), dec!(40));
        assert_eq!(c.discount_for(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_discount_for_percentage() {
        let c = coupon("HALF", CouponKind::Percentage, dec!(50), None);
        assert_eq!(c.discount_for(dec!(99.99)), dec!(49.995));
    }

    #[test]
    fn test_new_rejects_out_of_range_values() {
        assert!(matches!(
            CouponPolicy::new(vec![coupon("P0", CouponKind::Percentage, dec!(0), None)]),
            Err(CouponError::Invalid { .. })
        ));
        assert!(matches!(
            CouponPolicy::new(vec![coupon("P101", CouponKind::Percentage, dec!(101), None)]),
            Err(CouponError::Invalid { .. })
        ));
        assert!(matches!(
            CouponPolicy::new(vec![coupon("F0", CouponKind::Fixed, dec!(0), None)]),
            Err(CouponError::Invalid { .. })
        ));
        assert!(CouponPolicy::new(vec![coupon("P100", CouponKind::Percentage, dec!(100), None)]).is_ok());
    }

    #[test]
    fn test_fixed_amount_must_be_whole_cents() {
        assert!(matches!(
            CouponPolicy::new(vec![coupon("F1", CouponKind::Fixed, dec!(0.005), None)]),
            Err(CouponError::Invalid { .. })
        ));
        assert!(coupon("F2", CouponKind::Fixed, dec!(19.990), None).validate().is_ok());
        // Percentages may be fractional
        assert!(coupon("P7", CouponKind::Percentage, dec!(7.125), None).validate().is_ok());
    }

    #[test]
    fn test_new_rejects_duplicate_codes() {
        let result = CouponPolicy::new(vec![
            coupon("DUP", CouponKind::Fixed, dec!(1), None),
            coupon("dup", CouponKind::Fixed, dec!(2), None),
        ]);
        assert!(matches!(result, Err(CouponError::Invalid { .. })));
    }

    #[test]
    fn test_deserialize_defaults_active() {
        let c: Coupon =
            serde_json::from_str(r#"{"code":"welcome","kind":"percentage","value":"15"}"#).unwrap();
        assert!(c.active);
        assert_eq!(c.code.as_str(), "WELCOME");
        assert_eq!(c.min_purchase, None);
    }
}
