//! Shopping cart with stock clamping and a single coupon slot.
//!
//! The cart is the validation boundary for pricing inputs: once a line is in a
//! cart its unit price is non-negative with at most two decimal places and its
//! quantity satisfies `0 < quantity <= stock_limit`. The pricing engine relies
//! on this and has no error conditions of its own.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coupon::Coupon;
use crate::types::{MONEY_SCALE, ProductId};

/// Errors raised when a cart mutation has malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A line was added with quantity zero.
    #[error("quantity must be at least 1")]
    ZeroQuantity,

    /// The product has no stock at all.
    #[error("product {0} is out of stock")]
    OutOfStock(ProductId),

    /// Unit prices cannot be negative.
    #[error("unit price cannot be negative (got {0})")]
    NegativePrice(Decimal),

    /// Unit prices are expressed with at most two decimal places.
    #[error("unit price {0} has more than two decimal places")]
    PriceScale(Decimal),

    /// The product is not in the cart.
    #[error("product {0} is not in the cart")]
    UnknownProduct(ProductId),
}

/// A single product line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub stock_limit: u32,
}

impl CartLine {
    /// `unit_price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A customer's cart.
///
/// Lines are keyed by product; adding a product that is already present merges
/// the quantities. At most one coupon is held at a time.
///
/// Deserializing goes through [`Cart::from_lines`], so stored carts are held to
/// the same rules as carts built in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredCart")]
pub struct Cart {
    lines: Vec<CartLine>,
    coupon: Option<Coupon>,
}

/// Wire shape of a [`Cart`], before validation.
#[derive(Deserialize)]
struct StoredCart {
    lines: Vec<CartLine>,
    #[serde(default)]
    coupon: Option<Coupon>,
}

impl TryFrom<StoredCart> for Cart {
    type Error = ValidationError;

    fn try_from(stored: StoredCart) -> Result<Self, Self::Error> {
        let mut cart = Self::from_lines(stored.lines)?;
        let subtotal = cart.subtotal();
        cart.coupon = stored
            .coupon
            .filter(|c| c.validate().is_ok() && c.is_eligible(subtotal));
        Ok(cart)
    }
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            coupon: None,
        }
    }

    /// Rebuild a cart from persisted lines.
    ///
    /// Each line goes through the same validation and clamping as [`Cart::add`].
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` encountered.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Result<Self, ValidationError> {
        let mut cart = Self::new();
        for line in lines {
            cart.add(
                line.product_id,
                line.unit_price,
                line.quantity,
                line.stock_limit,
            )?;
        }
        Ok(cart)
    }

    /// Add `quantity` units of a product.
    ///
    /// The resulting quantity is clamped to `stock_limit`. Adding a product that
    /// is already in the cart refreshes its price and stock limit from the new
    /// values.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for a zero quantity, zero stock, or a malformed
    /// unit price.
    pub fn add(
        &mut self,
        product_id: ProductId,
        unit_price: Decimal,
        quantity: u32,
        stock_limit: u32,
    ) -> Result<&CartLine, ValidationError> {
        validate_price(unit_price)?;
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if stock_limit == 0 {
            return Err(ValidationError::OutOfStock(product_id));
        }

        let index = match self.position(product_id) {
            Some(index) => {
                let line = &mut self.lines[index];
                line.unit_price = unit_price;
                line.stock_limit = stock_limit;
                line.quantity = line.quantity.saturating_add(quantity).min(stock_limit);
                index
            }
            None => {
                self.lines.push(CartLine {
                    product_id,
                    unit_price,
                    quantity: quantity.min(stock_limit),
                    stock_limit,
                });
                self.lines.len() - 1
            }
        };

        Ok(&self.lines[index])
    }

    /// Set the quantity of a line, clamped to its stock limit.
    ///
    /// A quantity of zero removes the line and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownProduct` if the product is not in the cart.
    pub fn set_quantity(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<&CartLine>, ValidationError> {
        let index = self
            .position(product_id)
            .ok_or(ValidationError::UnknownProduct(product_id))?;

        if quantity == 0 {
            self.lines.remove(index);
            return Ok(None);
        }

        let line = &mut self.lines[index];
        line.quantity = quantity.min(line.stock_limit);
        Ok(Some(&self.lines[index]))
    }

    /// Remove a product. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.product_id != product_id);
        self.lines.len() != before
    }

    /// Empty the cart, including the coupon slot.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.coupon = None;
    }

    /// `Σ unit_price * quantity`, exact.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// The applied coupon, if any.
    #[must_use]
    pub const fn coupon(&self) -> Option<&Coupon> {
        self.coupon.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |acc, line| acc.saturating_add(line.quantity))
    }

    /// Freeze the current contents for an order.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            lines: self.lines.clone(),
            coupon: self.coupon.clone(),
        }
    }

    pub(crate) fn replace_coupon(&mut self, coupon: Option<Coupon>) -> Option<Coupon> {
        std::mem::replace(&mut self.coupon, coupon)
    }

    fn position(&self, product_id: ProductId) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.product_id == product_id)
    }
}

/// Immutable copy of a cart taken when an order is created.
///
/// Later cart mutations never affect an order built from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub coupon: Option<Coupon>,
}

impl CartSnapshot {
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn validate_price(price: Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ValidationError::NegativePrice(price));
    }
    if price.normalize().scale() > MONEY_SCALE {
        return Err(ValidationError::PriceScale(price));
    }
    Ok(())
}
