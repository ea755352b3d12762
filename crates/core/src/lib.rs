//! Koi Core - Shared checkout types library.
//!
//! This crate provides the pure half of the Koi Market checkout:
//! - `storefront` - Order reconciliation service (gateway, webhooks, refunds)
//! - `cli` - Command-line tools for migrations and operator tasks
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Everything that decides *how much* to charge and
//! *which* order transitions are legal lives here so it can be tested without
//! a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, money, coupon codes and status enums
//! - [`cart`] - Cart lines with stock clamping and a single coupon slot
//! - [`coupon`] - Coupon definitions and the apply/remove policy
//! - [`pricing`] - The pricing engine producing a [`PriceQuote`]

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod coupon;
pub mod pricing;
pub mod types;

pub use cart::{Cart, CartLine, CartSnapshot, ValidationError};
pub use coupon::{Coupon, CouponError, CouponKind, CouponPolicy};
pub use pricing::{PriceQuote, PricingEngine};
pub use types::*;
