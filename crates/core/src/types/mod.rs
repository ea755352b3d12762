//! Core types for Koi Market.
//!
//! This module provides type-safe wrappers for common checkout concepts.

pub mod code;
pub mod id;
pub mod money;
pub mod status;

pub use code::{CouponCode, CouponCodeError};
pub use id::*;
pub use money::{CurrencyCode, MONEY_SCALE, Money, round_half_up};
pub use status::*;
