//! Business logic services for the storefront.
//!
//! # Services
//!
//! - [`reconciler`] - Order lifecycle: creation, provider events, polling,
//!   retries and operator fulfillment transitions
//! - [`refunds`] - Operator refund requests, approval and rejection
//! - [`effects`] - Side effects fired when an order is paid, fails or is refunded
//! - [`locks`] - Per-order mutual exclusion shared by both services
//!
//! Both services take the acting identity as an explicit argument
//! ([`Caller`] for shoppers, [`Operator`] for staff) rather than reading it
//! from ambient request state.

pub mod effects;
pub mod locks;
pub mod reconciler;
pub mod refunds;

pub use effects::{LoggingEffects, OrderEffects};
pub use locks::OrderLocks;
pub use reconciler::{
    ApplyOutcome, CheckoutSession, IntentStatusView, OrderReconciler, PaymentEvent, PaymentOutcome,
};
pub use refunds::{NewRefund, RefundWorkflow};

use koi_core::UserId;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::gateway::GatewayError;

/// The shopper on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
}

impl Caller {
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// A staff member acting through the admin routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
}

impl Operator {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Errors that can occur in the order and refund services.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The order or refund is not in a state that allows the operation.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Amount outside the allowed range.
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The caller does not own the order.
    #[error("forbidden")]
    Forbidden,

    /// Input that can never succeed, regardless of state.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Payment provider failure.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Repository/database error.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A spawned provider call panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ReconcileError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}
