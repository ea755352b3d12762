//! Status enums for orders, payment intents and refunds.
//!
//! The order lifecycle is a small state machine:
//!
//! ```text
//! pending ──► paid ──► processing ──► shipped ──► delivered
//!    │          │           │            │            │
//!    ├─► failed └───────────┴────────────┴────────────┴──► refunded
//!    └─► cancelled
//! ```
//!
//! `failed`, `cancelled` and `refunded` are terminal. A terminal order is never
//! moved again; a retry creates a successor order instead.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Paid,
        Self::Processing,
        Self::Shipped,
        Self::Delivered,
        Self::Failed,
        Self::Cancelled,
        Self::Refunded,
    ];

    /// Whether the order can never move again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Refunded)
    }

    /// Whether payment has been collected and not returned.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Processing | Self::Shipped | Self::Delivered
        )
    }

    /// Whether a refund may be requested against an order in this status.
    #[must_use]
    pub const fn is_refundable(self) -> bool {
        self.is_paid()
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Self-transitions are not legal; callers treat "already there" as a
    /// no-op before asking.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Paid | Self::Failed | Self::Cancelled),
            Self::Paid => matches!(next, Self::Processing | Self::Refunded),
            Self::Processing => matches!(next, Self::Shipped | Self::Refunded),
            Self::Shipped => matches!(next, Self::Delivered | Self::Refunded),
            Self::Delivered => matches!(next, Self::Refunded),
            Self::Failed | Self::Cancelled | Self::Refunded => false,
        }
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Last known status of a provider-side payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentIntentStatus {
    #[default]
    Initial,
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentIntentStatus {
    /// Whether the provider will not change this intent any further.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PaymentIntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentIntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIAL" | "REQUIRES_PAYMENT_METHOD" => Ok(Self::Initial),
            "PENDING" | "PROCESSING" | "REQUIRES_CAPTURE" | "REQUIRES_CUSTOMER_ACTION" => {
                Ok(Self::Pending)
            }
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(format!("invalid payment intent status: {s}")),
        }
    }
}

/// Refund request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    Completed,
    Rejected,
}

impl RefundStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Completed and rejected requests are immutable.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("invalid refund status: {s}")),
        }
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card or wallet, collected through the payment provider.
    #[default]
    Card,
    /// Cash collected by the courier; never touches the provider.
    CashOnDelivery,
}

impl PaymentMethod {
    /// Whether orders with this method go through the payment gateway.
    #[must_use]
    pub const fn uses_gateway(self) -> bool {
        matches!(self, Self::Card)
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::CashOnDelivery => "cash_on_delivery",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(Self::Card),
            "cash_on_delivery" => Ok(Self::CashOnDelivery),
            _ => Err(format!("invalid payment method: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_branches() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn test_paid_is_exclusive_with_failure() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_refund_reachable_only_after_payment() {
        for status in OrderStatus::ALL {
            assert_eq!(
                status.can_transition_to(OrderStatus::Refunded),
                status.is_paid(),
                "{status}"
            );
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for from in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_order_status_roundtrip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_intent_status_accepts_provider_spellings() {
        assert_eq!(
            "REQUIRES_PAYMENT_METHOD".parse::<PaymentIntentStatus>().unwrap(),
            PaymentIntentStatus::Initial
        );
        assert_eq!(
            "canceled".parse::<PaymentIntentStatus>().unwrap(),
            PaymentIntentStatus::Cancelled
        );
        assert!(PaymentIntentStatus::Succeeded.is_final());
        assert!(!PaymentIntentStatus::Pending.is_final());
    }

    #[test]
    fn test_refund_status_resolution() {
        assert!(!RefundStatus::Pending.is_resolved());
        assert!(RefundStatus::Completed.is_resolved());
        assert!(RefundStatus::Rejected.is_resolved());
    }

    #[test]
    fn test_payment_method_serde() {
        let json = serde_json::to_string(&PaymentMethod::CashOnDelivery).unwrap();
        assert_eq!(json, "\"cash_on_delivery\"");
        assert!(PaymentMethod::Card.uses_gateway());
        assert!(!PaymentMethod::CashOnDelivery.uses_gateway());
    }
}
