//! Idempotency ledger entries for provider events.

use chrono::{DateTime, Utc};
use koi_core::{OrderId, PaymentIntentId};
use serde::{Deserialize, Serialize};

/// What processing an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The order moved.
    Applied,
    /// The event contradicted the order's state and was recorded only.
    Anomaly,
    /// The event needed no change.
    Ignored,
}

impl EventOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Anomaly => "anomaly",
            Self::Ignored => "ignored",
        }
    }
}

impl std::str::FromStr for EventOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Self::Applied),
            "anomaly" => Ok(Self::Anomaly),
            "ignored" => Ok(Self::Ignored),
            _ => Err(format!("invalid event outcome: {s}")),
        }
    }
}

/// A processed `(intent, event type)` pair. At most one exists per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedEvent {
    pub intent_id: PaymentIntentId,
    pub event_type: String,
    pub order_id: OrderId,
    pub outcome: EventOutcome,
    pub received_at: DateTime<Utc>,
}
