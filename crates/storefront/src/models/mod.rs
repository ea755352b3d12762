//! Records persisted by the storefront.
//!
//! Pure money and state-machine logic lives in `koi_core`; these types add the
//! identity, ownership and audit fields that only make sense once stored.

pub mod event;
pub mod order;
pub mod refund;

pub use event::{EventOutcome, ProcessedEvent};
pub use order::{Order, OrderView, StatusChange};
pub use refund::{RefundRequest, RefundResolution};
