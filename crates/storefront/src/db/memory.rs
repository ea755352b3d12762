//! In-memory repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use koi_core::{Cart, OrderId, PaymentIntentId, ProviderRefundId, RefundRequestId, UserId};
use tokio::sync::RwLock;

use super::{CartStore, EventLedger, OrderRepository, RefundRepository, RepositoryError};
use crate::models::{Order, ProcessedEvent, RefundRequest, RefundResolution, StatusChange};

/// Every repository backed by process-local maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    refunds: RwLock<Vec<RefundRequest>>,
    events: RwLock<HashMap<(PaymentIntentId, String), ProcessedEvent>>,
    carts: RwLock<HashMap<UserId, Cart>>,
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict(format!(
                "order {} already exists",
                order.id
            )));
        }
        if let Some(intent) = &order.payment_intent_id
            && orders
                .values()
                .any(|o| o.payment_intent_id.as_ref() == Some(intent))
        {
            return Err(RepositoryError::Conflict(format!(
                "payment intent {intent} already belongs to an order"
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.payment_intent_id.as_ref() == Some(intent_id))
            .cloned())
    }

    async fn find_successor(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.retry_of == Some(id))
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if order.status != change.from {
            return Ok(None);
        }
        order.apply(change, Utc::now());
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl RefundRepository for MemoryStore {
    async fn insert(&self, request: &RefundRequest) -> Result<(), RepositoryError> {
        let mut refunds = self.refunds.write().await;
        if refunds.iter().any(|r| r.id == request.id) {
            return Err(RepositoryError::Conflict(format!(
                "refund request {} already exists",
                request.id
            )));
        }
        refunds.push(request.clone());
        Ok(())
    }

    async fn get(&self, id: RefundRequestId) -> Result<Option<RefundRequest>, RepositoryError> {
        Ok(self
            .refunds
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<RefundRequest>, RepositoryError> {
        Ok(self
            .refunds
            .read()
            .await
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn record_provider_refund(
        &self,
        id: RefundRequestId,
        provider_refund_id: &ProviderRefundId,
    ) -> Result<(), RepositoryError> {
        let mut refunds = self.refunds.write().await;
        let request = refunds
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        request.provider_refund_id = Some(provider_refund_id.clone());
        Ok(())
    }

    async fn resolve(
        &self,
        id: RefundRequestId,
        resolution: &RefundResolution,
    ) -> Result<Option<RefundRequest>, RepositoryError> {
        let mut refunds = self.refunds.write().await;
        let request = refunds
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        if request.status.is_resolved() {
            return Ok(None);
        }
        request.resolve(resolution);
        Ok(Some(request.clone()))
    }
}

#[async_trait]
impl EventLedger for MemoryStore {
    async fn record(&self, event: &ProcessedEvent) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        let key = (event.intent_id.clone(), event.event_type.clone());
        if events.contains_key(&key) {
            return Ok(false);
        }
        events.insert(key, event.clone());
        Ok(true)
    }

    async fn release(
        &self,
        intent_id: &PaymentIntentId,
        event_type: &str,
    ) -> Result<(), RepositoryError> {
        self.events
            .write()
            .await
            .remove(&(intent_id.clone(), event_type.to_string()));
        Ok(())
    }

    async fn list_for_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Vec<ProcessedEvent>, RepositoryError> {
        let mut events: Vec<_> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| &e.intent_id == intent_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.received_at);
        Ok(events)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn load(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        Ok(self
            .carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, user_id: UserId, cart: &Cart) -> Result<(), RepositoryError> {
        self.carts.write().await.insert(user_id, cart.clone());
        Ok(())
    }

    async fn clear(&self, user_id: UserId) -> Result<(), RepositoryError> {
        self.carts.write().await.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use koi_core::{
        CurrencyCode, OrderStatus, PaymentMethod, PriceQuote, ProductId, RefundStatus,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::EventOutcome;

    fn order(intent: &str) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::generate(),
            user_id: UserId::generate(),
            snapshot: Cart::new().snapshot(),
            quote: PriceQuote {
                subtotal: dec!(50),
                discount: Decimal::ZERO,
                shipping: Decimal::ZERO,
                total: dec!(50),
            },
            currency: CurrencyCode::CNY,
            payment_method: PaymentMethod::Card,
            payment_intent_id: Some(PaymentIntentId::new(intent)),
            client_secret: Some("cs".to_string()),
            intent_status: None,
            status: OrderStatus::Pending,
            retry_of: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::default();
        let order = order("pi_1");
        OrderRepository::insert(&store, &order).await.unwrap();

        let paid = StatusChange::new(OrderStatus::Pending, OrderStatus::Paid);
        let updated = store.transition(order.id, &paid).await.unwrap().unwrap();
        assert_eq!(updated.status, OrderStatus::Paid);

        // Stale writer still believes the order is pending
        let failed = StatusChange::new(OrderStatus::Pending, OrderStatus::Failed);
        assert!(store.transition(order.id, &failed).await.unwrap().is_none());
        assert_eq!(
            OrderRepository::get(&store, order.id).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_insert_rejects_reused_intent() {
        let store = MemoryStore::default();
        OrderRepository::insert(&store, &order("pi_1")).await.unwrap();
        let err = OrderRepository::insert(&store, &order("pi_1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ledger_records_once() {
        let store = MemoryStore::default();
        let event = ProcessedEvent {
            intent_id: PaymentIntentId::new("pi_1"),
            event_type: "payment_intent.succeeded".to_string(),
            order_id: OrderId::generate(),
            outcome: EventOutcome::Applied,
            received_at: Utc::now(),
        };

        assert!(store.record(&event).await.unwrap());
        assert!(!store.record(&event).await.unwrap());

        store.release(&event.intent_id, &event.event_type).await.unwrap();
        assert!(store.record(&event).await.unwrap());
        assert_eq!(store.list_for_intent(&event.intent_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_resolve_only_once() {
        let store = MemoryStore::default();
        let request = RefundRequest {
            id: RefundRequestId::generate(),
            order_id: OrderId::generate(),
            payment_intent_id: None,
            amount: dec!(10),
            reason: "damaged".to_string(),
            status: RefundStatus::Pending,
            provider_refund_id: None,
            requested_by: "ops".to_string(),
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        RefundRepository::insert(&store, &request).await.unwrap();

        let resolution = RefundResolution {
            status: RefundStatus::Rejected,
            resolved_by: "ops".to_string(),
            provider_refund_id: None,
            resolved_at: Utc::now(),
        };
        assert!(store.resolve(request.id, &resolution).await.unwrap().is_some());
        assert!(store.resolve(request.id, &resolution).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cart_roundtrip() {
        let store = MemoryStore::default();
        let user = UserId::generate();
        assert!(store.load(user).await.unwrap().is_empty());

        let mut cart = Cart::new();
        cart.add(ProductId::generate(), dec!(5), 1, 3).unwrap();
        store.save(user, &cart).await.unwrap();
        assert_eq!(store.load(user).await.unwrap(), cart);

        CartStore::clear(&store, user).await.unwrap();
        assert!(store.load(user).await.unwrap().is_empty());
    }
}
