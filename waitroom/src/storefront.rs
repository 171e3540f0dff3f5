//! Storefront operations that sit behind the waiting room.
//!
//! Cart and order operations go through the Entry Gate. Payment goes through
//! the Capacity Gate, so every charge attempt, paid or declined, gives back
//! its checkout slot exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GuardedError;
use crate::gate::{CapacityFlow, EntryFlow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub option_id: u64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub cart_item_id: u64,
    pub option_id: u64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OrderRequest {
    /// Buy-now: order a single option without touching the cart.
    #[serde(rename_all = "camelCase")]
    Direct { option_id: u64, quantity: u32 },
    /// Order everything selected in the cart.
    #[serde(rename_all = "camelCase")]
    FromCart { cart_item_ids: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: u64,
    pub total_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: u64,
    pub amount: u64,
    /// Reference issued by the payment provider widget.
    pub payment_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub order_id: u64,
    pub approved_at: String,
}

/// Storefront backend operations. Implemented outside this crate.
#[async_trait]
pub trait Storefront: Send + Sync + 'static {
    type Error: Send + 'static;

    async fn add_to_cart(&self, item: CartItem) -> Result<CartLine, Self::Error>;

    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt, Self::Error>;

    async fn submit_payment(&self, payment: PaymentRequest) -> Result<PaymentReceipt, Self::Error>;
}

/// Storefront whose operations only run after waiting-room admission.
///
/// Flows are passed in so the calling view keeps their handles for teardown
/// and presentation.
pub struct GatedStorefront<S> {
    store: Arc<S>,
}

impl<S> Clone for GatedStorefront<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Storefront> GatedStorefront<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn add_to_cart(
        &self,
        flow: EntryFlow,
        item: CartItem,
    ) -> Result<CartLine, GuardedError<S::Error>> {
        let store = Arc::clone(&self.store);
        flow.run(move || async move { store.add_to_cart(item).await })
            .await
    }

    pub async fn place_order(
        &self,
        flow: EntryFlow,
        order: OrderRequest,
    ) -> Result<OrderReceipt, GuardedError<S::Error>> {
        let store = Arc::clone(&self.store);
        flow.run(move || async move { store.place_order(order).await })
            .await
    }

    pub async fn submit_payment(
        &self,
        flow: CapacityFlow,
        payment: PaymentRequest,
    ) -> Result<PaymentReceipt, GuardedError<S::Error>> {
        let store = Arc::clone(&self.store);
        let order_id = payment.order_id;
        let result = flow
            .run(move || async move { store.submit_payment(payment).await })
            .await;

        if let Err(GuardedError::Action(_)) = &result {
            tracing::info!(order_id, "Payment failed after admission");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::client::QueueApi;
    use crate::error::{GateError, GateOperation};
    use crate::gate::Waitroom;
    use crate::status::QueueStatus;
    use crate::test_support::{FakeQueue, unavailable};

    #[derive(Debug, PartialEq, Eq, thiserror::Error)]
    enum ShopError {
        #[error("option sold out")]
        SoldOut,
        #[error("payment declined")]
        Declined,
    }

    #[derive(Default)]
    struct FakeShop {
        calls: Mutex<Vec<&'static str>>,
        decline_payments: bool,
        next_id: AtomicUsize,
    }

    impl FakeShop {
        fn record(&self, call: &'static str) -> u64 {
            self.calls.lock().unwrap().push(call);
            self.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 1
        }
    }

    #[async_trait]
    impl Storefront for FakeShop {
        type Error = ShopError;

        async fn add_to_cart(&self, item: CartItem) -> Result<CartLine, ShopError> {
            if item.quantity == 0 {
                return Err(ShopError::SoldOut);
            }
            let id = self.record("add_to_cart");
            Ok(CartLine {
                cart_item_id: id,
                option_id: item.option_id,
                quantity: item.quantity,
            })
        }

        async fn place_order(&self, _order: OrderRequest) -> Result<OrderReceipt, ShopError> {
            let id = self.record("place_order");
            Ok(OrderReceipt {
                order_id: id,
                total_amount: 12_000,
            })
        }

        async fn submit_payment(&self, payment: PaymentRequest) -> Result<PaymentReceipt, ShopError> {
            self.record("submit_payment");
            if self.decline_payments {
                return Err(ShopError::Declined);
            }
            Ok(PaymentReceipt {
                order_id: payment.order_id,
                approved_at: "2026-10-19T12:00:00Z".to_string(),
            })
        }
    }

    fn setup(queue: FakeQueue, shop: FakeShop) -> (Arc<FakeQueue>, Arc<FakeShop>, Waitroom, GatedStorefront<FakeShop>) {
        let queue = Arc::new(queue);
        let shop = Arc::new(shop);
        let room = Waitroom::new(Arc::clone(&queue) as Arc<dyn QueueApi>)
            .with_poll_interval(Duration::from_secs(1));
        let store = GatedStorefront::new(Arc::clone(&shop));
        (queue, shop, room, store)
    }

    fn payment() -> PaymentRequest {
        PaymentRequest {
            order_id: 7,
            amount: 12_000,
            payment_key: "pk_test".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn add_to_cart_waits_for_entry_gate() {
        let (queue, shop, room, store) = setup(
            FakeQueue::with_statuses([QueueStatus::waiting(2, ""), QueueStatus::allowed()]),
            FakeShop::default(),
        );

        let line = store
            .add_to_cart(room.entry_flow(), CartItem { option_id: 5, quantity: 2 })
            .await
            .unwrap();

        assert_eq!(line.option_id, 5);
        assert_eq!(FakeQueue::count(&queue.registers), 1);
        assert_eq!(FakeQueue::count(&queue.enters), 0);
        assert_eq!(*shop.calls.lock().unwrap(), vec!["add_to_cart"]);
    }

    #[tokio::test(start_paused = true)]
    async fn add_to_cart_error_passes_through() {
        let (_queue, _shop, room, store) = setup(
            FakeQueue::with_statuses([QueueStatus::allowed()]),
            FakeShop::default(),
        );

        let err = store
            .add_to_cart(room.entry_flow(), CartItem { option_id: 5, quantity: 0 })
            .await
            .unwrap_err();

        assert!(matches!(err, GuardedError::Action(ShopError::SoldOut)));
    }

    #[tokio::test(start_paused = true)]
    async fn place_order_not_invoked_when_admission_fails() {
        let (_queue, shop, room, store) = setup(
            FakeQueue::with_statuses([QueueStatus::waiting(9, "")])
                .then_error(unavailable(GateOperation::QueryEntryStatus)),
            FakeShop::default(),
        );

        let err = store
            .place_order(room.entry_flow(), OrderRequest::FromCart { cart_item_ids: vec![1, 2] })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GuardedError::Admission(GateError::Unavailable {
                operation: GateOperation::QueryEntryStatus,
                ..
            })
        ));
        assert!(shop.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn payment_success_exits_once() {
        let (queue, _shop, room, store) = setup(
            FakeQueue::with_statuses([QueueStatus::allowed()]),
            FakeShop::default(),
        );

        let receipt = store
            .submit_payment(room.capacity_flow(), payment())
            .await
            .unwrap();

        assert_eq!(receipt.order_id, 7);
        assert_eq!(FakeQueue::count(&queue.enters), 1);
        assert_eq!(queue.total_exits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_payment_exits_once() {
        let (queue, shop, room, store) = setup(
            FakeQueue::with_statuses([QueueStatus::waiting(1, ""), QueueStatus::allowed()]),
            FakeShop {
                decline_payments: true,
                ..FakeShop::default()
            },
        );

        let err = store
            .submit_payment(room.capacity_flow(), payment())
            .await
            .unwrap_err();

        assert!(matches!(err, GuardedError::Action(ShopError::Declined)));
        assert_eq!(*shop.calls.lock().unwrap(), vec!["submit_payment"]);
        assert_eq!(queue.total_exits(), 1);
    }

    #[test]
    fn order_request_wire_shape() {
        insta::assert_json_snapshot!(
            OrderRequest::FromCart { cart_item_ids: vec![3, 4] },
            @r#"
        {
          "kind": "fromCart",
          "cartItemIds": [
            3,
            4
          ]
        }
        "#
        );
    }
}
