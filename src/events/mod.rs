use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Domain events emitted after a mutation commits. Delivery is best-effort;
/// the owning transaction has already committed by the time one is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Sales order events
    SalesOrderCreated(Uuid),
    SalesOrderConfirmed(Uuid),
    SalesOrderPicking(Uuid),
    SalesOrderShipped(Uuid),
    SalesOrderDelivered(Uuid),
    SalesOrderCancelled(Uuid),

    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderApproved(Uuid),
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        partial: bool,
    },
    PurchaseOrderCancelled(Uuid),

    // Stock events
    StockAdjusted {
        product_id: Uuid,
        warehouse_id: Uuid,
        delta: i32,
        on_hand: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel. Downstream consumers (notifications, reorder
/// alerts) hang off this loop; the core only logs.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::SalesOrderConfirmed(order_id) => {
                info!(order_id = %order_id, "sales order confirmed");
            }
            Event::SalesOrderShipped(order_id) => {
                info!(order_id = %order_id, "sales order shipped");
            }
            Event::PurchaseOrderReceived {
                purchase_order_id,
                partial,
            } => {
                info!(purchase_order_id = %purchase_order_id, partial = partial, "purchase order received");
            }
            Event::StockAdjusted {
                product_id,
                warehouse_id,
                delta,
                on_hand,
            } => {
                info!(product_id = %product_id, warehouse_id = %warehouse_id, delta = delta, on_hand = on_hand, "stock adjusted");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        drop(rx);
        assert!(sender
            .send(Event::SalesOrderCreated(Uuid::new_v4()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender.send(Event::SalesOrderCreated(id)).await.unwrap();
        sender.send(Event::SalesOrderConfirmed(id)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Event::SalesOrderCreated(got)) if got == id));
        assert!(matches!(rx.recv().await, Some(Event::SalesOrderConfirmed(got)) if got == id));
    }
}
