use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the processor is gone.
    /// State changes have already been committed by the time events are emitted.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "domain event dropped");
        }
    }
}

/// Domain events emitted after a state change has been persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: String,
        total_price: Decimal,
    },
    OrderCancelled(Uuid),
    OrderPaid {
        order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },
    OrderDelivered(Uuid),
    PaymentFailed {
        order_id: Uuid,
        response_code: String,
    },
    CouponApplied {
        order_id: Uuid,
        code: String,
        discount: Decimal,
    },
    GatewaySignatureMismatch {
        txn_ref: Option<String>,
    },
}

/// Drains the event channel, logging each event
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_price,
            } => {
                info!(%order_id, %user_id, %total_price, "order created");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            Event::OrderPaid {
                order_id,
                payment_id,
                amount,
            } => {
                info!(%order_id, %payment_id, %amount, "order paid");
            }
            Event::OrderDelivered(order_id) => {
                info!(%order_id, "order delivered");
            }
            Event::PaymentFailed {
                order_id,
                response_code,
            } => {
                warn!(%order_id, %response_code, "gateway payment failed");
            }
            Event::CouponApplied {
                order_id,
                code,
                discount,
            } => {
                info!(%order_id, %code, %discount, "coupon applied");
            }
            Event::GatewaySignatureMismatch { txn_ref } => {
                warn!(txn_ref = ?txn_ref, "security: gateway signature mismatch");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (sender, mut rx) = EventSender::channel(8);
        let id = Uuid::new_v4();
        sender.send(Event::OrderCancelled(id)).await.unwrap();
        sender.send(Event::OrderDelivered(id)).await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::OrderCancelled(id)));
        assert_eq!(rx.recv().await, Some(Event::OrderDelivered(id)));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        assert!(sender.send(Event::OrderDelivered(Uuid::nil())).await.is_err());
        sender.send_or_log(Event::OrderDelivered(Uuid::nil())).await;
    }

    #[tokio::test]
    async fn processor_stops_when_senders_drop() {
        let (sender, rx) = EventSender::channel(4);
        let handle = tokio::spawn(process_events(rx));
        sender
            .send(Event::GatewaySignatureMismatch { txn_ref: None })
            .await
            .unwrap();
        drop(sender);
        handle.await.unwrap();
    }
}
