use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        buyer_id: Uuid,
    },
    OrderCreated(Uuid),
    OrderCompensated {
        order_id: Uuid,
        reason: String,
    },
    StockReserved {
        order_id: Uuid,
        products: usize,
    },
    StockReleased {
        order_id: Uuid,
        reason: String,
    },
    PaymentSessionCreated {
        order_id: Uuid,
        payment_intent_id: Uuid,
        preference_id: String,
    },
    DiscountRedeemed {
        discount_id: i64,
        order_id: Uuid,
        amount: Decimal,
    },
}

/// Cloneable sender handle over the in-process event channel.
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

    /// Sends an event, logging instead of failing when the channel is
    /// closed. Checkout must never fail because the event fabric is down.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(error = %e, event = ?event, "Dropped domain event");
        }
    }
}

/// Consumes events from the channel and logs them. A deployment that
/// forwards events to an external bus replaces this task.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderCompensated { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "Order compensated");
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}
