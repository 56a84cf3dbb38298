use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{PurchaseOrderStatus, StockDirection};

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel.
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

    /// Sends after a committed change without waiting for channel capacity.
    /// The change stands even if delivery fails, so a full or closed channel
    /// is only logged.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    purchase_order_id = ?event.purchase_order_id(),
                    "Event channel full; dropping purchase order event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    purchase_order_id = ?event.purchase_order_id(),
                    "Event channel closed; dropping purchase order event"
                );
            }
        }
    }
}

/// Domain events emitted by the purchase-order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PurchaseOrderCreated {
        purchase_order_id: Uuid,
        po_number: String,
        total: Decimal,
    },
    PurchaseOrderUpdated(Uuid),
    PurchaseOrderSubmitted(Uuid),
    PurchaseOrderApproved {
        purchase_order_id: Uuid,
        approver_id: Uuid,
        amount: Decimal,
    },
    PurchaseOrderRejected {
        purchase_order_id: Uuid,
        reason: String,
    },
    PurchaseOrderSentToSupplier(Uuid),
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        receiving_record_id: Uuid,
        quantity: i64,
        status: PurchaseOrderStatus,
    },
    PurchaseOrderCancelled {
        purchase_order_id: Uuid,
        reason: Option<String>,
    },
    PurchaseOrderClosed(Uuid),
    StockAdjusted {
        adjustment_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        direction: StockDirection,
        purchase_order_id: Option<Uuid>,
    },
}

impl Event {
    pub fn purchase_order_id(&self) -> Option<Uuid> {
        match self {
            Event::PurchaseOrderCreated {
                purchase_order_id, ..
            }
            | Event::PurchaseOrderApproved {
                purchase_order_id, ..
            }
            | Event::PurchaseOrderRejected {
                purchase_order_id, ..
            }
            | Event::PurchaseOrderReceived {
                purchase_order_id, ..
            }
            | Event::PurchaseOrderCancelled {
                purchase_order_id, ..
            } => Some(*purchase_order_id),
            Event::PurchaseOrderUpdated(id)
            | Event::PurchaseOrderSubmitted(id)
            | Event::PurchaseOrderSentToSupplier(id)
            | Event::PurchaseOrderClosed(id) => Some(*id),
            Event::StockAdjusted {
                purchase_order_id, ..
            } => *purchase_order_id,
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the channel, logging each event and fanning it out to `handlers`.
/// Returns when every sender has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PurchaseOrderReceived {
                purchase_order_id,
                quantity,
                status,
                ..
            } => info!(
                purchase_order_id = %purchase_order_id,
                quantity = quantity,
                status = %status,
                "Goods received"
            ),
            Event::PurchaseOrderCancelled {
                purchase_order_id,
                reason,
            } => warn!(purchase_order_id = %purchase_order_id, reason = ?reason, "Purchase order cancelled"),
            Event::StockAdjusted {
                product_id,
                quantity,
                direction,
                ..
            } => info!(product_id = %product_id, quantity = quantity, direction = %direction, "Stock adjusted"),
            other => info!(purchase_order_id = ?other.purchase_order_id(), "Received event: {:?}", other),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                error!(error = %e, "Failed to handle purchase order event");
            }
        }
    }

    warn!("Event processing loop has ended");
}
