use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::inventory_movement::MovementKind;
use crate::entities::purchase_order::PurchaseOrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiver half to hand to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queues an event without waiting for room in the channel.
    pub fn try_publish(&self, event: Event) -> Result<(), String> {
        let name = event.name();
        self.sender.try_send(event).map_err(|e| {
            counter!("procura_events.dropped", 1, "event" => name);
            match e {
                mpsc::error::TrySendError::Full(_) => "event channel is full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "event channel is closed".to_string(),
            }
        })
    }

    /// Publishes an event for a change that has already been committed.
    ///
    /// Never waits on the consumer. A full or closed channel drops the event
    /// with a warning.
    pub fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.try_publish(event) {
            warn!(event = name, error = %e, "Domain event dropped after commit");
        }
    }
}

/// Domain events emitted after a state change commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Consolidation
    PurchaseOrdersGenerated {
        requisition_id: Uuid,
        purchase_order_ids: Vec<Uuid>,
    },

    // Purchase order lifecycle
    PurchaseOrderStatusChanged {
        purchase_order_id: Uuid,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    },
    PurchaseOrderAuthorized {
        purchase_order_id: Uuid,
        code: String,
        document_handle: Option<String>,
    },
    PurchaseOrderEdited {
        purchase_order_id: Uuid,
        change_id: Uuid,
    },
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        movement_ids: Vec<Uuid>,
    },

    // Payments
    PaymentPosted {
        purchase_order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        pending_settlement: bool,
    },
    PaymentReversed {
        purchase_order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        pending_settlement: bool,
    },

    // Incremental costs
    IncrementalCostClosed {
        incremental_cost_id: Uuid,
        lines: usize,
        movements: usize,
    },

    // Inventory ledger
    InventoryMovementPosted {
        movement_id: Uuid,
        kind: MovementKind,
        material_id: Uuid,
        location_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PurchaseOrdersGenerated { .. } => "purchase_orders_generated",
            Event::PurchaseOrderStatusChanged { .. } => "purchase_order_status_changed",
            Event::PurchaseOrderAuthorized { .. } => "purchase_order_authorized",
            Event::PurchaseOrderEdited { .. } => "purchase_order_edited",
            Event::PurchaseOrderReceived { .. } => "purchase_order_received",
            Event::PaymentPosted { .. } => "payment_posted",
            Event::PaymentReversed { .. } => "payment_reversed",
            Event::IncrementalCostClosed { .. } => "incremental_cost_closed",
            Event::InventoryMovementPosted { .. } => "inventory_movement_posted",
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Logs every event. Used when no handlers are registered.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, Vec::new()).await
}

/// Drains the channel, fanning every event out to `handlers`.
pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        counter!("procura_events.received", 1, "event" => name);
        info!(event = name, "Received event: {:?}", event);

        if let Event::PaymentPosted {
            purchase_order_id,
            pending_settlement: true,
            ..
        } = &event
        {
            warn!(
                purchase_order_id = %purchase_order_id,
                "Purchase order has a payment recorded but is not fully settled"
            );
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                counter!("procura_events.handler_failures", 1, "event" => name);
                error!(event = name, error = %e, "Event handler failed");
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
