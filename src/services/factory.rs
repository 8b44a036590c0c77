use std::sync::Arc;

use crate::{
    config::ProcurementConfig,
    db::DbPool,
    events::EventSender,
    services::{
        consolidation::ConsolidationService,
        incremental_costs::IncrementalCostService,
        inventory::InventoryLedgerService,
        payments::PaymentService,
        purchase_orders::{DocumentEmitter, NoopDocumentEmitter, PurchaseOrderService},
        requisitions::RequisitionService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: ProcurementConfig,
    document_emitter: Arc<dyn DocumentEmitter>,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: ProcurementConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
            document_emitter: Arc::new(NoopDocumentEmitter),
        }
    }

    /// Replaces the emitter used for authorized purchase order documents
    pub fn with_document_emitter(mut self, emitter: Arc<dyn DocumentEmitter>) -> Self {
        self.document_emitter = emitter;
        self
    }

    pub fn requisition_service(&self) -> RequisitionService {
        RequisitionService::new(self.db_pool.clone(), self.config.clone())
    }

    pub fn consolidation_service(&self) -> ConsolidationService {
        ConsolidationService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn purchase_order_service(&self) -> PurchaseOrderService {
        PurchaseOrderService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.config.clone(),
            self.document_emitter.clone(),
        )
    }

    pub fn payment_service(&self) -> PaymentService {
        PaymentService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn incremental_cost_service(&self) -> IncrementalCostService {
        IncrementalCostService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn inventory_service(&self) -> InventoryLedgerService {
        InventoryLedgerService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn event_sender(&self) -> &EventSender {
        &self.event_sender
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub requisitions: Arc<RequisitionService>,
    pub consolidation: Arc<ConsolidationService>,
    pub purchase_orders: Arc<PurchaseOrderService>,
    pub payments: Arc<PaymentService>,
    pub incremental_costs: Arc<IncrementalCostService>,
    pub inventory: Arc<InventoryLedgerService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            requisitions: Arc::new(factory.requisition_service()),
            consolidation: Arc::new(factory.consolidation_service()),
            purchase_orders: Arc::new(factory.purchase_order_service()),
            payments: Arc::new(factory.payment_service()),
            incremental_costs: Arc::new(factory.incremental_cost_service()),
            inventory: Arc::new(factory.inventory_service()),
        }
    }
}
