#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use procura::{
    config::{AppConfig, ProcurementConfig},
    db::{self, DbPool},
    entities::{purchase_order, purchase_order_line, quote_option, requisition, requisition_line},
    events::{self, Event, EventHandler, EventSender},
    services::{
        consolidation::PurchaseOrderDraft,
        purchase_orders::{DocumentEmitter, EditHeader, EditLine, EditPurchaseOrder, NoopDocumentEmitter},
        requisitions::{NewQuoteOption, NewRequisition, NewRequisitionLine},
        ServiceContainer, ServiceFactory,
    },
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Collects every published event for assertions.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(Event::name).collect()
    }

    /// Waits until `name` has been handled at least `count` times.
    pub async fn wait_for(&self, name: &str, count: usize) -> bool {
        for _ in 0..100 {
            if self.names().await.iter().filter(|n| **n == name).count() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Services backed by a fresh in-memory SQLite database.
pub struct TestDb {
    pub pool: Arc<DbPool>,
    pub event_sender: EventSender,
    pub config: ProcurementConfig,
    pub services: ServiceContainer,
    pub events: Arc<EventLog>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestDb {
    pub async fn new() -> Self {
        Self::build(ProcurementConfig::default(), Arc::new(NoopDocumentEmitter)).await
    }

    pub async fn with_config(config: ProcurementConfig) -> Self {
        Self::build(config, Arc::new(NoopDocumentEmitter)).await
    }

    pub async fn with_emitter(emitter: Arc<dyn DocumentEmitter>) -> Self {
        Self::build(ProcurementConfig::default(), emitter).await
    }

    async fn build(config: ProcurementConfig, emitter: Arc<dyn DocumentEmitter>) -> Self {
        // A single connection keeps every query on the same in-memory database.
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_idle_timeout_secs = 3600;
        cfg.db_acquire_timeout_secs = 30;
        cfg.procurement = config.clone();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let pool = Arc::new(pool);
        let (event_sender, rx) = EventSender::channel(cfg.event_channel_capacity);
        let log = Arc::new(EventLog::default());
        let handler: Arc<dyn EventHandler> = log.clone();
        let event_task = tokio::spawn(events::process_events_with_handlers(rx, vec![handler]));

        let factory = ServiceFactory::new(pool.clone(), event_sender.clone(), config.clone())
            .with_document_emitter(emitter);
        let services = ServiceContainer::new(&factory);

        Self {
            pool,
            event_sender,
            config,
            services,
            events: log,
            _event_task: event_task,
        }
    }

    pub async fn requisition(&self, department: &str) -> requisition::Model {
        self.requisition_for(department, Uuid::new_v4()).await
    }

    pub async fn requisition_for(&self, department: &str, project_id: Uuid) -> requisition::Model {
        self.services
            .requisitions
            .create_requisition(NewRequisition {
                department: department.to_string(),
                project_id,
                site_id: Uuid::new_v4(),
                notes: None,
            })
            .await
            .expect("create requisition")
    }

    pub async fn line(&self, requisition_id: Uuid, required: Decimal) -> requisition_line::Model {
        self.services
            .requisitions
            .add_line(
                requisition_id,
                NewRequisitionLine {
                    material_id: Uuid::new_v4(),
                    description: Some("Steel beam".to_string()),
                    required_quantity: required,
                },
            )
            .await
            .expect("add requisition line")
    }

    /// Adds a quote and selects it.
    pub async fn selected_quote(
        &self,
        line_id: Uuid,
        supplier_id: Uuid,
        unit_price: Decimal,
        quantity: Decimal,
        is_import: bool,
    ) -> quote_option::Model {
        let option = self
            .services
            .requisitions
            .add_quote_option(line_id, quote(supplier_id, unit_price, quantity, is_import))
            .await
            .expect("add quote option");
        self.services
            .requisitions
            .select_quote_option(option.id)
            .await
            .expect("select quote option")
    }

    /// One draft order with a single line of `quantity × unit_price`.
    pub async fn draft_order(&self, quantity: Decimal, unit_price: Decimal) -> PurchaseOrderDraft {
        self.draft_order_for(Uuid::new_v4(), quantity, unit_price)
            .await
    }

    pub async fn draft_order_for(
        &self,
        project_id: Uuid,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> PurchaseOrderDraft {
        let req = self.requisition_for("ENG", project_id).await;
        let line = self.line(req.id, quantity).await;
        self.selected_quote(line.id, Uuid::new_v4(), unit_price, quantity, false)
            .await;
        let mut drafts = self
            .services
            .consolidation
            .consolidate_quotes(req.id)
            .await
            .expect("consolidate quotes");
        assert_eq!(drafts.len(), 1);
        drafts.remove(0)
    }

    /// Sets a delivery location on a draft, keeping its lines.
    pub async fn set_delivery_location(
        &self,
        order: &purchase_order::Model,
        lines: &[purchase_order_line::Model],
        location_id: Uuid,
    ) -> purchase_order::Model {
        self.services
            .purchase_orders
            .edit(
                order.id,
                EditPurchaseOrder {
                    header: EditHeader {
                        notes: order.notes.clone(),
                        expected_delivery_date: None,
                        delivery_location_id: Some(location_id),
                        payment_method: order.payment_method,
                        clear_forced_total: false,
                        changed_by: Some("buyer".to_string()),
                    },
                    lines: keep_lines(lines),
                },
            )
            .await
            .expect("set delivery location")
            .order
    }

    /// A draft taken through authorization into `InProcess`, delivering to `location_id`.
    pub async fn order_in_process(
        &self,
        project_id: Uuid,
        quantity: Decimal,
        unit_price: Decimal,
        location_id: Uuid,
    ) -> (purchase_order::Model, Vec<purchase_order_line::Model>) {
        let draft = self.draft_order_for(project_id, quantity, unit_price).await;
        let orders = &self.services.purchase_orders;
        self.set_delivery_location(&draft.order, &draft.lines, location_id)
            .await;
        orders
            .submit_for_authorization(draft.order.id)
            .await
            .expect("submit");
        orders
            .authorize(draft.order.id, "director".to_string())
            .await
            .expect("authorize");
        let order = orders
            .start_processing(draft.order.id)
            .await
            .expect("start processing");
        let lines = orders.get_lines(order.id).await.expect("lines");
        (order, lines)
    }
}

pub fn quote(supplier_id: Uuid, unit_price: Decimal, quantity: Decimal, is_import: bool) -> NewQuoteOption {
    NewQuoteOption {
        supplier_id,
        unit_price,
        quantity,
        currency: "MXN".to_string(),
        is_net_price: false,
        is_import,
        is_immediate_delivery: false,
        forced_total: None,
    }
}

pub fn keep_lines(lines: &[purchase_order_line::Model]) -> Vec<EditLine> {
    lines
        .iter()
        .map(|l| EditLine {
            id: Some(l.id),
            material_id: l.material_id,
            description: l.description.clone(),
            quantity: l.quantity,
            unit_price: l.unit_price,
            is_import: l.is_import,
        })
        .collect()
}

/// SQLite stores decimals through `f64`; compare within a tight tolerance.
pub fn assert_dec(actual: Decimal, expected: Decimal) {
    let diff = (actual - expected).abs();
    assert!(
        diff < Decimal::new(1, 6),
        "expected {}, got {}",
        expected,
        actual
    );
}
