//! Purchase Order Service
//!
//! Lifecycle of purchase orders (OC) after consolidation: authorization with
//! document emission, edits recorded as change history, hold and resume,
//! cancellation, receipts into the inventory ledger and closing.

use crate::{
    config::ProcurementConfig,
    db::{self, DbPool},
    entities::{
        purchase_order::{self, Entity as PurchaseOrder, PaymentMethod, PurchaseOrderStatus},
        purchase_order_change::{self, Entity as PurchaseOrderChange},
        purchase_order_line::{self, Entity as PurchaseOrderLine},
        quote_option::{self, Entity as QuoteOption},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::{ensure_non_negative, ensure_positive, round_quantity},
    services::{
        inventory::{self, DocumentRef, NegativeGuard, Posting, ProjectSite, ReceiveStock, StockDestination},
        payments::{live_payment_amounts, settlement_state},
        pricing::{self, PricedLine, TaxRates, TotalsSnapshot},
        requisitions::adjust_quantity_processed,
    },
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::Json, sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Produces the printable purchase order document after authorization.
#[async_trait]
pub trait DocumentEmitter: Send + Sync {
    /// Returns a handle the document can be fetched by.
    async fn emit(
        &self,
        order: &purchase_order::Model,
        lines: &[purchase_order_line::Model],
    ) -> anyhow::Result<String>;
}

/// Emitter used when no document backend is configured; the handle is the order code.
pub struct NoopDocumentEmitter;

#[async_trait]
impl DocumentEmitter for NoopDocumentEmitter {
    async fn emit(
        &self,
        order: &purchase_order::Model,
        _lines: &[purchase_order_line::Model],
    ) -> anyhow::Result<String> {
        Ok(order.code.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationOutcome {
    pub order: purchase_order::Model,
    pub document_handle: Option<String>,
    /// Post-commit side effects that failed; the authorization itself stands
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditHeader {
    pub notes: Option<String>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub delivery_location_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub clear_forced_total: bool,
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditLine {
    /// `None` adds a new line
    pub id: Option<Uuid>,
    pub material_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    /// Pre-tax unit price
    pub unit_price: Decimal,
    #[serde(default)]
    pub is_import: bool,
}

/// Full replacement of an order's header and lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditPurchaseOrder {
    pub header: EditHeader,
    pub lines: Vec<EditLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub order: purchase_order::Model,
    pub lines: Vec<purchase_order_line::Model>,
    pub change: purchase_order_change::Model,
    pub added: Vec<Uuid>,
    pub modified: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptOutcome {
    pub order: purchase_order::Model,
    pub lines: Vec<purchase_order_line::Model>,
    pub movements: Vec<crate::entities::inventory_movement::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LineSnapshot {
    id: Uuid,
    line_number: i32,
    material_id: Option<Uuid>,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    is_import: bool,
    subtotal: Decimal,
}

/// State captured on each side of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OrderSnapshot {
    status: PurchaseOrderStatus,
    payment_method: PaymentMethod,
    notes: Option<String>,
    expected_delivery_date: Option<NaiveDate>,
    delivery_location_id: Option<Uuid>,
    subtotal: Decimal,
    tax: Decimal,
    withholding: Decimal,
    total: Decimal,
    is_total_forced: bool,
    lines: Vec<LineSnapshot>,
}

impl OrderSnapshot {
    fn capture(order: &purchase_order::Model, lines: &[purchase_order_line::Model]) -> Self {
        Self {
            status: order.status,
            payment_method: order.payment_method,
            notes: order.notes.clone(),
            expected_delivery_date: order.expected_delivery_date,
            delivery_location_id: order.delivery_location_id,
            subtotal: order.subtotal,
            tax: order.tax,
            withholding: order.withholding,
            total: order.total,
            is_total_forced: order.is_total_forced,
            lines: lines
                .iter()
                .map(|l| LineSnapshot {
                    id: l.id,
                    line_number: l.line_number,
                    material_id: l.material_id,
                    description: l.description.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    is_import: l.is_import,
                    subtotal: l.subtotal,
                })
                .collect(),
        }
    }

    fn to_json(&self) -> Result<Json, ServiceError> {
        serde_json::to_value(self)
            .map_err(|e| ServiceError::InternalError(format!("Failed to encode order snapshot: {}", e)))
    }
}

/// Writes `mutate` to a locked order under its version guard.
pub(crate) async fn save_order<C, F>(
    conn: &C,
    order: purchase_order::Model,
    mutate: F,
) -> Result<purchase_order::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut purchase_order::ActiveModel),
{
    let id = order.id;
    let version = order.version;
    let mut active: purchase_order::ActiveModel = order.into();
    mutate(&mut active);
    active.version = Set(version + 1);
    active.updated_at = Set(Utc::now());

    PurchaseOrder::update(active)
        .filter(purchase_order::Column::Version.eq(version))
        .exec(conn)
        .await
        .map_err(db::conflict_or_db(id))
}

async fn lock_order<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrder::find_by_id(id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Purchase order", id))
}

async fn order_lines<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
    Ok(PurchaseOrderLine::find()
        .filter(purchase_order_line::Column::PurchaseOrderId.eq(purchase_order_id))
        .order_by_asc(purchase_order_line::Column::LineNumber)
        .all(conn)
        .await?)
}

/// Detaches a quote option from its order so it can be selected again.
async fn release_quote_option<C: ConnectionTrait>(
    conn: &C,
    option_id: Uuid,
) -> Result<(), ServiceError> {
    QuoteOption::update_many()
        .col_expr(quote_option::Column::PurchaseOrderId, Expr::value(Option::<Uuid>::None))
        .col_expr(quote_option::Column::Selected, Expr::value(false))
        .col_expr(quote_option::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(quote_option::Column::Id.eq(option_id))
        .exec(conn)
        .await?;
    Ok(())
}

fn ensure_transition(
    order: &purchase_order::Model,
    to: PurchaseOrderStatus,
) -> Result<(), ServiceError> {
    if order.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(ServiceError::invalid_transition(
            "Purchase order",
            order.id,
            order.status,
            to,
        ))
    }
}

/// Purchase order lifecycle: authorization, edits, holds, receipts and closing.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: ProcurementConfig,
    document_emitter: Arc<dyn DocumentEmitter>,
}

impl PurchaseOrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: ProcurementConfig,
        document_emitter: Arc<dyn DocumentEmitter>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
            document_emitter,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        PurchaseOrder::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order", id))
    }

    #[instrument(skip(self))]
    pub async fn get_lines(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
        order_lines(&*self.db_pool, purchase_order_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_changes(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<purchase_order_change::Model>, ServiceError> {
        Ok(PurchaseOrderChange::find()
            .filter(purchase_order_change::Column::PurchaseOrderId.eq(purchase_order_id))
            .order_by_asc(purchase_order_change::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    fn publish_status(
        &self,
        purchase_order_id: Uuid,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) {
        counter!("procura_purchase_orders.transitions", 1, "to" => to.to_string());
        self.event_sender
            .publish(Event::PurchaseOrderStatusChanged {
                purchase_order_id,
                from,
                to,
            });
    }

    /// Locks the order, checks the transition, writes it and publishes the change.
    async fn transition<F>(
        &self,
        id: Uuid,
        to: PurchaseOrderStatus,
        mutate: F,
    ) -> Result<purchase_order::Model, ServiceError>
    where
        F: FnOnce(&mut purchase_order::ActiveModel),
    {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        ensure_transition(&order, to)?;
        let from = order.status;

        let order = save_order(&txn, order, |active| {
            active.status = Set(to);
            mutate(active);
        })
        .await?;
        db::commit_transaction(txn, started).await?;

        info!(purchase_order_id = %id, from = %from, to = %to, "Purchase order status changed");
        self.publish_status(id, from, to);
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn submit_for_authorization(
        &self,
        id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let lines = PurchaseOrderLine::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(id))
            .count(&*self.db_pool)
            .await?;
        if lines == 0 {
            return Err(ServiceError::EmptyOrder(id));
        }
        self.transition(id, PurchaseOrderStatus::PendingAuthorization, |_| {})
            .await
    }

    /// Approves the order, then emits its document.
    ///
    /// The approval and the lines handed to the emitter are read in one
    /// transaction. After the commit nothing fails the call: a failing emitter
    /// or event channel only adds a warning to the outcome.
    #[instrument(skip(self))]
    pub async fn authorize(
        &self,
        id: Uuid,
        authorized_by: String,
    ) -> Result<AuthorizationOutcome, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        ensure_transition(&order, PurchaseOrderStatus::Approved)?;
        let from = order.status;

        let now = Utc::now();
        let approver = authorized_by.clone();
        let mut order = save_order(&txn, order, |active| {
            active.status = Set(PurchaseOrderStatus::Approved);
            active.authorized_at = Set(Some(now));
            active.authorized_by = Set(Some(approver));
        })
        .await?;
        let lines = order_lines(&txn, id).await?;
        db::commit_transaction(txn, started).await?;

        info!(purchase_order_id = %id, from = %from, to = %order.status, "Purchase order status changed");
        self.publish_status(id, from, order.status);

        let mut warnings = Vec::new();

        let document_handle = match self.document_emitter.emit(&order, &lines).await {
            Ok(handle) => {
                let stored = PurchaseOrder::update_many()
                    .col_expr(purchase_order::Column::DocumentHandle, Expr::value(handle.clone()))
                    .filter(purchase_order::Column::Id.eq(id))
                    .exec(&*self.db_pool)
                    .await;
                match stored {
                    Ok(_) => order.document_handle = Some(handle.clone()),
                    Err(e) => {
                        warn!(purchase_order_id = %id, error = %e, "Failed to store document handle");
                        warnings.push(format!("document handle not stored: {}", e));
                    }
                }
                Some(handle)
            }
            Err(e) => {
                warn!(purchase_order_id = %id, error = %e, "Document emission failed");
                counter!("procura_purchase_orders.document_failures", 1);
                warnings.push(format!("document emission failed: {}", e));
                None
            }
        };

        let event = Event::PurchaseOrderAuthorized {
            purchase_order_id: id,
            code: order.code.clone(),
            document_handle: document_handle.clone(),
        };
        if let Err(e) = self.event_sender.try_publish(event) {
            warn!(purchase_order_id = %id, error = %e, "Failed to publish authorization");
            warnings.push(format!("authorization event not published: {}", e));
        }

        info!(purchase_order_id = %id, authorized_by = %authorized_by, "Purchase order authorized");
        Ok(AuthorizationOutcome {
            order,
            document_handle,
            warnings,
        })
    }

    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self
            .transition(id, PurchaseOrderStatus::Rejected, |_| {})
            .await?;
        if let Some(reason) = reason {
            info!(purchase_order_id = %id, reason = %reason, "Purchase order rejected");
        }
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn start_processing(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        self.transition(id, PurchaseOrderStatus::InProcess, |_| {})
            .await
    }

    /// Suspends the order, remembering where it was held from.
    #[instrument(skip(self))]
    pub async fn place_on_hold(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        ensure_transition(&order, PurchaseOrderStatus::OnHold)?;
        let from = order.status;

        let order = save_order(&txn, order, |active| {
            active.status = Set(PurchaseOrderStatus::OnHold);
            active.held_from_status = Set(Some(from));
        })
        .await?;
        db::commit_transaction(txn, started).await?;

        self.publish_status(id, from, PurchaseOrderStatus::OnHold);
        Ok(order)
    }

    /// Returns a held order to the status it was held from.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        if order.status != PurchaseOrderStatus::OnHold {
            return Err(ServiceError::invalid_transition(
                "Purchase order",
                id,
                order.status,
                "Resume",
            ));
        }
        let to = order.held_from_status.ok_or_else(|| {
            ServiceError::InternalError(format!("held purchase order {} has no prior status", id))
        })?;

        let order = save_order(&txn, order, |active| {
            active.status = Set(to);
            active.held_from_status = Set(None);
        })
        .await?;
        db::commit_transaction(txn, started).await?;

        self.publish_status(id, PurchaseOrderStatus::OnHold, to);
        Ok(order)
    }

    /// Cancels the order and gives back the requisition quantity it had not received.
    ///
    /// Quote options of lines that never received anything become selectable again.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        ensure_transition(&order, PurchaseOrderStatus::Cancelled)?;
        let from = order.status;

        for line in order_lines(&txn, id).await? {
            let outstanding = line.pending_quantity().max(Decimal::ZERO);
            if let Some(requisition_line_id) = line.requisition_line_id {
                adjust_quantity_processed(&txn, requisition_line_id, -outstanding).await?;
            }
            if let Some(option_id) = line.quote_option_id {
                if line.quantity_received.is_zero() {
                    release_quote_option(&txn, option_id).await?;
                }
            }
        }

        let order = save_order(&txn, order, |active| {
            active.status = Set(PurchaseOrderStatus::Cancelled);
            active.held_from_status = Set(None);
        })
        .await?;
        db::commit_transaction(txn, started).await?;

        warn!(purchase_order_id = %id, from = %from, "Purchase order cancelled");
        self.publish_status(id, from, PurchaseOrderStatus::Cancelled);
        Ok(order)
    }

    /// Closes a delivered order once nothing is pending settlement.
    #[instrument(skip(self))]
    pub async fn close(&self, id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        ensure_transition(&order, PurchaseOrderStatus::Closed)?;
        if order.pending_settlement {
            return Err(ServiceError::ValidationError(format!(
                "purchase order {} is pending settlement ({} of {} paid)",
                id, order.amount_paid, order.total
            )));
        }
        let from = order.status;

        let order = save_order(&txn, order, |active| {
            active.status = Set(PurchaseOrderStatus::Closed);
        })
        .await?;
        db::commit_transaction(txn, started).await?;

        self.publish_status(id, from, PurchaseOrderStatus::Closed);
        Ok(order)
    }

    /// Replaces the header and line set of an editable order.
    ///
    /// Requisition quantities follow the line changes, totals are recomputed
    /// (a forced total is kept unless cleared) and the before/after state is
    /// recorded as a change entry.
    #[instrument(skip(self, input))]
    pub async fn edit(
        &self,
        id: Uuid,
        input: EditPurchaseOrder,
    ) -> Result<EditOutcome, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::EmptyOrder(id));
        }
        let mut seen = HashSet::new();
        for line in &input.lines {
            ensure_positive(round_quantity(line.quantity), "quantity")?;
            ensure_non_negative(line.unit_price, "unit_price")?;
            if line.description.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "line description must not be blank".to_string(),
                ));
            }
            if let Some(line_id) = line.id {
                if !seen.insert(line_id) {
                    return Err(ServiceError::ValidationError(format!(
                        "line {} appears more than once",
                        line_id
                    )));
                }
            }
        }

        let dp = self.config.currency_precision;
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        if !order.status.is_editable() {
            return Err(ServiceError::NotEditable {
                order_id: id,
                status: order.status.to_string(),
            });
        }

        let existing = order_lines(&txn, id).await?;
        let before = OrderSnapshot::capture(&order, &existing);
        let mut by_id: HashMap<Uuid, purchase_order_line::Model> =
            existing.into_iter().map(|l| (l.id, l)).collect();

        for line_id in input.lines.iter().filter_map(|l| l.id) {
            if !by_id.contains_key(&line_id) {
                return Err(ServiceError::not_found("Purchase order line", line_id));
            }
        }

        let mut removed = Vec::new();
        let dropped: Vec<Uuid> = by_id
            .keys()
            .filter(|line_id| !seen.contains(*line_id))
            .copied()
            .collect();
        for line_id in dropped {
            if let Some(line) = by_id.remove(&line_id) {
                if let Some(requisition_line_id) = line.requisition_line_id {
                    adjust_quantity_processed(&txn, requisition_line_id, -line.quantity).await?;
                }
                if let Some(option_id) = line.quote_option_id {
                    release_quote_option(&txn, option_id).await?;
                }
                removed.push(line.id);
                line.delete(&txn).await?;
            }
        }

        let now = Utc::now();
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut lines = Vec::with_capacity(input.lines.len());

        for (index, edit) in input.lines.into_iter().enumerate() {
            let line_number = index as i32 + 1;
            let quantity = round_quantity(edit.quantity);
            let subtotal = pricing::line_subtotal(quantity, edit.unit_price, dp);

            let saved = match edit.id.and_then(|line_id| by_id.remove(&line_id)) {
                Some(current) => {
                    let changed = current.quantity != quantity
                        || current.unit_price != edit.unit_price
                        || current.material_id != edit.material_id
                        || current.description != edit.description
                        || current.is_import != edit.is_import;
                    if let Some(requisition_line_id) = current.requisition_line_id {
                        adjust_quantity_processed(&txn, requisition_line_id, quantity - current.quantity)
                            .await?;
                    }
                    if changed {
                        modified.push(current.id);
                    }
                    let mut active: purchase_order_line::ActiveModel = current.into();
                    active.line_number = Set(line_number);
                    active.material_id = Set(edit.material_id);
                    active.description = Set(edit.description);
                    active.quantity = Set(quantity);
                    active.unit_price = Set(edit.unit_price);
                    active.is_import = Set(edit.is_import);
                    active.subtotal = Set(subtotal);
                    active.updated_at = Set(now);
                    active.update(&txn).await?
                }
                None => {
                    let created = purchase_order_line::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        purchase_order_id: Set(id),
                        line_number: Set(line_number),
                        material_id: Set(edit.material_id),
                        description: Set(edit.description),
                        quantity: Set(quantity),
                        unit_price: Set(edit.unit_price),
                        currency: Set(order.currency.clone()),
                        is_import: Set(edit.is_import),
                        subtotal: Set(subtotal),
                        quantity_received: Set(Decimal::ZERO),
                        quote_option_id: Set(None),
                        requisition_line_id: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                    added.push(created.id);
                    created
                }
            };
            lines.push(saved);
        }

        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|l| PricedLine {
                quantity: l.quantity,
                unit_price: l.unit_price,
                is_import: l.is_import,
            })
            .collect();

        let header = input.header;
        let keep_forced = order.is_total_forced && !header.clear_forced_total;
        let (totals, snapshot) = match (keep_forced, order.totals_snapshot.as_ref()) {
            (true, Some(frozen)) => {
                let frozen = TotalsSnapshot::from_json(frozen)?;
                let (totals, snapshot) = pricing::forced_totals(&priced, &frozen, dp);
                (totals, Some(snapshot.to_json()?))
            }
            _ => {
                let rates = TaxRates::from(&self.config);
                (pricing::compute_order_totals(&priced, &rates, dp), None)
            }
        };
        let is_total_forced = snapshot.is_some();

        let amounts = live_payment_amounts(&txn, id).await?;
        let settlement = settlement_state(totals.total, amounts, header.payment_method);

        let order = save_order(&txn, order, |active| {
            active.notes = Set(header.notes);
            active.expected_delivery_date = Set(header.expected_delivery_date);
            active.delivery_location_id = Set(header.delivery_location_id);
            active.payment_method = Set(header.payment_method);
            active.subtotal = Set(totals.subtotal);
            active.tax = Set(totals.tax);
            active.withholding = Set(totals.withholding);
            active.total = Set(totals.total);
            active.is_total_forced = Set(is_total_forced);
            active.totals_snapshot = Set(snapshot);
            active.amount_paid = Set(settlement.amount_paid);
            active.pending_settlement = Set(settlement.pending_settlement);
        })
        .await?;

        let after = OrderSnapshot::capture(&order, &lines);
        let change = purchase_order_change::ActiveModel {
            id: Set(Uuid::new_v4()),
            purchase_order_id: Set(id),
            before: Set(before.to_json()?),
            after: Set(after.to_json()?),
            changed_by: Set(header.changed_by),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        db::commit_transaction(txn, started).await?;

        info!(
            purchase_order_id = %id,
            added = added.len(),
            modified = modified.len(),
            removed = removed.len(),
            total = %order.total,
            "Purchase order edited"
        );
        self.event_sender
            .publish(Event::PurchaseOrderEdited {
                purchase_order_id: id,
                change_id: change.id,
            });

        Ok(EditOutcome {
            order,
            lines,
            change,
            added,
            modified,
            removed,
        })
    }

    /// Records received quantities and posts them to the inventory ledger.
    ///
    /// Stock for the general stock project lands in the available pool; stock
    /// for any other project is committed to the order's project and site.
    #[instrument(skip(self, receipts))]
    pub async fn receive_purchase_order(
        &self,
        id: Uuid,
        receipts: Vec<ReceiptLine>,
    ) -> Result<ReceiptOutcome, ServiceError> {
        if receipts.is_empty() {
            return Err(ServiceError::ValidationError(
                "a receipt needs at least one line".to_string(),
            ));
        }

        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = lock_order(&txn, id).await?;
        if !order.status.accepts_receipts() {
            return Err(ServiceError::invalid_transition(
                "Purchase order",
                id,
                order.status,
                "Receipt",
            ));
        }
        let location_id = order.delivery_location_id.ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "purchase order {} has no delivery location",
                id
            ))
        })?;

        let destination = if order.project_id == self.config.stock_project_id {
            StockDestination::General
        } else {
            StockDestination::Project(ProjectSite {
                project_id: order.project_id,
                site_id: order.site_id,
            })
        };

        let mut lines = order_lines(&txn, id).await?;
        let mut movements = Vec::new();
        let now = Utc::now();

        for receipt in receipts {
            let quantity = round_quantity(receipt.quantity);
            ensure_positive(quantity, "quantity")?;

            let line = lines
                .iter_mut()
                .find(|l| l.id == receipt.line_id)
                .ok_or_else(|| ServiceError::not_found("Purchase order line", receipt.line_id))?;
            if quantity > line.pending_quantity() {
                return Err(ServiceError::ValidationError(format!(
                    "receiving {} on line {} exceeds the {} still pending",
                    quantity,
                    line.id,
                    line.pending_quantity()
                )));
            }

            let mut active: purchase_order_line::ActiveModel = line.clone().into();
            active.quantity_received = Set(line.quantity_received + quantity);
            active.updated_at = Set(now);
            *line = active.update(&txn).await?;

            if let Some(material_id) = line.material_id {
                let posting = Posting::receipt(&ReceiveStock {
                    material_id,
                    location_id,
                    quantity,
                    destination,
                    reference: Some(DocumentRef::new("purchase_order", id)),
                });
                let change = inventory::post(&txn, posting, NegativeGuard::Insufficient).await?;
                movements.push(change.movement);
            }
        }

        let from = order.status;
        let to = if lines.iter().all(|l| l.is_fully_received()) {
            PurchaseOrderStatus::Delivered
        } else {
            PurchaseOrderStatus::PartiallyDelivered
        };
        ensure_transition(&order, to)?;

        let order = save_order(&txn, order, |active| active.status = Set(to)).await?;
        db::commit_transaction(txn, started).await?;

        info!(
            purchase_order_id = %id,
            status = %to,
            movements = movements.len(),
            "Purchase order receipt recorded"
        );
        if from != to {
            self.publish_status(id, from, to);
        }
        self.event_sender
            .publish(Event::PurchaseOrderReceived {
                purchase_order_id: id,
                movement_ids: movements.iter().map(|m| m.id).collect(),
            });
        for movement in &movements {
            self.event_sender
                .publish(Event::InventoryMovementPosted {
                    movement_id: movement.id,
                    kind: movement.kind,
                    material_id: movement.material_id,
                    location_id: movement.location_id,
                });
        }

        Ok(ReceiptOutcome {
            order,
            lines,
            movements,
        })
    }
}
