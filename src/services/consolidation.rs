//! Quote Consolidation
//!
//! Turns the selected quote options of a requisition into one draft purchase
//! order per supplier.

use crate::{
    config::ProcurementConfig,
    db::{self, sequence, DbPool},
    entities::{
        purchase_order::{self, PurchaseOrderStatus},
        purchase_order_line,
        quote_option::{self, Entity as QuoteOption},
        requisition::{self, Entity as Requisition},
        requisition_line::{self, Entity as RequisitionLine},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        payments::settlement_state,
        pricing::{self, PricedLine, TaxRates, TotalsSnapshot},
        requisitions::adjust_quantity_processed,
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// A draft purchase order emitted by consolidation.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOrderDraft {
    pub order: purchase_order::Model,
    pub lines: Vec<purchase_order_line::Model>,
}

/// A selected option paired with the requisition line it quotes.
#[derive(Debug)]
struct Selection {
    option: quote_option::Model,
    line: requisition_line::Model,
}

/// Turns the selected quotes of a requisition into one draft order per supplier.
#[derive(Clone)]
pub struct ConsolidationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: ProcurementConfig,
}

impl ConsolidationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: ProcurementConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
        }
    }

    /// Groups the selected, unconsumed quote options by supplier and creates a
    /// draft purchase order per group.
    ///
    /// Returns an empty list when nothing is selected. All drafts are created
    /// in a single transaction.
    #[instrument(skip(self))]
    pub async fn consolidate_quotes(
        &self,
        requisition_id: Uuid,
    ) -> Result<Vec<PurchaseOrderDraft>, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let requisition = Requisition::find_by_id(requisition_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Requisition", requisition_id))?;

        let lines = RequisitionLine::find()
            .filter(requisition_line::Column::RequisitionId.eq(requisition_id))
            .order_by_asc(requisition_line::Column::CreatedAt)
            .order_by_asc(requisition_line::Column::Id)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let options = QuoteOption::find()
            .filter(quote_option::Column::RequisitionLineId.is_in(lines.iter().map(|l| l.id)))
            .filter(quote_option::Column::Selected.eq(true))
            .filter(quote_option::Column::PurchaseOrderId.is_null())
            .order_by_asc(quote_option::Column::CreatedAt)
            .order_by_asc(quote_option::Column::Id)
            .all(&txn)
            .await?;
        if options.is_empty() {
            info!(requisition_id = %requisition_id, "No selected quote options to consolidate");
            return Ok(Vec::new());
        }

        let groups = group_by_supplier(&lines, options)?;

        let rates = TaxRates::from(&self.config);
        let mut drafts = Vec::with_capacity(groups.len());
        for (supplier_id, selections) in groups {
            let draft = self
                .create_draft(&txn, &requisition, supplier_id, selections, &rates)
                .await?;
            drafts.push(draft);
        }

        db::commit_transaction(txn, started).await?;

        counter!("procura_consolidation.orders_created", drafts.len() as u64);
        info!(
            requisition_id = %requisition_id,
            orders = drafts.len(),
            "Quotes consolidated into purchase orders"
        );

        self.event_sender
            .publish(Event::PurchaseOrdersGenerated {
                requisition_id,
                purchase_order_ids: drafts.iter().map(|d| d.order.id).collect(),
            });

        Ok(drafts)
    }

    async fn create_draft<C: ConnectionTrait>(
        &self,
        conn: &C,
        requisition: &requisition::Model,
        supplier_id: Uuid,
        selections: Vec<Selection>,
        rates: &TaxRates,
    ) -> Result<PurchaseOrderDraft, ServiceError> {
        let dp = self.config.currency_precision;
        let currency = group_currency(supplier_id, &selections)?;
        let forced = group_forced_snapshot(supplier_id, &selections)?;

        let priced: Vec<PricedLine> = selections
            .iter()
            .map(|s| PricedLine {
                quantity: s.option.quantity,
                unit_price: pricing::resolve_base_unit_price(
                    s.option.unit_price,
                    s.option.is_net_price,
                    rates,
                ),
                is_import: s.option.is_import,
            })
            .collect();

        let (totals, snapshot) = match &forced {
            Some(frozen) => {
                let (totals, snapshot) = pricing::forced_totals(&priced, frozen, dp);
                (totals, Some(snapshot.to_json()?))
            }
            None => (pricing::compute_order_totals(&priced, rates, dp), None),
        };

        let payment_method = self.config.default_payment_method;
        let settlement = settlement_state(totals.total, std::iter::empty(), payment_method);

        let value = sequence::next_value(
            conn,
            &format!("purchase_order:{}", requisition.department),
        )
        .await?;
        let now = Utc::now();
        let order = purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(sequence::format_code("OC", Some(&requisition.department), value)),
            requisition_id: Set(requisition.id),
            supplier_id: Set(supplier_id),
            project_id: Set(requisition.project_id),
            site_id: Set(requisition.site_id),
            status: Set(PurchaseOrderStatus::Draft),
            held_from_status: Set(None),
            currency: Set(currency),
            subtotal: Set(totals.subtotal),
            tax: Set(totals.tax),
            withholding: Set(totals.withholding),
            total: Set(totals.total),
            is_total_forced: Set(forced.is_some()),
            totals_snapshot: Set(snapshot),
            payment_method: Set(payment_method),
            amount_paid: Set(settlement.amount_paid),
            pending_settlement: Set(settlement.pending_settlement),
            delivery_location_id: Set(None),
            notes: Set(None),
            expected_delivery_date: Set(None),
            authorized_at: Set(None),
            authorized_by: Set(None),
            document_handle: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        let mut lines = Vec::with_capacity(selections.len());
        for (index, (selection, priced_line)) in selections.into_iter().zip(priced).enumerate() {
            let Selection { option, line } = selection;

            adjust_quantity_processed(conn, line.id, option.quantity).await?;

            let created = purchase_order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(order.id),
                line_number: Set(index as i32 + 1),
                material_id: Set(Some(line.material_id)),
                description: Set(line
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Material {}", line.material_id))),
                quantity: Set(priced_line.quantity),
                unit_price: Set(priced_line.unit_price),
                currency: Set(option.currency.clone()),
                is_import: Set(priced_line.is_import),
                subtotal: Set(pricing::line_subtotal(
                    priced_line.quantity,
                    priced_line.unit_price,
                    dp,
                )),
                quantity_received: Set(Decimal::ZERO),
                quote_option_id: Set(Some(option.id)),
                requisition_line_id: Set(Some(line.id)),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?;

            let mut consumed: quote_option::ActiveModel = option.into();
            consumed.purchase_order_id = Set(Some(order.id));
            consumed.updated_at = Set(now);
            consumed.update(conn).await?;

            lines.push(created);
        }

        info!(
            purchase_order_id = %order.id,
            code = %order.code,
            supplier_id = %supplier_id,
            total = %order.total,
            "Draft purchase order created"
        );

        Ok(PurchaseOrderDraft { order, lines })
    }
}

/// Partitions selections by supplier, in supplier id order.
fn group_by_supplier(
    lines: &[requisition_line::Model],
    options: Vec<quote_option::Model>,
) -> Result<BTreeMap<Uuid, Vec<Selection>>, ServiceError> {
    let by_id: HashMap<Uuid, &requisition_line::Model> = lines.iter().map(|l| (l.id, l)).collect();
    let mut seen_lines: HashMap<Uuid, Uuid> = HashMap::new();
    let mut groups: BTreeMap<Uuid, Vec<Selection>> = BTreeMap::new();

    for option in options {
        if let Some(previous) = seen_lines.insert(option.requisition_line_id, option.id) {
            return Err(ServiceError::InvalidQuoteGrouping(format!(
                "requisition line {} has more than one selected option ({} and {})",
                option.requisition_line_id, previous, option.id
            )));
        }
        if option.is_net_price && option.is_total_forced {
            return Err(ServiceError::ValidationError(format!(
                "quote option {} carries both a net price and a forced total",
                option.id
            )));
        }
        let line = by_id
            .get(&option.requisition_line_id)
            .map(|l| (*l).clone())
            .ok_or_else(|| ServiceError::not_found("Requisition line", option.requisition_line_id))?;

        groups
            .entry(option.supplier_id)
            .or_default()
            .push(Selection { option, line });
    }

    Ok(groups)
}

fn group_currency(supplier_id: Uuid, selections: &[Selection]) -> Result<String, ServiceError> {
    let currency = selections
        .first()
        .map(|s| s.option.currency.clone())
        .ok_or_else(|| ServiceError::InvalidQuoteGrouping(format!("supplier {} has no options", supplier_id)))?;

    if let Some(other) = selections.iter().find(|s| s.option.currency != currency) {
        return Err(ServiceError::InvalidQuoteGrouping(format!(
            "supplier {} mixes currencies {} and {}",
            supplier_id, currency, other.option.currency
        )));
    }
    Ok(currency)
}

/// A group is forced only when every option carries the same forced total.
fn group_forced_snapshot(
    supplier_id: Uuid,
    selections: &[Selection],
) -> Result<Option<TotalsSnapshot>, ServiceError> {
    let forced: Vec<&quote_option::Model> = selections
        .iter()
        .map(|s| &s.option)
        .filter(|o| o.is_total_forced)
        .collect();

    let Some(first) = forced.first() else {
        return Ok(None);
    };

    if forced.len() != selections.len() || forced.iter().any(|o| o.forced_total != first.forced_total)
    {
        return Err(ServiceError::InvalidQuoteGrouping(format!(
            "supplier {} combines options with different forced totals",
            supplier_id
        )));
    }

    let snapshot = first.forced_snapshot.as_ref().ok_or_else(|| {
        ServiceError::InternalError(format!("quote option {} has no forced snapshot", first.id))
    })?;
    let mut snapshot = TotalsSnapshot::from_json(snapshot)?;
    if let Some(total) = first.forced_total {
        snapshot.total = total;
    }
    Ok(Some(snapshot))
}
