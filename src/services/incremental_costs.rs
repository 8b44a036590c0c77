//! Incremental Cost Service
//!
//! Freight, duties and similar costs spread over base purchase orders and
//! posted to inventory valuation when closed.

use crate::{
    config::ProcurementConfig,
    db::{self, sequence, DbPool},
    entities::{
        incremental_cost_base_order::{self, Entity as IncrementalCostBaseOrder},
        incremental_cost_distribution::{self, Entity as IncrementalCostDistribution},
        incremental_cost_order::{self, CostType, Entity as IncrementalCostOrder, IncrementalCostStatus},
        inventory_movement,
        purchase_order::{self, Entity as PurchaseOrder, PurchaseOrderStatus},
        purchase_order_line::{self, Entity as PurchaseOrderLine},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::{ensure_positive, ensure_precision, normalize_currency},
    services::{
        cost_distribution::{self, DistributionInput, DistributionLine},
        inventory::{self, DocumentRef, NegativeGuard, Posting},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    prelude::Json, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewIncrementalCost {
    pub cost_type: CostType,
    #[validate(length(min = 1, max = 200))]
    pub provider: String,
    pub amount: Decimal,
    pub currency: String,
    /// Currency code -> units of `currency` per unit
    #[serde(default)]
    pub exchange_rates: BTreeMap<String, Decimal>,
    pub purchase_order_ids: Vec<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosedDistribution {
    pub order: incremental_cost_order::Model,
    pub lines: Vec<incremental_cost_distribution::Model>,
    pub movements: Vec<inventory_movement::Model>,
}

/// Incremental cost orders follow a shorter lifecycle than purchase orders:
/// they are closed straight from `Approved`.
fn can_transition(from: IncrementalCostStatus, to: IncrementalCostStatus) -> bool {
    use IncrementalCostStatus::*;
    match (from, to) {
        (Draft, PendingAuthorization) | (Rejected, PendingAuthorization) => true,
        (PendingAuthorization, Approved) | (PendingAuthorization, Rejected) => true,
        (Approved, Closed) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

fn normalize_rates(
    rates: BTreeMap<String, Decimal>,
) -> Result<BTreeMap<String, Decimal>, ServiceError> {
    let mut normalized = BTreeMap::new();
    for (code, rate) in rates {
        let code = normalize_currency(&code)?;
        if rate <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "exchange rate for {} must be positive, got {}",
                code, rate
            )));
        }
        normalized.insert(code, rate);
    }
    Ok(normalized)
}

fn decode_rates(value: &Json) -> Result<BTreeMap<String, Decimal>, ServiceError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ServiceError::InternalError(format!("Corrupt exchange rates: {}", e)))
}

/// First occurrence of each id, in the caller's order.
fn unique_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    unique
}

/// Loads the base orders and their lines in `ids` order, lines by line number.
async fn load_base<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<(Vec<purchase_order::Model>, Vec<DistributionInput>), ServiceError> {
    let ids = unique_ids(ids);
    let found = PurchaseOrder::find()
        .filter(purchase_order::Column::Id.is_in(ids.clone()))
        .all(conn)
        .await?;
    let mut by_id: HashMap<Uuid, purchase_order::Model> =
        found.into_iter().map(|o| (o.id, o)).collect();

    let mut orders = Vec::with_capacity(ids.len());
    for id in &ids {
        let order = by_id
            .remove(id)
            .ok_or_else(|| ServiceError::not_found("Purchase order", *id))?;
        orders.push(order);
    }

    let lines = PurchaseOrderLine::find()
        .filter(purchase_order_line::Column::PurchaseOrderId.is_in(ids))
        .order_by_asc(purchase_order_line::Column::LineNumber)
        .all(conn)
        .await?;

    let mut inputs = Vec::with_capacity(lines.len());
    for order in &orders {
        inputs.extend(
            lines
                .iter()
                .filter(|l| l.purchase_order_id == order.id)
                .map(|l| DistributionInput {
                    purchase_order_id: l.purchase_order_id,
                    purchase_order_line_id: l.id,
                    material_id: l.material_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    currency: l.currency.clone(),
                }),
        );
    }
    Ok((orders, inputs))
}

async fn base_order_ids<C: ConnectionTrait>(
    conn: &C,
    incremental_cost_id: Uuid,
) -> Result<Vec<Uuid>, ServiceError> {
    Ok(IncrementalCostBaseOrder::find()
        .filter(incremental_cost_base_order::Column::IncrementalCostId.eq(incremental_cost_id))
        .order_by_asc(incremental_cost_base_order::Column::Position)
        .all(conn)
        .await?
        .into_iter()
        .map(|b| b.purchase_order_id)
        .collect())
}

/// Freight, duties and other costs incurred on top of purchase orders.
#[derive(Clone)]
pub struct IncrementalCostService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: ProcurementConfig,
}

impl IncrementalCostService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: ProcurementConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_incremental_cost(
        &self,
        input: NewIncrementalCost,
    ) -> Result<incremental_cost_order::Model, ServiceError> {
        input.validate()?;
        ensure_positive(input.amount, "amount")?;
        ensure_precision(input.amount, self.config.currency_precision, "amount")?;
        let currency = normalize_currency(&input.currency)?;
        let rates = normalize_rates(input.exchange_rates)?;

        let base_ids = unique_ids(&input.purchase_order_ids);
        if base_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "an incremental cost needs at least one base purchase order".to_string(),
            ));
        }

        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let (orders, _) = load_base(&txn, &base_ids).await?;
        if let Some(cancelled) = orders
            .iter()
            .find(|o| o.status == PurchaseOrderStatus::Cancelled)
        {
            return Err(ServiceError::ValidationError(format!(
                "purchase order {} is cancelled and cannot carry incremental costs",
                cancelled.code
            )));
        }

        let exchange_rates = serde_json::to_value(&rates)
            .map_err(|e| ServiceError::InternalError(format!("Failed to encode exchange rates: {}", e)))?;

        let value = sequence::next_value(&txn, "incremental_cost").await?;
        let now = Utc::now();
        let created = incremental_cost_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(sequence::format_code("INC", None, value)),
            cost_type: Set(input.cost_type),
            provider: Set(input.provider),
            amount: Set(input.amount),
            currency: Set(currency),
            exchange_rates: Set(exchange_rates),
            status: Set(IncrementalCostStatus::Draft),
            notes: Set(input.notes),
            closed_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (position, purchase_order_id) in (0..).zip(&base_ids) {
            incremental_cost_base_order::ActiveModel {
                id: Set(Uuid::new_v4()),
                incremental_cost_id: Set(created.id),
                purchase_order_id: Set(*purchase_order_id),
                position: Set(position),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        db::commit_transaction(txn, started).await?;

        info!(
            incremental_cost_id = %created.id,
            code = %created.code,
            base_orders = base_ids.len(),
            "Incremental cost created"
        );
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<incremental_cost_order::Model, ServiceError> {
        IncrementalCostOrder::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Incremental cost order", id))
    }

    #[instrument(skip(self))]
    pub async fn list_base_orders(&self, id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        base_order_ids(&*self.db_pool, id).await
    }

    /// Persisted distribution of a closed cost.
    #[instrument(skip(self))]
    pub async fn list_distribution(
        &self,
        id: Uuid,
    ) -> Result<Vec<incremental_cost_distribution::Model>, ServiceError> {
        Ok(IncrementalCostDistribution::find()
            .filter(incremental_cost_distribution::Column::IncrementalCostId.eq(id))
            .order_by_asc(incremental_cost_distribution::Column::Position)
            .all(&*self.db_pool)
            .await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: IncrementalCostStatus,
    ) -> Result<incremental_cost_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = IncrementalCostOrder::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Incremental cost order", id))?;

        if order.status == IncrementalCostStatus::Closed {
            return Err(ServiceError::AlreadyClosed(id));
        }
        if !can_transition(order.status, to) {
            return Err(ServiceError::invalid_transition(
                "Incremental cost order",
                id,
                order.status,
                to,
            ));
        }

        let from = order.status;
        let version = order.version;
        let mut active: incremental_cost_order::ActiveModel = order.into();
        active.status = Set(to);
        active.version = Set(version + 1);
        active.updated_at = Set(Utc::now());
        let order = IncrementalCostOrder::update(active)
            .filter(incremental_cost_order::Column::Version.eq(version))
            .exec(&txn)
            .await
            .map_err(db::conflict_or_db(id))?;

        db::commit_transaction(txn, started).await?;
        info!(incremental_cost_id = %id, from = %from, to = %to, "Incremental cost status changed");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn submit(&self, id: Uuid) -> Result<incremental_cost_order::Model, ServiceError> {
        self.transition(id, IncrementalCostStatus::PendingAuthorization)
            .await
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, id: Uuid) -> Result<incremental_cost_order::Model, ServiceError> {
        self.transition(id, IncrementalCostStatus::Approved).await
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, id: Uuid) -> Result<incremental_cost_order::Model, ServiceError> {
        self.transition(id, IncrementalCostStatus::Rejected).await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<incremental_cost_order::Model, ServiceError> {
        self.transition(id, IncrementalCostStatus::Cancelled).await
    }

    /// Distribution of an arbitrary total over the given base orders. Nothing is written.
    #[instrument(skip(self, rates))]
    pub async fn preview_distribution(
        &self,
        base_order_ids: &[Uuid],
        rates: &BTreeMap<String, Decimal>,
        total: Decimal,
        currency: &str,
    ) -> Result<Vec<DistributionLine>, ServiceError> {
        let currency = normalize_currency(currency)?;
        let rates = normalize_rates(rates.clone())?;
        let (_, inputs) = load_base(&*self.db_pool, base_order_ids).await?;
        cost_distribution::distribute(
            &inputs,
            &rates,
            total,
            &currency,
            self.config.currency_precision,
        )
    }

    /// Preview with the cost order's stored amount, currency, rates and base orders.
    #[instrument(skip(self))]
    pub async fn preview(&self, id: Uuid) -> Result<Vec<DistributionLine>, ServiceError> {
        let order = self.get(id).await?;
        let base = self.list_base_orders(id).await?;
        let rates = decode_rates(&order.exchange_rates)?;
        self.preview_distribution(&base, &rates, order.amount, &order.currency)
            .await
    }

    /// Closes an approved cost: freezes the distribution and posts one
    /// valuation adjustment per (material, delivery location).
    #[instrument(skip(self))]
    pub async fn close(&self, id: Uuid) -> Result<ClosedDistribution, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = IncrementalCostOrder::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Incremental cost order", id))?;

        if order.status == IncrementalCostStatus::Closed {
            return Err(ServiceError::AlreadyClosed(id));
        }
        if order.status != IncrementalCostStatus::Approved {
            return Err(ServiceError::invalid_transition(
                "Incremental cost order",
                id,
                order.status,
                IncrementalCostStatus::Closed,
            ));
        }

        let rates = decode_rates(&order.exchange_rates)?;
        let base_ids = base_order_ids(&txn, id).await?;
        let (base_orders, inputs) = load_base(&txn, &base_ids).await?;
        let distribution = cost_distribution::distribute(
            &inputs,
            &rates,
            order.amount,
            &order.currency,
            self.config.currency_precision,
        )?;

        let locations: HashMap<Uuid, Option<Uuid>> = base_orders
            .iter()
            .map(|o| (o.id, o.delivery_location_id))
            .collect();

        let now = Utc::now();
        let mut lines = Vec::with_capacity(distribution.len());
        let mut valuation: BTreeMap<(Uuid, Uuid), Decimal> = BTreeMap::new();

        for (position, line) in (0..).zip(distribution) {
            let location_id = locations
                .get(&line.purchase_order_id)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "base purchase order {} has no delivery location",
                        line.purchase_order_id
                    ))
                })?;
            *valuation
                .entry((line.material_id, location_id))
                .or_insert(Decimal::ZERO) += line.increment;

            let saved = incremental_cost_distribution::ActiveModel {
                id: Set(Uuid::new_v4()),
                incremental_cost_id: Set(id),
                purchase_order_id: Set(line.purchase_order_id),
                purchase_order_line_id: Set(line.purchase_order_line_id),
                material_id: Set(line.material_id),
                base_cost: Set(line.base_cost),
                base_currency: Set(line.base_currency),
                normalized_cost: Set(line.normalized_cost),
                percentage: Set(line.percentage),
                increment: Set(line.increment),
                position: Set(position),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            lines.push(saved);
        }

        let mut movements = Vec::with_capacity(valuation.len());
        for ((material_id, location_id), value) in valuation {
            let posting = Posting::valuation(
                material_id,
                location_id,
                value,
                &order.currency,
                DocumentRef::new("incremental_cost", id),
            );
            let change = inventory::post(&txn, posting, NegativeGuard::Insufficient).await?;
            movements.push(change.movement);
        }

        let version = order.version;
        let mut active: incremental_cost_order::ActiveModel = order.into();
        active.status = Set(IncrementalCostStatus::Closed);
        active.closed_at = Set(Some(now));
        active.version = Set(version + 1);
        active.updated_at = Set(now);
        let order = IncrementalCostOrder::update(active)
            .filter(incremental_cost_order::Column::Version.eq(version))
            .exec(&txn)
            .await
            .map_err(db::conflict_or_db(id))?;

        db::commit_transaction(txn, started).await?;

        counter!("procura_incremental_costs.closed", 1);
        info!(
            incremental_cost_id = %id,
            lines = lines.len(),
            movements = movements.len(),
            "Incremental cost closed"
        );

        self.event_sender
            .publish(Event::IncrementalCostClosed {
                incremental_cost_id: id,
                lines: lines.len(),
                movements: movements.len(),
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

        Ok(ClosedDistribution {
            order,
            lines,
            movements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn closes_only_from_approved() {
        use IncrementalCostStatus::*;
        assert!(can_transition(Approved, Closed));
        assert!(!can_transition(PendingAuthorization, Closed));
        assert!(!can_transition(Draft, Approved));
        assert!(can_transition(Rejected, PendingAuthorization));
        assert!(!can_transition(Closed, Cancelled));
        assert!(can_transition(Approved, Cancelled));
    }

    #[test]
    fn rates_are_normalized() {
        let rates = BTreeMap::from([("usd".to_string(), dec!(17.5))]);
        let normalized = normalize_rates(rates).unwrap();
        assert_eq!(normalized.get("USD"), Some(&dec!(17.5)));

        let encoded = serde_json::to_value(&normalized).unwrap();
        assert_eq!(decode_rates(&encoded).unwrap(), normalized);
    }

    #[test]
    fn non_positive_rates_are_rejected() {
        let rates = BTreeMap::from([("EUR".to_string(), Decimal::ZERO)]);
        assert!(matches!(
            normalize_rates(rates),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
