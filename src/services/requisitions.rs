//! Requisitions, their lines and the supplier quotes offered for each line.

use crate::{
    config::ProcurementConfig,
    db::{self, sequence, DbPool},
    entities::{
        quote_option::{self, Entity as QuoteOption},
        requisition::{self, Entity as Requisition},
        requisition_line::{self, Entity as RequisitionLine},
    },
    errors::ServiceError,
    money::{ensure_positive, normalize_currency, round_quantity},
    services::pricing::{self, PricedLine, TaxRates, TotalsSnapshot},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRequisition {
    #[validate(length(min = 1, max = 16))]
    pub department: String,
    pub project_id: Uuid,
    pub site_id: Uuid,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRequisitionLine {
    pub material_id: Uuid,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub required_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuoteOption {
    pub supplier_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub currency: String,
    #[serde(default)]
    pub is_net_price: bool,
    #[serde(default)]
    pub is_import: bool,
    #[serde(default)]
    pub is_immediate_delivery: bool,
    /// Overrides the computed order total for the option's supplier group
    #[serde(default)]
    pub forced_total: Option<Decimal>,
}

/// Requisitions, their lines and the supplier quotes collected against them.
#[derive(Clone)]
pub struct RequisitionService {
    db_pool: Arc<DbPool>,
    config: ProcurementConfig,
}

impl RequisitionService {
    pub fn new(db_pool: Arc<DbPool>, config: ProcurementConfig) -> Self {
        Self { db_pool, config }
    }

    /// Creates a requisition numbered `REQ-<DEPT>-<n>` from the department sequence.
    #[instrument(skip(self))]
    pub async fn create_requisition(
        &self,
        input: NewRequisition,
    ) -> Result<requisition::Model, ServiceError> {
        input.validate()?;
        let department = input.department.trim().to_ascii_uppercase();
        if department.is_empty() {
            return Err(ServiceError::ValidationError(
                "department must not be blank".to_string(),
            ));
        }

        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let value = sequence::next_value(&txn, &format!("requisition:{}", department)).await?;
        let created = requisition::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(sequence::format_code("REQ", Some(&department), value)),
            department: Set(department),
            project_id: Set(input.project_id),
            site_id: Set(input.site_id),
            notes: Set(input.notes),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        db::commit_transaction(txn, started).await?;

        info!(requisition_id = %created.id, code = %created.code, "Requisition created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_requisition(&self, id: Uuid) -> Result<requisition::Model, ServiceError> {
        Requisition::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Requisition", id))
    }

    #[instrument(skip(self))]
    pub async fn add_line(
        &self,
        requisition_id: Uuid,
        input: NewRequisitionLine,
    ) -> Result<requisition_line::Model, ServiceError> {
        input.validate()?;
        let required_quantity = round_quantity(input.required_quantity);
        ensure_positive(required_quantity, "required_quantity")?;

        let db = &*self.db_pool;
        self.get_requisition(requisition_id).await?;

        let now = Utc::now();
        let line = requisition_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            requisition_id: Set(requisition_id),
            material_id: Set(input.material_id),
            description: Set(input.description),
            required_quantity: Set(required_quantity),
            quantity_processed: Set(Decimal::ZERO),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn get_requisition_line(
        &self,
        id: Uuid,
    ) -> Result<requisition_line::Model, ServiceError> {
        RequisitionLine::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Requisition line", id))
    }

    #[instrument(skip(self))]
    pub async fn list_lines(
        &self,
        requisition_id: Uuid,
    ) -> Result<Vec<requisition_line::Model>, ServiceError> {
        Ok(RequisitionLine::find()
            .filter(requisition_line::Column::RequisitionId.eq(requisition_id))
            .order_by_asc(requisition_line::Column::CreatedAt)
            .order_by_asc(requisition_line::Column::Id)
            .all(&*self.db_pool)
            .await?)
    }

    /// Records a supplier quote against a requisition line.
    ///
    /// An option may carry a net (tax-inclusive) price or a forced total, never
    /// both: the forced total is frozen against pre-tax line figures.
    #[instrument(skip(self))]
    pub async fn add_quote_option(
        &self,
        requisition_line_id: Uuid,
        input: NewQuoteOption,
    ) -> Result<quote_option::Model, ServiceError> {
        let quantity = round_quantity(input.quantity);
        ensure_positive(quantity, "quantity")?;
        ensure_positive(input.unit_price, "unit_price")?;
        let currency = normalize_currency(&input.currency)?;

        if input.is_net_price && input.forced_total.is_some() {
            return Err(ServiceError::ValidationError(
                "a quote option cannot carry both a net price and a forced total".to_string(),
            ));
        }

        let forced_snapshot = match input.forced_total {
            Some(forced) => {
                ensure_positive(forced, "forced_total")?;
                let rates = TaxRates::from(&self.config);
                let line = PricedLine {
                    quantity,
                    unit_price: input.unit_price,
                    is_import: input.is_import,
                };
                let mut totals = pricing::compute_order_totals(
                    &[line],
                    &rates,
                    self.config.currency_precision,
                );
                totals.total = forced;
                Some(TotalsSnapshot::capture(totals, rates).to_json()?)
            }
            None => None,
        };

        self.get_requisition_line(requisition_line_id).await?;

        let now = Utc::now();
        let option = quote_option::ActiveModel {
            id: Set(Uuid::new_v4()),
            requisition_line_id: Set(requisition_line_id),
            supplier_id: Set(input.supplier_id),
            unit_price: Set(input.unit_price),
            quantity: Set(quantity),
            currency: Set(currency),
            is_net_price: Set(input.is_net_price),
            is_import: Set(input.is_import),
            is_immediate_delivery: Set(input.is_immediate_delivery),
            selected: Set(false),
            is_total_forced: Set(input.forced_total.is_some()),
            forced_total: Set(input.forced_total),
            forced_snapshot: Set(forced_snapshot),
            purchase_order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await?;

        Ok(option)
    }

    #[instrument(skip(self))]
    pub async fn list_quote_options(
        &self,
        requisition_line_id: Uuid,
    ) -> Result<Vec<quote_option::Model>, ServiceError> {
        Ok(QuoteOption::find()
            .filter(quote_option::Column::RequisitionLineId.eq(requisition_line_id))
            .order_by_asc(quote_option::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Selects an option, deselecting its siblings in the same transaction.
    #[instrument(skip(self))]
    pub async fn select_quote_option(
        &self,
        option_id: Uuid,
    ) -> Result<quote_option::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let option = QuoteOption::find_by_id(option_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote option", option_id))?;

        if option.is_consumed() {
            return Err(ServiceError::ValidationError(format!(
                "quote option {} is already on a purchase order",
                option_id
            )));
        }

        let now = Utc::now();
        QuoteOption::update_many()
            .col_expr(quote_option::Column::Selected, Expr::value(false))
            .col_expr(quote_option::Column::UpdatedAt, Expr::value(now))
            .filter(quote_option::Column::RequisitionLineId.eq(option.requisition_line_id))
            .filter(quote_option::Column::Id.ne(option_id))
            .exec(&txn)
            .await?;

        let mut active: quote_option::ActiveModel = option.into();
        active.selected = Set(true);
        active.updated_at = Set(now);
        let selected = active.update(&txn).await?;

        db::commit_transaction(txn, started).await?;
        Ok(selected)
    }

    #[instrument(skip(self))]
    pub async fn deselect_quote_option(
        &self,
        option_id: Uuid,
    ) -> Result<quote_option::Model, ServiceError> {
        let option = QuoteOption::find_by_id(option_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote option", option_id))?;

        let mut active: quote_option::ActiveModel = option.into();
        active.selected = Set(false);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db_pool).await?)
    }
}

/// Moves a requisition line's `quantity_processed` by `delta` under its version guard.
///
/// Positive deltas past `required_quantity` fail with `OverAllocation`; the
/// processed quantity never drops below zero.
pub(crate) async fn adjust_quantity_processed<C: ConnectionTrait>(
    conn: &C,
    requisition_line_id: Uuid,
    delta: Decimal,
) -> Result<requisition_line::Model, ServiceError> {
    let line = RequisitionLine::find_by_id(requisition_line_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Requisition line", requisition_line_id))?;

    if delta.is_zero() {
        return Ok(line);
    }

    let processed = line.quantity_processed + delta;
    if processed > line.required_quantity {
        return Err(ServiceError::OverAllocation {
            requisition_line_id,
            required: line.required_quantity,
            processed: line.quantity_processed,
            requested: delta,
        });
    }
    let processed = processed.max(Decimal::ZERO);

    let version = line.version;
    let mut active: requisition_line::ActiveModel = line.into();
    active.quantity_processed = Set(processed);
    active.version = Set(version + 1);
    active.updated_at = Set(Utc::now());

    RequisitionLine::update(active)
        .filter(requisition_line::Column::Version.eq(version))
        .exec(conn)
        .await
        .map_err(db::conflict_or_db(requisition_line_id))
}
