use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::purchase_order::PurchaseOrderStatus as IncrementalCostStatus;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CostType {
    #[sea_orm(string_value = "Freight")]
    Freight,
    #[sea_orm(string_value = "Duties")]
    Duties,
    #[sea_orm(string_value = "Insurance")]
    Insurance,
    #[sea_orm(string_value = "Other")]
    Other,
}

/// Externally incurred cost to be spread over one or more base purchase orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "incremental_cost_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub cost_type: CostType,
    pub provider: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    /// Currency code -> units of `currency` per unit
    pub exchange_rates: Json,
    pub status: IncrementalCostStatus,
    pub notes: Option<String>,
    pub closed_at: Option<DateTimeUtc>,
    pub version: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::incremental_cost_base_order::Entity")]
    BaseOrders,
    #[sea_orm(has_many = "super::incremental_cost_distribution::Entity")]
    Distributions,
}

impl Related<super::incremental_cost_base_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BaseOrders.def()
    }
}

impl Related<super::incremental_cost_distribution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Distributions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
