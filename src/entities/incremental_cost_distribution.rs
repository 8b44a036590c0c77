use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Immutable per-line increment written when an incremental cost is closed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "incremental_cost_distributions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub incremental_cost_id: Uuid,
    pub purchase_order_id: Uuid,
    pub purchase_order_line_id: Uuid,
    pub material_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub base_cost: Decimal,
    pub base_currency: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub normalized_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub percentage: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub increment: Decimal,
    pub position: i32,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::incremental_cost_order::Entity",
        from = "Column::IncrementalCostId",
        to = "super::incremental_cost_order::Column::Id"
    )]
    IncrementalCost,
}

impl Related<super::incremental_cost_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IncrementalCost.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
