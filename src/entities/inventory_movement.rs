use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MovementKind {
    #[sea_orm(string_value = "Receipt")]
    Receipt,
    #[sea_orm(string_value = "Consumption")]
    Consumption,
    #[sea_orm(string_value = "Assignment")]
    Assignment,
    #[sea_orm(string_value = "Release")]
    Release,
    #[sea_orm(string_value = "Transfer")]
    Transfer,
    #[sea_orm(string_value = "Adjustment")]
    Adjustment,
    #[sea_orm(string_value = "ValuationAdjustment")]
    ValuationAdjustment,
    #[sea_orm(string_value = "Reversal")]
    Reversal,
}

/// Append-only audit row. Every ledger operation writes exactly one.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: MovementKind,
    pub inventory_record_id: Uuid,
    pub material_id: Uuid,
    pub location_id: Uuid,
    /// Signed for adjustments and reversals
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub available_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub available_after: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub assigned_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub assigned_after: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub value_delta: Option<Decimal>,
    pub currency: Option<String>,
    pub assignment_id: Option<Uuid>,
    pub counterpart_assignment_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub previous_project_id: Option<Uuid>,
    pub previous_site_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub justification: Option<String>,
    #[sea_orm(unique)]
    pub reverses_movement_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn available_delta(&self) -> Decimal {
        self.available_after - self.available_before
    }

    pub fn assigned_delta(&self) -> Decimal {
        self.assigned_after - self.assigned_before
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_record::Entity",
        from = "Column::InventoryRecordId",
        to = "super::inventory_record::Column::Id"
    )]
    InventoryRecord,
}

impl Related<super::inventory_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
