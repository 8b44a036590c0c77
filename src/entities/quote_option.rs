use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A supplier's answer to one requisition line.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quote_options")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub requisition_line_id: Uuid,
    pub supplier_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    pub currency: String,
    /// Unit price already includes tax
    pub is_net_price: bool,
    pub is_import: bool,
    pub is_immediate_delivery: bool,
    pub selected: bool,
    pub is_total_forced: bool,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub forced_total: Option<Decimal>,
    /// Frozen calculation behind `forced_total`
    pub forced_snapshot: Option<Json>,
    /// Purchase order that consumed this option
    pub purchase_order_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn is_consumed(&self) -> bool {
        self.purchase_order_id.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::requisition_line::Entity",
        from = "Column::RequisitionLineId",
        to = "super::requisition_line::Column::Id"
    )]
    RequisitionLine,
}

impl Related<super::requisition_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RequisitionLine.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
