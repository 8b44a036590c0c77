use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a purchase order (OC).
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PurchaseOrderStatus {
    #[sea_orm(string_value = "Draft")]
    Draft,
    #[sea_orm(string_value = "PendingAuthorization")]
    PendingAuthorization,
    #[sea_orm(string_value = "Approved")]
    Approved,
    #[sea_orm(string_value = "Rejected")]
    Rejected,
    #[sea_orm(string_value = "InProcess")]
    InProcess,
    #[sea_orm(string_value = "PartiallyDelivered")]
    PartiallyDelivered,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "OnHold")]
    OnHold,
    #[sea_orm(string_value = "Closed")]
    Closed,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// Lines and header may only change before authorization.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::PendingAuthorization | Self::Rejected
        )
    }

    pub fn accepts_receipts(self) -> bool {
        matches!(self, Self::InProcess | Self::PartiallyDelivered)
    }

    /// Resuming from `OnHold` is not covered here; it returns to the held-from status.
    pub fn can_transition_to(self, to: Self) -> bool {
        use PurchaseOrderStatus::*;
        match (self, to) {
            (Draft, PendingAuthorization) => true,
            (PendingAuthorization, Approved) | (PendingAuthorization, Rejected) => true,
            (Rejected, PendingAuthorization) => true,
            (Approved, InProcess) => true,
            (InProcess, PartiallyDelivered) | (InProcess, Delivered) => true,
            (PartiallyDelivered, PartiallyDelivered) | (PartiallyDelivered, Delivered) => true,
            (Delivered, Closed) => true,
            (from, OnHold) => !from.is_terminal() && from != OnHold,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

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
pub enum PaymentMethod {
    #[sea_orm(string_value = "CreditTerm")]
    CreditTerm,
    #[sea_orm(string_value = "WireTransfer")]
    WireTransfer,
    #[sea_orm(string_value = "Cash")]
    Cash,
    #[sea_orm(string_value = "Check")]
    Check,
    #[sea_orm(string_value = "Card")]
    Card,
}

impl PaymentMethod {
    /// Only deferred methods leave a balance awaiting liquidation.
    pub fn carries_settlement(self) -> bool {
        matches!(self, Self::CreditTerm | Self::WireTransfer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub requisition_id: Uuid,
    pub supplier_id: Uuid,
    pub project_id: Uuid,
    pub site_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub held_from_status: Option<PurchaseOrderStatus>,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub withholding: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    pub is_total_forced: bool,
    pub totals_snapshot: Option<Json>,
    pub payment_method: PaymentMethod,
    /// Sum of non-reversed payments, maintained by the payment service
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount_paid: Decimal,
    pub pending_settlement: bool,
    pub delivery_location_id: Option<Uuid>,
    pub notes: Option<String>,
    pub expected_delivery_date: Option<Date>,
    pub authorized_at: Option<DateTimeUtc>,
    pub authorized_by: Option<String>,
    pub document_handle: Option<String>,
    pub version: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order_line::Entity")]
    Lines,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    #[sea_orm(has_many = "super::purchase_order_change::Entity")]
    Changes,
}

impl Related<super::purchase_order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::purchase_order_change::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Changes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
