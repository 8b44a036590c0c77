use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_sequences_table::Migration),
            Box::new(m20240101_000002_create_requisition_tables::Migration),
            Box::new(m20240101_000003_create_purchase_order_tables::Migration),
            Box::new(m20240101_000004_create_incremental_cost_tables::Migration),
            Box::new(m20240101_000005_create_inventory_tables::Migration),
        ]
    }
}

/// NUMERIC(16,4). SQLite rejects a higher precision for its REAL mapping.
fn decimal<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(16, 4)
        .not_null()
        .default(0)
        .to_owned()
}

fn timestamp<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .to_owned()
}

mod m20240101_000001_create_sequences_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_sequences_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sequences::Scope)
                                .string_len(64)
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sequences::LastValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(super::timestamp(Sequences::UpdatedAt))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sequences {
        Table,
        Scope,
        LastValue,
        UpdatedAt,
    }
}

mod m20240101_000002_create_requisition_tables {
    use super::{decimal, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_requisition_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Requisitions::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Requisitions::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Requisitions::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Requisitions::Department).string_len(32).not_null())
                        .col(ColumnDef::new(Requisitions::ProjectId).uuid().not_null())
                        .col(ColumnDef::new(Requisitions::SiteId).uuid().not_null())
                        .col(ColumnDef::new(Requisitions::Notes).text().null())
                        .col(timestamp(Requisitions::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RequisitionLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequisitionLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequisitionLines::RequisitionId).uuid().not_null())
                        .col(ColumnDef::new(RequisitionLines::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(RequisitionLines::Description).string().null())
                        .col(decimal(RequisitionLines::RequiredQuantity))
                        .col(decimal(RequisitionLines::QuantityProcessed))
                        .col(
                            ColumnDef::new(RequisitionLines::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(timestamp(RequisitionLines::CreatedAt))
                        .col(timestamp(RequisitionLines::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_requisition_lines_requisition_id")
                                .from(RequisitionLines::Table, RequisitionLines::RequisitionId)
                                .to(Requisitions::Table, Requisitions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(QuoteOptions::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(QuoteOptions::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(QuoteOptions::RequisitionLineId).uuid().not_null())
                        .col(ColumnDef::new(QuoteOptions::SupplierId).uuid().not_null())
                        .col(decimal(QuoteOptions::UnitPrice))
                        .col(decimal(QuoteOptions::Quantity))
                        .col(ColumnDef::new(QuoteOptions::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(QuoteOptions::IsNetPrice)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(QuoteOptions::IsImport)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(QuoteOptions::IsImmediateDelivery)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(QuoteOptions::Selected)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(QuoteOptions::IsTotalForced)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(QuoteOptions::ForcedTotal)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(QuoteOptions::ForcedSnapshot).json().null())
                        .col(ColumnDef::new(QuoteOptions::PurchaseOrderId).uuid().null())
                        .col(timestamp(QuoteOptions::CreatedAt))
                        .col(timestamp(QuoteOptions::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_quote_options_requisition_line_id")
                                .from(QuoteOptions::Table, QuoteOptions::RequisitionLineId)
                                .to(RequisitionLines::Table, RequisitionLines::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requisition_lines_requisition_id")
                        .table(RequisitionLines::Table)
                        .col(RequisitionLines::RequisitionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_quote_options_requisition_line_id")
                        .table(QuoteOptions::Table)
                        .col(QuoteOptions::RequisitionLineId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(QuoteOptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RequisitionLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Requisitions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Requisitions {
        Table,
        Id,
        Code,
        Department,
        ProjectId,
        SiteId,
        Notes,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum RequisitionLines {
        Table,
        Id,
        RequisitionId,
        MaterialId,
        Description,
        RequiredQuantity,
        QuantityProcessed,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum QuoteOptions {
        Table,
        Id,
        RequisitionLineId,
        SupplierId,
        UnitPrice,
        Quantity,
        Currency,
        IsNetPrice,
        IsImport,
        IsImmediateDelivery,
        Selected,
        IsTotalForced,
        ForcedTotal,
        ForcedSnapshot,
        PurchaseOrderId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_purchase_order_tables {
    use super::{decimal, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_purchase_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(PurchaseOrders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::RequisitionId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::ProjectId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::SiteId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(PurchaseOrders::HeldFromStatus).string_len(32).null())
                        .col(ColumnDef::new(PurchaseOrders::Currency).string_len(3).not_null())
                        .col(decimal(PurchaseOrders::Subtotal))
                        .col(decimal(PurchaseOrders::Tax))
                        .col(decimal(PurchaseOrders::Withholding))
                        .col(decimal(PurchaseOrders::Total))
                        .col(
                            ColumnDef::new(PurchaseOrders::IsTotalForced)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(PurchaseOrders::TotalsSnapshot).json().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::PaymentMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(decimal(PurchaseOrders::AmountPaid))
                        .col(
                            ColumnDef::new(PurchaseOrders::PendingSettlement)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(PurchaseOrders::DeliveryLocationId).uuid().null())
                        .col(ColumnDef::new(PurchaseOrders::Notes).text().null())
                        .col(ColumnDef::new(PurchaseOrders::ExpectedDeliveryDate).date().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::AuthorizedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::AuthorizedBy).string().null())
                        .col(ColumnDef::new(PurchaseOrders::DocumentHandle).string().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(timestamp(PurchaseOrders::CreatedAt))
                        .col(timestamp(PurchaseOrders::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::LineNumber)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderLines::MaterialId).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Description)
                                .string()
                                .not_null(),
                        )
                        .col(decimal(PurchaseOrderLines::Quantity))
                        .col(decimal(PurchaseOrderLines::UnitPrice))
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::IsImport)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(decimal(PurchaseOrderLines::Subtotal))
                        .col(decimal(PurchaseOrderLines::QuantityReceived))
                        .col(ColumnDef::new(PurchaseOrderLines::QuoteOptionId).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrderLines::RequisitionLineId)
                                .uuid()
                                .null(),
                        )
                        .col(timestamp(PurchaseOrderLines::CreatedAt))
                        .col(timestamp(PurchaseOrderLines::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_lines_purchase_order_id")
                                .from(PurchaseOrderLines::Table, PurchaseOrderLines::PurchaseOrderId)
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderChanges::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderChanges::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderChanges::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderChanges::Before).json().not_null())
                        .col(ColumnDef::new(PurchaseOrderChanges::After).json().not_null())
                        .col(ColumnDef::new(PurchaseOrderChanges::ChangedBy).string().null())
                        .col(timestamp(PurchaseOrderChanges::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_changes_purchase_order_id")
                                .from(
                                    PurchaseOrderChanges::Table,
                                    PurchaseOrderChanges::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::PurchaseOrderId).uuid().not_null())
                        .col(decimal(Payments::Amount))
                        .col(ColumnDef::new(Payments::PaymentType).string_len(16).not_null())
                        .col(ColumnDef::new(Payments::Reference).string().null())
                        .col(timestamp(Payments::PaidAt))
                        .col(
                            ColumnDef::new(Payments::ReversedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Payments::ReversalReason).string().null())
                        .col(timestamp(Payments::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_purchase_order_id")
                                .from(Payments::Table, Payments::PurchaseOrderId)
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_requisition_id")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::RequisitionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_status")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_order_lines_purchase_order_id")
                        .table(PurchaseOrderLines::Table)
                        .col(PurchaseOrderLines::PurchaseOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_purchase_order_id")
                        .table(Payments::Table)
                        .col(Payments::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrderChanges::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrderLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        Code,
        RequisitionId,
        SupplierId,
        ProjectId,
        SiteId,
        Status,
        HeldFromStatus,
        Currency,
        Subtotal,
        Tax,
        Withholding,
        Total,
        IsTotalForced,
        TotalsSnapshot,
        PaymentMethod,
        AmountPaid,
        PendingSettlement,
        DeliveryLocationId,
        Notes,
        ExpectedDeliveryDate,
        AuthorizedAt,
        AuthorizedBy,
        DocumentHandle,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderLines {
        Table,
        Id,
        PurchaseOrderId,
        LineNumber,
        MaterialId,
        Description,
        Quantity,
        UnitPrice,
        Currency,
        IsImport,
        Subtotal,
        QuantityReceived,
        QuoteOptionId,
        RequisitionLineId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderChanges {
        Table,
        Id,
        PurchaseOrderId,
        Before,
        After,
        ChangedBy,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        PurchaseOrderId,
        Amount,
        PaymentType,
        Reference,
        PaidAt,
        ReversedAt,
        ReversalReason,
        CreatedAt,
    }
}

mod m20240101_000004_create_incremental_cost_tables {
    use super::{decimal, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_incremental_cost_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(IncrementalCostOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::CostType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Provider)
                                .string()
                                .not_null(),
                        )
                        .col(decimal(IncrementalCostOrders::Amount))
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::ExchangeRates)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(IncrementalCostOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(IncrementalCostOrders::ClosedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostOrders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(timestamp(IncrementalCostOrders::CreatedAt))
                        .col(timestamp(IncrementalCostOrders::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(IncrementalCostBaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(IncrementalCostBaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostBaseOrders::IncrementalCostId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostBaseOrders::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostBaseOrders::Position)
                                .integer()
                                .not_null(),
                        )
                        .col(timestamp(IncrementalCostBaseOrders::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_incremental_cost_base_orders_incremental_cost_id")
                                .from(
                                    IncrementalCostBaseOrders::Table,
                                    IncrementalCostBaseOrders::IncrementalCostId,
                                )
                                .to(IncrementalCostOrders::Table, IncrementalCostOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_incremental_cost_base_orders_purchase_order_id")
                                .from(
                                    IncrementalCostBaseOrders::Table,
                                    IncrementalCostBaseOrders::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_incremental_cost_base_orders_unique")
                        .table(IncrementalCostBaseOrders::Table)
                        .col(IncrementalCostBaseOrders::IncrementalCostId)
                        .col(IncrementalCostBaseOrders::PurchaseOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(IncrementalCostDistributions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::IncrementalCostId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::PurchaseOrderLineId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::MaterialId)
                                .uuid()
                                .not_null(),
                        )
                        .col(decimal(IncrementalCostDistributions::BaseCost))
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::BaseCurrency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(decimal(IncrementalCostDistributions::NormalizedCost))
                        .col(decimal(IncrementalCostDistributions::Percentage))
                        .col(decimal(IncrementalCostDistributions::Increment))
                        .col(
                            ColumnDef::new(IncrementalCostDistributions::Position)
                                .integer()
                                .not_null(),
                        )
                        .col(timestamp(IncrementalCostDistributions::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_incremental_cost_distributions_incremental_cost_id")
                                .from(
                                    IncrementalCostDistributions::Table,
                                    IncrementalCostDistributions::IncrementalCostId,
                                )
                                .to(IncrementalCostOrders::Table, IncrementalCostOrders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_incremental_cost_distributions_incremental_cost_id")
                        .table(IncrementalCostDistributions::Table)
                        .col(IncrementalCostDistributions::IncrementalCostId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(IncrementalCostDistributions::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(IncrementalCostBaseOrders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(IncrementalCostOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum IncrementalCostOrders {
        Table,
        Id,
        Code,
        CostType,
        Provider,
        Amount,
        Currency,
        ExchangeRates,
        Status,
        Notes,
        ClosedAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum IncrementalCostBaseOrders {
        Table,
        Id,
        IncrementalCostId,
        PurchaseOrderId,
        Position,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum IncrementalCostDistributions {
        Table,
        Id,
        IncrementalCostId,
        PurchaseOrderId,
        PurchaseOrderLineId,
        MaterialId,
        BaseCost,
        BaseCurrency,
        NormalizedCost,
        Percentage,
        Increment,
        Position,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
    }
}

mod m20240101_000005_create_inventory_tables {
    use super::{decimal, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // total = available + assigned is derived, never stored
            manager
                .create_table(
                    Table::create()
                        .table(InventoryRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryRecords::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(InventoryRecords::LocationId).uuid().not_null())
                        .col(decimal(InventoryRecords::Available))
                        .col(decimal(InventoryRecords::Assigned))
                        .col(
                            ColumnDef::new(InventoryRecords::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(timestamp(InventoryRecords::CreatedAt))
                        .col(timestamp(InventoryRecords::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_records_material_location")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::MaterialId)
                        .col(InventoryRecords::LocationId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryAssignments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryAssignments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryAssignments::InventoryRecordId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryAssignments::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(InventoryAssignments::LocationId).uuid().not_null())
                        .col(ColumnDef::new(InventoryAssignments::ProjectId).uuid().not_null())
                        .col(ColumnDef::new(InventoryAssignments::SiteId).uuid().not_null())
                        .col(decimal(InventoryAssignments::Quantity))
                        .col(timestamp(InventoryAssignments::CreatedAt))
                        .col(timestamp(InventoryAssignments::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_assignments_inventory_record_id")
                                .from(
                                    InventoryAssignments::Table,
                                    InventoryAssignments::InventoryRecordId,
                                )
                                .to(InventoryRecords::Table, InventoryRecords::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_assignments_record_project_site")
                        .table(InventoryAssignments::Table)
                        .col(InventoryAssignments::InventoryRecordId)
                        .col(InventoryAssignments::ProjectId)
                        .col(InventoryAssignments::SiteId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Kind).string_len(32).not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::InventoryRecordId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::LocationId).uuid().not_null())
                        .col(decimal(InventoryMovements::Quantity))
                        .col(decimal(InventoryMovements::AvailableBefore))
                        .col(decimal(InventoryMovements::AvailableAfter))
                        .col(decimal(InventoryMovements::AssignedBefore))
                        .col(decimal(InventoryMovements::AssignedAfter))
                        .col(
                            ColumnDef::new(InventoryMovements::ValueDelta)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Currency).string_len(3).null())
                        .col(ColumnDef::new(InventoryMovements::AssignmentId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryMovements::CounterpartAssignmentId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ProjectId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::SiteId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::PreviousProjectId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::PreviousSiteId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryMovements::ReferenceType)
                                .string_len(64)
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ReferenceId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::Justification).text().null())
                        .col(
                            ColumnDef::new(InventoryMovements::ReversesMovementId)
                                .uuid()
                                .null(),
                        )
                        .col(timestamp(InventoryMovements::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_movements_inventory_record_id")
                                .from(
                                    InventoryMovements::Table,
                                    InventoryMovements::InventoryRecordId,
                                )
                                .to(InventoryRecords::Table, InventoryRecords::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // At most one reversal per movement
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_reverses_movement_id")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ReversesMovementId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_material_location")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::MaterialId)
                        .col(InventoryMovements::LocationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryAssignments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryRecords {
        Table,
        Id,
        MaterialId,
        LocationId,
        Available,
        Assigned,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryAssignments {
        Table,
        Id,
        InventoryRecordId,
        MaterialId,
        LocationId,
        ProjectId,
        SiteId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        Kind,
        InventoryRecordId,
        MaterialId,
        LocationId,
        Quantity,
        AvailableBefore,
        AvailableAfter,
        AssignedBefore,
        AssignedAfter,
        ValueDelta,
        Currency,
        AssignmentId,
        CounterpartAssignmentId,
        ProjectId,
        SiteId,
        PreviousProjectId,
        PreviousSiteId,
        ReferenceType,
        ReferenceId,
        Justification,
        ReversesMovementId,
        CreatedAt,
    }
}
