use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_products_table::Migration),
            Box::new(m20240601_000002_create_orders_table::Migration),
            Box::new(m20240601_000003_create_discount_tables::Migration),
            Box::new(m20240601_000004_create_gift_card_tables::Migration),
            Box::new(m20240601_000005_create_admin_tables::Migration),
        ]
    }
}

mod m20240601_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Title).string().not_null())
                        .col(
                            ColumnDef::new(Products::Slug)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Price).big_integer().not_null())
                        .col(ColumnDef::new(Products::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::Stock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Title,
        Slug,
        Price,
        Currency,
        Stock,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(20)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerPhone).string().null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::Items).json_binary().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Shipping).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Total).big_integer().not_null())
                        .col(ColumnDef::new(Orders::DiscountCode).string().null())
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::GiftCardCode).string().null())
                        .col(
                            ColumnDef::new(Orders::GiftCardAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentId)
                                .string()
                                .null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_email")
                        .table(Orders::Table)
                        .col(Orders::CustomerEmail)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerEmail,
        CustomerName,
        CustomerPhone,
        ShippingAddress,
        Items,
        Subtotal,
        Shipping,
        Total,
        DiscountCode,
        DiscountAmount,
        GiftCardCode,
        GiftCardAmount,
        Currency,
        Status,
        PaymentMethod,
        PaymentId,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_discount_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_discount_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DiscountCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DiscountCodes::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::DiscountType)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DiscountCodes::Value).double().not_null())
                        .col(
                            ColumnDef::new(DiscountCodes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::StartsAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(DiscountCodes::MaxUses).integer().null())
                        .col(
                            ColumnDef::new(DiscountCodes::MaxUsesPerCustomer)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(DiscountCodes::MinOrderAmount).double().null())
                        .col(
                            ColumnDef::new(DiscountCodes::UseCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DiscountUsage::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DiscountUsage::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(DiscountUsage::DiscountId).uuid().not_null())
                        .col(
                            ColumnDef::new(DiscountUsage::CustomerEmail)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DiscountUsage::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(DiscountUsage::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_discount_usage_discount")
                                .from(DiscountUsage::Table, DiscountUsage::DiscountId)
                                .to(DiscountCodes::Table, DiscountCodes::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_discount_usage_code_email")
                        .table(DiscountUsage::Table)
                        .col(DiscountUsage::DiscountId)
                        .col(DiscountUsage::CustomerEmail)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DiscountUsage::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DiscountCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum DiscountCodes {
        Table,
        Id,
        Code,
        DiscountType,
        Value,
        IsActive,
        StartsAt,
        ExpiresAt,
        MaxUses,
        MaxUsesPerCustomer,
        MinOrderAmount,
        UseCount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum DiscountUsage {
        Table,
        Id,
        DiscountId,
        CustomerEmail,
        OrderId,
        CreatedAt,
    }
}

mod m20240601_000004_create_gift_card_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_gift_card_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(GiftCards::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(GiftCards::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(GiftCards::Code)
                                .string_len(20)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(GiftCards::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(GiftCards::InitialBalance)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GiftCards::CurrentBalance)
                                .big_integer()
                                .not_null()
                                .check(Expr::col(GiftCards::CurrentBalance).gte(0)),
                        )
                        .col(ColumnDef::new(GiftCards::Status).string_len(20).not_null())
                        .col(ColumnDef::new(GiftCards::PurchaserEmail).string().null())
                        .col(ColumnDef::new(GiftCards::RecipientEmail).string().null())
                        .col(ColumnDef::new(GiftCards::RecipientName).string().null())
                        .col(
                            ColumnDef::new(GiftCards::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(GiftCards::ActivatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(GiftCards::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GiftCards::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(GiftCardTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GiftCardTransactions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(GiftCardTransactions::GiftCardId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GiftCardTransactions::TransactionType)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GiftCardTransactions::Amount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GiftCardTransactions::BalanceAfter)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(GiftCardTransactions::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(GiftCardTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_gift_card_transactions_card")
                                .from(GiftCardTransactions::Table, GiftCardTransactions::GiftCardId)
                                .to(GiftCards::Table, GiftCards::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(GiftCardTransactions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(GiftCards::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum GiftCards {
        Table,
        Id,
        Code,
        Currency,
        InitialBalance,
        CurrentBalance,
        Status,
        PurchaserEmail,
        RecipientEmail,
        RecipientName,
        ExpiresAt,
        ActivatedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum GiftCardTransactions {
        Table,
        Id,
        GiftCardId,
        TransactionType,
        Amount,
        BalanceAfter,
        OrderId,
        CreatedAt,
    }
}

mod m20240601_000005_create_admin_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_admin_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AdminUsers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(AdminUsers::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(AdminUsers::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(AdminUsers::Name).string().not_null())
                        .col(ColumnDef::new(AdminUsers::Role).string_len(32).not_null())
                        .col(ColumnDef::new(AdminUsers::PasswordHash).string().not_null())
                        .col(ColumnDef::new(AdminUsers::MfaSecret).string().null())
                        .col(
                            ColumnDef::new(AdminUsers::MfaEnabled)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(AdminUsers::MfaBackupCodes)
                                .json_binary()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AdminUsers::MfaBackupSalt).string().null())
                        .col(
                            ColumnDef::new(AdminUsers::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(AdminUsers::LastLogin)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(AdminUsers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AdminUsers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AdminRefreshTokens::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AdminRefreshTokens::Jti)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(AdminRefreshTokens::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(AdminRefreshTokens::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AdminRefreshTokens::Revoked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(AdminRefreshTokens::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_admin_refresh_tokens_user")
                                .from(AdminRefreshTokens::Table, AdminRefreshTokens::UserId)
                                .to(AdminUsers::Table, AdminUsers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RateLimits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RateLimits::Key)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(RateLimits::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RateLimits::LockedUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RateLimits::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AuditLogs::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(AuditLogs::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(AuditLogs::Action).string_len(64).not_null())
                        .col(ColumnDef::new(AuditLogs::UserId).uuid().null())
                        .col(ColumnDef::new(AuditLogs::UserEmail).string().null())
                        .col(ColumnDef::new(AuditLogs::ResourceType).string().null())
                        .col(ColumnDef::new(AuditLogs::ResourceId).string().null())
                        .col(ColumnDef::new(AuditLogs::Details).json_binary().not_null())
                        .col(ColumnDef::new(AuditLogs::IpAddress).string().null())
                        .col(ColumnDef::new(AuditLogs::UserAgent).string().null())
                        .col(
                            ColumnDef::new(AuditLogs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_logs_created_at")
                        .table(AuditLogs::Table)
                        .col(AuditLogs::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RateLimits::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AdminRefreshTokens::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AdminUsers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AdminUsers {
        Table,
        Id,
        Email,
        Name,
        Role,
        PasswordHash,
        MfaSecret,
        MfaEnabled,
        MfaBackupCodes,
        MfaBackupSalt,
        IsActive,
        LastLogin,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum AdminRefreshTokens {
        Table,
        Jti,
        UserId,
        ExpiresAt,
        Revoked,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum RateLimits {
        Table,
        Key,
        Attempts,
        LockedUntil,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum AuditLogs {
        Table,
        Id,
        Action,
        UserId,
        UserEmail,
        ResourceType,
        ResourceId,
        Details,
        IpAddress,
        UserAgent,
        CreatedAt,
    }
}
