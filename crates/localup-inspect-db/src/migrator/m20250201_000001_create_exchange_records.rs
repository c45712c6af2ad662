//! Migration to create exchange_records table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExchangeRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExchangeRecord::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExchangeRecord::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ExchangeRecord::Subdomain).string().null())
                    .col(ColumnDef::new(ExchangeRecord::Method).string().not_null())
                    .col(ColumnDef::new(ExchangeRecord::Uri).text().not_null())
                    .col(ColumnDef::new(ExchangeRecord::ContentType).string().null())
                    .col(ColumnDef::new(ExchangeRecord::RawRequest).blob().not_null())
                    .col(
                        ColumnDef::new(ExchangeRecord::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExchangeRecord::StopTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExchangeRecord::DurationMs)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(ExchangeRecord::Classification).text().null())
                    .to_owned(),
            )
            .await?;

        // Eviction and listing both scan by start time
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_exchange_records_start_time")
                    .table(ExchangeRecord::Table)
                    .col(ExchangeRecord::StartTime)
                    .col(ExchangeRecord::Sequence)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExchangeRecord::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(super) enum ExchangeRecord {
    #[sea_orm(iden = "exchange_records")]
    Table,
    Id,
    Sequence,
    Subdomain,
    Method,
    Uri,
    ContentType,
    RawRequest,
    StartTime,
    StopTime,
    DurationMs,
    Classification,
}
