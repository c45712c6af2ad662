//! Migration to create response_records table

use super::m20250201_000001_create_exchange_records::ExchangeRecord;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ResponseRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ResponseRecord::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ResponseRecord::StatusCode).integer().null())
                    .col(ColumnDef::new(ResponseRecord::RawResponse).blob().not_null())
                    .col(
                        ColumnDef::new(ResponseRecord::RespondedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_response_records_id")
                            .from(ResponseRecord::Table, ResponseRecord::Id)
                            .to(ExchangeRecord::Table, ExchangeRecord::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ResponseRecord::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ResponseRecord {
    #[sea_orm(iden = "response_records")]
    Table,
    Id,
    StatusCode,
    RawResponse,
    RespondedAt,
}
