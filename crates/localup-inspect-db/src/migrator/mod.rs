//! Database migrations

use sea_orm_migration::prelude::*;

mod m20250201_000001_create_exchange_records;
mod m20250201_000002_create_response_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250201_000001_create_exchange_records::Migration),
            Box::new(m20250201_000002_create_response_records::Migration),
        ]
    }
}
