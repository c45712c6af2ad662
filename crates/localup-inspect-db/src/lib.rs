//! Database layer for captured exchange storage
//!
//! Two tables back the inspector:
//! - `exchange_records`: one row per captured request, keyed by correlation id
//! - `response_records`: at most one response per exchange, keyed by the same id
//!
//! Supported backends:
//! - **SQLite3 in-memory** (default, ephemeral per session: "sqlite::memory:")
//! - **SQLite3** (durable history: "sqlite://./inspect.db?mode=rwc")
//! - **PostgreSQL**

pub mod entities;
pub mod migrator;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

/// Initialize database connection
///
/// # Examples
/// - Ephemeral: `"sqlite::memory:"`
/// - Durable: `"sqlite://./inspect.db?mode=rwc"`
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    let backend = db.get_database_backend();
    info!("Connected to database backend: {:?}", backend);

    Ok(db)
}

/// Run migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm_migration::MigratorTrait;

    info!("Running database migrations...");
    migrator::Migrator::up(db, None).await?;
    info!("✅ Database migrations completed");

    Ok(())
}
