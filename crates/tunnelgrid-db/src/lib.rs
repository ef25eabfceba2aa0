//! Persistence layer for tunnelgrid.
//!
//! Three tables back the control plane: `hosts`, `service_ports` and
//! `tunnels`. Hosts and service-ports are managed by the REST surface;
//! tunnel records are written by the runtime layer through [`Store`] and
//! survive restarts so the fleet can be rebuilt after a crash.

pub mod entities;
pub mod migrator;
mod store;

pub use sea_orm::{DatabaseConnection, DbErr};
pub use store::{NewHost, NewServicePort, Store};

use sea_orm::Database;
use sea_orm_migration::MigratorTrait;

/// Connect to the database at the given URL.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(url).await
}

/// Run all pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}
