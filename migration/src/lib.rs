//! Database migrations for the webhook monitor.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000001_create_projects_and_users;
mod m2025_11_10_000002_create_oauth_tables;
mod m2025_11_10_000003_create_webhooks;
mod m2025_11_10_000004_create_vcs_roots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000001_create_projects_and_users::Migration),
            Box::new(m2025_11_10_000002_create_oauth_tables::Migration),
            Box::new(m2025_11_10_000003_create_webhooks::Migration),
            Box::new(m2025_11_10_000004_create_vcs_roots::Migration),
        ]
    }
}
