pub use sea_orm_migration::prelude::*;

mod m20251001_000001_create_datasources;
mod m20251001_000002_create_sync_jobs;
mod m20251014_000003_add_run_tracking_to_datasources;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251001_000001_create_datasources::Migration),
            Box::new(m20251001_000002_create_sync_jobs::Migration),
            Box::new(m20251014_000003_add_run_tracking_to_datasources::Migration),
        ]
    }
}
