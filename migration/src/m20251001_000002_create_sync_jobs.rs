use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncJobs::Kind).text().not_null())
                    .col(ColumnDef::new(SyncJobs::DatasourceId).uuid())
                    .col(
                        ColumnDef::new(SyncJobs::RunAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::LastError).text())
                    .col(ColumnDef::new(SyncJobs::LockedBy).text())
                    .col(ColumnDef::new(SyncJobs::LockedUntil).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sync_jobs_run_at")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::RunAt)
                    .to_owned(),
            )
            .await?;

        // One recurring trigger per datasource, enforced by the database as well.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_one_schedule \
                 ON sync_jobs (datasource_id) WHERE kind = 'scheduled_sync'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncJobs {
    Table,
    Id,
    Kind,
    DatasourceId,
    RunAt,
    Attempts,
    LastError,
    LockedBy,
    LockedUntil,
    CreatedAt,
}
