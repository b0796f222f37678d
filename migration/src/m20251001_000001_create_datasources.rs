use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Datasources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Datasources::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Datasources::TeamId).uuid().not_null())
                    .col(ColumnDef::new(Datasources::OrgId).uuid().not_null())
                    .col(ColumnDef::new(Datasources::Name).text().not_null())
                    .col(ColumnDef::new(Datasources::ConnectorTypeId).text().not_null())
                    .col(ColumnDef::new(Datasources::ConnectorName).text().not_null())
                    .col(ColumnDef::new(Datasources::ConnectorConfig).json_binary())
                    .col(ColumnDef::new(Datasources::StreamCatalog).json_binary())
                    .col(
                        ColumnDef::new(Datasources::SelectedStreams)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(Datasources::SelectedFieldsMap)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(Datasources::Schedule)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{\"kind\":\"manual\"}'::jsonb")),
                    )
                    .col(ColumnDef::new(Datasources::NextRunAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Datasources::Status)
                            .text()
                            .not_null()
                            .default("staged"),
                    )
                    .col(ColumnDef::new(Datasources::FailureReason).text())
                    .col(
                        ColumnDef::new(Datasources::RecordCount)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .col(ColumnDef::new(Datasources::Reconciliation).json_binary())
                    .col(ColumnDef::new(Datasources::ConnectionToken).text())
                    .col(ColumnDef::new(Datasources::JobToken).text())
                    .col(ColumnDef::new(Datasources::LastSyncedToken).text())
                    .col(
                        ColumnDef::new(Datasources::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Datasources::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Datasources::StatusChangedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Datasources::LastSyncedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Datasources::DeletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Datasources::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_datasources_team_id")
                    .table(Datasources::Table)
                    .col(Datasources::TeamId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_datasources_job_token")
                    .table(Datasources::Table)
                    .col(Datasources::JobToken)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_datasources_connection_token")
                    .table(Datasources::Table)
                    .col(Datasources::ConnectionToken)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Datasources::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Datasources {
    Table,
    Id,
    TeamId,
    OrgId,
    Name,
    ConnectorTypeId,
    ConnectorName,
    ConnectorConfig,
    StreamCatalog,
    SelectedStreams,
    SelectedFieldsMap,
    Schedule,
    NextRunAt,
    Status,
    FailureReason,
    RecordCount,
    Reconciliation,
    ConnectionToken,
    JobToken,
    LastSyncedToken,
    CreatedAt,
    UpdatedAt,
    StatusChangedAt,
    LastSyncedAt,
    DeletedAt,
    Version,
}
