use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tokens of earlier runs plus a per-claim counter
        manager
            .alter_table(
                Table::alter()
                    .table(Datasources::Table)
                    .add_column_if_not_exists(
                        ColumnDef::new(Datasources::RetiredJobTokens)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .add_column_if_not_exists(
                        ColumnDef::new(Datasources::SyncAttempt)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Datasources::Table)
                    .drop_column(Datasources::RetiredJobTokens)
                    .drop_column(Datasources::SyncAttempt)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum Datasources {
    Table,
    RetiredJobTokens,
    SyncAttempt,
}
