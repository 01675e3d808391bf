//! Migration to create the webhooks and security_bindings tables.
//!
//! `webhooks` holds one row per registered GitHub webhook, keyed for lookup by
//! the lower-cased `server/owner/name` repository key. `security_bindings`
//! maps the token embedded in each callback URL back to the connection and
//! user that installed the hook.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Webhooks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Webhooks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Webhooks::RepositoryKey).text().not_null())
                    .col(ColumnDef::new(Webhooks::Server).text().not_null())
                    .col(ColumnDef::new(Webhooks::Owner).text().not_null())
                    .col(ColumnDef::new(Webhooks::Name).text().not_null())
                    .col(ColumnDef::new(Webhooks::RemoteId).big_integer().not_null())
                    .col(ColumnDef::new(Webhooks::Url).text().not_null())
                    .col(ColumnDef::new(Webhooks::CallbackUrl).text().not_null())
                    .col(
                        ColumnDef::new(Webhooks::Status)
                            .text()
                            .not_null()
                            .default("ok"),
                    )
                    .col(
                        ColumnDef::new(Webhooks::LastDeliveryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Webhooks::Correct)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Webhooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Webhooks::UpdatedAt)
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
                    .name("idx_webhooks_repository_key")
                    .table(Webhooks::Table)
                    .col(Webhooks::RepositoryKey)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhooks_repository_remote")
                    .table(Webhooks::Table)
                    .col(Webhooks::RepositoryKey)
                    .col(Webhooks::RemoteId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SecurityBindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SecurityBindings::Token)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SecurityBindings::ConnectionId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SecurityBindings::ConnectionProjectId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SecurityBindings::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SecurityBindings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SecurityBindings::Table).to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhooks_repository_remote")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_webhooks_repository_key").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Webhooks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Webhooks {
    Table,
    Id,
    RepositoryKey,
    Server,
    Owner,
    Name,
    RemoteId,
    Url,
    CallbackUrl,
    Status,
    LastDeliveryAt,
    Correct,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SecurityBindings {
    Table,
    Token,
    ConnectionId,
    ConnectionProjectId,
    UserId,
    CreatedAt,
}
