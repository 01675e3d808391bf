//! Migration to create the OAuth connection and token tables.
//!
//! Connections are scoped to a project and point at one GitHub server;
//! tokens belong to a (connection, user) pair and may be flagged incorrect
//! when their scope turns out to be insufficient.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OauthConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthConnections::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OauthConnections::ProjectId).text().not_null())
                    .col(ColumnDef::new(OauthConnections::ServerUrl).text().not_null())
                    .col(ColumnDef::new(OauthConnections::DisplayName).text().null())
                    .col(
                        ColumnDef::new(OauthConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth_connections_project_id")
                            .from(OauthConnections::Table, OauthConnections::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OauthTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthTokens::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OauthTokens::ConnectionId).text().not_null())
                    .col(ColumnDef::new(OauthTokens::UserId).big_integer().not_null())
                    .col(ColumnDef::new(OauthTokens::AccessToken).text().not_null())
                    .col(ColumnDef::new(OauthTokens::OauthLogin).text().not_null())
                    .col(ColumnDef::new(OauthTokens::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OauthTokens::Incorrect)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth_tokens_connection_id")
                            .from(OauthTokens::Table, OauthTokens::ConnectionId)
                            .to(OauthConnections::Table, OauthConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup path for credential resolution
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_connection_user")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::ConnectionId)
                    .col(OauthTokens::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_tokens_connection_user")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OauthTokens::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(OauthConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OauthConnections {
    Table,
    Id,
    ProjectId,
    ServerUrl,
    DisplayName,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OauthTokens {
    Table,
    Id,
    ConnectionId,
    UserId,
    AccessToken,
    OauthLogin,
    Scope,
    Incorrect,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
