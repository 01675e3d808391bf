//! Migration to create the vcs_roots and vcs_root_usages tables.
//!
//! Usages record which build configurations, templates, and versioned
//! settings consume a VCS root, so health items can be attributed to them.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VcsRoots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VcsRoots::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VcsRoots::ProjectId).text().not_null())
                    .col(ColumnDef::new(VcsRoots::Name).text().not_null())
                    .col(ColumnDef::new(VcsRoots::VcsName).text().not_null())
                    .col(ColumnDef::new(VcsRoots::FetchUrl).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vcs_roots_project_id")
                            .from(VcsRoots::Table, VcsRoots::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VcsRootUsages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VcsRootUsages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VcsRootUsages::VcsRootId).text().not_null())
                    .col(ColumnDef::new(VcsRootUsages::ConsumerKind).text().not_null())
                    .col(ColumnDef::new(VcsRootUsages::ConsumerId).text().not_null())
                    .col(
                        ColumnDef::new(VcsRootUsages::ConsumerProjectId)
                            .text()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vcs_root_usages_vcs_root_id")
                            .from(VcsRootUsages::Table, VcsRootUsages::VcsRootId)
                            .to(VcsRoots::Table, VcsRoots::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vcs_root_usages_vcs_root_id")
                    .table(VcsRootUsages::Table)
                    .col(VcsRootUsages::VcsRootId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_vcs_root_usages_vcs_root_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(VcsRootUsages::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(VcsRoots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VcsRoots {
    Table,
    Id,
    ProjectId,
    Name,
    VcsName,
    FetchUrl,
}

#[derive(DeriveIden)]
enum VcsRootUsages {
    Table,
    Id,
    VcsRootId,
    ConsumerKind,
    ConsumerId,
    ConsumerProjectId,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
