//! VCS root entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

/// VCS root defined in a project
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "vcs_roots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub project_id: String,

    pub name: String,

    /// VCS plugin name, `jetbrains.git` for git roots
    pub vcs_name: String,

    /// Remote fetch URL; absent for roots not yet configured
    pub fetch_url: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_many = "super::vcs_root_usage::Entity")]
    Usage,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::vcs_root_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
