//! VCS root usage entity model
//!
//! One row per build configuration, template or versioned-settings project
//! that uses a VCS root.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "vcs_root_usages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub vcs_root_id: String,

    /// build_type|template|settings
    pub consumer_kind: String,

    pub consumer_id: String,

    /// Project owning the consumer
    pub consumer_project_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::vcs_root::Entity",
        from = "Column::VcsRootId",
        to = "super::vcs_root::Column::Id"
    )]
    VcsRoot,
}

impl Related<super::vcs_root::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VcsRoot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
