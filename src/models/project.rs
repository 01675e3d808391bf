//! Project entity model
//!
//! Projects form a tree through `parent_id`; OAuth connections and VCS roots
//! belong to a project and are visible to its sub-projects.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Parent project; `None` for the root project
    pub parent_id: Option<String>,

    pub archived: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::oauth_connection::Entity")]
    OAuthConnection,
    #[sea_orm(has_many = "super::vcs_root::Entity")]
    VcsRoot,
}

impl Related<super::oauth_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthConnection.def()
    }
}

impl Related<super::vcs_root::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VcsRoot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
