//! OAuth connection entity model
//!
//! A project-scoped authorization against one GitHub server.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_connections")]
pub struct Model {
    /// Connection identifier, unique across projects (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Project the connection is defined in
    pub project_id: String,

    /// GitHub server URL, e.g. `https://github.com`
    pub server_url: String,

    pub display_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_many = "super::oauth_token::Entity")]
    OAuthToken,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::oauth_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
