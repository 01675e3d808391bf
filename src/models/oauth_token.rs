//! OAuth token entity model
//!
//! Access tokens issued to a user through a connection. Tokens flagged
//! `incorrect` lack a required scope and are no longer offered to the checker.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connection_id: String,

    pub user_id: i64,

    pub access_token: String,

    /// GitHub login the token was issued to
    pub oauth_login: String,

    /// Granted scopes as reported by GitHub, comma separated
    pub scope: String,

    pub incorrect: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::oauth_connection::Entity",
        from = "Column::ConnectionId",
        to = "super::oauth_connection::Column::Id"
    )]
    OAuthConnection,
}

impl Related<super::oauth_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
