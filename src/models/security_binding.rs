//! Security binding entity model
//!
//! Maps the opaque token embedded in a webhook callback URL to the OAuth
//! connection and user that installed the hook.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "security_bindings")]
pub struct Model {
    /// Token from the callback URL (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,

    pub connection_id: String,

    /// Project the connection was looked up in when the hook was installed
    pub connection_project_id: String,

    pub user_id: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
