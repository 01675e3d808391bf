//! Webhook entity model
//!
//! This module contains the SeaORM entity model for the webhooks table,
//! which records every GitHub webhook installed by the service together with
//! the outcome of its last reconciliation.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Webhook registration row
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhooks")]
pub struct Model {
    /// Unique identifier for the row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lower-cased `server/owner/name` lookup key
    pub repository_key: String,

    /// GitHub server host, original case
    pub server: String,

    pub owner: String,

    pub name: String,

    /// Hook id assigned by GitHub
    pub remote_id: i64,

    /// API URL of the hook
    pub url: String,

    /// Delivery URL embedding the security token
    pub callback_url: String,

    /// Last recorded status (ok|disabled|missing|payload_delivery_failed|incorrect|no_info)
    pub status: String,

    /// Time of the last payload delivery observed for this hook
    pub last_delivery_at: Option<DateTimeWithTimeZone>,

    pub correct: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
