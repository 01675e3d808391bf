//! Security binding repository for database operations

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::models::security_binding::{self, Entity as SecurityBindingEntity};
use crate::stores::{SecurityBinding, SecurityBindingStore, StoreError};

/// Repository for callback token bindings
#[derive(Debug, Clone)]
pub struct SecurityBindingRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl SecurityBindingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, binding: &SecurityBinding) -> Result<(), StoreError> {
        security_binding::ActiveModel {
            token: Set(binding.token.clone()),
            connection_id: Set(binding.connection_id.clone()),
            connection_project_id: Set(binding.connection_project_id.clone()),
            user_id: Set(binding.user_id),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SecurityBindingStore for SecurityBindingRepository {
    async fn find(&self, token: &str) -> Result<Option<SecurityBinding>, StoreError> {
        let binding = SecurityBindingEntity::find_by_id(token.to_string())
            .one(self.db.as_ref())
            .await?;

        Ok(binding.map(|model| SecurityBinding {
            token: model.token,
            connection_id: model.connection_id,
            connection_project_id: model.connection_project_id,
            user_id: model.user_id,
        }))
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        SecurityBindingEntity::delete_by_id(token.to_string())
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}
