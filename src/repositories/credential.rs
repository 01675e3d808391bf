//! Credential repository for database operations
//!
//! Resolves OAuth connections, users and their access tokens, and implements
//! the `CredentialResolver` contract used by the checker.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use tracing::warn;

use crate::models::oauth_connection::{self, Entity as OAuthConnectionEntity};
use crate::models::oauth_token::{self, Entity as OAuthTokenEntity};
use crate::models::project::Entity as ProjectEntity;
use crate::models::user::Entity as UserEntity;
use crate::stores::{
    Credential, CredentialResolver, OAuthConnection, SecurityBinding, StoreError, UserAccount,
};

/// Repository for OAuth connections and tokens
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks a connection up in `project_id` and then in each ancestor.
    async fn find_connection_in_hierarchy(
        &self,
        project_id: &str,
        connection_id: &str,
    ) -> Result<Option<oauth_connection::Model>, StoreError> {
        let mut visited = HashSet::new();
        let mut current = Some(project_id.to_string());

        while let Some(project_id) = current {
            if !visited.insert(project_id.clone()) {
                return Err(StoreError::Corrupt {
                    table: "projects",
                    details: format!("cycle in project hierarchy at '{}'", project_id),
                });
            }

            let connection = OAuthConnectionEntity::find()
                .filter(oauth_connection::Column::Id.eq(connection_id))
                .filter(oauth_connection::Column::ProjectId.eq(project_id.as_str()))
                .one(self.db.as_ref())
                .await?;
            if connection.is_some() {
                return Ok(connection);
            }

            current = ProjectEntity::find_by_id(project_id)
                .one(self.db.as_ref())
                .await?
                .and_then(|project| project.parent_id);
        }

        Ok(None)
    }
}

fn to_credential(model: oauth_token::Model) -> Credential {
    Credential {
        id: model.id,
        connection_id: model.connection_id,
        access_token: model.access_token,
        oauth_login: model.oauth_login,
        scope: model.scope,
    }
}

#[async_trait]
impl CredentialResolver for CredentialRepository {
    async fn resolve_connection(
        &self,
        binding: &SecurityBinding,
    ) -> Result<Option<OAuthConnection>, StoreError> {
        let project = ProjectEntity::find_by_id(binding.connection_project_id.clone())
            .one(self.db.as_ref())
            .await?;
        if project.is_none() {
            warn!(
                project_id = %binding.connection_project_id,
                "OAuth connection project not found"
            );
            return Ok(None);
        }

        let connection = self
            .find_connection_in_hierarchy(&binding.connection_project_id, &binding.connection_id)
            .await?;
        if connection.is_none() {
            warn!(
                connection_id = %binding.connection_id,
                project_id = %binding.connection_project_id,
                "OAuth connection not found in project and its parents"
            );
        }

        Ok(connection.map(|model| OAuthConnection {
            id: model.id,
            project_id: model.project_id,
            server_url: model.server_url,
        }))
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserAccount>, StoreError> {
        let user = UserEntity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?;
        Ok(user.map(|model| UserAccount {
            id: model.id,
            username: model.username,
        }))
    }

    async fn get_tokens(
        &self,
        connections: &[OAuthConnection],
        user: &UserAccount,
    ) -> Result<BTreeMap<OAuthConnection, Vec<Credential>>, StoreError> {
        let mut tokens = BTreeMap::new();

        for connection in connections {
            let credentials: Vec<Credential> = OAuthTokenEntity::find()
                .filter(oauth_token::Column::ConnectionId.eq(connection.id.as_str()))
                .filter(oauth_token::Column::UserId.eq(user.id))
                .filter(oauth_token::Column::Incorrect.eq(false))
                .order_by_asc(oauth_token::Column::CreatedAt)
                .order_by_asc(oauth_token::Column::Id)
                .all(self.db.as_ref())
                .await?
                .into_iter()
                .map(to_credential)
                .collect();

            if !credentials.is_empty() {
                tokens.insert(connection.clone(), credentials);
            }
        }

        Ok(tokens)
    }

    async fn mark_incorrect(&self, credential: &Credential) -> Result<(), StoreError> {
        OAuthTokenEntity::update_many()
            .col_expr(oauth_token::Column::Incorrect, Expr::value(true))
            .filter(oauth_token::Column::Id.eq(credential.id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn remove_token(
        &self,
        connection_id: &str,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        let result = OAuthTokenEntity::delete_many()
            .filter(oauth_token::Column::ConnectionId.eq(connection_id))
            .filter(oauth_token::Column::AccessToken.eq(access_token))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }
}
