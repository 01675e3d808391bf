//! Collaborator contracts consumed by the checker and the health aggregator
//!
//! The SeaORM repositories implement these traits; tests substitute in-memory
//! fakes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::identity::RepositoryIdentity;
use crate::status::RecordedStatus;

/// Failure reported by a persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("corrupt row in {table}: {details}")]
    Corrupt { table: &'static str, details: String },
}

/// Locally recorded webhook for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WebhookRegistration {
    pub repository: RepositoryIdentity,
    /// Hook id assigned by GitHub
    pub remote_id: i64,
    /// API URL of the hook
    pub url: String,
    /// URL GitHub delivers payloads to; embeds the security token
    pub callback_url: String,
    pub status: RecordedStatus,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub correct: bool,
}

impl WebhookRegistration {
    /// Records a reconciliation outcome, keeping `correct` in step with it.
    pub fn record_status(&mut self, status: RecordedStatus) {
        self.status = status;
        self.correct = status.is_correct();
    }
}

/// In-place edit applied to every stored registration of an identity.
pub type RegistrationMutator = Box<dyn Fn(&mut WebhookRegistration) + Send + Sync>;

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Snapshot of every readable registration in stable iteration order.
    /// Rows that cannot be decoded are left out.
    async fn get_all(&self) -> Result<Vec<(RepositoryIdentity, WebhookRegistration)>, StoreError>;

    /// Atomically applies `mutator` to the registrations of `identity`.
    async fn update(
        &self,
        identity: &RepositoryIdentity,
        mutator: RegistrationMutator,
    ) -> Result<(), StoreError>;

    async fn delete(&self, identity: &RepositoryIdentity) -> Result<u64, StoreError>;

    /// Registrations not currently marked correct.
    async fn get_incorrect(&self)
    -> Result<Vec<(RepositoryIdentity, WebhookRegistration)>, StoreError>;

    async fn get_hooks(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Vec<WebhookRegistration>, StoreError>;

    async fn has_incorrect(&self) -> Result<bool, StoreError>;
}

/// Link from a callback token back to the connection and user that installed
/// the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBinding {
    pub token: String,
    pub connection_id: String,
    pub connection_project_id: String,
    pub user_id: i64,
}

#[async_trait]
pub trait SecurityBindingStore: Send + Sync {
    async fn find(&self, token: &str) -> Result<Option<SecurityBinding>, StoreError>;
    async fn delete(&self, token: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OAuthConnection {
    pub id: String,
    pub project_id: String,
    /// Base URL of the GitHub server the connection authorizes against
    pub server_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
}

/// A single usable access token and the identity that owns it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub connection_id: String,
    pub access_token: String,
    /// GitHub login the token was issued to
    pub oauth_login: String,
    pub scope: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("access_token", &"[REDACTED]")
            .field("oauth_login", &self.oauth_login)
            .field("scope", &self.scope)
            .finish()
    }
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolves the binding's connection within its project or an ancestor.
    async fn resolve_connection(
        &self,
        binding: &SecurityBinding,
    ) -> Result<Option<OAuthConnection>, StoreError>;

    async fn find_user(&self, user_id: i64) -> Result<Option<UserAccount>, StoreError>;

    /// Usable tokens per connection for the user, in stable order.
    async fn get_tokens(
        &self,
        connections: &[OAuthConnection],
        user: &UserAccount,
    ) -> Result<BTreeMap<OAuthConnection, Vec<Credential>>, StoreError>;

    /// Flags a token as lacking required scope; it is no longer returned.
    async fn mark_incorrect(&self, credential: &Credential) -> Result<(), StoreError>;

    async fn remove_token(&self, connection_id: &str, access_token: &str)
    -> Result<bool, StoreError>;
}

/// Presentation scope for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthScope {
    Global,
    Project { project_id: String, recursive: bool },
}

/// Kind of configuration consuming a VCS root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConsumerKind {
    BuildType,
    Template,
    /// Versioned settings of a project
    Settings,
}

impl ConsumerKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "build_type" => Some(ConsumerKind::BuildType),
            "template" => Some(ConsumerKind::Template),
            "settings" => Some(ConsumerKind::Settings),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootConsumer {
    pub kind: ConsumerKind,
    pub id: String,
    pub project_id: String,
}

/// A git VCS root in scope together with everything that uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsRootInstance {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub fetch_url: String,
    pub consumers: Vec<RootConsumer>,
}

#[async_trait]
pub trait ScopeProvider: Send + Sync {
    /// Git roots with a non-empty fetch URL used within `scope`.
    async fn vcs_roots(&self, scope: &HealthScope) -> Result<Vec<VcsRootInstance>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_status_keeps_correct_flag_in_sync() {
        let mut hook = WebhookRegistration {
            repository: RepositoryIdentity::new("github.com", "acme", "widgets"),
            remote_id: 1,
            url: "https://api.github.com/repos/acme/widgets/hooks/1".to_string(),
            callback_url: "https://ci.example.com/app/hooks/github/t".to_string(),
            status: RecordedStatus::Ok,
            last_delivery_at: None,
            correct: true,
        };

        hook.record_status(RecordedStatus::Missing);
        assert!(!hook.correct);
        hook.record_status(RecordedStatus::Ok);
        assert!(hook.correct);
    }

    #[test]
    fn credential_debug_hides_access_token() {
        let credential = Credential {
            id: Uuid::new_v4(),
            connection_id: "PROJECT_EXT_1".to_string(),
            access_token: "gho_secret".to_string(),
            oauth_login: "octocat".to_string(),
            scope: "repo".to_string(),
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("gho_secret"));
        assert!(rendered.contains("octocat"));
    }
}
