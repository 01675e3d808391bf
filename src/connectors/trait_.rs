//! Provider client trait definition
//!
//! Defines the interface the checker uses to observe live webhook state on a
//! hosting server, and the typed failures such calls raise.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::RepositoryIdentity;

/// Authorization failure raised by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// The token is revoked or malformed
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    /// The token lacks a scope required to manage hooks
    #[error("token scope mismatch: {0}")]
    ScopeMismatch(String),
    /// The token owner cannot see the repository
    #[error("user has no access to repository: {0}")]
    UserNoAccess(String),
    #[error("access denied: {0}")]
    NoAccess(String),
    /// The server failed or refused service (5xx, exhausted rate limit)
    #[error("provider internal error: {0}")]
    InternalError(String),
}

/// Any failure of a provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The connection's server URL cannot be turned into an API base
    #[error("invalid server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

/// Last payload delivery result reported for a hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResponse {
    pub code: Option<u16>,
    pub status: Option<String>,
    pub message: Option<String>,
}

/// Webhook as currently configured on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveHook {
    pub id: i64,
    pub active: bool,
    pub callback_url: Option<String>,
    pub last_response: Option<LastResponse>,
}

impl LiveHook {
    /// HTTP code of the last delivery; `None` until GitHub has delivered once.
    pub fn delivery_code(&self) -> Option<u16> {
        self.last_response.as_ref().and_then(|response| response.code)
    }

    pub fn delivery_message(&self) -> &str {
        self.last_response
            .as_ref()
            .and_then(|response| response.message.as_deref())
            .unwrap_or_default()
    }
}

/// Request budget reported by the server on the latest response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: i64,
    pub limit: Option<i64>,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Sets the access token used by subsequent calls.
    fn authenticate(&self, access_token: &str);

    async fn list_webhooks(
        &self,
        repository: &RepositoryIdentity,
    ) -> Result<Vec<LiveHook>, ProviderError>;

    /// Asks the server to redeliver a test event to the hook.
    async fn send_test_ping(
        &self,
        repository: &RepositoryIdentity,
        hook_id: i64,
    ) -> Result<(), ProviderError>;

    /// Budget observed on the most recent response, if any was reported.
    fn remaining_request_budget(&self) -> Option<RateLimit>;
}

/// Creates clients bound to one server.
pub trait ClientFactory: Send + Sync {
    fn create(&self, server_url: &str) -> Result<Arc<dyn ProviderClient>, ProviderError>;
}
