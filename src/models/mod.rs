//! # Data Models
//!
//! This module contains the SeaORM entities and API response models of the
//! webhook monitor.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod oauth_connection;
pub mod oauth_token;
pub mod project;
pub mod security_binding;
pub mod user;
pub mod vcs_root;
pub mod vcs_root_usage;
pub mod webhook;

pub use oauth_connection::Entity as OAuthConnection;
pub use oauth_token::Entity as OAuthToken;
pub use project::Entity as Project;
pub use security_binding::Entity as SecurityBinding;
pub use user::Entity as User;
pub use vcs_root::Entity as VcsRoot;
pub use vcs_root_usage::Entity as VcsRootUsage;
pub use webhook::Entity as Webhook;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "hookwatch".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
