//! Connectors module
//!
//! This module provides the hosting-provider client layer:
//! - The `ProviderClient` and `ClientFactory` traits consumed by the checker
//! - The GitHub REST implementation

pub mod github;
pub mod trait_;

pub use github::{GitHubClient, GitHubClientFactory};
pub use trait_::{
    AccessError, ClientFactory, LastResponse, LiveHook, ProviderClient, ProviderError, RateLimit,
};
