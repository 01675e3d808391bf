//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities and implement the store contracts of the checker.

pub mod credential;
pub mod scope;
pub mod security_binding;
pub mod webhook;

pub use credential::CredentialRepository;
pub use scope::ScopeRepository;
pub use security_binding::SecurityBindingRepository;
pub use webhook::WebhookRepository;
