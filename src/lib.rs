//! # hookwatch
//!
//! Keeps the recorded state of GitHub repository webhooks consistent with
//! their live configuration and reports unhealthy webhooks per project scope.

pub mod auth;
pub mod callback;
pub mod checker;
pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod models;
pub mod repositories;
pub mod server;
pub mod status;
pub mod stores;
pub mod telemetry;
pub use migration;
