//! Test utilities for database-backed and provider-backed tests.
//!
//! Sets up in-memory SQLite databases with migrations applied, inserts
//! fixture rows, and provides a scripted fake GitHub for the checker.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hookwatch::checker::{CheckerCollaborators, WebhookChecker};
use hookwatch::config::CheckerConfig;
use hookwatch::connectors::{
    AccessError, ClientFactory, LastResponse, LiveHook, ProviderClient, ProviderError, RateLimit,
};
use hookwatch::identity::RepositoryIdentity;
use hookwatch::models::{
    oauth_connection, oauth_token, project, security_binding, user, vcs_root, vcs_root_usage,
    webhook,
};
use hookwatch::repositories::{
    CredentialRepository, SecurityBindingRepository, WebhookRepository,
};
use hookwatch::status::{OutcomeCache, RecordedStatus};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use tokio::sync::Notify;
use uuid::Uuid;

pub const GITHUB_URL: &str = "https://github.com";
pub const ROOT_PROJECT: &str = "_Root";
pub const CONNECTION_ID: &str = "PROJECT_EXT_1";
pub const USER_ID: i64 = 1;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Same as [`setup_test_db`], wrapped for repositories.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Fixed base instant; fixtures offset from it to get a stable row order.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn at(order: i64) -> sea_orm::prelude::DateTimeWithTimeZone {
    (base_time() + Duration::seconds(order)).into()
}

pub async fn insert_project(
    db: &DatabaseConnection,
    id: &str,
    parent_id: Option<&str>,
    archived: bool,
) -> Result<()> {
    project::ActiveModel {
        id: Set(id.to_string()),
        parent_id: Set(parent_id.map(str::to_string)),
        archived: Set(archived),
        created_at: Set(at(0)),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn insert_user(db: &DatabaseConnection, id: i64, username: &str) -> Result<()> {
    user::ActiveModel {
        id: Set(id),
        username: Set(username.to_string()),
        created_at: Set(at(0)),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn insert_connection(
    db: &DatabaseConnection,
    id: &str,
    project_id: &str,
    server_url: &str,
) -> Result<()> {
    oauth_connection::ActiveModel {
        id: Set(id.to_string()),
        project_id: Set(project_id.to_string()),
        server_url: Set(server_url.to_string()),
        display_name: Set(Some(format!("{} connection", id))),
        created_at: Set(at(0)),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Inserts a token; `order` fixes its position in the credential list.
pub async fn insert_token(
    db: &DatabaseConnection,
    connection_id: &str,
    user_id: i64,
    access_token: &str,
    oauth_login: &str,
    order: i64,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    oauth_token::ActiveModel {
        id: Set(id),
        connection_id: Set(connection_id.to_string()),
        user_id: Set(user_id),
        access_token: Set(access_token.to_string()),
        oauth_login: Set(oauth_login.to_string()),
        scope: Set("admin:repo_hook,repo".to_string()),
        incorrect: Set(false),
        created_at: Set(at(order)),
    }
    .insert(db)
    .await?;
    Ok(id)
}

pub async fn insert_binding(
    db: &DatabaseConnection,
    token: &str,
    connection_id: &str,
    connection_project_id: &str,
    user_id: i64,
) -> Result<()> {
    security_binding::ActiveModel {
        token: Set(token.to_string()),
        connection_id: Set(connection_id.to_string()),
        connection_project_id: Set(connection_project_id.to_string()),
        user_id: Set(user_id),
        created_at: Set(at(0)),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Inserts a registration; `order` fixes its position in the pass queue.
pub async fn insert_webhook(
    db: &DatabaseConnection,
    identity: &RepositoryIdentity,
    remote_id: i64,
    callback_url: &str,
    order: i64,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    webhook::ActiveModel {
        id: Set(id),
        repository_key: Set(identity.key()),
        server: Set(identity.server.clone()),
        owner: Set(identity.owner.clone()),
        name: Set(identity.name.clone()),
        remote_id: Set(remote_id),
        url: Set(format!(
            "https://api.github.com/repos/{}/{}/hooks/{}",
            identity.owner, identity.name, remote_id
        )),
        callback_url: Set(callback_url.to_string()),
        status: Set(RecordedStatus::Ok.as_str().to_string()),
        last_delivery_at: Set(None),
        correct: Set(true),
        created_at: Set(at(order)),
        updated_at: Set(at(order)),
    }
    .insert(db)
    .await?;
    Ok(id)
}

pub async fn insert_vcs_root(
    db: &DatabaseConnection,
    id: &str,
    project_id: &str,
    fetch_url: Option<&str>,
) -> Result<()> {
    vcs_root::ActiveModel {
        id: Set(id.to_string()),
        project_id: Set(project_id.to_string()),
        name: Set(format!("{} root", id)),
        vcs_name: Set("jetbrains.git".to_string()),
        fetch_url: Set(fetch_url.map(str::to_string)),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn insert_usage(
    db: &DatabaseConnection,
    vcs_root_id: &str,
    consumer_kind: &str,
    consumer_id: &str,
    consumer_project_id: &str,
) -> Result<()> {
    vcs_root_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        vcs_root_id: Set(vcs_root_id.to_string()),
        consumer_kind: Set(consumer_kind.to_string()),
        consumer_id: Set(consumer_id.to_string()),
        consumer_project_id: Set(consumer_project_id.to_string()),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub const CI_ROOT: &str = "https://ci.example.com";

pub fn callback_url(token: &str) -> String {
    hookwatch::callback::callback_url(CI_ROOT, token)
}

/// Root project, user 1 (`alice`) and a github.com connection in the root project.
pub async fn seed_installation_base(db: &DatabaseConnection) -> Result<()> {
    insert_project(db, ROOT_PROJECT, None, false).await?;
    insert_user(db, USER_ID, "alice").await?;
    insert_connection(db, CONNECTION_ID, ROOT_PROJECT, GITHUB_URL).await?;
    Ok(())
}

/// Registration on github.com with a binding to the base connection and user.
pub async fn install_webhook(
    db: &DatabaseConnection,
    owner: &str,
    name: &str,
    remote_id: i64,
    security_token: &str,
    order: i64,
) -> Result<RepositoryIdentity> {
    let identity = RepositoryIdentity::new("github.com", owner, name);
    insert_binding(db, security_token, CONNECTION_ID, ROOT_PROJECT, USER_ID).await?;
    insert_webhook(db, &identity, remote_id, &callback_url(security_token), order).await?;
    Ok(identity)
}

pub fn live_hook(id: i64, active: bool, code: Option<u16>, message: &str) -> LiveHook {
    LiveHook {
        id,
        active,
        callback_url: None,
        last_response: Some(LastResponse {
            code,
            status: Some(if code.is_some() { "active" } else { "unused" }.to_string()),
            message: Some(message.to_string()),
        }),
    }
}

/// Live hook GitHub has never delivered to.
pub fn undelivered_hook(id: i64) -> LiveHook {
    LiveHook {
        id,
        active: true,
        callback_url: None,
        last_response: None,
    }
}

#[derive(Default)]
struct FakeState {
    responses: HashMap<String, Result<Vec<LiveHook>, ProviderError>>,
    remaining: Option<i64>,
    list_calls: Vec<(String, RepositoryIdentity)>,
    pings: Vec<(String, RepositoryIdentity, i64)>,
    gate: Option<Arc<Notify>>,
}

/// Scripted GitHub: answers per access token and records every call.
#[derive(Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

impl FakeGitHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, access_token: &str, result: Result<Vec<LiveHook>, ProviderError>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(access_token.to_string(), result);
    }

    pub fn respond_hooks(&self, access_token: &str, hooks: Vec<LiveHook>) {
        self.respond(access_token, Ok(hooks));
    }

    pub fn respond_error(&self, access_token: &str, error: AccessError) {
        self.respond(access_token, Err(ProviderError::Access(error)));
    }

    /// Remaining budget reported after every call.
    pub fn set_remaining(&self, remaining: Option<i64>) {
        self.state.lock().unwrap().remaining = remaining;
    }

    /// Makes listing wait until the returned gate is notified.
    pub fn block_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    /// Access tokens used for listing, in call order.
    pub fn list_calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .list_calls
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    pub fn pings(&self) -> Vec<(String, RepositoryIdentity, i64)> {
        self.state.lock().unwrap().pings.clone()
    }
}

pub struct FakeClient {
    github: Arc<FakeGitHub>,
    access_token: Mutex<String>,
}

#[async_trait]
impl ProviderClient for FakeClient {
    fn authenticate(&self, access_token: &str) {
        *self.access_token.lock().unwrap() = access_token.to_string();
    }

    async fn list_webhooks(
        &self,
        repository: &RepositoryIdentity,
    ) -> Result<Vec<LiveHook>, ProviderError> {
        let token = self.access_token.lock().unwrap().clone();
        let gate = {
            let mut state = self.github.state.lock().unwrap();
            state.list_calls.push((token.clone(), repository.clone()));
            state.gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.github
            .state
            .lock()
            .unwrap()
            .responses
            .get(&token)
            .cloned()
            .unwrap_or_else(|| {
                Err(ProviderError::Access(AccessError::InvalidCredentials(
                    "Bad credentials".to_string(),
                )))
            })
    }

    async fn send_test_ping(
        &self,
        repository: &RepositoryIdentity,
        hook_id: i64,
    ) -> Result<(), ProviderError> {
        let token = self.access_token.lock().unwrap().clone();
        self.github
            .state
            .lock()
            .unwrap()
            .pings
            .push((token, repository.clone(), hook_id));
        Ok(())
    }

    fn remaining_request_budget(&self) -> Option<RateLimit> {
        self.github
            .state
            .lock()
            .unwrap()
            .remaining
            .map(|remaining| RateLimit {
                remaining,
                limit: Some(5000),
            })
    }
}

pub struct FakeClientFactory(pub Arc<FakeGitHub>);

impl ClientFactory for FakeClientFactory {
    fn create(&self, _server_url: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        Ok(Arc::new(FakeClient {
            github: self.0.clone(),
            access_token: Mutex::new(String::new()),
        }))
    }
}

/// SeaORM repositories of `db` plus the fake GitHub.
pub fn checker_collaborators(
    db: Arc<DatabaseConnection>,
    github: Arc<FakeGitHub>,
) -> CheckerCollaborators {
    CheckerCollaborators {
        registrations: Arc::new(WebhookRepository::new(db.clone())),
        bindings: Arc::new(SecurityBindingRepository::new(db.clone())),
        credentials: Arc::new(CredentialRepository::new(db)),
        clients: Arc::new(FakeClientFactory(github)),
    }
}

pub fn checker_over(
    collaborators: CheckerCollaborators,
) -> (Arc<WebhookChecker>, Arc<OutcomeCache>) {
    let outcomes = Arc::new(OutcomeCache::with_system_clock(
        std::num::NonZeroUsize::new(100).unwrap(),
        std::time::Duration::from_secs(7200),
    ));
    let checker = Arc::new(WebhookChecker::new(
        collaborators,
        CheckerConfig::default(),
        outcomes.clone(),
    ));
    (checker, outcomes)
}

/// Checker over the SeaORM repositories of `db` and the fake GitHub.
pub fn build_checker(
    db: Arc<DatabaseConnection>,
    github: Arc<FakeGitHub>,
) -> (Arc<WebhookChecker>, Arc<OutcomeCache>) {
    checker_over(checker_collaborators(db, github))
}
