//! # Periodic Webhook Checker
//!
//! Background task that audits every recorded webhook registration against
//! the live hook configuration on GitHub. Each pass walks a FIFO queue of
//! registrations, rotates through the installing user's tokens on credential
//! failures, records a status for every observed outcome and defers servers
//! that fail or run low on request budget.

pub mod quota;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::callback::extract_security_token;
use crate::config::CheckerConfig;
use crate::connectors::{AccessError, ClientFactory, LiveHook, ProviderClient, ProviderError};
use crate::identity::RepositoryIdentity;
use crate::status::{OutcomeCache, RecordedStatus};
use crate::stores::{
    Credential, CredentialResolver, OAuthConnection, RegistrationStore, SecurityBindingStore,
    StoreError, UserAccount, WebhookRegistration,
};

pub use quota::{IgnoredServers, QuotaGuard};

pub const REASON_MISSING: &str =
    "Webhook not found on server, seems it has been incorrectly configured or removed";
pub const REASON_DISABLED: &str = "Webhook is disabled on server";
pub const REASON_NO_TOKENS_LEFT: &str = "No usable OAuth tokens left to access repository";

/// Raised only when the registration snapshot cannot be read.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("failed to enumerate webhook registrations: {0}")]
    Enumerate(#[from] StoreError),
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PassReport {
    /// True when another pass was already running
    pub skipped: bool,
    pub checked: usize,
    pub forgotten: usize,
    pub requeued: usize,
    pub pings_sent: usize,
    pub status_updates: usize,
    pub ignored_servers: Vec<String>,
}

impl PassReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// External stores and the provider client factory used by the checker.
#[derive(Clone)]
pub struct CheckerCollaborators {
    pub registrations: Arc<dyn RegistrationStore>,
    pub bindings: Arc<dyn SecurityBindingStore>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub clients: Arc<dyn ClientFactory>,
}

struct PendingCheck {
    identity: RepositoryIdentity,
    registration: WebhookRegistration,
    requeued: bool,
}

struct PendingPing {
    identity: RepositoryIdentity,
    client: Arc<dyn ProviderClient>,
    access_token: String,
    hook_id: i64,
}

/// Mutable state scoped to a single pass.
#[derive(Default)]
struct PassState {
    queue: VecDeque<PendingCheck>,
    ignored: IgnoredServers,
    pings: Vec<PendingPing>,
    /// Identities deleted earlier in the pass
    forgotten: HashSet<RepositoryIdentity>,
    report: PassReport,
}

/// Registration whose token resolved to a connection, user and credentials.
struct ResolvedAccess {
    token: String,
    connection: OAuthConnection,
    user: UserAccount,
    credentials: Vec<Credential>,
}

enum Resolution {
    Ready(ResolvedAccess),
    /// Registration was forgotten or given a terminal status
    Settled,
    /// Transient store failure; leave the registration untouched
    Skip,
}

/// Result of trying the credential list for one registration.
#[derive(Debug, Default)]
struct AttemptSummary {
    success: bool,
    retry: bool,
    forgotten: bool,
}

/// Periodic webhook checker service
pub struct WebhookChecker {
    collaborators: CheckerCollaborators,
    config: CheckerConfig,
    quota: QuotaGuard,
    outcomes: Arc<OutcomeCache>,
    pass_lock: Mutex<()>,
    trigger: Notify,
}

impl WebhookChecker {
    pub fn new(
        collaborators: CheckerCollaborators,
        config: CheckerConfig,
        outcomes: Arc<OutcomeCache>,
    ) -> Self {
        Self {
            quota: QuotaGuard::new(config.quota_low_water_mark),
            collaborators,
            config,
            outcomes,
            pass_lock: Mutex::new(()),
            trigger: Notify::new(),
        }
    }

    /// Short-lived cache of recent non-OK outcomes.
    pub fn outcomes(&self) -> Arc<OutcomeCache> {
        self.outcomes.clone()
    }

    /// Requests a pass as soon as possible; repeated requests coalesce.
    pub fn request_check(&self) {
        counter!("webhook_checker_on_demand_requests_total").increment(1);
        self.trigger.notify_one();
    }

    /// Run the checker loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            initial_delay_seconds = self.config.initial_delay_seconds,
            interval_seconds = self.config.interval_seconds,
            "Starting periodic webhook checker"
        );

        let mut delay = self.config.initial_delay();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
                _ = self.trigger.notified() => {
                    debug!("On-demand webhook check requested");
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested during webhook check pass, abandoning it");
                    break;
                }
                result = self.run_pass() => {
                    if let Err(err) = result {
                        error!(error = %err, "Webhook check pass failed");
                    }
                }
            }

            delay = self.config.interval();
        }

        info!("Periodic webhook checker stopped");
    }

    /// Execute one reconciliation pass unless another one is in flight.
    #[instrument(skip_all)]
    pub async fn run_pass(&self) -> Result<PassReport, PassError> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("Webhook check pass already running, skipping");
            counter!("webhook_checker_passes_skipped_total").increment(1);
            return Ok(PassReport::skipped());
        };

        let started = Instant::now();
        info!("Periodical GitHub webhooks check started");

        let snapshot = self.collaborators.registrations.get_all().await?;
        if snapshot.is_empty() {
            debug!("No configured webhooks found");
        } else {
            debug!(count = snapshot.len(), "Checking webhooks");
        }

        let mut state = PassState {
            queue: snapshot
                .into_iter()
                .map(|(identity, registration)| PendingCheck {
                    identity,
                    registration,
                    requeued: false,
                })
                .collect(),
            ..PassState::default()
        };

        while let Some(item) = state.queue.pop_front() {
            state.report.checked += 1;
            self.check_registration(item, &mut state).await;
        }

        self.send_pings(&mut state).await;

        let elapsed = started.elapsed();
        histogram!("webhook_checker_pass_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        counter!("webhook_checker_passes_total").increment(1);
        counter!("webhook_checker_registrations_checked_total")
            .increment(state.report.checked as u64);

        let mut report = state.report;
        report.ignored_servers = state.ignored.into_vec();
        info!(
            checked = report.checked,
            forgotten = report.forgotten,
            requeued = report.requeued,
            pings_sent = report.pings_sent,
            status_updates = report.status_updates,
            ignored_servers = ?report.ignored_servers,
            duration_ms = elapsed.as_millis() as u64,
            "Periodical GitHub webhooks check finished"
        );
        Ok(report)
    }

    async fn check_registration(&self, item: PendingCheck, state: &mut PassState) {
        let identity = &item.identity;
        if state.forgotten.contains(identity) {
            return;
        }

        let access = match self.resolve_access(&item, state).await {
            Resolution::Ready(access) => access,
            Resolution::Settled | Resolution::Skip => return,
        };

        if state.ignored.contains(identity) {
            debug!(repository = %identity, "Server ignored for the rest of the pass, skipping");
            return;
        }

        let client = match self.collaborators.clients.create(&access.connection.server_url) {
            Ok(client) => client,
            Err(err) => {
                warn!(
                    repository = %identity,
                    server_url = %access.connection.server_url,
                    error = %err,
                    "Cannot create GitHub client for connection"
                );
                return;
            }
        };

        let attempt = self
            .try_credentials(&item, &access, client.clone(), state)
            .await;

        if !attempt.success && attempt.retry && !attempt.forgotten {
            if item.requeued {
                debug!(
                    repository = %identity,
                    "Registration already retried this pass, leaving it for the next pass"
                );
            } else {
                debug!(repository = %identity, "Requeueing registration to retry with remaining tokens");
                state.report.requeued += 1;
                counter!("webhook_checker_requeues_total").increment(1);
                state.queue.push_back(PendingCheck {
                    requeued: true,
                    ..item
                });
            }
        }
    }

    /// Resolves the token, binding, connection, user and credentials of a
    /// registration, forgetting it when any of them is permanently gone.
    async fn resolve_access(&self, item: &PendingCheck, state: &mut PassState) -> Resolution {
        let identity = &item.identity;
        let hook = &item.registration;

        let Some(token) = extract_security_token(&hook.callback_url) else {
            warn!(
                repository = %identity,
                callback_url = %hook.callback_url,
                hook_url = %hook.url,
                "Callback URL does not contain a security token"
            );
            self.forget(identity, None, state).await;
            return Resolution::Settled;
        };

        let binding = match self.collaborators.bindings.find(&token).await {
            Ok(Some(binding)) => binding,
            Ok(None) => {
                warn!(repository = %identity, hook_url = %hook.url, "Cannot find security binding for hook");
                self.forget(identity, Some(&token), state).await;
                return Resolution::Settled;
            }
            Err(err) => return self.skip_on_store_error(identity, "security binding", err),
        };

        let connection = match self.collaborators.credentials.resolve_connection(&binding).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                warn!(
                    repository = %identity,
                    connection_id = %binding.connection_id,
                    "OAuth connection used to install webhook is unavailable"
                );
                self.forget(identity, Some(&token), state).await;
                return Resolution::Settled;
            }
            Err(err) => return self.skip_on_store_error(identity, "OAuth connection", err),
        };

        let user = match self.collaborators.credentials.find_user(binding.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(
                    repository = %identity,
                    user_id = binding.user_id,
                    "User which created webhook no longer exists"
                );
                self.forget(identity, Some(&token), state).await;
                return Resolution::Settled;
            }
            Err(err) => return self.skip_on_store_error(identity, "user", err),
        };

        let credentials = match self
            .collaborators
            .credentials
            .get_tokens(std::slice::from_ref(&connection), &user)
            .await
        {
            Ok(mut tokens) => tokens.remove(&connection).unwrap_or_default(),
            Err(err) => return self.skip_on_store_error(identity, "OAuth tokens", err),
        };

        if credentials.is_empty() {
            if item.requeued {
                // The earlier attempt in this pass consumed the last token.
                warn!(repository = %identity, "No usable OAuth tokens left to access repository");
                self.report(identity, REASON_NO_TOKENS_LEFT, RecordedStatus::NoInfo, state)
                    .await;
            } else {
                warn!(repository = %identity, "No OAuth tokens found to access repository");
                self.forget(identity, Some(&token), state).await;
            }
            return Resolution::Settled;
        }

        Resolution::Ready(ResolvedAccess {
            token,
            connection,
            user,
            credentials,
        })
    }

    fn skip_on_store_error(
        &self,
        identity: &RepositoryIdentity,
        what: &'static str,
        err: StoreError,
    ) -> Resolution {
        warn!(repository = %identity, lookup = what, error = %err, "Store lookup failed, skipping registration this pass");
        Resolution::Skip
    }

    async fn try_credentials(
        &self,
        item: &PendingCheck,
        access: &ResolvedAccess,
        client: Arc<dyn ProviderClient>,
        state: &mut PassState,
    ) -> AttemptSummary {
        let identity = &item.identity;
        let mut summary = AttemptSummary::default();

        for credential in &access.credentials {
            client.authenticate(&credential.access_token);
            debug!(repository = %identity, login = %credential.oauth_login, "Checking webhook status");

            let stop = match client.list_webhooks(identity).await {
                Ok(live) => {
                    self.observe_live_hooks(item, &live, &client, credential, state)
                        .await;
                    summary.success = true;
                    true
                }
                Err(ProviderError::Access(err)) => {
                    self.handle_access_error(err, item, access, credential, &mut summary, state)
                        .await
                }
                Err(err) => {
                    warn!(repository = %identity, error = %err, "Cannot check hooks status, will try later");
                    state.ignored.ignore(identity, "transport");
                    true
                }
            };

            let exhausted = self.quota.check(client.as_ref(), identity, &mut state.ignored);
            if stop || exhausted {
                break;
            }
        }

        summary
    }

    /// Classifies an authorization failure. Returns true to stop trying
    /// further credentials for the registration.
    async fn handle_access_error(
        &self,
        err: AccessError,
        item: &PendingCheck,
        access: &ResolvedAccess,
        credential: &Credential,
        summary: &mut AttemptSummary,
        state: &mut PassState,
    ) -> bool {
        let identity = &item.identity;
        let credentials = &self.collaborators.credentials;

        match err {
            AccessError::InvalidCredentials(message) => {
                warn!(
                    repository = %identity,
                    login = %credential.oauth_login,
                    scope = %credential.scope,
                    %message,
                    "Removing incorrect (outdated) token"
                );
                if let Err(err) = credentials
                    .remove_token(&credential.connection_id, &credential.access_token)
                    .await
                {
                    warn!(error = %err, "Failed to remove outdated token");
                }
                summary.retry = true;
                false
            }
            AccessError::ScopeMismatch(message) => {
                warn!(
                    repository = %identity,
                    login = %credential.oauth_login,
                    scope = %credential.scope,
                    %message,
                    "Token scope is not enough to check hook status"
                );
                if let Err(err) = credentials.mark_incorrect(credential).await {
                    warn!(error = %err, "Failed to mark token incorrect");
                }
                summary.retry = true;
                false
            }
            AccessError::UserNoAccess(message) => {
                warn!(
                    repository = %identity,
                    user = %access.user.username,
                    login = %credential.oauth_login,
                    %message,
                    "User has no access to repository, cannot check hook status"
                );
                let logins: BTreeSet<String> = access
                    .credentials
                    .iter()
                    .map(|c| c.oauth_login.to_lowercase())
                    .collect();
                if logins.len() == 1 {
                    self.forget(identity, Some(&access.token), state).await;
                    summary.forgotten = true;
                    return true;
                }
                debug!(
                    repository = %identity,
                    logins = logins.len(),
                    "Tokens belong to several GitHub logins, keeping registration"
                );
                false
            }
            AccessError::NoAccess(message) => {
                warn!(
                    repository = %identity,
                    %message,
                    "No access to repository for unknown reason, cannot check hook status"
                );
                false
            }
            AccessError::InternalError(message) => {
                info!(
                    repository = %identity,
                    %message,
                    "Cannot check hooks status: error on GitHub side, will try later"
                );
                state.ignored.ignore(identity, "internal_error");
                true
            }
        }
    }

    async fn observe_live_hooks(
        &self,
        item: &PendingCheck,
        live: &[LiveHook],
        client: &Arc<dyn ProviderClient>,
        credential: &Credential,
        state: &mut PassState,
    ) {
        let identity = &item.identity;
        let ours: Vec<&LiveHook> = live
            .iter()
            .filter(|hook| {
                hook.id == item.registration.remote_id
                    || hook.callback_url.as_deref() == Some(item.registration.callback_url.as_str())
            })
            .collect();

        if ours.is_empty() {
            debug!(repository = %identity, "No matching webhooks on server");
            self.report(identity, REASON_MISSING, RecordedStatus::Missing, state)
                .await;
            return;
        }

        for hook in ours {
            let Some(code) = hook.delivery_code() else {
                debug!(repository = %identity, hook_id = hook.id, "No last response info, queueing ping");
                state.pings.push(PendingPing {
                    identity: identity.clone(),
                    client: client.clone(),
                    access_token: credential.access_token.clone(),
                    hook_id: hook.id,
                });
                continue;
            };

            match code {
                200..=299 if !hook.active => {
                    self.report(identity, REASON_DISABLED, RecordedStatus::Disabled, state)
                        .await;
                }
                200..=299 => {
                    self.record_ok(identity, state).await;
                }
                400..=599 => {
                    let reason = format!(
                        "Last payload delivery failed: ({}) {}",
                        code,
                        hook.delivery_message()
                    );
                    debug!(repository = %identity, %reason);
                    self.report(identity, &reason, RecordedStatus::PayloadDeliveryFailed, state)
                        .await;
                }
                _ => {
                    let reason = format!(
                        "Unexpected payload delivery response: ({}) {}",
                        code,
                        hook.delivery_message()
                    );
                    debug!(repository = %identity, %reason);
                    self.report(identity, &reason, RecordedStatus::Incorrect, state)
                        .await;
                }
            }
        }
    }

    async fn send_pings(&self, state: &mut PassState) {
        let pings = std::mem::take(&mut state.pings);
        for ping in pings {
            if state.ignored.contains(&ping.identity) {
                continue;
            }

            ping.client.authenticate(&ping.access_token);
            match ping.client.send_test_ping(&ping.identity, ping.hook_id).await {
                Ok(()) => {
                    state.report.pings_sent += 1;
                    counter!("webhook_checker_pings_sent_total").increment(1);
                }
                Err(err) => {
                    debug!(repository = %ping.identity, error = %err, "Test ping failed, ignoring");
                }
            }

            self.quota
                .check(ping.client.as_ref(), &ping.identity, &mut state.ignored);
        }
    }

    async fn record_ok(&self, identity: &RepositoryIdentity, state: &mut PassState) {
        self.outcomes.invalidate(identity);
        self.store_status(identity, RecordedStatus::Ok, state).await;
    }

    /// Remembers a non-OK outcome and persists its status.
    async fn report(
        &self,
        identity: &RepositoryIdentity,
        reason: &str,
        status: RecordedStatus,
        state: &mut PassState,
    ) {
        self.outcomes.put(identity.clone(), reason, status);
        self.store_status(identity, status, state).await;
    }

    async fn store_status(
        &self,
        identity: &RepositoryIdentity,
        status: RecordedStatus,
        state: &mut PassState,
    ) {
        let result = self
            .collaborators
            .registrations
            .update(
                identity,
                Box::new(move |hook: &mut WebhookRegistration| hook.record_status(status)),
            )
            .await;

        match result {
            Ok(()) => {
                state.report.status_updates += 1;
                counter!("webhook_checker_status_updates_total", "status" => status.as_str())
                    .increment(1);
            }
            Err(err) => {
                error!(repository = %identity, %status, error = %err, "Failed to store webhook status");
            }
        }
    }

    /// Deletes the binding, then the registration. A failure never leaves a
    /// binding behind without its registration.
    async fn forget(
        &self,
        identity: &RepositoryIdentity,
        token: Option<&str>,
        state: &mut PassState,
    ) {
        info!(repository = %identity, "Forgetting webhook registration");

        if let Some(token) = token
            && let Err(err) = self.collaborators.bindings.delete(token).await
        {
            error!(
                repository = %identity,
                error = %err,
                "Failed to delete security binding, keeping registration until the next pass"
            );
            return;
        }
        if let Err(err) = self.collaborators.registrations.delete(identity).await {
            warn!(
                repository = %identity,
                error = %err,
                "Failed to delete webhook registration after its binding"
            );
            return;
        }

        self.outcomes.invalidate(identity);
        state.forgotten.insert(identity.clone());
        state.report.forgotten += 1;
        counter!("webhook_checker_registrations_forgotten_total").increment(1);
    }
}
