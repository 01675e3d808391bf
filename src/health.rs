//! Webhook health report
//!
//! Turns recorded registrations and recent reconciliation outcomes into one
//! health item per repository, attributed to every VCS root, build
//! configuration, template and project that uses the repository.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::identity::RepositoryIdentity;
use crate::status::{DerivedHealthStatus, OutcomeCache, RecordedStatus, derive_health_status};
use crate::stores::{
    ConsumerKind, HealthScope, RegistrationStore, ScopeProvider, StoreError, VcsRootInstance,
    WebhookRegistration,
};

pub const REPORT_TYPE: &str = "GitHub.WebHookIncorrect";
pub const CATEGORY_ID: &str = "GH.WebHook.Incorrect";
pub const CATEGORY_DESCRIPTION: &str = "GitHub repo webhook is misconfigured or outdated";
pub const UNKNOWN_REASON: &str = "Unknown reason";

/// Severity of reported items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

pub const CATEGORY_SEVERITY: Severity = Severity::Info;

/// Unhealthy webhook of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HealthItem {
    /// `GH.WH.I.{server}#{remoteId}`
    #[schema(example = "GH.WH.I.github.com#42")]
    pub id: String,
    pub category: String,
    pub severity: Severity,
    pub repository: RepositoryIdentity,
    pub registration: Option<WebhookRegistration>,
    pub reason: String,
    pub status: DerivedHealthStatus,
    pub recorded_status: Option<RecordedStatus>,
    pub affected_roots: Vec<String>,
    pub affected_build_configurations: Vec<String>,
    pub affected_templates: Vec<String>,
    pub affected_projects: Vec<String>,
}

/// Groups roots by the repository their fetch URL points at.
///
/// Roots whose URL does not name a repository are dropped.
pub fn group_roots_by_repository(
    roots: Vec<VcsRootInstance>,
) -> BTreeMap<RepositoryIdentity, Vec<VcsRootInstance>> {
    let mut grouped: BTreeMap<RepositoryIdentity, Vec<VcsRootInstance>> = BTreeMap::new();
    for root in roots {
        match RepositoryIdentity::from_fetch_url(&root.fetch_url) {
            Some(identity) => grouped.entry(identity).or_default().push(root),
            None => debug!(root = %root.id, fetch_url = %root.fetch_url, "Not a GitHub repository URL"),
        }
    }
    grouped
}

pub struct HealthAggregator {
    registrations: Arc<dyn RegistrationStore>,
    scope: Arc<dyn ScopeProvider>,
    outcomes: Arc<OutcomeCache>,
}

impl HealthAggregator {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        scope: Arc<dyn ScopeProvider>,
        outcomes: Arc<OutcomeCache>,
    ) -> Self {
        Self {
            registrations,
            scope,
            outcomes,
        }
    }

    /// Cheap check whether anything could be reported for `scope`.
    pub async fn can_report_items_for(&self, scope: &HealthScope) -> Result<bool, StoreError> {
        if !self.has_known_problems().await? {
            return Ok(false);
        }
        Ok(!self.scope.vcs_roots(scope).await?.is_empty())
    }

    async fn has_known_problems(&self) -> Result<bool, StoreError> {
        if !self.outcomes.is_empty() {
            return Ok(true);
        }
        self.registrations.has_incorrect().await
    }

    /// Health items for the repositories in `scope` known to be unhealthy.
    pub async fn report(&self, scope: &HealthScope) -> Result<Vec<HealthItem>, StoreError> {
        if !self.has_known_problems().await? {
            return Ok(Vec::new());
        }

        let roots = self.scope.vcs_roots(scope).await?;
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let incorrect = self.registrations.get_incorrect().await?;
        let incorrect_ids: HashSet<&RepositoryIdentity> =
            incorrect.iter().map(|(identity, _)| identity).collect();
        let cached: HashSet<RepositoryIdentity> = self.outcomes.keys().into_iter().collect();

        let mut items = Vec::new();
        for (identity, roots) in group_roots_by_repository(roots) {
            if !cached.contains(&identity) && !incorrect_ids.contains(&identity) {
                continue;
            }

            let registration = match incorrect
                .iter()
                .find(|(known, _)| known == &identity)
                .map(|(_, hook)| hook.clone())
            {
                Some(hook) => Some(hook),
                None => self
                    .registrations
                    .get_hooks(&identity)
                    .await?
                    .into_iter()
                    .next(),
            };

            let reason = match self.outcomes.get(&identity) {
                Some(outcome) => outcome.reason,
                None => {
                    if !incorrect_ids.contains(&identity) {
                        warn!(repository = %identity, "Cached outcome expired while reporting");
                    }
                    UNKNOWN_REASON.to_string()
                }
            };

            items.push(build_item(identity, registration, reason, &roots));
        }

        Ok(items)
    }
}

fn build_item(
    identity: RepositoryIdentity,
    registration: Option<WebhookRegistration>,
    reason: String,
    roots: &[VcsRootInstance],
) -> HealthItem {
    let mut affected_roots = BTreeSet::new();
    let mut build_configurations = BTreeSet::new();
    let mut templates = BTreeSet::new();
    let mut projects = BTreeSet::new();

    for root in roots {
        affected_roots.insert(root.id.clone());
        projects.insert(root.project_id.clone());
        for consumer in &root.consumers {
            match consumer.kind {
                ConsumerKind::BuildType => build_configurations.insert(consumer.id.clone()),
                ConsumerKind::Template => templates.insert(consumer.id.clone()),
                ConsumerKind::Settings => projects.insert(consumer.project_id.clone()),
            };
        }
    }

    let remote_id = registration
        .as_ref()
        .map(|hook| hook.remote_id.to_string())
        .unwrap_or_default();

    HealthItem {
        id: format!("GH.WH.I.{}#{}", identity.server, remote_id),
        category: CATEGORY_ID.to_string(),
        severity: CATEGORY_SEVERITY,
        status: derive_health_status(registration.as_ref()),
        recorded_status: registration.as_ref().map(|hook| hook.status),
        repository: identity,
        registration,
        reason,
        affected_roots: affected_roots.into_iter().collect(),
        affected_build_configurations: build_configurations.into_iter().collect(),
        affected_templates: templates.into_iter().collect(),
        affected_projects: projects.into_iter().collect(),
    }
}
