//! Scope repository
//!
//! Enumerates git VCS roots used within a project scope, each with the build
//! configurations, templates and settings projects that consume it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::debug;

use crate::models::project::{self, Entity as ProjectEntity};
use crate::models::vcs_root::{self, Entity as VcsRootEntity};
use crate::models::vcs_root_usage::{self, Entity as VcsRootUsageEntity};
use crate::stores::{
    ConsumerKind, HealthScope, RootConsumer, ScopeProvider, StoreError, VcsRootInstance,
};

/// VCS plugin name of git roots.
pub const GIT_VCS_NAME: &str = "jetbrains.git";

#[derive(Debug, Clone)]
pub struct ScopeRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ScopeRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Ids of the non-archived projects covered by `scope`.
    async fn projects_in_scope(&self, scope: &HealthScope) -> Result<HashSet<String>, StoreError> {
        let projects = ProjectEntity::find()
            .filter(project::Column::Archived.eq(false))
            .all(self.db.as_ref())
            .await?;

        let (root_id, recursive) = match scope {
            HealthScope::Global => {
                return Ok(projects.into_iter().map(|project| project.id).collect());
            }
            HealthScope::Project {
                project_id,
                recursive,
            } => (project_id, *recursive),
        };

        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for project in &projects {
            if let Some(parent) = project.parent_id.as_deref() {
                children.entry(parent).or_default().push(project.id.as_str());
            }
        }

        let mut in_scope = HashSet::new();
        if !projects.iter().any(|project| &project.id == root_id) {
            return Ok(in_scope);
        }

        let mut pending = vec![root_id.as_str()];
        while let Some(project_id) = pending.pop() {
            if !in_scope.insert(project_id.to_string()) {
                continue;
            }
            if recursive {
                if let Some(kids) = children.get(project_id) {
                    pending.extend(kids.iter().copied());
                }
            }
        }

        Ok(in_scope)
    }
}

#[async_trait]
impl ScopeProvider for ScopeRepository {
    async fn vcs_roots(&self, scope: &HealthScope) -> Result<Vec<VcsRootInstance>, StoreError> {
        let projects = self.projects_in_scope(scope).await?;
        if projects.is_empty() {
            return Ok(Vec::new());
        }

        let roots: Vec<vcs_root::Model> = VcsRootEntity::find()
            .filter(vcs_root::Column::VcsName.eq(GIT_VCS_NAME))
            .filter(vcs_root::Column::FetchUrl.is_not_null())
            .order_by_asc(vcs_root::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .filter(|root| {
                root.fetch_url
                    .as_deref()
                    .is_some_and(|url| !url.trim().is_empty())
            })
            .collect();

        let root_ids: Vec<String> = roots.iter().map(|root| root.id.clone()).collect();
        let usages = VcsRootUsageEntity::find()
            .filter(vcs_root_usage::Column::VcsRootId.is_in(root_ids))
            .order_by_asc(vcs_root_usage::Column::ConsumerId)
            .all(self.db.as_ref())
            .await?;

        let mut consumers: HashMap<String, Vec<RootConsumer>> = HashMap::new();
        for usage in usages {
            let Some(kind) = ConsumerKind::parse(&usage.consumer_kind) else {
                return Err(StoreError::Corrupt {
                    table: "vcs_root_usages",
                    details: format!("unknown consumer kind '{}'", usage.consumer_kind),
                });
            };
            consumers.entry(usage.vcs_root_id).or_default().push(RootConsumer {
                kind,
                id: usage.consumer_id,
                project_id: usage.consumer_project_id,
            });
        }

        let instances: Vec<VcsRootInstance> = roots
            .into_iter()
            .filter_map(|root| {
                let root_consumers = consumers.remove(&root.id).unwrap_or_default();
                let used_in_scope = root_consumers.iter().any(|consumer| {
                    consumer.kind != ConsumerKind::Settings
                        && projects.contains(&consumer.project_id)
                });
                if !used_in_scope {
                    return None;
                }
                Some(VcsRootInstance {
                    fetch_url: root.fetch_url.unwrap_or_default(),
                    id: root.id,
                    project_id: root.project_id,
                    name: root.name,
                    consumers: root_consumers,
                })
            })
            .collect();

        debug!(roots = instances.len(), ?scope, "Resolved git VCS roots in scope");
        Ok(instances)
    }
}
