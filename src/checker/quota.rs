//! Per-server request budget guard
//!
//! Holds no state across passes: each pass starts with an empty
//! [`IgnoredServers`] set and rediscovers quota pressure from fresh responses.

use std::collections::BTreeSet;

use metrics::counter;
use tracing::{debug, info};

use crate::connectors::{ProviderClient, RateLimit};
use crate::identity::RepositoryIdentity;

/// Decides when a server's remaining request budget is too low to keep using.
#[derive(Debug, Clone, Copy)]
pub struct QuotaGuard {
    low_water_mark: i64,
}

impl QuotaGuard {
    pub fn new(low_water_mark: u32) -> Self {
        Self {
            low_water_mark: i64::from(low_water_mark),
        }
    }

    /// True when the observed budget lies within `0..=low_water_mark`.
    pub fn is_exhausted(&self, rate_limit: Option<RateLimit>) -> bool {
        rate_limit.is_some_and(|rate| (0..=self.low_water_mark).contains(&rate.remaining))
    }

    /// Ignores the repository's server when the client reports a low budget.
    ///
    /// Returns true when the server is (now) ignored.
    pub fn check(
        &self,
        client: &dyn ProviderClient,
        repository: &RepositoryIdentity,
        ignored: &mut IgnoredServers,
    ) -> bool {
        let rate_limit = client.remaining_request_budget();
        if self.is_exhausted(rate_limit) {
            if let Some(rate) = rate_limit {
                debug!(
                    server = %repository.server,
                    remaining = rate.remaining,
                    limit = ?rate.limit,
                    "Reaching request quota limit, will check server webhooks later"
                );
            }
            ignored.ignore(repository, "quota");
        }
        ignored.contains(repository)
    }
}

/// Servers excluded from further calls for the rest of a pass.
#[derive(Debug, Default, Clone)]
pub struct IgnoredServers {
    servers: BTreeSet<String>,
}

impl IgnoredServers {
    pub fn contains(&self, repository: &RepositoryIdentity) -> bool {
        self.servers.contains(&repository.server_key())
    }

    pub fn ignore(&mut self, repository: &RepositoryIdentity, cause: &'static str) {
        if self.servers.insert(repository.server_key()) {
            info!(server = %repository.server, cause, "Ignoring server for the rest of the pass");
            counter!("webhook_checker_servers_ignored_total", "cause" => cause).increment(1);
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.servers.into_iter().collect()
    }
}
