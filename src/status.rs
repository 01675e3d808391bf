//! Webhook status model
//!
//! Two distinct enumerations live here: [`RecordedStatus`] is written by the
//! checker after each reconciliation attempt, while [`DerivedHealthStatus`] is
//! computed on demand from persisted fields and never stored.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::RepositoryIdentity;
use crate::stores::WebhookRegistration;

/// Last reconciliation outcome persisted for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordedStatus {
    Ok,
    Disabled,
    Missing,
    PayloadDeliveryFailed,
    Incorrect,
    NoInfo,
}

impl RecordedStatus {
    pub const ALL: [RecordedStatus; 6] = [
        RecordedStatus::Ok,
        RecordedStatus::Disabled,
        RecordedStatus::Missing,
        RecordedStatus::PayloadDeliveryFailed,
        RecordedStatus::Incorrect,
        RecordedStatus::NoInfo,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordedStatus::Ok => "ok",
            RecordedStatus::Disabled => "disabled",
            RecordedStatus::Missing => "missing",
            RecordedStatus::PayloadDeliveryFailed => "payload_delivery_failed",
            RecordedStatus::Incorrect => "incorrect",
            RecordedStatus::NoInfo => "no_info",
        }
    }

    /// Only `Ok` counts as a correctly installed webhook.
    pub fn is_correct(&self) -> bool {
        matches!(self, RecordedStatus::Ok)
    }
}

impl fmt::Display for RecordedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown webhook status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for RecordedStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RecordedStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Presentation-time classification of a repository's webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivedHealthStatus {
    NotFound,
    Incorrect,
    WaitingForServerResponse,
    Ok,
    /// Reserved for identities the checker could not reconcile at all.
    NoInfo,
}

/// Derives the health status of an optional registration.
pub fn derive_health_status(registration: Option<&WebhookRegistration>) -> DerivedHealthStatus {
    match registration {
        None => derive_from_fields(false, false, None),
        Some(hook) => derive_from_fields(true, hook.correct, hook.last_delivery_at),
    }
}

/// Pure mapping from persisted fields to the derived status.
pub fn derive_from_fields(
    present: bool,
    correct: bool,
    last_delivery_at: Option<DateTime<Utc>>,
) -> DerivedHealthStatus {
    if !present {
        return DerivedHealthStatus::NotFound;
    }
    if !correct {
        return DerivedHealthStatus::Incorrect;
    }
    match last_delivery_at {
        None => DerivedHealthStatus::WaitingForServerResponse,
        Some(_) => DerivedHealthStatus::Ok,
    }
}

/// Result of one reconciliation attempt, kept briefly for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconciliationOutcome {
    pub reason: String,
    pub status: RecordedStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CachedOutcome {
    outcome: ReconciliationOutcome,
    expires_at: DateTime<Utc>,
}

/// Bounded, expiring map from repository identity to its latest outcome.
///
/// Entries are never swept; an expired entry is dropped the next time it is
/// read.
pub struct OutcomeCache {
    entries: Mutex<LruCache<RepositoryIdentity, CachedOutcome>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl OutcomeCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    pub fn with_system_clock(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self::new(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn put(&self, identity: RepositoryIdentity, reason: impl Into<String>, status: RecordedStatus) {
        let now = self.clock.now();
        let entry = CachedOutcome {
            outcome: ReconciliationOutcome {
                reason: reason.into(),
                status,
                recorded_at: now,
            },
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.lock().put(identity, entry);
    }

    pub fn get(&self, identity: &RepositoryIdentity) -> Option<ReconciliationOutcome> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired = match entries.get(identity) {
            None => return None,
            Some(entry) if entry.expires_at > now => return Some(entry.outcome.clone()),
            Some(_) => true,
        };
        if expired {
            entries.pop(identity);
        }
        None
    }

    pub fn invalidate(&self, identity: &RepositoryIdentity) {
        self.lock().pop(identity);
    }

    /// Identities with a live entry, pruning expired ones along the way.
    pub fn keys(&self) -> Vec<RepositoryIdentity> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired: Vec<RepositoryIdentity> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &expired {
            entries.pop(identity);
        }
        entries.iter().map(|(identity, _)| identity.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<RepositoryIdentity, CachedOutcome>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn cache_with_clock(capacity: usize) -> (OutcomeCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let cache = OutcomeCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(7200),
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn derivation_covers_every_input_combination() {
        let delivered = Some(Utc::now());
        for present in [false, true] {
            for correct in [false, true] {
                for last_delivery in [None, delivered] {
                    let expected = match (present, correct, last_delivery.is_some()) {
                        (false, _, _) => DerivedHealthStatus::NotFound,
                        (true, false, _) => DerivedHealthStatus::Incorrect,
                        (true, true, false) => DerivedHealthStatus::WaitingForServerResponse,
                        (true, true, true) => DerivedHealthStatus::Ok,
                    };
                    assert_eq!(
                        derive_from_fields(present, correct, last_delivery),
                        expected,
                        "present={present} correct={correct} delivered={}",
                        last_delivery.is_some()
                    );
                }
            }
        }
        assert_eq!(derive_health_status(None), DerivedHealthStatus::NotFound);
    }

    #[test]
    fn only_ok_is_correct() {
        for status in RecordedStatus::ALL {
            assert_eq!(status.is_correct(), status == RecordedStatus::Ok);
        }
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in RecordedStatus::ALL {
            assert_eq!(status.as_str().parse::<RecordedStatus>().unwrap(), status);
        }
        assert!("broken".parse::<RecordedStatus>().is_err());
    }

    #[test]
    fn cache_entries_expire_lazily() {
        let (cache, clock) = cache_with_clock(8);
        let identity = RepositoryIdentity::new("github.com", "acme", "widgets");

        cache.put(identity.clone(), "Webhook is disabled on server", RecordedStatus::Disabled);
        clock.advance(chrono::Duration::minutes(119));
        let outcome = cache.get(&identity).expect("entry still fresh");
        assert_eq!(outcome.status, RecordedStatus::Disabled);

        clock.advance(chrono::Duration::minutes(2));
        assert!(cache.get(&identity).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_lookup_ignores_identity_case() {
        let (cache, _) = cache_with_clock(8);
        cache.put(
            RepositoryIdentity::new("github.com", "Acme", "Widgets"),
            "gone",
            RecordedStatus::Missing,
        );

        let lower = RepositoryIdentity::new("github.com", "acme", "widgets");
        assert!(cache.get(&lower).is_some());
        cache.invalidate(&lower);
        assert!(cache.get(&lower).is_none());
    }

    #[test]
    fn cache_is_bounded_by_capacity() {
        let (cache, _) = cache_with_clock(2);
        for name in ["a", "b", "c"] {
            cache.put(
                RepositoryIdentity::new("github.com", "acme", name),
                "missing",
                RecordedStatus::Missing,
            );
        }

        let mut keys: Vec<String> = cache.keys().into_iter().map(|id| id.name).collect();
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
    }
}
