//! Repository identity
//!
//! A `server/owner/name` triple naming a GitHub repository independently of
//! any VCS root configuration. Equality, hashing and ordering are
//! case-insensitive on the composed form.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// Identity of a remote repository on a GitHub server.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RepositoryIdentity {
    /// Host of the GitHub server (e.g. `github.com`)
    #[schema(example = "github.com")]
    pub server: String,
    /// Repository owner (user or organization)
    #[schema(example = "acme")]
    pub owner: String,
    /// Repository name without the `.git` suffix
    #[schema(example = "widgets")]
    pub name: String,
}

impl RepositoryIdentity {
    pub fn new(
        server: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Composed `server/owner/name` form, preserving case.
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.server, self.owner, self.name)
    }

    /// Lower-cased composed form; the storage and comparison key.
    pub fn key(&self) -> String {
        self.id().to_lowercase()
    }

    /// Lower-cased server host, used to group quota and outage decisions.
    pub fn server_key(&self) -> String {
        self.server.to_lowercase()
    }

    /// Parses a git fetch URL into a repository identity.
    ///
    /// Accepts `http(s)://`, `ssh://` and `git://` URLs as well as the
    /// scp-like `user@host:owner/name.git` form. Anything that does not name
    /// exactly one `owner/name` pair yields `None`.
    pub fn from_fetch_url(fetch_url: &str) -> Option<Self> {
        let fetch_url = fetch_url.trim();
        if fetch_url.is_empty() {
            return None;
        }

        if fetch_url.contains("://") {
            return Self::from_url(fetch_url);
        }

        let captures = scp_like_pattern().captures(fetch_url)?;
        Self::from_parts(&captures[1], &captures[2])
    }

    fn from_url(fetch_url: &str) -> Option<Self> {
        let url = Url::parse(fetch_url).ok()?;
        let host = url.host_str()?;

        let server = match url.scheme() {
            "http" | "https" => match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            },
            "ssh" | "git" => host.to_string(),
            _ => return None,
        };

        Self::from_parts(&server, url.path())
    }

    fn from_parts(server: &str, path: &str) -> Option<Self> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let [owner, name] = segments.as_slice() else {
            return None;
        };

        let name = name.strip_suffix(".git").unwrap_or(name);
        if owner.is_empty() || name.is_empty() || server.is_empty() {
            return None;
        }

        Some(Self::new(server, *owner, name))
    }
}

fn scp_like_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[^@/\s]+@)?([^:/\s]+):/?([^\s]+)$").expect("valid scp-like git URL regex")
    })
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl PartialEq for RepositoryIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RepositoryIdentity {}

impl Hash for RepositoryIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for RepositoryIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepositoryIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_ignores_case() {
        let lower = RepositoryIdentity::new("github.com", "acme", "widgets");
        let mixed = RepositoryIdentity::new("GitHub.com", "Acme", "Widgets");

        assert_eq!(lower, mixed);
        assert_eq!(lower.cmp(&mixed), Ordering::Equal);

        let set: HashSet<_> = [lower, mixed].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_keeps_original_case() {
        let identity = RepositoryIdentity::new("github.com", "Acme", "Widgets");
        assert_eq!(identity.to_string(), "github.com/Acme/Widgets");
        assert_eq!(identity.key(), "github.com/acme/widgets");
    }

    #[test]
    fn parses_https_fetch_urls() {
        let identity = RepositoryIdentity::from_fetch_url("https://github.com/acme/widgets.git")
            .expect("https URL parses");
        assert_eq!(identity.server, "github.com");
        assert_eq!(identity.owner, "acme");
        assert_eq!(identity.name, "widgets");

        let without_suffix =
            RepositoryIdentity::from_fetch_url("https://github.com/acme/widgets/").unwrap();
        assert_eq!(without_suffix, identity);
    }

    #[test]
    fn keeps_explicit_port_for_http_servers() {
        let identity =
            RepositoryIdentity::from_fetch_url("https://ghe.example.com:8443/team/service.git")
                .unwrap();
        assert_eq!(identity.server, "ghe.example.com:8443");
    }

    #[test]
    fn parses_ssh_and_scp_like_urls() {
        let ssh = RepositoryIdentity::from_fetch_url("ssh://git@github.com:22/acme/widgets.git")
            .expect("ssh URL parses");
        assert_eq!(ssh.server, "github.com");
        assert_eq!(ssh.name, "widgets");

        let scp = RepositoryIdentity::from_fetch_url("git@github.com:acme/widgets.git")
            .expect("scp-like URL parses");
        assert_eq!(scp, ssh);
    }

    #[test]
    fn rejects_urls_without_owner_and_name() {
        assert!(RepositoryIdentity::from_fetch_url("").is_none());
        assert!(RepositoryIdentity::from_fetch_url("https://github.com/acme").is_none());
        assert!(RepositoryIdentity::from_fetch_url("https://github.com/a/b/c").is_none());
        assert!(RepositoryIdentity::from_fetch_url("file:///srv/git/acme/widgets").is_none());
        assert!(RepositoryIdentity::from_fetch_url("/srv/git/widgets").is_none());
    }
}
