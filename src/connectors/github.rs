//! GitHub provider client
//!
//! REST client for the repository hooks API of github.com and GitHub
//! Enterprise servers. Every response updates the observed rate limit so the
//! checker can back off before the budget runs out.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::connectors::trait_::{
    AccessError, ClientFactory, LastResponse, LiveHook, ProviderClient, ProviderError, RateLimit,
};
use crate::identity::RepositoryIdentity;

const PUBLIC_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("hookwatch/", env!("CARGO_PKG_VERSION"));

/// Any one of these scopes allows reading repository hooks.
const HOOK_SCOPES: [&str; 4] = ["admin:repo_hook", "read:repo_hook", "write:repo_hook", "repo"];

/// Builds clients for the API base matching a connection's server URL.
#[derive(Clone)]
pub struct GitHubClientFactory {
    http: reqwest::Client,
    api_base_override: Option<String>,
}

impl GitHubClientFactory {
    pub fn new(api_base_override: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_override,
        }
    }

    /// API base for a server URL such as `https://github.com` or a bare host.
    pub fn api_base_for(&self, server_url: &str) -> Result<String, ProviderError> {
        if let Some(base) = &self.api_base_override {
            return Ok(base.trim_end_matches('/').to_string());
        }

        let normalized = if server_url.contains("://") {
            server_url.to_string()
        } else {
            format!("https://{}", server_url)
        };
        let invalid = |reason: String| ProviderError::InvalidServerUrl {
            url: server_url.to_string(),
            reason,
        };
        let url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("no host".to_string()))?;

        if host.eq_ignore_ascii_case("github.com") || host.eq_ignore_ascii_case("api.github.com") {
            return Ok(PUBLIC_API_BASE.to_string());
        }

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(format!("{}://{}/api/v3", url.scheme(), authority))
    }
}

impl ClientFactory for GitHubClientFactory {
    fn create(&self, server_url: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let api_base = self.api_base_for(server_url)?;
        Ok(Arc::new(GitHubClient::new(self.http.clone(), api_base)))
    }
}

#[derive(Default)]
struct ClientState {
    access_token: Option<String>,
    rate_limit: Option<RateLimit>,
}

/// Client bound to one API base; holds the current token and last rate limit.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    state: Mutex<ClientState>,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            state: Mutex::new(ClientState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hooks_url(&self, repository: &RepositoryIdentity) -> String {
        format!(
            "{}/repos/{}/{}/hooks",
            self.api_base, repository.owner, repository.name
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProviderError> {
        let token = self.state().access_token.clone();
        let mut request = request
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT_HEADER);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        self.record_rate_limit(&response);
        Ok(response)
    }

    fn record_rate_limit(&self, response: &Response) {
        let remaining = header_i64(response, "X-RateLimit-Remaining");
        let limit = header_i64(response, "X-RateLimit-Limit");
        if let Some(remaining) = remaining {
            self.state().rate_limit = Some(RateLimit { remaining, limit });
        }
    }

    async fn check_status(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = header_i64(&response, "X-RateLimit-Remaining") == Some(0);
        let scopes = response
            .headers()
            .get("X-OAuth-Scopes")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body, status);

        Err(classify_failure(status, rate_limited, scopes.as_deref(), message).into())
    }
}

fn header_i64(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn error_message(body: &str, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| status.to_string())
}

/// Maps a failed response onto the access error taxonomy.
pub fn classify_failure(
    status: StatusCode,
    rate_limited: bool,
    granted_scopes: Option<&str>,
    message: String,
) -> AccessError {
    match status.as_u16() {
        401 => AccessError::InvalidCredentials(message),
        403 | 429 if rate_limited => {
            AccessError::InternalError(format!("rate limit exhausted: {}", message))
        }
        429 => AccessError::InternalError(message),
        403 => match granted_scopes {
            Some(scopes) if !has_hook_scope(scopes) => AccessError::ScopeMismatch(format!(
                "token scopes '{}' do not allow reading hooks",
                scopes
            )),
            _ => AccessError::NoAccess(message),
        },
        // GitHub answers 404 for private repositories the user cannot see.
        404 => AccessError::UserNoAccess(message),
        500..=599 => AccessError::InternalError(message),
        _ => AccessError::NoAccess(message),
    }
}

fn has_hook_scope(scopes: &str) -> bool {
    scopes
        .split(',')
        .map(str::trim)
        .any(|scope| HOOK_SCOPES.contains(&scope))
}

#[derive(Debug, Deserialize)]
struct GitHubHook {
    id: i64,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    config: GitHubHookConfig,
    last_response: Option<LastResponse>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct GitHubHookConfig {
    url: Option<String>,
}

impl From<GitHubHook> for LiveHook {
    fn from(hook: GitHubHook) -> Self {
        LiveHook {
            id: hook.id,
            active: hook.active,
            callback_url: hook.config.url,
            last_response: hook.last_response,
        }
    }
}

#[async_trait]
impl ProviderClient for GitHubClient {
    fn authenticate(&self, access_token: &str) {
        self.state().access_token = Some(access_token.to_string());
    }

    async fn list_webhooks(
        &self,
        repository: &RepositoryIdentity,
    ) -> Result<Vec<LiveHook>, ProviderError> {
        let url = self.hooks_url(repository);
        debug!(repository = %repository, "Listing GitHub webhooks");

        let response = self.send(self.http.get(&url).query(&[("per_page", "100")])).await?;
        let response = Self::check_status(response).await?;
        let hooks: Vec<GitHubHook> = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(hooks.into_iter().map(LiveHook::from).collect())
    }

    async fn send_test_ping(
        &self,
        repository: &RepositoryIdentity,
        hook_id: i64,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/{}/pings", self.hooks_url(repository), hook_id);
        let response = self.send(self.http.post(&url)).await?;
        Self::check_status(response).await.map(|_| ()).inspect_err(|e| {
            warn!(repository = %repository, hook_id, error = %e, "GitHub webhook ping failed");
        })
    }

    fn remaining_request_budget(&self) -> Option<RateLimit> {
        self.state().rate_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo() -> RepositoryIdentity {
        RepositoryIdentity::new("github.com", "acme", "widgets")
    }

    #[test]
    fn api_base_follows_server_host() {
        let factory = GitHubClientFactory::new(None);
        assert_eq!(
            factory.api_base_for("https://github.com").unwrap(),
            "https://api.github.com"
        );
        assert_eq!(factory.api_base_for("github.com").unwrap(), "https://api.github.com");
        assert_eq!(
            factory.api_base_for("https://ghe.example.com:8443/").unwrap(),
            "https://ghe.example.com:8443/api/v3"
        );

        let overridden = GitHubClientFactory::new(Some("http://127.0.0.1:9000/".to_string()));
        assert_eq!(
            overridden.api_base_for("https://github.com").unwrap(),
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn unusable_server_url_is_rejected_before_any_request() {
        let factory = GitHubClientFactory::new(None);

        for server_url in ["https://", "file:///srv/git"] {
            let err = factory.create(server_url).err().unwrap();
            assert!(
                matches!(&err, ProviderError::InvalidServerUrl { url, .. } if url == server_url),
                "unexpected error for {}: {}",
                server_url,
                err
            );
        }
    }

    #[test]
    fn forbidden_responses_are_split_by_cause() {
        let forbidden = StatusCode::FORBIDDEN;
        assert!(matches!(
            classify_failure(forbidden, true, Some("repo"), "x".into()),
            AccessError::InternalError(_)
        ));
        assert!(matches!(
            classify_failure(forbidden, false, Some("read:org, gist"), "x".into()),
            AccessError::ScopeMismatch(_)
        ));
        assert!(matches!(
            classify_failure(forbidden, false, Some("read:org, admin:repo_hook"), "x".into()),
            AccessError::NoAccess(_)
        ));
        assert!(matches!(
            classify_failure(forbidden, false, None, "x".into()),
            AccessError::NoAccess(_)
        ));
    }

    #[test]
    fn other_statuses_map_to_access_errors() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, false, None, "bad".into()),
            AccessError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, false, None, "nf".into()),
            AccessError::UserNoAccess(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, false, None, "bg".into()),
            AccessError::InternalError(_)
        ));
    }

    #[tokio::test]
    async fn lists_hooks_and_records_rate_limit() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/hooks"))
            .and(header("authorization", "Bearer gho_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-RateLimit-Remaining", "4999")
                    .insert_header("X-RateLimit-Limit", "5000")
                    .set_body_json(serde_json::json!([
                        {
                            "id": 42,
                            "active": true,
                            "config": {"url": "https://ci.example.com/app/hooks/github/tok"},
                            "last_response": {"code": 204, "status": "active", "message": "OK"}
                        },
                        {
                            "id": 43,
                            "active": false,
                            "config": {},
                            "last_response": {"code": null, "status": "unused", "message": null}
                        }
                    ])),
            )
            .mount(&mock_server)
            .await;

        let client = GitHubClient::new(reqwest::Client::new(), mock_server.uri());
        client.authenticate("gho_token");

        let hooks = client.list_webhooks(&repo()).await.expect("hooks listed");
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].delivery_code(), Some(204));
        assert_eq!(
            hooks[0].callback_url.as_deref(),
            Some("https://ci.example.com/app/hooks/github/tok")
        );
        assert!(!hooks[1].active);
        assert_eq!(hooks[1].delivery_code(), None);

        assert_eq!(
            client.remaining_request_budget(),
            Some(RateLimit {
                remaining: 4999,
                limit: Some(5000)
            })
        );
    }

    #[tokio::test]
    async fn unauthorized_listing_is_invalid_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/hooks"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("X-RateLimit-Remaining", "59")
                    .set_body_json(serde_json::json!({"message": "Bad credentials"})),
            )
            .mount(&mock_server)
            .await;

        let client = GitHubClient::new(reqwest::Client::new(), mock_server.uri());
        client.authenticate("revoked");

        let err = client.list_webhooks(&repo()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Access(AccessError::InvalidCredentials("Bad credentials".to_string()))
        );
        assert_eq!(client.remaining_request_budget().map(|r| r.remaining), Some(59));
    }

    #[tokio::test]
    async fn ping_posts_to_hook_pings_endpoint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/hooks/42/pings"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = GitHubClient::new(reqwest::Client::new(), mock_server.uri());
        client.authenticate("gho_token");
        client.send_test_ping(&repo(), 42).await.expect("ping accepted");
    }

    #[tokio::test]
    async fn unparsable_body_is_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/hooks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let client = GitHubClient::new(reqwest::Client::new(), mock_server.uri());
        let err = client.list_webhooks(&repo()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
