//! Callback URL helpers
//!
//! Every webhook installed by this service posts to
//! `{server_root}/app/hooks/github/{token}`. The token binds the hook back to
//! the connection and user that installed it.

use url::Url;

/// Path prefix preceding the security token in a callback URL.
pub const CALLBACK_PATH_PREFIX: &str = "/app/hooks/github/";

/// Extracts the security token embedded in a webhook callback URL.
///
/// Returns `None` when the URL does not contain the listener path or the
/// token segment is blank.
pub fn extract_security_token(callback_url: &str) -> Option<String> {
    let path = match Url::parse(callback_url) {
        Ok(url) => url.path().to_string(),
        // Relative or otherwise unparsable values are treated as a bare path.
        Err(_) => callback_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let (_, rest) = path.split_once(CALLBACK_PATH_PREFIX)?;
    let token = rest.split('/').next().unwrap_or_default().trim();

    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Builds the callback URL for a server root and security token.
pub fn callback_url(server_root: &str, token: &str) -> String {
    format!(
        "{}{}{}",
        server_root.trim_end_matches('/'),
        CALLBACK_PATH_PREFIX,
        token
    )
}
