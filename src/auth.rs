//! # Authentication
//!
//! Operator bearer tokens guard the endpoints that trigger work.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::ApiError;

/// Proof that the request carried a valid operator token.
///
/// Only [`auth_middleware`] inserts it, so a handler taking this extractor
/// cannot be reached unauthenticated even if the layer is forgotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingHeader,
    NotBearer,
    UnknownToken,
}

impl Rejection {
    fn message(self) -> &'static str {
        match self {
            Rejection::MissingHeader => "Missing Authorization header",
            Rejection::NotBearer => "Authorization header must use Bearer scheme",
            Rejection::UnknownToken => "Invalid bearer token",
        }
    }
}

pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(rejection) = authorize(request.headers(), &config.operator_tokens) {
        tracing::warn!(
            path = %request.uri().path(),
            reason = ?rejection,
            "Rejected operator request"
        );
        return Err(ApiError::unauthorized(rejection.message()));
    }

    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

/// Accepts the request when its bearer token equals any configured operator
/// token. Comparison is constant time; an empty token list accepts nothing.
fn authorize(headers: &HeaderMap, tokens: &[String]) -> Result<(), Rejection> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(Rejection::MissingHeader)?
        .to_str()
        .map_err(|_| Rejection::NotBearer)?;

    let presented = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Rejection::NotBearer)?;

    let known = tokens.iter().fold(false, |found, token| {
        found | bool::from(presented.as_bytes().ct_eq(token.as_bytes()))
    });
    if known { Ok(()) } else { Err(Rejection::UnknownToken) }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| ApiError::unauthorized("Operator authentication required"))
    }
}
