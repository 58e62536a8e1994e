use std::sync::Arc;

use axum::http::HeaderMap;

use crate::backend::{self, FeatureBackend};
use crate::error::ApiError;

/// Resolves the `:user` path segment to a configured backend and verifies
/// the caller's token names that user. Unknown user is 404; anything wrong
/// with the token is 403.
pub fn authorize_user(
    user: &str,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Arc<dyn FeatureBackend>, ApiError> {
    let backend = backend::lookup(user).ok_or_else(|| ApiError::not_found("invalid user"))?;

    let token =
        extract_token(headers, query_token).ok_or_else(|| ApiError::forbidden("invalid token"))?;

    if !crate::auth::authorize(&token, user, backend.auth()) {
        return Err(ApiError::forbidden("invalid token"));
    }

    Ok(backend)
}

/// Pulls a bearer token from the Authorization header, falling back to the
/// `token` query parameter. A present-but-malformed header blocks the
/// query fallback.
fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let mut parts = value.splitn(2, ' ');
        if let (Some("Bearer"), Some(token)) = (parts.next(), parts.next()) {
            return Some(token.to_string());
        }
        return None;
    }

    query_token.map(|t| t.to_string())
}
