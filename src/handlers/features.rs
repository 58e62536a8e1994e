use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::backend::FeatureBackend;
use crate::database::identifier;
use crate::error::ApiError;
use crate::geojson::Feature;
use crate::middleware::auth::authorize_user;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// GET /:user/:table - list rows as a FeatureCollection
pub async fn get_table(
    Path((user, table)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let backend = authorize_user(&user, &headers, query.token.as_deref())?;
    let table = table_name(&table)?;

    let value = backend.get_table(&table).await?;
    Ok(Json(value))
}

/// POST /:user/:table - insert one feature
pub async fn post_table(
    Path((user, table)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(feature): Json<Feature>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = authorize_user(&user, &headers, query.token.as_deref())?;
    let table = table_name(&table)?;
    let client_ip = client_ip(&headers, addr);

    let value = backend.post_table(&table, feature, &client_ip).await?;
    Ok(Json(value))
}

/// GET /:user/:table/:fid - single feature (not implemented by any backend)
pub async fn get_feature(
    Path((user, table, fid)): Path<(String, String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let backend = authorize_user(&user, &headers, query.token.as_deref())?;
    let table = table_name(&table)?;
    let fid = parse_fid(&fid)?;

    let value = backend.get_feature(&table, fid).await?;
    Ok(Json(value))
}

/// PATCH /:user/:table/:fid - single feature (not implemented by any backend)
pub async fn patch_feature(
    Path((user, table, fid)): Path<(String, String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Json(feature): Json<Feature>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = authorize_user(&user, &headers, query.token.as_deref())?;
    let table = table_name(&table)?;
    let fid = parse_fid(&fid)?;

    let value = backend.patch_feature(&table, fid, feature).await?;
    Ok(Json(value))
}

/// DELETE /:user/:table/:fid - single feature (not implemented by any backend)
pub async fn delete_feature(
    Path((user, table, fid)): Path<(String, String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let backend = authorize_user(&user, &headers, query.token.as_deref())?;
    let table = table_name(&table)?;
    let fid = parse_fid(&fid)?;

    let value = backend.delete_feature(&table, fid).await?;
    Ok(Json(value))
}

fn table_name(raw: &str) -> Result<String, ApiError> {
    let table = identifier::sanitize(raw);
    if table.is_empty() {
        return Err(ApiError::not_found("invalid table"));
    }
    Ok(table)
}

fn parse_fid(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found("invalid fid"))
}

/// Forwarded address takes precedence over the socket peer; the value is
/// recorded as-is, without validation.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}
