use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, PgPool, Row};

use crate::database::table_info::TableInfo;
use crate::error::ApiError;
use crate::geojson::{self, FeatureCollection};

/// A value bound into a parameterized statement. Identifiers never pass
/// through here; they are interpolated as sanitized text by the statement
/// builders.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Json(Value),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// How the executor shapes a successful result.
#[derive(Debug, Clone, Copy)]
pub enum ResultShape {
    /// All rows, wrapped as a FeatureCollection.
    Collection,
    /// The first row as a bare Feature, or JSON `null` when nothing matched.
    Single,
    /// Affected-row count; with `returning` the generated key is surfaced
    /// alongside it.
    Inserted { returning: bool },
}

/// Substitutes `{table}` with the caller's sanitized identifier, binds the
/// parameters, executes, and shapes the result. All database failures are
/// classified here, exactly once.
pub async fn run(
    pool: &PgPool,
    table: &str,
    sql: &str,
    params: Vec<SqlParam>,
    shape: ResultShape,
    info: &TableInfo,
) -> Result<Value, ApiError> {
    let sql = sql.replace("{table}", table);

    match shape {
        ResultShape::Inserted { returning: false } => {
            let result = bind_all(sqlx::query(&sql), &params)
                .execute(pool)
                .await
                .map_err(classify)?;
            Ok(json!({ "rows": result.rows_affected() }))
        }
        ResultShape::Inserted { returning: true } => {
            let rows = bind_all(sqlx::query(&sql), &params)
                .fetch_all(pool)
                .await
                .map_err(classify)?;
            let id = rows
                .first()
                .map(|row| column_value(row, 0))
                .unwrap_or(Value::Null);
            Ok(json!({ "rows": rows.len(), "id": id }))
        }
        ResultShape::Collection | ResultShape::Single => {
            let rows = bind_all(sqlx::query(&sql), &params)
                .fetch_all(pool)
                .await
                .map_err(classify)?;

            let mut features = Vec::with_capacity(rows.len());
            for row in &rows {
                let feature = geojson::row_to_feature(row_to_map(row), &info.pk, info.geom.as_deref())
                    .map_err(|e| {
                        tracing::error!("failed to decode row from {}: {}", table, e);
                        ApiError::server_error("server error")
                    })?;
                features.push(feature);
            }

            let value = match shape {
                ResultShape::Single => features
                    .into_iter()
                    .next()
                    .map(|f| serde_json::to_value(f))
                    .transpose()
                    .map_err(|e| {
                        tracing::error!("failed to serialize feature: {}", e);
                        ApiError::server_error("server error")
                    })?
                    .unwrap_or(Value::Null),
                _ => serde_json::to_value(FeatureCollection::new(features)).map_err(|e| {
                    tracing::error!("failed to serialize feature collection: {}", e);
                    ApiError::server_error("server error")
                })?,
            };
            Ok(value)
        }
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    for param in params {
        query = bind_param(query, param);
    }
    query
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match param {
        SqlParam::Text(s) => query.bind(s),
        SqlParam::Timestamp(ts) => query.bind(*ts),
        SqlParam::Json(value) => match value {
            Value::Null => {
                let none: Option<String> = None;
                query.bind(none)
            }
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    // Postgres has no u64; cast down if it fits
                    query.bind(u as i64)
                } else if let Some(f) = n.as_f64() {
                    query.bind(f)
                } else {
                    query.bind(n.to_string())
                }
            }
            Value::String(s) => query.bind(s),
            Value::Array(_) | Value::Object(_) => query.bind(value.clone()), // JSONB
        },
    }
}

/// Converts one row into a JSON map, trying progressively looser decodes
/// per column. A duplicate column label (the aliased GeoJSON rendering of
/// the geometry column) overwrites the earlier value.
fn row_to_map(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();
    for i in 0..row.len() {
        map.insert(row.column(i).name().to_string(), column_value(row, i));
    }
    map
}

fn column_value(row: &PgRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
        return v
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return v
            .map(|ts| Value::String(ts.to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        return v
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null);
    }
    Value::Null
}

static PERMISSION_DENIED: Lazy<Regex> = Lazy::new(|| Regex::new("permission denied").unwrap());
static UNDEFINED_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"column "([^"]+)" of relation "[^"]+" does not exist"#).unwrap());
static UNDEFINED_RELATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"relation "[^"]+" does not exist"#).unwrap());

/// Maps a database failure onto the response taxonomy. First match wins;
/// the raw text is logged for operators and never reaches the client
/// beyond the one extracted column name.
fn classify(err: sqlx::Error) -> ApiError {
    let text = err.to_string();
    tracing::error!("database error: {}", text);
    classify_text(&text)
}

fn classify_text(text: &str) -> ApiError {
    if PERMISSION_DENIED.is_match(text) {
        ApiError::forbidden("forbidden")
    } else if let Some(captures) = UNDEFINED_COLUMN.captures(text) {
        ApiError::bad_request(format!("column \"{}\" does not exist", &captures[1]))
    } else if UNDEFINED_RELATION.is_match(text) {
        ApiError::not_found("does not exist")
    } else {
        ApiError::server_error("server error")
    }
}
