use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use crate::config::{AuthSettings, PgOptions, UserConfig};
use crate::database::executor::{self, ResultShape};
use crate::database::table_info::{self, TableDefaults, TableInfo, TableInfoCache};
use crate::error::ApiError;
use crate::geojson::{self, Feature};

use super::FeatureBackend;

/// Postgres-backed user: one lazily-connecting pool plus a
/// process-lifetime metadata cache shared by every request for this user.
pub struct PgUser {
    name: String,
    auth: AuthSettings,
    options: PgOptions,
    pool: PgPool,
    tables: TableInfoCache,
}

impl PgUser {
    pub fn new(name: &str, config: &UserConfig) -> Self {
        let connect = PgConnectOptions::new()
            .host(&config.options.host)
            .port(config.options.port)
            .database(&config.options.database)
            .username(&config.options.user)
            .password(&config.options.password)
            .ssl_mode(if config.options.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });

        let pool = PgPoolOptions::new()
            .max_connections(config.options.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.options.connect_timeout))
            .connect_lazy_with(connect);

        info!("created database pool for user: {}", name);

        Self {
            name: name.to_string(),
            auth: config.auth.clone(),
            options: config.options.clone(),
            pool,
            tables: TableInfoCache::new(),
        }
    }

    /// Cached metadata for one table identifier; first access runs the
    /// introspection queries, everyone after reuses the record.
    async fn table_info(&self, table: &str) -> Result<Arc<TableInfo>, ApiError> {
        let defaults = TableDefaults {
            pk: self.options.default_pk.clone(),
            geom: self.options.default_geom.clone(),
            srid: self.options.default_srid,
        };

        self.tables
            .get_or_load(table, || {
                table_info::introspect(&self.pool, table, &self.options.user, defaults)
            })
            .await
            .map_err(ApiError::from)
    }
}

#[async_trait]
impl FeatureBackend for PgUser {
    fn auth(&self) -> &AuthSettings {
        &self.auth
    }

    async fn get_table(&self, table: &str) -> Result<Value, ApiError> {
        let info = self.table_info(table).await?;
        if !info.can_select {
            return Err(ApiError::forbidden("forbidden"));
        }

        // Geometry is rendered server-side as GeoJSON text, already
        // transformed to 4326 for output; the alias shadows the raw column.
        let sql = match &info.geom {
            Some(geom) => format!(
                "SELECT *, ST_AsGeoJSON(ST_Transform({geom}, 4326)) AS {geom} FROM {{table}}",
                geom = geom
            ),
            None => "SELECT * FROM {table}".to_string(),
        };

        executor::run(
            &self.pool,
            table,
            &sql,
            Vec::new(),
            ResultShape::Collection,
            &info,
        )
        .await
    }

    async fn post_table(
        &self,
        table: &str,
        feature: Feature,
        client_ip: &str,
    ) -> Result<Value, ApiError> {
        let info = self.table_info(table).await?;
        if !info.can_insert {
            return Err(ApiError::forbidden("forbidden"));
        }

        let spec = geojson::write_spec(&feature, &info, true, Utc::now(), client_ip)?;
        let mut sql = format!(
            "INSERT INTO {{table}} ({}) VALUES ({})",
            spec.columns.join(", "),
            spec.placeholders.join(", ")
        );

        let returning = info.can_select;
        if returning {
            sql.push_str(&format!(" RETURNING {}", info.pk));
        }

        executor::run(
            &self.pool,
            table,
            &sql,
            spec.values,
            ResultShape::Inserted { returning },
            &info,
        )
        .await
    }

    async fn ping(&self) -> Result<(), ApiError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("health check failed for user {}: {}", self.name, e);
            ApiError::server_error("server error")
        })?;
        Ok(())
    }
}
