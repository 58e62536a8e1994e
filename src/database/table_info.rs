use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::sync::{OnceCell, RwLock};

use crate::database::DatabaseError;

/// Structural facts and effective grants for one table, computed on first
/// reference and shared read-only by every later request.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
    /// Primary key column, lifted into the Feature `id`.
    pub pk: String,
    /// Geometry column; `None` disables geometry handling entirely.
    pub geom: Option<String>,
    /// Native SRID of the table. Inbound geometry is transformed into it;
    /// outbound geometry is always rendered in 4326.
    pub srid: Option<i32>,
    pub has_created: bool,
    pub has_modified: bool,
    pub has_ip: bool,
    pub can_select: bool,
    pub can_insert: bool,
    pub can_update: bool,
}

/// Per-user fallbacks applied to every table that does not override them.
#[derive(Debug, Clone)]
pub struct TableDefaults {
    pub pk: String,
    pub geom: Option<String>,
    pub srid: Option<i32>,
}

impl TableInfo {
    /// Splits a sanitized identifier into schema and bare table name,
    /// defaulting the schema when unqualified.
    pub fn split_identifier(identifier: &str) -> (&str, &str) {
        match identifier.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("public", identifier),
        }
    }
}

const COLUMNS_SQL: &str = "SELECT column_name, data_type \
     FROM information_schema.columns \
     WHERE table_name = $1 AND table_schema = $2";

const GRANTS_SQL: &str = "SELECT privilege_type \
     FROM information_schema.role_table_grants \
     WHERE table_name = $1 AND table_schema = $2 AND grantee = $3";

/// Loads the metadata record for one table: column facts and effective
/// grants, fetched concurrently from the information schema.
pub async fn introspect(
    pool: &PgPool,
    identifier: &str,
    grantee: &str,
    defaults: TableDefaults,
) -> Result<TableInfo, DatabaseError> {
    let (schema, table) = TableInfo::split_identifier(identifier);

    let columns = sqlx::query(COLUMNS_SQL).bind(table).bind(schema).fetch_all(pool);
    let grants = sqlx::query(GRANTS_SQL)
        .bind(table)
        .bind(schema)
        .bind(grantee)
        .fetch_all(pool);
    let (column_rows, grant_rows) = tokio::try_join!(columns, grants)?;

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in &column_rows {
        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        columns.push((name, data_type));
    }

    let mut privileges = Vec::with_capacity(grant_rows.len());
    for row in &grant_rows {
        privileges.push(row.try_get::<String, _>("privilege_type")?);
    }

    Ok(assemble(schema, table, defaults, &columns, &privileges))
}

/// Builds the metadata record from introspection results.
fn assemble(
    schema: &str,
    table: &str,
    defaults: TableDefaults,
    columns: &[(String, String)],
    privileges: &[String],
) -> TableInfo {
    let mut info = TableInfo {
        schema: schema.to_string(),
        table: table.to_string(),
        pk: defaults.pk,
        geom: defaults.geom,
        srid: defaults.srid,
        has_created: false,
        has_modified: false,
        has_ip: false,
        can_select: false,
        can_insert: false,
        can_update: false,
    };

    // Audit columns count only when both the reserved name and the
    // expected type line up.
    for (name, data_type) in columns {
        match name.as_str() {
            "_created" if data_type.contains("timestamp") => info.has_created = true,
            "_modified" if data_type.contains("timestamp") => info.has_modified = true,
            "_ip" if data_type.contains("character varying") => info.has_ip = true,
            _ => {}
        }
    }

    if privileges.is_empty() {
        // No grants recorded for the role: it owns the table and holds
        // every privilege implicitly.
        info.can_select = true;
        info.can_insert = true;
        info.can_update = true;
    } else {
        for privilege in privileges {
            match privilege.as_str() {
                "SELECT" => info.can_select = true,
                "INSERT" => info.can_insert = true,
                "UPDATE" => info.can_update = true,
                _ => {}
            }
        }
    }

    info
}

/// Write-once map from table identifier to metadata.
///
/// Concurrent first requests for the same identifier share a single loader
/// run; everyone else awaits its result. A failed load leaves the slot
/// empty so the next request retries. Entries are never invalidated:
/// schema changes require a process restart.
#[derive(Default)]
pub struct TableInfoCache {
    entries: RwLock<HashMap<String, Arc<OnceCell<Arc<TableInfo>>>>>,
}

impl TableInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load<F, Fut>(
        &self,
        identifier: &str,
        load: F,
    ) -> Result<Arc<TableInfo>, DatabaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TableInfo, DatabaseError>>,
    {
        // Fast path: the slot already exists.
        let cell = {
            let entries = self.entries.read().await;
            entries.get(identifier).cloned()
        };

        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut entries = self.entries.write().await;
                entries.entry(identifier.to_string()).or_default().clone()
            }
        };

        cell.get_or_try_init(|| async { load().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }
}
