use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{self, AuthSettings, BackendType};
use crate::error::ApiError;
use crate::geojson::Feature;

pub mod postgres;

/// One configured user. Default handlers answer 404 so a backend only
/// overrides the operations it supports; single-feature reads and writes
/// stay on the defaults.
#[async_trait]
pub trait FeatureBackend: Send + Sync {
    fn auth(&self) -> &AuthSettings;

    async fn get_table(&self, _table: &str) -> Result<Value, ApiError> {
        Err(ApiError::not_found("does not exist"))
    }

    async fn post_table(
        &self,
        _table: &str,
        _feature: Feature,
        _client_ip: &str,
    ) -> Result<Value, ApiError> {
        Err(ApiError::not_found("does not exist"))
    }

    async fn get_feature(&self, _table: &str, _fid: i64) -> Result<Value, ApiError> {
        Err(ApiError::not_found("does not exist"))
    }

    async fn patch_feature(
        &self,
        _table: &str,
        _fid: i64,
        _feature: Feature,
    ) -> Result<Value, ApiError> {
        Err(ApiError::not_found("does not exist"))
    }

    async fn delete_feature(&self, _table: &str, _fid: i64) -> Result<Value, ApiError> {
        Err(ApiError::not_found("does not exist"))
    }

    /// Connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

static REGISTRY: OnceLock<HashMap<String, Arc<dyn FeatureBackend>>> = OnceLock::new();

/// All configured backends, keyed by user name. Built once from config on
/// first access; pools connect lazily.
pub fn registry() -> &'static HashMap<String, Arc<dyn FeatureBackend>> {
    REGISTRY.get_or_init(|| {
        let mut users: HashMap<String, Arc<dyn FeatureBackend>> = HashMap::new();
        for (name, user) in &config::config().users {
            match user.backend {
                BackendType::Postgres => {
                    users.insert(name.clone(), Arc::new(postgres::PgUser::new(name, user)));
                }
            }
        }
        users
    })
}

pub fn lookup(user: &str) -> Option<Arc<dyn FeatureBackend>> {
    registry().get(user).cloned()
}
