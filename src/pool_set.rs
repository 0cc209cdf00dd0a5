//! PoolSet: a name-indexed collection of Pools, aggregating WaitReady,
//! Stop, and checkout-by-name.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::action::plugins::Registry;
use crate::action::runner::RunnerConfig;
use crate::adapter::{Adapter, Params};
use crate::config::{ActionConfig, PoolConfig, PoolSetConfig};
use crate::events::Emitter;
use crate::pool::{Lifecycle, Pool, PoolError, PoolStatus};
use crate::runtime::ContainerRuntime;

#[derive(Debug, Error)]
pub enum PoolSetError {
    #[error("unknown pool `{0}`")]
    UnknownPool(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to resolve action: {0}")]
    ActionResolution(String),
}

pub struct PoolSet {
    pools: DashMap<String, Pool>,
    token: CancellationToken,
}

impl PoolSet {
    /// Builds one Pool per entry in `config`, resolving each configured
    /// action through the plugin registry.
    pub fn build(
        config: PoolSetConfig,
        registry: &Registry,
        runtime: Arc<dyn ContainerRuntime>,
        emitter: Arc<dyn Emitter>,
    ) -> Result<Self, PoolSetError> {
        let token = CancellationToken::new();
        let pools = DashMap::new();

        for (name, pool_config) in config.pools {
            let lifecycle = resolve_lifecycle(&pool_config, registry, runtime.clone())?;
            let adapter = Adapter::new(pool_config.params.clone());
            let pool = Pool::spawn(
                name.clone(),
                pool_config,
                lifecycle,
                adapter,
                runtime.clone(),
                emitter.clone(),
                token.clone(),
            );
            pools.insert(name, pool);
        }

        Ok(Self { pools, token })
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn checkout(&self, pool_name: &str, cancel: CancellationToken) -> Result<Params, PoolSetError> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| PoolSetError::UnknownPool(pool_name.to_string()))?
            .clone();
        Ok(pool.checkout(cancel).await?)
    }

    pub async fn return_item(&self, pool_name: &str, item_id: String) -> Result<(), PoolSetError> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| PoolSetError::UnknownPool(pool_name.to_string()))?
            .clone();
        Ok(pool.return_item(item_id).await?)
    }

    pub async fn status(&self, pool_name: &str) -> Result<PoolStatus, PoolSetError> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| PoolSetError::UnknownPool(pool_name.to_string()))?
            .clone();
        Ok(pool.status().await)
    }

    /// Non-blocking: true once every pool has reached its target size.
    pub fn all_ready(&self) -> bool {
        self.pools.iter().all(|entry| entry.value().is_ready())
    }

    /// Succeeds once every pool has reached its target size.
    pub async fn wait_ready(&self) {
        let futures: Vec<_> = self.pools.iter().map(|entry| {
            let pool = entry.value().clone();
            async move { pool.wait_ready().await }
        }).collect();
        join_all(futures).await;
    }

    pub async fn stop(&self) {
        self.token.cancel();
        let futures: Vec<_> = self.pools.iter().map(|entry| {
            let pool = entry.value().clone();
            async move { pool.stop().await }
        }).collect();
        join_all(futures).await;
    }
}

fn resolve_lifecycle(
    pool_config: &PoolConfig,
    registry: &Registry,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<Lifecycle, PoolSetError> {
    Ok(Lifecycle {
        healthcheck: resolve_action(pool_config.actions.healthcheck.as_ref(), registry, runtime.clone())?,
        initialize: resolve_action(pool_config.actions.initialize.as_ref(), registry, runtime.clone())?,
        reset: resolve_action(pool_config.actions.reset.as_ref(), registry, runtime)?,
    })
}

type ResolvedAction = (Arc<dyn crate::action::Action>, RunnerConfig);

fn resolve_action(
    config: Option<&ActionConfig>,
    registry: &Registry,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<Option<ResolvedAction>, PoolSetError> {
    let Some(config) = config else { return Ok(None) };

    let action = registry
        .parse(&config.r#type, config.plugin_fields.clone(), runtime)
        .ok_or_else(|| PoolSetError::ActionResolution(format!("no plugin registered for type `{}`", config.r#type)))?
        .map_err(|e| PoolSetError::ActionResolution(e.to_string()))?;

    Ok(Some((action, RunnerConfig::from(config))))
}
