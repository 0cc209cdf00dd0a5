//! Action contract and the plugin registry that resolves configured
//! action types to runnable instances.

pub mod plugins;
pub mod runner;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapter::Params;

#[derive(Debug, Error, Clone)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("action cancelled")]
    Cancelled,

    #[error("no plugin registered for action type `{0}`")]
    PluginNotFound(String),

    #[error("invalid action configuration: {0}")]
    InvalidConfig(String),
}

/// A single named operation run against an Item's container: healthcheck,
/// initialize, or reset. `run` is the `(ctx, params) -> error` contract
/// from the core spec; everything plugin-specific is closed over at
/// construction time by `Plugin::parse`.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError>;
}

/// Adapts a plain async closure into an `Action`, for plugins that don't
/// need their own named type.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(CancellationToken, Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        (self.0)(ctx, params.clone()).await
    }
}

pub type BoxedAction = Arc<dyn Action>;
pub type PinnedFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
