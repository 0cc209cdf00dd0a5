//! Container runtime driver interface
//!
//! `ContainerRuntime` is the pool engine's dependency on the outside world:
//! create/start/stop/inspect a container and stream its lifecycle events.
//! Any runtime implementing this surface is substitutable; this crate ships
//! a Docker-backed driver (`docker`) and an in-process fake used by tests
//! (`fake`).

pub mod docker;
pub mod fake;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single published port mapping discovered at `inspect` time.
#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshot {
    /// Host-side port bound to the pool's configured container port, if any.
    pub host_port: Option<u16>,
    pub host_address: String,
}

/// Runtime-agnostic container lifecycle event, delivered to the owning Item.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Started,
    ExitSuccess,
    ExitError(String),
    StartFailed(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,
}

/// Specification for a container an Item needs created.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub pool_name: String,
    pub image: String,
    pub env: Vec<String>,
    pub port: u16,
}

/// Opaque capability to a single runtime container, exclusively owned by
/// its Item.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self) -> Result<(), RuntimeError>;
    async fn stop(&self) -> Result<(), RuntimeError>;
    async fn terminate(&self) -> Result<(), RuntimeError>;
    async fn destroy(&self) -> Result<(), RuntimeError>;
    async fn inspect(&self) -> Result<ContainerSnapshot, RuntimeError>;

    /// Execute a command inside the container (used by the `exec` action plugin).
    async fn exec(&self, argv: &[String]) -> Result<i64, RuntimeError>;

    /// Subscribe to this container's lifecycle events.
    fn events(&self) -> mpsc::Receiver<ContainerEvent>;
}

/// Factory trait producing `ContainerHandle`s. One implementation per
/// backing runtime (Docker, in-process fake).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>, RuntimeError>;
}
