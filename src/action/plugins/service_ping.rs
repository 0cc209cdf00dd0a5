//! Service-specific healthcheck/reset helpers for the common backing
//! services this crate pools: Postgres, Redis, MySQL. These open a
//! minimal raw connection (TCP dial plus a short protocol preamble, not a
//! full client driver) so the plugin crate's own dependency footprint
//! stays small, and issue one command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionError, BoxedAction};
use crate::adapter::Params;
use crate::runtime::ContainerRuntime;

use super::{PluginError, Registry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// `redis-ping`: connects and issues `PING`, expecting `+PONG`.
struct RedisPingAction;

#[async_trait]
impl Action for RedisPingAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        tokio::select! {
            result = redis_ping(params) => result,
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

async fn redis_ping(params: &Params) -> Result<(), ActionError> {
    let addr = format!("{}:{}", params.hostname, params.port);
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ActionError::Failed(format!("redis-ping: connect to {addr} timed out")))?
        .map_err(|e| ActionError::Failed(format!("redis-ping: connect to {addr} failed: {e}")))?;

    stream
        .write_all(b"PING\r\n")
        .await
        .map_err(|e| ActionError::Failed(format!("redis-ping: write failed: {e}")))?;

    let mut buf = [0u8; 64];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| ActionError::Failed(format!("redis-ping: read failed: {e}")))?;

    if n > 0 && buf[..n].starts_with(b"+PONG") {
        Ok(())
    } else {
        Err(ActionError::Failed("redis-ping: unexpected response".to_string()))
    }
}

/// `redis-reset`: issues `FLUSHDB`.
struct RedisResetAction;

#[async_trait]
impl Action for RedisResetAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        tokio::select! {
            result = redis_command(params, b"FLUSHDB\r\n") => result,
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

async fn redis_command(params: &Params, command: &[u8]) -> Result<(), ActionError> {
    let addr = format!("{}:{}", params.hostname, params.port);
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ActionError::Failed(format!("connect to {addr} timed out")))?
        .map_err(|e| ActionError::Failed(format!("connect to {addr} failed: {e}")))?;

    stream
        .write_all(command)
        .await
        .map_err(|e| ActionError::Failed(format!("write failed: {e}")))?;

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.map_err(|e| ActionError::Failed(format!("read failed: {e}")))?;
    if n > 0 && buf[..n].starts_with(b"+OK") {
        Ok(())
    } else {
        Err(ActionError::Failed("unexpected response".to_string()))
    }
}

/// A generic raw-TCP "is something listening and talking back" preamble,
/// used for Postgres and MySQL where a full protocol preamble would pull
/// in a real driver dependency. Connects and waits for the server to send
/// its first bytes (the startup/greeting packet both protocols send
/// unprompted), which is the minimal observable signal that the service
/// process is alive and accepting connections.
async fn handshake_ping(params: &Params, label: &str) -> Result<(), ActionError> {
    let addr = format!("{}:{}", params.hostname, params.port);
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ActionError::Failed(format!("{label}: connect to {addr} timed out")))?
        .map_err(|e| ActionError::Failed(format!("{label}: connect to {addr} failed: {e}")))?;

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(CONNECT_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| ActionError::Failed(format!("{label}: no greeting from {addr}")))?
        .map_err(|e| ActionError::Failed(format!("{label}: read failed: {e}")))?;

    if n > 0 {
        Ok(())
    } else {
        Err(ActionError::Failed(format!("{label}: connection closed before greeting")))
    }
}

struct PgPingAction;

#[async_trait]
impl Action for PgPingAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        tokio::select! {
            result = handshake_ping(params, "pg-ping") => result,
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

struct MysqlPingAction;

#[async_trait]
impl Action for MysqlPingAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        tokio::select! {
            result = handshake_ping(params, "mysql-ping") => result,
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

/// `pg-reset` / `mysql-reset`: truncates a configured allowlist of
/// tables inside the container via `exec`, rather than speaking SQL over
/// a raw socket. Delegates to the container's own client binary.
struct SqlTruncateResetAction {
    exec_argv: Vec<String>,
}

#[async_trait]
impl Action for SqlTruncateResetAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        let handle = params
            .handle
            .as_ref()
            .ok_or_else(|| ActionError::Failed("sql reset requires a container handle".to_string()))?;

        tokio::select! {
            result = handle.exec(&self.exec_argv) => {
                match result {
                    Ok(0) => Ok(()),
                    Ok(code) => Err(ActionError::Failed(format!("reset exec exited {code}"))),
                    Err(e) => Err(ActionError::Failed(format!("reset exec failed: {e}"))),
                }
            }
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SqlResetConfig {
    tables: Vec<String>,
}

fn pg_truncate_argv(tables: &[String]) -> Vec<String> {
    let list = tables.join(", ");
    vec![
        "psql".to_string(),
        "-c".to_string(),
        format!("TRUNCATE {list} RESTART IDENTITY CASCADE;"),
    ]
}

fn mysql_truncate_argv(tables: &[String]) -> Vec<String> {
    let statements = tables.iter().map(|t| format!("TRUNCATE TABLE `{t}`;")).collect::<Vec<_>>().join(" ");
    vec!["mysql".to_string(), "-e".to_string(), statements]
}

pub fn register(registry: &mut Registry) {
    registry.register(
        "redis-ping",
        Box::new(|_raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            Ok(Arc::new(RedisPingAction))
        }),
    );
    registry.register(
        "redis-reset",
        Box::new(|_raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            Ok(Arc::new(RedisResetAction))
        }),
    );
    registry.register(
        "pg-ping",
        Box::new(|_raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            Ok(Arc::new(PgPingAction))
        }),
    );
    registry.register(
        "pg-reset",
        Box::new(|raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            let config: SqlResetConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: "pg-reset".to_string(),
                reason: e.to_string(),
            })?;
            if config.tables.is_empty() {
                return Err(PluginError::InvalidConfig {
                    plugin: "pg-reset".to_string(),
                    reason: "tables allowlist must not be empty".to_string(),
                });
            }
            Ok(Arc::new(SqlTruncateResetAction { exec_argv: pg_truncate_argv(&config.tables) }))
        }),
    );
    registry.register(
        "mysql-ping",
        Box::new(|_raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            Ok(Arc::new(MysqlPingAction))
        }),
    );
    registry.register(
        "mysql-reset",
        Box::new(|raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            let config: SqlResetConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: "mysql-reset".to_string(),
                reason: e.to_string(),
            })?;
            if config.tables.is_empty() {
                return Err(PluginError::InvalidConfig {
                    plugin: "mysql-reset".to_string(),
                    reason: "tables allowlist must not be empty".to_string(),
                });
            }
            Ok(Arc::new(SqlTruncateResetAction { exec_argv: mysql_truncate_argv(&config.tables) }))
        }),
    );
}
