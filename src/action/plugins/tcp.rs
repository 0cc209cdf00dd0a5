//! `tcp` plugin: dials `Params.hostname:Params.port` with a short connect
//! timeout. Ok iff the connection succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionError, BoxedAction};
use crate::adapter::Params;
use crate::runtime::ContainerRuntime;

use super::{PluginError, Registry};

const TYPE_NAME: &str = "tcp";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Deserialize, Default)]
struct TcpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

struct TcpAction {
    connect_timeout: Duration,
}

#[async_trait]
impl Action for TcpAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        let addr = format!("{}:{}", params.hostname, params.port);
        tokio::select! {
            result = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)) => {
                match result {
                    Ok(Ok(_stream)) => Ok(()),
                    Ok(Err(e)) => Err(ActionError::Failed(format!("tcp dial {addr} failed: {e}"))),
                    Err(_) => Err(ActionError::Failed(format!("tcp dial {addr} timed out"))),
                }
            }
            _ = ctx.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(
        TYPE_NAME,
        Box::new(|raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            let config: TcpConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: TYPE_NAME.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Arc::new(TcpAction {
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            }))
        }),
    );
}
