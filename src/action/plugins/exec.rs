//! `exec` plugin: runs a configured argv inside the container via the
//! runtime driver's exec support. Ok iff the exit code is 0.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionError, BoxedAction};
use crate::adapter::Params;
use crate::runtime::ContainerRuntime;

use super::{PluginError, Registry};

const TYPE_NAME: &str = "exec";

#[derive(Debug, Deserialize)]
struct ExecConfig {
    argv: Vec<String>,
}

struct ExecAction {
    argv: Vec<String>,
}

#[async_trait]
impl Action for ExecAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        let handle = params
            .handle
            .as_ref()
            .ok_or_else(|| ActionError::Failed("exec action requires a container handle".to_string()))?;

        tokio::select! {
            result = handle.exec(&self.argv) => {
                match result {
                    Ok(0) => Ok(()),
                    Ok(code) => Err(ActionError::Failed(format!("exec {:?} exited {code}", self.argv))),
                    Err(e) => Err(ActionError::Failed(format!("exec {:?} failed: {e}", self.argv))),
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
            let config: ExecConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: TYPE_NAME.to_string(),
                reason: e.to_string(),
            })?;
            if config.argv.is_empty() {
                return Err(PluginError::InvalidConfig {
                    plugin: TYPE_NAME.to_string(),
                    reason: "argv must not be empty".to_string(),
                });
            }
            Ok(Arc::new(ExecAction { argv: config.argv }))
        }),
    );
}
