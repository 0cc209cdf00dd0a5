//! `fake` plugin: always succeeds or always fails, as configured. Used to
//! exercise the plugin registry and config-to-action resolution path in
//! tests; the multi-attempt scripted behavior needed for the end-to-end
//! pool scenarios is supplied directly as an `Action` impl in those tests
//! instead, since a single resolved action instance is shared by every
//! item in a pool and scripting per-attempt outcomes through the registry
//! would require smuggling state the real contract doesn't carry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionError, BoxedAction};
use crate::adapter::Params;
use crate::runtime::ContainerRuntime;

use super::{PluginError, Registry};

const TYPE_NAME: &str = "fake";

#[derive(Debug, Deserialize)]
struct FakeConfig {
    #[serde(default = "default_succeed")]
    succeed: bool,
}

fn default_succeed() -> bool {
    true
}

struct FakeAction {
    succeed: bool,
}

#[async_trait]
impl Action for FakeAction {
    async fn run(&self, ctx: CancellationToken, _params: &Params) -> Result<(), ActionError> {
        if ctx.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        if self.succeed {
            Ok(())
        } else {
            Err(ActionError::Failed("fake action configured to fail".to_string()))
        }
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(
        TYPE_NAME,
        Box::new(|raw, _runtime: Arc<dyn ContainerRuntime>| -> Result<BoxedAction, PluginError> {
            let config: FakeConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: TYPE_NAME.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Arc::new(FakeAction { succeed: config.succeed }))
        }),
    );
}
