//! `http` plugin: GETs a configurable path against `Params.url` (or
//! `http://{hostname}:{port}{path}` when no url is set). Ok iff the
//! response status is 2xx.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionError, BoxedAction};
use crate::adapter::Params;
use crate::runtime::ContainerRuntime;

use super::{PluginError, Registry};

const TYPE_NAME: &str = "http";

#[derive(Debug, Deserialize, Default)]
struct HttpConfig {
    #[serde(default)]
    path: String,
}

struct HttpAction {
    path: String,
    client: reqwest::Client,
}

#[async_trait]
impl Action for HttpAction {
    async fn run(&self, ctx: CancellationToken, params: &Params) -> Result<(), ActionError> {
        let url = if params.url.is_empty() {
            format!("http://{}:{}{}", params.hostname, params.port, self.path)
        } else {
            format!("{}{}", params.url, self.path)
        };

        tokio::select! {
            result = self.client.get(&url).send() => {
                match result {
                    Ok(response) if response.status().is_success() => Ok(()),
                    Ok(response) => Err(ActionError::Failed(format!("{url} returned {}", response.status()))),
                    Err(e) => Err(ActionError::Failed(format!("GET {url} failed: {e}"))),
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
            let config: HttpConfig = serde_json::from_value(raw).map_err(|e| PluginError::InvalidConfig {
                plugin: TYPE_NAME.to_string(),
                reason: e.to_string(),
            })?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| PluginError::InvalidConfig { plugin: TYPE_NAME.to_string(), reason: e.to_string() })?;
            Ok(Arc::new(HttpAction { path: config.path, client }))
        }),
    );
}
