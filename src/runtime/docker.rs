//! Docker-backed `ContainerRuntime`, built on `bollard`.
//!
//! Mirrors the create -> start -> attach/inspect -> stop/kill -> remove
//! shape of the Docker driver this crate was grounded on, generalized from
//! a single long-lived game-server container to short-lived pool items.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ContainerEvent, ContainerHandle, ContainerRuntime, ContainerSnapshot, ContainerSpec, RuntimeError};

const POOL_LABEL: &str = "ephemeral-pool";
const EVENT_CHANNEL_CAPACITY: usize = 32;

pub struct DockerRuntime {
    client: Arc<Docker>,
}

impl DockerRuntime {
    /// Connect using the platform default (unix socket on Linux/macOS,
    /// named pipe on Windows).
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(Self { client: Arc::new(client) })
    }

    pub fn connect_with_socket(socket_path: &str) -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { client: Arc::new(client) })
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>, RuntimeError> {
        if let Err(e) = pull_image(&self.client, &spec.image).await {
            warn!(image = %spec.image, error = %e, "image pull failed, assuming already present locally");
        }

        let name = format!("{}-{}", spec.pool_name, &Uuid::new_v4().to_string()[..8]);
        let container_port = format!("{}/tcp", spec.port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port.clone(),
            Some(vec![PortBinding { host_ip: None, host_port: None }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port, HashMap::new());

        let mut labels = HashMap::new();
        labels.insert(POOL_LABEL.to_string(), spec.pool_name.clone());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            publish_all_ports: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(labels),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: name.clone(), platform: None };
        let response = self.client.create_container(Some(options), config).await?;

        Ok(Arc::new(DockerContainerHandle {
            client: self.client.clone(),
            id: response.id,
            port: spec.port,
        }))
    }
}

async fn pull_image(client: &Docker, image: &str) -> Result<(), RuntimeError> {
    let options = Some(CreateImageOptions { from_image: image, ..Default::default() });
    let mut stream = client.create_image(options, None, None);
    while let Some(result) = stream.next().await {
        result?;
    }
    Ok(())
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

pub struct DockerContainerHandle {
    client: Arc<Docker>,
    id: String,
    port: u16,
}

#[async_trait]
impl ContainerHandle for DockerContainerHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        match self.client.start_container::<String>(&self.id, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RuntimeError::ContainerNotFound(self.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        let options = Some(StopContainerOptions { t: 10 });
        match self.client.stop_container(&self.id, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(id = %self.id, "stop: container already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn terminate(&self) -> Result<(), RuntimeError> {
        let options = Some(KillContainerOptions { signal: "SIGKILL" });
        match self.client.kill_container(&self.id, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy(&self) -> Result<(), RuntimeError> {
        let options = Some(RemoveContainerOptions { force: true, v: true, ..Default::default() });
        match self.client.remove_container(&self.id, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect(&self) -> Result<ContainerSnapshot, RuntimeError> {
        let options = Some(InspectContainerOptions { size: false });
        let details = match self.client.inspect_container(&self.id, options).await {
            Ok(d) => d,
            Err(e) if is_not_found(&e) => return Err(RuntimeError::ContainerNotFound(self.id.clone())),
            Err(e) => return Err(e.into()),
        };

        let wanted = format!("{}/tcp", self.port);
        let host_port = details
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get(&wanted))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|b| b.host_port.as_ref())
            .and_then(|p| p.parse::<u16>().ok());

        Ok(ContainerSnapshot { host_port, host_address: "127.0.0.1".to_string() })
    }

    async fn exec(&self, argv: &[String]) -> Result<i64, RuntimeError> {
        let exec = self
            .client
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        if let StartExecResults::Attached { mut output, .. } =
            self.client.start_exec(&exec.id, None).await?
        {
            while output.next().await.is_some() {}
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }

    fn events(&self) -> mpsc::Receiver<ContainerEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let id = self.id.clone();

        tokio::spawn(async move {
            let mut filters = HashMap::new();
            filters.insert("container".to_string(), vec![id.clone()]);
            let options = Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            });
            let mut stream = client.events(options);

            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(id = %id, error = %e, "docker event stream error");
                        continue;
                    }
                };
                let action = event.action.unwrap_or_default();
                let translated = match action.as_str() {
                    "start" => Some(ContainerEvent::Started),
                    "die" => {
                        let exit_ok = event
                            .actor
                            .and_then(|a| a.attributes)
                            .and_then(|attrs| attrs.get("exitCode").cloned())
                            .map(|code| code == "0")
                            .unwrap_or(false);
                        Some(if exit_ok {
                            ContainerEvent::ExitSuccess
                        } else {
                            ContainerEvent::ExitError(format!("container {id} exited non-zero"))
                        })
                    }
                    _ => None,
                };
                if let Some(translated) = translated {
                    if tx.send(translated).await.is_err() {
                        return;
                    }
                }
            }
            info!(id = %id, "docker event stream closed");
        });

        rx
    }
}
