//! In-process fake `ContainerRuntime`, used by property tests and the
//! end-to-end scenarios. Containers "start" instantly and never fail on
//! their own; action plugins (see `crate::action::plugins::fake`) are
//! what the tests use to script healthcheck/initialize/reset outcomes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ContainerEvent, ContainerHandle, ContainerRuntime, ContainerSnapshot, ContainerSpec, RuntimeError};

#[derive(Default)]
pub struct FakeRuntime {
    next_id: AtomicU32,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        let _ = tx.try_send(ContainerEvent::Started);
        Ok(Arc::new(FakeContainerHandle {
            id: format!("{}-fake-{}", spec.pool_name, id),
            port: spec.port,
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }))
    }
}

/// In-process container handle: "starts" instantly and reports its own
/// stop/terminate/destroy calls back through its own event stream, so an
/// Item driven by this handle sees the same Started -> (stopped) ->
/// ExitSuccess sequence it would see from the real Docker driver.
pub struct FakeContainerHandle {
    id: String,
    port: u16,
    events_tx: mpsc::Sender<ContainerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ContainerEvent>>>,
}

#[async_trait]
impl ContainerHandle for FakeContainerHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        let _ = self.events_tx.send(ContainerEvent::ExitSuccess).await;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), RuntimeError> {
        let _ = self.events_tx.send(ContainerEvent::ExitSuccess).await;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn inspect(&self) -> Result<ContainerSnapshot, RuntimeError> {
        Ok(ContainerSnapshot { host_port: Some(self.port), host_address: "127.0.0.1".to_string() })
    }

    async fn exec(&self, _argv: &[String]) -> Result<i64, RuntimeError> {
        Ok(0)
    }

    fn events(&self) -> mpsc::Receiver<ContainerEvent> {
        self.events_rx.lock().take().expect("FakeContainerHandle::events() called more than once")
    }
}

pub fn arc_runtime() -> Arc<dyn ContainerRuntime> {
    Arc::new(FakeRuntime::new())
}
