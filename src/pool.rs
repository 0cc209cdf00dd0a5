//! Pool supervisor: population replenishment and the checkout/return
//! protocol.
//!
//! Runs as its own single-owner serial execution context; the ready list,
//! ticket queue, and item table are mutated only from inside its loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::action::runner::RunnerConfig;
use crate::action::Action;
use crate::adapter::{Adapter, Params};
use crate::config::PoolConfig;
use crate::events::{Emitter, PoolEvent};
use crate::item::{self, ItemCommand, ItemEvent};
use crate::runtime::{ContainerRuntime, ContainerSpec};

const CREATE_BACKOFF_CEILING: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("pool is draining")]
    Draining,
    #[error("checkout cancelled")]
    Cancelled,
    #[error("item `{0}` is not currently checked out")]
    NotCheckedOut(String),
}

/// Resolved actions for a pool's three lifecycle phases. `None` means the
/// phase is skipped entirely (the item advances straight through).
#[derive(Default)]
pub struct Lifecycle {
    pub healthcheck: Option<(Arc<dyn Action>, RunnerConfig)>,
    pub initialize: Option<(Arc<dyn Action>, RunnerConfig)>,
    pub reset: Option<(Arc<dyn Action>, RunnerConfig)>,
}

enum Command {
    Checkout { reply: oneshot::Sender<Result<Params, PoolError>> },
    Return { item_id: String, reply: oneshot::Sender<Result<(), PoolError>> },
    Stop { reply: oneshot::Sender<()> },
    Status { reply: oneshot::Sender<PoolStatus> },
}

/// Per-state item counts, for the `/status` endpoint. Purely observational —
/// not part of any core invariant.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub target_size: u32,
    pub total: usize,
    pub ready: usize,
    pub checked_out: usize,
    pub queued_checkouts: usize,
    pub draining: bool,
}

enum CreationOutcome {
    Success { id: String, cmd_tx: mpsc::Sender<ItemCommand> },
    Failure(String),
}

/// Handle to a running Pool supervisor. Cloning is cheap; all clones talk
/// to the same supervisor task via its command channel.
#[derive(Clone)]
pub struct Pool {
    name: String,
    cmd_tx: mpsc::Sender<Command>,
    ready_watch: watch::Receiver<usize>,
    target_size: u32,
}

impl Pool {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        name: String,
        config: PoolConfig,
        lifecycle: Lifecycle,
        adapter: Adapter,
        runtime: Arc<dyn ContainerRuntime>,
        emitter: Arc<dyn Emitter>,
        parent_token: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (ready_tx, ready_watch) = watch::channel(0usize);
        let target_size = config.size;
        let token = parent_token.child_token();

        let supervisor = Supervisor {
            name: name.clone(),
            spec: ContainerSpec {
                pool_name: name.clone(),
                image: config.image.clone(),
                env: config.container.env.clone(),
                port: config.port,
            },
            target_size,
            lifecycle: Arc::new(lifecycle),
            adapter: Arc::new(adapter),
            runtime,
            emitter,
            token,
            items: HashMap::new(),
            ready: VecDeque::new(),
            checked_out: HashSet::new(),
            tickets: VecDeque::new(),
            draining: false,
            pending_creates: 0,
            next_retry: None,
            backoff: ExponentialBackoff { max_elapsed_time: None, ..Default::default() },
            ready_tx,
            stop_reply: None,
        };

        tokio::spawn(supervisor.run(cmd_rx));

        Self { name, cmd_tx, ready_watch, target_size }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn checkout(&self, cancel: CancellationToken) -> Result<Params, PoolError> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Checkout { reply: reply_tx }).await.is_err() {
            return Err(PoolError::Draining);
        }
        tokio::select! {
            biased;

            result = &mut reply_rx => result.unwrap_or(Err(PoolError::Cancelled)),

            _ = cancel.cancelled() => {
                // The supervisor may have already committed an item to us in
                // the same instant our own cancellation fired. Don't discard
                // a late `Ok` silently — that would leak the item as
                // permanently checked out. Drain the reply and, if it did
                // land, route the item straight back to the pool.
                match reply_rx.await {
                    Ok(Ok(params)) => {
                        let _ = self.return_item(params.container_id.clone()).await;
                        Err(PoolError::Cancelled)
                    }
                    _ => Err(PoolError::Cancelled),
                }
            }
        }
    }

    pub async fn return_item(&self, item_id: String) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Return { item_id: item_id.clone(), reply: reply_tx })
            .await
            .is_err()
        {
            return Err(PoolError::NotCheckedOut(item_id));
        }
        reply_rx.await.unwrap_or(Err(PoolError::NotCheckedOut(item_id)))
    }

    /// Non-blocking readiness check, used by the `/healthz` endpoint.
    pub fn is_ready(&self) -> bool {
        *self.ready_watch.borrow() >= self.target_size as usize
    }

    /// Blocks until the pool has reached target size in ready-or-checked-out items.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_watch.clone();
        let target = self.target_size as usize;
        if *rx.borrow() >= target {
            return;
        }
        let _ = rx.wait_for(|count| *count >= target).await;
    }

    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Snapshot of per-state item counts, for the checkout RPC's `/status` route.
    pub async fn status(&self) -> PoolStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Status { reply: reply_tx }).await.is_err() {
            return PoolStatus {
                target_size: self.target_size,
                total: 0,
                ready: 0,
                checked_out: 0,
                queued_checkouts: 0,
                draining: true,
            };
        }
        reply_rx.await.unwrap_or(PoolStatus {
            target_size: self.target_size,
            total: 0,
            ready: 0,
            checked_out: 0,
            queued_checkouts: 0,
            draining: true,
        })
    }
}

struct Supervisor {
    name: String,
    spec: ContainerSpec,
    target_size: u32,
    lifecycle: Arc<Lifecycle>,
    adapter: Arc<Adapter>,
    runtime: Arc<dyn ContainerRuntime>,
    emitter: Arc<dyn Emitter>,
    token: CancellationToken,
    items: HashMap<String, mpsc::Sender<ItemCommand>>,
    ready: VecDeque<(String, Params)>,
    checked_out: HashSet<String>,
    tickets: VecDeque<oneshot::Sender<Result<Params, PoolError>>>,
    draining: bool,
    pending_creates: u32,
    next_retry: Option<Instant>,
    backoff: ExponentialBackoff,
    ready_tx: watch::Sender<usize>,
    stop_reply: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let (item_event_tx, mut item_event_rx) = mpsc::channel::<ItemEvent>(128);
        let (create_tx, mut create_rx) = mpsc::channel::<CreationOutcome>(16);

        loop {
            self.maintain_population(&item_event_tx, &create_tx);

            let retry_sleep = match self.next_retry {
                Some(at) => {
                    let now = Instant::now();
                    if at > now { at - now } else { Duration::ZERO }
                }
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                biased;

                _ = self.token.cancelled(), if !self.draining => {
                    self.begin_draining();
                }

                Some(cmd) = cmd_rx.recv() => self.handle_command(cmd),

                Some(outcome) = create_rx.recv() => self.handle_creation_outcome(outcome),

                Some(event) = item_event_rx.recv() => self.handle_item_event(event),

                _ = tokio::time::sleep(retry_sleep), if self.next_retry.is_some() => {
                    self.next_retry = None;
                }

                else => break,
            }

            if self.draining && self.items.is_empty() {
                self.finish_draining();
                break;
            }
        }
    }

    fn settled_count(&self) -> usize {
        self.ready.len() + self.checked_out.len()
    }

    fn publish_settled(&self) {
        let _ = self.ready_tx.send(self.settled_count());
    }

    fn maintain_population(&mut self, item_event_tx: &mpsc::Sender<ItemEvent>, create_tx: &mpsc::Sender<CreationOutcome>) {
        if self.draining {
            return;
        }
        if let Some(at) = self.next_retry {
            if Instant::now() < at {
                return;
            }
        }

        let active = self.items.len() as u32 + self.pending_creates;
        let deficit = self.target_size.saturating_sub(active);

        for _ in 0..deficit {
            self.pending_creates += 1;
            let runtime = self.runtime.clone();
            let spec = self.spec.clone();
            let pool_name = self.name.clone();
            let lifecycle = self.lifecycle.clone();
            let adapter = self.adapter.clone();
            let emitter = self.emitter.clone();
            let item_event_tx = item_event_tx.clone();
            let create_tx = create_tx.clone();
            let token = self.token.clone();

            tokio::spawn(async move {
                match runtime.create(&spec).await {
                    Ok(handle) => {
                        let id = handle.id().to_string();
                        let cmd_tx = item::spawn(
                            id.clone(),
                            pool_name,
                            handle,
                            lifecycle,
                            adapter,
                            emitter,
                            item_event_tx,
                            token,
                        );
                        let _ = create_tx.send(CreationOutcome::Success { id, cmd_tx }).await;
                    }
                    Err(e) => {
                        let _ = create_tx.send(CreationOutcome::Failure(e.to_string())).await;
                    }
                }
            });
        }
    }

    fn handle_creation_outcome(&mut self, outcome: CreationOutcome) {
        self.pending_creates = self.pending_creates.saturating_sub(1);
        match outcome {
            CreationOutcome::Success { id, cmd_tx } => {
                self.backoff.reset();
                self.next_retry = None;
                if self.draining {
                    let tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(ItemCommand::Kill).await;
                    });
                }
                self.items.insert(id, cmd_tx);
            }
            CreationOutcome::Failure(error) => {
                warn!(pool = %self.name, error = %error, "container creation failed");
                self.emitter.emit(PoolEvent::PopulationError { pool: self.name.clone(), error: error.clone() });
                let delay = self.backoff.next_backoff().unwrap_or(CREATE_BACKOFF_CEILING).min(CREATE_BACKOFF_CEILING);
                self.next_retry = Some(Instant::now() + delay);
            }
        }
    }

    fn handle_item_event(&mut self, event: ItemEvent) {
        match event {
            ItemEvent::Ready { item_id, params } => self.deliver_or_enqueue(item_id, params),
            ItemEvent::Exited { item_id } => {
                self.items.remove(&item_id);
                self.checked_out.remove(&item_id);
                self.ready.retain(|(id, _)| id != &item_id);
                self.publish_settled();
            }
        }
    }

    /// An item just became ready (or re-ready after reset). Hand it
    /// straight to the oldest live ticket, skipping any whose caller has
    /// already gone away (cancelled); otherwise park it on the ready list.
    fn deliver_or_enqueue(&mut self, item_id: String, params: Params) {
        while let Some(ticket) = self.tickets.pop_front() {
            match ticket.send(Ok(params.clone())) {
                Ok(()) => {
                    self.checked_out.insert(item_id.clone());
                    if let Some(cmd_tx) = self.items.get(&item_id) {
                        let cmd_tx = cmd_tx.clone();
                        tokio::spawn(async move {
                            let _ = cmd_tx.send(ItemCommand::Checkout).await;
                        });
                    }
                    self.publish_settled();
                    return;
                }
                Err(_canceled) => continue,
            }
        }
        self.ready.push_back((item_id, params));
        self.publish_settled();
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Checkout { reply } => {
                if self.draining {
                    let _ = reply.send(Err(PoolError::Draining));
                    return;
                }
                if let Some((item_id, params)) = self.ready.pop_front() {
                    match reply.send(Ok(params.clone())) {
                        Ok(()) => {
                            self.checked_out.insert(item_id.clone());
                            if let Some(cmd_tx) = self.items.get(&item_id) {
                                let cmd_tx = cmd_tx.clone();
                                tokio::spawn(async move {
                                    let _ = cmd_tx.send(ItemCommand::Checkout).await;
                                });
                            }
                            self.publish_settled();
                        }
                        Err(_canceled) => {
                            self.ready.push_front((item_id, params));
                        }
                    }
                } else {
                    self.tickets.push_back(reply);
                }
            }
            Command::Return { item_id, reply } => {
                if self.checked_out.remove(&item_id) {
                    if let Some(cmd_tx) = self.items.get(&item_id) {
                        let cmd_tx = cmd_tx.clone();
                        tokio::spawn(async move {
                            let _ = cmd_tx.send(ItemCommand::Return).await;
                        });
                    }
                    self.publish_settled();
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(PoolError::NotCheckedOut(item_id)));
                }
            }
            Command::Stop { reply } => {
                self.stop_reply = Some(reply);
                self.begin_draining();
            }
            Command::Status { reply } => {
                let _ = reply.send(PoolStatus {
                    target_size: self.target_size,
                    total: self.items.len(),
                    ready: self.ready.len(),
                    checked_out: self.checked_out.len(),
                    queued_checkouts: self.tickets.len(),
                    draining: self.draining,
                });
            }
        }
    }

    fn begin_draining(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        info!(pool = %self.name, "pool draining");

        while let Some(ticket) = self.tickets.pop_front() {
            let _ = ticket.send(Err(PoolError::Draining));
        }

        // Checked-out items are left alone here: killing them now would yank
        // a container out from under an active checkout. Command::Return's
        // existing reset-then-kill path (and the Item's own cancellation
        // guard) tears each one down once its holder gives it back.
        for (id, cmd_tx) in &self.items {
            if self.checked_out.contains(id) {
                continue;
            }
            let cmd_tx = cmd_tx.clone();
            tokio::spawn(async move {
                let _ = cmd_tx.send(ItemCommand::Kill).await;
            });
        }

        if self.items.is_empty() {
            self.finish_draining();
        }
    }

    fn finish_draining(&mut self) {
        self.emitter.emit(PoolEvent::Done { pool: self.name.clone() });
        if let Some(reply) = self.stop_reply.take() {
            let _ = reply.send(());
        }
    }
}
