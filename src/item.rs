//! Item actor: the per-container state machine.
//!
//! A single-owner serial execution context. It receives events from three
//! sources — the Container's event stream, commands posted by its Pool,
//! and completions of async action work it dispatched to auxiliary
//! tasks — and keeps the state machine's transitions totally ordered by
//! never mutating state outside this one task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::runner::{run_action, AttemptEvent, ResultEvent, RunnerConfig};
use crate::action::{Action, ActionError};
use crate::adapter::{Adapter, Params};
use crate::events::{Emitter, PoolEvent};
use crate::pool::Lifecycle;
use crate::runtime::{ContainerEvent, ContainerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Created,
    Started,
    Live,
    Ready,
    CheckedOut,
    Resetting,
    Exiting,
    Exited,
}

impl ItemState {
    fn as_str(&self) -> &'static str {
        match self {
            ItemState::Created => "created",
            ItemState::Started => "started",
            ItemState::Live => "live",
            ItemState::Ready => "ready",
            ItemState::CheckedOut => "checked-out",
            ItemState::Resetting => "resetting",
            ItemState::Exiting => "exiting",
            ItemState::Exited => "exited",
        }
    }
}

/// Commands a Pool posts to an Item it owns.
#[derive(Debug)]
pub enum ItemCommand {
    /// The Pool has matched this (ready) item to a waiting caller.
    Checkout,
    /// The caller returned the item.
    Return,
    /// Force the item out regardless of current state.
    Kill,
}

/// Events an Item reports back to its Pool. Deliberately narrow: the Pool
/// only needs to know when an item becomes available and when it's gone
/// for good — everything else is internal to the Item's own state machine.
#[derive(Debug)]
pub enum ItemEvent {
    Ready { item_id: String, params: Params },
    Exited { item_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Healthcheck,
    Initialize,
    Reset,
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Phase::Healthcheck => "healthcheck",
            Phase::Initialize => "initialize",
            Phase::Reset => "reset",
        }
    }
}

struct ActionOutcome {
    phase: Phase,
    result: Result<(), ActionError>,
}

/// Spawns the Item actor and returns the command channel the Pool uses to
/// drive it.
pub fn spawn(
    id: String,
    pool_name: String,
    handle: Arc<dyn ContainerHandle>,
    lifecycle: Arc<Lifecycle>,
    adapter: Arc<Adapter>,
    emitter: Arc<dyn Emitter>,
    pool_tx: mpsc::Sender<ItemEvent>,
    parent_token: CancellationToken,
) -> mpsc::Sender<ItemCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let actor = ItemActor {
        id,
        pool_name,
        handle,
        lifecycle,
        adapter,
        emitter,
        pool_tx,
        token: parent_token.child_token(),
        state: ItemState::Created,
        last_params: None,
    };
    tokio::spawn(actor.run(cmd_rx));
    cmd_tx
}

struct ItemActor {
    id: String,
    pool_name: String,
    handle: Arc<dyn ContainerHandle>,
    lifecycle: Arc<Lifecycle>,
    adapter: Arc<Adapter>,
    emitter: Arc<dyn Emitter>,
    pool_tx: mpsc::Sender<ItemEvent>,
    token: CancellationToken,
    state: ItemState,
    last_params: Option<Params>,
}

impl ItemActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ItemCommand>) {
        let mut container_events = self.handle.events();
        let (action_tx, mut action_rx) = mpsc::channel::<ActionOutcome>(4);

        self.set_state(ItemState::Created);

        if let Err(e) = self.handle.start().await {
            warn!(item = %self.id, error = %e, "container start failed");
            self.finalize_exit().await;
            return;
        }
        self.set_state(ItemState::Started);

        loop {
            if self.state == ItemState::Exited {
                break;
            }

            tokio::select! {
                biased;

                // A drain signal must not yank a container out from under an
                // active checkout; the holder's eventual Return (or Kill
                // posted straight to this item by the Pool once it's not
                // checked out) is what tears it down.
                _ = self.token.cancelled(), if !matches!(self.state, ItemState::Exiting | ItemState::Exited | ItemState::CheckedOut) => {
                    self.kill().await;
                }

                Some(cmd) = cmd_rx.recv() => {
                    self.handle_command(cmd, &action_tx).await;
                }

                Some(event) = container_events.recv() => {
                    self.handle_container_event(event, &action_tx).await;
                }

                Some(outcome) = action_rx.recv() => {
                    self.handle_action_outcome(outcome, &action_tx).await;
                }

                else => break,
            }
        }

        let _ = self.pool_tx.send(ItemEvent::Exited { item_id: self.id.clone() }).await;
    }

    fn set_state(&mut self, state: ItemState) {
        self.state = state;
        debug!(item = %self.id, pool = %self.pool_name, state = state.as_str(), "item state transition");
        self.emitter.emit(PoolEvent::ItemStateChanged {
            pool: self.pool_name.clone(),
            item_id: self.id.clone(),
            state: state.as_str(),
        });
    }

    /// Removes the container for good and marks the item terminal. Every
    /// path that ends an item's life — failed start, failed reconciliation,
    /// or a confirmed container exit — funnels through here so a stopped
    /// container never lingers unremoved.
    async fn finalize_exit(&mut self) {
        if let Err(e) = self.handle.destroy().await {
            warn!(item = %self.id, error = %e, "failed to destroy container");
        }
        self.set_state(ItemState::Exited);
    }

    async fn kill(&mut self) {
        if matches!(self.state, ItemState::Exiting | ItemState::Exited) {
            return;
        }
        let _ = self.handle.stop().await;
        self.set_state(ItemState::Exiting);
    }

    async fn handle_command(&mut self, cmd: ItemCommand, action_tx: &mpsc::Sender<ActionOutcome>) {
        match cmd {
            ItemCommand::Checkout => {
                if self.state == ItemState::Ready {
                    self.set_state(ItemState::CheckedOut);
                }
            }
            ItemCommand::Return => {
                if self.state == ItemState::CheckedOut {
                    match &self.lifecycle.reset {
                        Some((action, config)) => {
                            self.set_state(ItemState::Resetting);
                            self.spawn_action(Phase::Reset, action.clone(), config.clone(), action_tx.clone());
                        }
                        None => self.kill().await,
                    }
                }
            }
            ItemCommand::Kill => self.kill().await,
        }
    }

    async fn handle_container_event(&mut self, event: ContainerEvent, action_tx: &mpsc::Sender<ActionOutcome>) {
        match event {
            ContainerEvent::Started if self.state == ItemState::Started => {
                match &self.lifecycle.healthcheck {
                    Some((action, config)) => {
                        self.spawn_action(Phase::Healthcheck, action.clone(), config.clone(), action_tx.clone());
                    }
                    None => self.advance_to_live(action_tx).await,
                }
            }
            ContainerEvent::StartFailed(reason) => {
                warn!(item = %self.id, reason, "container reported start failure");
                self.finalize_exit().await;
            }
            ContainerEvent::ExitSuccess | ContainerEvent::ExitError(_) => {
                if self.state != ItemState::Exiting {
                    // Container exited unexpectedly (e.g. crash while checked out).
                    // The holder's next I/O fails naturally; we just account for it.
                    warn!(item = %self.id, state = self.state.as_str(), "container exited unexpectedly");
                }
                self.finalize_exit().await;
            }
            ContainerEvent::Started => {}
        }
    }

    async fn advance_to_live(&mut self, action_tx: &mpsc::Sender<ActionOutcome>) {
        self.set_state(ItemState::Live);
        match &self.lifecycle.initialize {
            Some((action, config)) => {
                self.spawn_action(Phase::Initialize, action.clone(), config.clone(), action_tx.clone());
            }
            None => self.advance_to_ready().await,
        }
    }

    async fn advance_to_ready(&mut self) {
        self.set_state(ItemState::Ready);
        if let Some(params) = self.last_params.clone() {
            let _ = self.pool_tx.send(ItemEvent::Ready { item_id: self.id.clone(), params }).await;
        } else {
            warn!(item = %self.id, "reached ready without connection params; inspecting now");
            self.refresh_params().await;
            if let Some(params) = self.last_params.clone() {
                let _ = self.pool_tx.send(ItemEvent::Ready { item_id: self.id.clone(), params }).await;
            }
        }
    }

    async fn refresh_params(&mut self) {
        match self.handle.inspect().await {
            Ok(snapshot) => {
                self.last_params = Some(self.adapter.build(&self.id, &snapshot, Some(self.handle.clone())));
            }
            Err(e) => warn!(item = %self.id, error = %e, "failed to inspect container for connection params"),
        }
    }

    fn spawn_action(
        &mut self,
        phase: Phase,
        action: Arc<dyn Action>,
        config: RunnerConfig,
        action_tx: mpsc::Sender<ActionOutcome>,
    ) {
        let handle = self.handle.clone();
        let emitter = self.emitter.clone();
        let pool_name = self.pool_name.clone();
        let item_id = self.id.clone();
        let token = self.token.clone();
        let adapter = self.adapter.clone();
        let cached_params = self.last_params.clone();

        tokio::spawn(async move {
            let params = match cached_params {
                Some(mut p) => {
                    p.handle = Some(handle.clone());
                    p
                }
                None => match handle.inspect().await {
                    Ok(snapshot) => adapter.build(&item_id, &snapshot, Some(handle.clone())),
                    Err(e) => {
                        let _ = action_tx
                            .send(ActionOutcome { phase, result: Err(ActionError::Failed(e.to_string())) })
                            .await;
                        return;
                    }
                },
            };

            let pool_name_attempt = pool_name.clone();
            let item_id_attempt = item_id.clone();
            let emitter_attempt = emitter.clone();
            let phase_label = phase.label();

            let pool_name_result = pool_name.clone();
            let item_id_result = item_id.clone();
            let emitter_result = emitter.clone();

            let result = run_action(
                action.as_ref(),
                &params,
                &config,
                &token,
                move |attempt: AttemptEvent| {
                    emitter_attempt.emit(PoolEvent::ActionAttempt {
                        pool: pool_name_attempt.clone(),
                        item_id: item_id_attempt.clone(),
                        phase: phase_label,
                        attempt: attempt.attempt,
                        retries: attempt.retries,
                    });
                },
                move |result: ResultEvent| {
                    emitter_result.emit(PoolEvent::ActionResult {
                        pool: pool_name_result.clone(),
                        item_id: item_id_result.clone(),
                        phase: phase_label,
                        attempt: result.attempt,
                        retries: result.retries,
                        error: result.error.clone(),
                    });
                },
            )
            .await;

            let _ = action_tx.send(ActionOutcome { phase, result }).await;
        });
    }

    async fn handle_action_outcome(&mut self, outcome: ActionOutcome, action_tx: &mpsc::Sender<ActionOutcome>) {
        let ActionOutcome { phase, result } = outcome;
        match (phase, result) {
            (Phase::Healthcheck, Ok(())) => self.advance_to_live(action_tx).await,
            (Phase::Healthcheck, Err(e)) => {
                warn!(item = %self.id, error = %e, "healthcheck failed, tearing down");
                self.kill().await;
            }
            (Phase::Initialize, Ok(())) => {
                self.refresh_params().await;
                self.advance_to_ready().await;
            }
            (Phase::Initialize, Err(e)) => {
                warn!(item = %self.id, error = %e, "initialize failed, tearing down");
                self.kill().await;
            }
            (Phase::Reset, Ok(())) => {
                self.refresh_params().await;
                self.advance_to_ready().await;
            }
            (Phase::Reset, Err(e)) => {
                warn!(item = %self.id, error = %e, "reset failed, tearing down");
                self.kill().await;
            }
        }
        info!(item = %self.id, phase = phase.label(), "action settled");
    }
}
