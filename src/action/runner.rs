//! Action Runner: retry/timeout/delay semantics around a single `Action`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::Params;
use crate::config::ActionConfig;

use super::{Action, ActionError};

/// Resolved, runtime configuration for one action invocation. Parsed out
/// of `config::ActionConfig`; `retries` is always >= 1.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub retries: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl From<&ActionConfig> for RunnerConfig {
    fn from(config: &ActionConfig) -> Self {
        Self {
            retries: config.retries.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

/// Outcome of one `action-attempt` emitted for the UI / logging.
#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub attempt: u32,
    pub retries: u32,
}

/// Outcome of one completed attempt.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    pub attempt: u32,
    pub retries: u32,
    pub error: Option<String>,
}

/// Callback invoked for every attempt/result event; kept generic over a
/// closure so callers (the Item actor) can forward these straight to the
/// UI emitter without the runner knowing about `PoolEvent`.
pub async fn run_action(
    action: &dyn Action,
    params: &Params,
    config: &RunnerConfig,
    parent: &CancellationToken,
    mut on_attempt: impl FnMut(AttemptEvent),
    mut on_result: impl FnMut(ResultEvent),
) -> Result<(), ActionError> {
    if parent.is_cancelled() {
        return Err(ActionError::Cancelled);
    }

    let mut last_error = ActionError::Failed("action never attempted".to_string());

    for attempt in 1..=config.retries {
        on_attempt(AttemptEvent { attempt, retries: config.retries });

        let attempt_ctx = parent.child_token();
        let result = run_one_attempt(action, params, config.timeout, parent, &attempt_ctx).await;

        let error_text = result.as_ref().err().map(|e| e.to_string());
        on_result(ResultEvent { attempt, retries: config.retries, error: error_text });

        match result {
            Ok(()) => return Ok(()),
            Err(ActionError::Cancelled) => return Err(ActionError::Cancelled),
            Err(e) => {
                warn!(attempt, retries = config.retries, error = %e, "action attempt failed");
                last_error = e;
            }
        }

        if attempt < config.retries && !config.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(config.delay) => {}
                _ = parent.cancelled() => return Err(ActionError::Cancelled),
            }
        }
    }

    debug!(retries = config.retries, "action exhausted all retries");
    Err(last_error)
}

async fn run_one_attempt(
    action: &dyn Action,
    params: &Params,
    timeout: Duration,
    parent: &CancellationToken,
    attempt_ctx: &CancellationToken,
) -> Result<(), ActionError> {
    tokio::select! {
        result = action.run(attempt_ctx.clone(), params) => result,
        _ = tokio::time::sleep(timeout) => {
            attempt_ctx.cancel();
            Err(ActionError::Failed(format!("attempt timed out after {:?}", timeout)))
        }
        _ = parent.cancelled() => {
            attempt_ctx.cancel();
            Err(ActionError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn params() -> Params {
        Params {
            container_id: "c1".into(),
            hostname: "h".into(),
            port: 1,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            url: String::new(),
            extra: Default::default(),
            handle: None,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let action = FnAction(move |_ctx, _params| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let config = RunnerConfig { retries: 3, timeout: Duration::from_secs(1), delay: Duration::ZERO };
        let parent = CancellationToken::new();
        let result = run_action(&action, &params(), &config, &parent, |_| {}, |_| {}).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let action = FnAction(move |_ctx, _params| {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 { Err(ActionError::Failed("not yet".into())) } else { Ok(()) }
            }
        });
        let config = RunnerConfig { retries: 2, timeout: Duration::from_secs(1), delay: Duration::ZERO };
        let parent = CancellationToken::new();
        let result = run_action(&action, &params(), &config, &parent, |_| {}, |_| {}).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let action = FnAction(move |_ctx, _params| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ActionError::Failed("nope".into()))
            }
        });
        let config = RunnerConfig { retries: 3, timeout: Duration::from_secs(1), delay: Duration::ZERO };
        let parent = CancellationToken::new();
        let result = run_action(&action, &params(), &config, &parent, |_| {}, |_| {}).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandons_attempt_on_timeout() {
        let action = FnAction(|_ctx, _params| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        let config = RunnerConfig { retries: 1, timeout: Duration::from_millis(10), delay: Duration::ZERO };
        let parent = CancellationToken::new();
        let result = run_action(&action, &params(), &config, &parent, |_| {}, |_| {}).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancelled_parent_aborts_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let action = FnAction(move |_ctx, _params| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ActionError::Failed("nope".into()))
            }
        });
        let config = RunnerConfig { retries: 3, timeout: Duration::from_secs(1), delay: Duration::ZERO };
        let parent = CancellationToken::new();
        parent.cancel();
        let result = run_action(&action, &params(), &config, &parent, |_| {}, |_| {}).await;
        assert!(matches!(result, Err(ActionError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
