//! UI Emitter: a passive, non-blocking sink for pool/item status events.
//!
//! Every event here is also logged via `tracing` at the point of
//! transition (see `item.rs`/`pool.rs`); the emitter is a second, narrower
//! consumer for an optional terminal UI, not the only observability
//! surface.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PoolEvent {
    ItemStateChanged { pool: String, item_id: String, state: &'static str },
    ActionAttempt { pool: String, item_id: String, phase: &'static str, attempt: u32, retries: u32 },
    ActionResult {
        pool: String,
        item_id: String,
        phase: &'static str,
        attempt: u32,
        retries: u32,
        error: Option<String>,
    },
    PopulationError { pool: String, error: String },
    /// Purely a status event with no further observable behavior, kept
    /// for terminal-UI rendering parity with the system this was grounded
    /// on.
    Done { pool: String },
}

/// Safe for concurrent, non-blocking event submission; must never block a
/// producer.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: PoolEvent);
}

/// Headless/test default: discards everything.
pub struct NoopEmitter;

impl Emitter for NoopEmitter {
    fn emit(&self, _event: PoolEvent) {}
}

/// `--gui`-gated terminal renderer: one line per event, printed directly
/// to stdout rather than interleaved with `tracing` output.
pub struct TerminalEmitter;

impl Emitter for TerminalEmitter {
    fn emit(&self, event: PoolEvent) {
        match event {
            PoolEvent::ItemStateChanged { pool, item_id, state } => {
                println!("[{pool}] {item_id} -> {state}");
            }
            PoolEvent::ActionAttempt { pool, item_id, phase, attempt, retries } => {
                println!("[{pool}] {item_id} {phase} attempt {attempt}/{retries}");
            }
            PoolEvent::ActionResult { pool, item_id, phase, attempt, retries, error } => match error {
                Some(e) => println!("[{pool}] {item_id} {phase} attempt {attempt}/{retries} failed: {e}"),
                None => println!("[{pool}] {item_id} {phase} attempt {attempt}/{retries} ok"),
            },
            PoolEvent::PopulationError { pool, error } => {
                println!("[{pool}] population error: {error}");
            }
            PoolEvent::Done { pool } => {
                println!("[{pool}] done");
            }
        }
    }
}

pub fn noop() -> Arc<dyn Emitter> {
    Arc::new(NoopEmitter)
}
