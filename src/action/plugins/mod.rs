//! Process-global plugin registry: maps a configured action `type` string
//! to a parser producing a runnable `Action`. Populated once at process
//! start via `register_builtin_plugins`, never mutated afterward.

pub mod exec;
pub mod fake;
pub mod http;
pub mod service_ping;
pub mod tcp;

use std::collections::HashMap;

use thiserror::Error;

use crate::action::BoxedAction;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid configuration for plugin `{plugin}`: {reason}")]
    InvalidConfig { plugin: String, reason: String },
}

pub type ParseFn = Box<dyn Fn(serde_json::Value, Arc<dyn ContainerRuntime>) -> Result<BoxedAction, PluginError> + Send + Sync>;

/// Registry of `(type-name -> parser)` pairs. Built once at startup and
/// shared read-only across all pools.
#[derive(Default)]
pub struct Registry {
    parsers: HashMap<String, ParseFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &str, parser: ParseFn) {
        self.parsers.insert(type_name.to_string(), parser);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.parsers.contains_key(type_name)
    }

    pub fn parse(
        &self,
        type_name: &str,
        raw: serde_json::Value,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Option<Result<BoxedAction, PluginError>> {
        self.parsers.get(type_name).map(|parser| parser(raw, runtime))
    }
}

/// Registers every built-in action plugin. Called once from `main`.
pub fn register_builtin_plugins(registry: &mut Registry) {
    tcp::register(registry);
    http::register(registry);
    exec::register(registry);
    service_ping::register(registry);
    fake::register(registry);
}
