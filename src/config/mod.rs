//! Pool-set configuration loading
//!
//! Pool definitions are declared in a TOML file and parsed into a single
//! `Deserialize` struct tree, mirroring the way the daemon this crate was
//! grounded on loads its own TOML configuration.

mod error;

pub use error::ConfigError;

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Top-level configuration: one entry per named pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSetConfig {
    pub pools: HashMap<String, PoolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub image: String,

    #[serde(default = "default_size")]
    pub size: u32,

    pub port: u16,

    #[serde(default)]
    pub container: ContainerConfig,

    pub params: ParamsConfig,

    #[serde(default)]
    pub actions: ActionsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamsConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    pub url: String,

    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionsConfig {
    pub healthcheck: Option<ActionConfig>,
    pub initialize: Option<ActionConfig>,
    pub reset: Option<ActionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    pub r#type: String,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub delay_secs: u64,

    #[serde(flatten)]
    pub plugin_fields: serde_json::Value,
}

fn default_size() -> u32 {
    1
}

fn default_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    10
}

const PLACEHOLDER_FIELDS: &[&str] = &["Hostname", "Port", "Username", "Password", "Database"];

impl PoolSetConfig {
    /// Load and validate a pool-set configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: PoolSetConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.pools.is_empty() {
            errors.push("no pools defined".to_string());
        }

        for (name, pool) in &self.pools {
            if pool.size < 1 {
                errors.push(format!("pool `{name}`: size must be >= 1"));
            }
            if pool.port == 0 {
                errors.push(format!("pool `{name}`: port must be non-zero"));
            }
            if pool.image.trim().is_empty() {
                errors.push(format!("pool `{name}`: image must not be empty"));
            }
            validate_url_template(name, &pool.params.url, &mut errors);
            for (phase, action) in [
                ("healthcheck", &pool.actions.healthcheck),
                ("initialize", &pool.actions.initialize),
                ("reset", &pool.actions.reset),
            ] {
                if let Some(action) = action {
                    if action.r#type.trim().is_empty() {
                        errors.push(format!("pool `{name}` action `{phase}`: type must not be empty"));
                    }
                    if action.retries < 1 {
                        errors.push(format!("pool `{name}` action `{phase}`: retries must be >= 1"));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn validate_url_template(pool: &str, template: &str, errors: &mut Vec<String>) {
    let re = regex::Regex::new(r"\{\{\.(\w+)\}\}").expect("static regex is valid");
    for caps in re.captures_iter(template) {
        let field = &caps[1];
        if !PLACEHOLDER_FIELDS.contains(&field) {
            errors.push(format!(
                "pool `{pool}`: url template references unknown placeholder `{{{{.{field}}}}}`"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_valid_config() {
        let file = write_temp(
            r#"
            [pools.postgres]
            image = "postgres:16"
            size = 2
            port = 5432

            [pools.postgres.params]
            username = "test"
            password = "test"
            database = "test"
            url = "postgres://{{.Username}}:{{.Password}}@{{.Hostname}}:{{.Port}}/{{.Database}}"
            "#,
        );
        let config = PoolSetConfig::load(file.path()).unwrap();
        let pool = config.pools.get("postgres").unwrap();
        assert_eq!(pool.size, 2);
        assert_eq!(pool.port, 5432);
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let file = write_temp(
            r#"
            [pools.postgres]
            image = "postgres:16"
            size = 1
            port = 5432

            [pools.postgres.params]
            url = "postgres://{{.Bogus}}/"
            "#,
        );
        let err = PoolSetConfig::load(file.path()).unwrap_err();
        match err {
            ConfigError::Validation(errs) => {
                assert!(errs.iter().any(|e| e.contains("Bogus")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn collects_all_validation_errors_at_once() {
        let file = write_temp(
            r#"
            [pools.broken]
            image = ""
            size = 0
            port = 0

            [pools.broken.params]
            url = ""
            "#,
        );
        let err = PoolSetConfig::load(file.path()).unwrap_err();
        match err {
            ConfigError::Validation(errs) => assert!(errs.len() >= 3),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
