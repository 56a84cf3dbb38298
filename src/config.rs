use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::auth::{PolicyTable, Role};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "PROCUREMENT";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LARGE_QUANTITY_THRESHOLD: i64 = 10_000;
const DEFAULT_PO_NUMBER_PREFIX: &str = "PO";
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Engine configuration
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct EngineConfig {
    /// Deployment environment name ("development", "test", "production")
    #[validate(length(min = 1))]
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level for the default tracing filter
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Bounded wait for per-order locks, in milliseconds
    #[validate(range(min = 1))]
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Upper bound on a single persistence write, in milliseconds
    #[validate(range(min = 1))]
    #[serde(default = "default_persistence_timeout_ms")]
    pub persistence_timeout_ms: u64,

    /// Line quantities above this produce an advisory warning
    #[validate(range(min = 1))]
    #[serde(default = "default_large_quantity_threshold")]
    pub large_quantity_warning_threshold: i64,

    /// Prefix for generated purchase order numbers
    #[validate(length(min = 1, max = 16))]
    #[serde(default = "default_po_number_prefix")]
    pub po_number_prefix: String,

    /// Per-role approval ceiling overrides in whole currency units. 0 = no cap.
    #[validate(custom = "validate_approval_ceilings")]
    #[serde(default)]
    pub approval_ceilings: HashMap<String, u64>,

    /// Capacity of the domain event channel
    #[validate(custom = "validate_event_channel_capacity")]
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            lock_timeout_ms: default_lock_timeout_ms(),
            persistence_timeout_ms: default_persistence_timeout_ms(),
            large_quantity_warning_threshold: default_large_quantity_threshold(),
            po_number_prefix: default_po_number_prefix(),
            approval_ceilings: HashMap::new(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    /// The standard policy table with this configuration's ceiling overrides applied.
    ///
    /// Role names were checked by validation; unknown names are skipped here.
    pub fn policy_table(&self) -> PolicyTable {
        let ceilings: HashMap<Role, Decimal> = self
            .approval_ceilings
            .iter()
            .filter_map(|(name, ceiling)| {
                Role::from_str(name)
                    .ok()
                    .map(|role| (role, Decimal::from(*ceiling)))
            })
            .collect();
        PolicyTable::standard().with_ceilings(&ceilings)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_persistence_timeout_ms() -> u64 {
    DEFAULT_PERSISTENCE_TIMEOUT_MS
}

fn default_large_quantity_threshold() -> i64 {
    DEFAULT_LARGE_QUANTITY_THRESHOLD
}

fn default_po_number_prefix() -> String {
    DEFAULT_PO_NUMBER_PREFIX.to_string()
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_approval_ceilings(ceilings: &HashMap<String, u64>) -> Result<(), ValidationError> {
    for name in ceilings.keys() {
        if Role::from_str(name).is_err() {
            let mut err = ValidationError::new("approval_ceilings");
            err.message = Some(format!("Unknown role in approval_ceilings: {}", name).into());
            return Err(err);
        }
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("procurement_engine={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads engine configuration from the `config/` directory
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (PROCUREMENT__*)
pub fn load_config() -> Result<EngineConfig, EngineConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same as [`load_config`] with an explicit directory and profile.
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<EngineConfig, EngineConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let engine_config: EngineConfig = config.try_deserialize()?;

    engine_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        EngineConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(engine_config)
}
