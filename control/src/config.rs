//! Configuration for the Tether controller
//!
//! Every field has a default; `from_env` overrides them from `TETHER_*`
//! environment variables.

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Controller name (used in logs)
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// API version the resource watchers list and watch
    #[serde(default = "default_resource_api_version")]
    pub resource_api_version: String,

    /// Restrict ApisixGlobalRule watching to one namespace (None = all)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Gateway admin API
    #[serde(default)]
    pub admin: AdminConfig,

    /// Scheduler and retry tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Address of the status/metrics HTTP server
    #[serde(default = "default_status_bind_addr")]
    pub status_bind_addr: String,
}

/// Admin API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Base URL, e.g. http://apisix-admin:9180
    #[serde(default = "default_admin_base_url")]
    pub base_url: String,

    /// Sent as X-API-KEY when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// Whole-request timeout in seconds (default: 5s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds (default: 3s)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_admin_base_url() -> String {
    "http://127.0.0.1:9180".to_string()
}

fn default_request_timeout() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    3
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            base_url: default_admin_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Reconciler scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Worker tasks applying reconcile tasks (default: number of CPUs)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts for a transient failure before the id is marked Failed (>= 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound for one reconcile attempt in milliseconds
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    /// Drift resync period in seconds (0 disables)
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Delete gateway rules without a desired counterpart after initial sync
    #[serde(default = "default_true")]
    pub prune_on_startup: bool,
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_apply_timeout_ms() -> u64 {
    10_000
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            apply_timeout_ms: default_apply_timeout_ms(),
            resync_interval_secs: default_resync_interval_secs(),
            prune_on_startup: default_true(),
        }
    }
}

impl SyncConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    /// None when periodic resync is disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

fn default_controller_name() -> String {
    "tether.io/global-rule-controller".to_string()
}

fn default_resource_api_version() -> String {
    "apisix.apache.org/v2".to_string()
}

fn default_status_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            resource_api_version: default_resource_api_version(),
            watch_namespace: None,
            admin: AdminConfig::default(),
            sync: SyncConfig::default(),
            status_bind_addr: default_status_bind_addr(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Controller identity
        if let Some(val) = lookup("TETHER_CONTROLLER_NAME") {
            config.controller_name = val;
        }

        if let Some(val) = lookup("TETHER_RESOURCE_API_VERSION") {
            if common::SchemaVersion::parse(&val).is_none() {
                return Err(ControllerError::Config(format!(
                    "TETHER_RESOURCE_API_VERSION: unsupported version {:?}",
                    val
                )));
            }
            config.resource_api_version = val;
        }

        if let Some(val) = lookup("TETHER_WATCH_NAMESPACE") {
            config.watch_namespace = (!val.is_empty()).then_some(val);
        }

        if let Some(val) = lookup("TETHER_STATUS_BIND_ADDR") {
            config.status_bind_addr = val;
        }

        // Admin API
        if let Some(val) = lookup("TETHER_ADMIN_URL") {
            config.admin.base_url = val.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("TETHER_ADMIN_KEY") {
            config.admin.api_key = (!val.is_empty()).then_some(val);
        }

        if let Some(val) = lookup("TETHER_ADMIN_REQUEST_TIMEOUT_SECS") {
            config.admin.request_timeout_secs = parse_var("TETHER_ADMIN_REQUEST_TIMEOUT_SECS", &val)?;
        }

        if let Some(val) = lookup("TETHER_ADMIN_CONNECT_TIMEOUT_SECS") {
            config.admin.connect_timeout_secs = parse_var("TETHER_ADMIN_CONNECT_TIMEOUT_SECS", &val)?;
        }

        // Sync
        if let Some(val) = lookup("TETHER_WORKERS") {
            config.sync.workers = parse_var::<usize>("TETHER_WORKERS", &val)?.max(1);
        }

        if let Some(val) = lookup("TETHER_MAX_RETRIES") {
            config.sync.max_retries = parse_var("TETHER_MAX_RETRIES", &val)?;
        }

        if let Some(val) = lookup("TETHER_INITIAL_BACKOFF_MS") {
            config.sync.initial_backoff_ms = parse_var("TETHER_INITIAL_BACKOFF_MS", &val)?;
        }

        if let Some(val) = lookup("TETHER_MAX_BACKOFF_MS") {
            config.sync.max_backoff_ms = parse_var("TETHER_MAX_BACKOFF_MS", &val)?;
        }

        if let Some(val) = lookup("TETHER_APPLY_TIMEOUT_MS") {
            config.sync.apply_timeout_ms = parse_var("TETHER_APPLY_TIMEOUT_MS", &val)?;
        }

        if let Some(val) = lookup("TETHER_RESYNC_INTERVAL_SECS") {
            config.sync.resync_interval_secs = parse_var("TETHER_RESYNC_INTERVAL_SECS", &val)?;
        }

        if let Some(val) = lookup("TETHER_PRUNE_ON_STARTUP") {
            config.sync.prune_on_startup = parse_var("TETHER_PRUNE_ON_STARTUP", &val)?;
        }

        if config.sync.max_retries == 0 {
            return Err(ControllerError::Config(
                "TETHER_MAX_RETRIES must be at least 1".to_string(),
            ));
        }

        if config.sync.max_backoff_ms < config.sync.initial_backoff_ms {
            return Err(ControllerError::Config(
                "TETHER_MAX_BACKOFF_MS must be >= TETHER_INITIAL_BACKOFF_MS".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, val: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e| ControllerError::Config(format!("{}: {}", key, e)))
}
