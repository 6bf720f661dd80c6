//! Tether Integration Test Framework
//!
//! Drives the sync engine end to end: declarative resources go in as YAML
//! manifests, global rules come out on an in-memory gateway.
//!
//! ## Architecture
//!
//! - **framework/**: Test context, manifest fixtures and assertions
//! - **scenarios/**: Test scenarios that can be enabled/disabled via config.toml
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test integration_test
//! ```

#![allow(dead_code, clippy::expect_used, clippy::panic, clippy::unwrap_used)]

pub mod framework;
pub mod scenarios;

pub use framework::{TestContext, TestResult};
use control::config::SyncConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Test configuration loaded from config.toml
#[derive(Debug, Deserialize)]
pub struct TestConfig {
    pub scenarios: ScenarioConfig,
    pub sync: SyncConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub global_rule: bool,
    pub cluster_config: bool,
    pub fault_tolerance: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    pub convergence: u64,
}

impl TestConfig {
    /// Load configuration from tests/integration/config.toml
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/integration/config.toml");
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.convergence)
    }
}

/// A test scenario
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    /// Scenario name (used in config and output)
    fn name(&self) -> &str;

    /// Run the scenario
    async fn run(&self, ctx: &mut TestContext) -> TestResult;

    /// Whether config.toml disabled this scenario
    fn should_skip(&self, config: &TestConfig) -> bool;
}
