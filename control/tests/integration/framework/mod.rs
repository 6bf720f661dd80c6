//! Test framework core infrastructure

pub mod fixtures;

use control::admin::{AdminApi, GatewayRules, InMemoryGateway};
use control::config::SyncConfig;
use control::sync::task::EventKind;
use control::sync::SyncEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Test result type
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Test context holding the engine under test and its gateway
pub struct TestContext {
    pub engine: SyncEngine,

    /// Gateway the engine writes to
    pub gateway: Arc<InMemoryGateway>,

    pub sync: SyncConfig,

    /// How long to wait for the engine to go idle
    pub timeout: Duration,
}

impl TestContext {
    /// Start an engine against an empty gateway
    pub async fn new(config: &super::TestConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::with_gateway(
            Arc::new(InMemoryGateway::new()),
            config.sync.clone(),
            config.convergence_timeout(),
        )
        .await
    }

    async fn with_gateway(
        gateway: Arc<InMemoryGateway>,
        sync: SyncConfig,
        timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let admin: Arc<dyn AdminApi> = gateway.clone();
        let engine = SyncEngine::start(admin, &sync).await?;
        Ok(Self {
            engine,
            gateway,
            sync,
            timeout,
        })
    }

    /// Replace the engine with a fresh one started against `gateway`
    pub async fn start_with(&mut self, gateway: Arc<InMemoryGateway>) -> TestResult {
        self.engine.shutdown();
        *self = Self::with_gateway(gateway, self.sync.clone(), self.timeout).await?;
        Ok(())
    }

    /// Fresh engine and an empty gateway
    pub async fn reset(&mut self) -> TestResult {
        self.start_with(Arc::new(InMemoryGateway::new())).await
    }

    /// Simulate a controller restart: new engine, same gateway contents
    pub async fn restart(&mut self) -> TestResult {
        let rules: GatewayRules = self.gateway.rules();
        self.start_with(Arc::new(InMemoryGateway::with_rules(rules)))
            .await
    }

    /// Feed a manifest to the engine as if a watcher observed it
    pub fn observe(&self, manifest: &str, kind: EventKind) -> TestResult {
        let event = fixtures::event(manifest, kind)?;
        self.engine.handle_event(event)?;
        Ok(())
    }

    pub fn create(&self, manifest: &str) -> TestResult {
        self.observe(manifest, EventKind::Create)
    }

    pub fn update(&self, manifest: &str) -> TestResult {
        self.observe(manifest, EventKind::Update)
    }

    pub fn delete(&self, manifest: &str) -> TestResult {
        self.observe(manifest, EventKind::Delete)
    }

    /// Wait until the engine has no queued or in-flight work
    pub async fn converge(&self) -> TestResult {
        if self.engine.wait_idle(self.timeout).await {
            Ok(())
        } else {
            Err(format!(
                "engine still busy after {:?} ({} ids pending)",
                self.timeout,
                self.engine.pending()
            )
            .into())
        }
    }

    /// Poll `condition` until it holds or the timeout elapses
    pub async fn wait_for<F>(&self, what: &str, mut condition: F) -> TestResult
    where
        F: FnMut(&TestContext) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            if condition(self) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(format!("timed out waiting for {}", what).into())
    }
}
