//! Gateway admin API
//!
//! The reconciler only talks to the gateway through [`AdminApi`]. Two
//! implementations ship with the controller: [`AdminClient`] speaks the APISIX
//! admin HTTP API, [`InMemoryGateway`] keeps rules in process (tests, dry runs).

pub mod client;
pub mod memory;

use crate::error::AdminError;
use async_trait::async_trait;
use common::PluginMap;
use std::collections::BTreeMap;

pub use client::AdminClient;
pub use memory::{AdminCall, InMemoryGateway};

/// Global rules currently held by the gateway, keyed by id
pub type GatewayRules = BTreeMap<String, PluginMap>;

/// Admin operations on the gateway's global rules
///
/// `upsert` replaces the whole object. `delete` of an unknown id succeeds.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn upsert(&self, id: &str, plugins: &PluginMap) -> Result<(), AdminError>;

    async fn delete(&self, id: &str) -> Result<(), AdminError>;

    async fn list(&self) -> Result<GatewayRules, AdminError>;
}
