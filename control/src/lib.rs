//! Tether Control Plane Library
//!
//! Keeps an APISIX gateway's global rules in sync with ApisixGlobalRule and
//! ApisixClusterConfig resources.

pub mod admin;
pub mod apis;
pub mod config;
pub mod error;
pub mod status_server;
pub mod sync;

mod lock;
