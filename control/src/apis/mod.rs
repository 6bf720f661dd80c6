//! Kubernetes API integrations
//!
//! Custom resource types, watchers and controller metrics.

pub mod apisix;
pub mod metrics;
