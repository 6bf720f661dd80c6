//! APISIX custom resources
//!
//! CRD types for both served schema versions and the watcher that turns
//! object changes into sync engine events.

pub mod crd;
pub mod watcher;
